//! WebSocket worker: runs gating pipelines on behalf of a remote dispatcher.
//!
//! Each text message carries one request; each `Run` gets exactly one
//! `Output` or `Error` reply tagged with the job key.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};

use gating_core::{run_pipeline, PipelineJob, PipelineOutput};

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Pipelines allowed to run at once across all connections.
    pub workers: usize,
}

/// Messages from dispatcher to worker
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerRequest {
    Run { job: Box<PipelineJob> },
    Ping,
}

/// Messages from worker to dispatcher
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerResponse {
    Output { key: String, output: Box<PipelineOutput> },
    /// The job itself was rejected (bad input); retrying won't help.
    Error { key: Option<String>, message: String },
    Pong,
}

struct ServerState {
    permits: Semaphore,
}

pub fn router(config: ServerConfig) -> Router {
    let state = ServerState { permits: Semaphore::new(config.workers.max(1)) };
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(Arc::new(state))
}

/// Run the WebSocket server
pub async fn run_server(port: u16, config: ServerConfig) -> anyhow::Result<()> {
    let workers = config.workers;
    let app = router(config);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("gating worker listening on ws://{}/ws ({} workers)", addr, workers);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages back to the client
    let (tx, mut rx) = mpsc::channel::<WorkerResponse>(100);

    // Task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("failed to serialize response: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages
    while let Some(result) = receiver.next().await {
        let msg = match result {
            Ok(m) => m,
            Err(_) => break,
        };
        match msg {
            Message::Text(text) => match serde_json::from_str::<WorkerRequest>(&text) {
                Ok(WorkerRequest::Run { job }) => {
                    let tx = tx.clone();
                    let state = state.clone();
                    tokio::spawn(async move {
                        let response = run_job(*job, &state).await;
                        let _ = tx.send(response).await;
                    });
                }
                Ok(WorkerRequest::Ping) => {
                    let _ = tx.send(WorkerResponse::Pong).await;
                }
                Err(e) => {
                    warn!("invalid request: {}", e);
                    let _ = tx
                        .send(WorkerResponse::Error { key: None, message: format!("Invalid message: {}", e) })
                        .await;
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Clean up
    drop(tx);
    let _ = send_task.await;
}

async fn run_job(job: PipelineJob, state: &ServerState) -> WorkerResponse {
    let key = job.key();
    let _permit = match state.permits.acquire().await {
        Ok(permit) => permit,
        Err(_) => return WorkerResponse::Error { key: Some(key), message: "worker shutting down".to_string() },
    };
    debug!("running {}", key);
    // The pipeline is CPU-bound and strictly sequential
    let result = tokio::task::spawn_blocking(move || run_pipeline(&job)).await;
    match result {
        Ok(Ok(output)) => WorkerResponse::Output { key, output: Box::new(output) },
        Ok(Err(e)) => WorkerResponse::Error { key: Some(key), message: e.to_string() },
        Err(e) => {
            error!("pipeline task for {} panicked: {}", key, e);
            WorkerResponse::Error { key: Some(key), message: format!("pipeline panicked: {}", e) }
        }
    }
}
