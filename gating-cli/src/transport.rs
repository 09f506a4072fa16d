//! Where dispatched pipelines actually run.

use std::future::Future;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::debug;
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use gating_core::{run_pipeline, GatingError, PipelineJob, PipelineOutput};

use crate::server::{WorkerRequest, WorkerResponse};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The job never reached a worker, or its reply was lost. Worth one retry.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The worker ran the job and rejected it.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Gating(#[from] GatingError),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transport(_))
    }
}

pub trait Transport: Send + Sync + 'static {
    fn run(&self, job: Arc<PipelineJob>) -> impl Future<Output = Result<PipelineOutput, TransportError>> + Send;
}

/// Runs pipelines in-process on tokio's blocking pool.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn run(&self, job: Arc<PipelineJob>) -> impl Future<Output = Result<PipelineOutput, TransportError>> + Send {
        async move {
            tokio::task::spawn_blocking(move || run_pipeline(&job))
                .await
                .map_err(|e| TransportError::Transport(format!("pipeline task failed: {}", e)))?
                .map_err(TransportError::from)
        }
    }
}

/// Sends each job to a `gating serve` worker over its own WebSocket
/// connection.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        WsTransport { url: url.into() }
    }

    async fn round_trip(&self, job: &PipelineJob) -> Result<PipelineOutput, TransportError> {
        let transport = |e: &dyn std::fmt::Display| TransportError::Transport(format!("{}: {}", self.url, e));
        let (mut socket, _) = connect_async(self.url.as_str()).await.map_err(|e| transport(&e))?;
        let key = job.key();
        let request = serde_json::to_string(&WorkerRequest::Run { job: Box::new(job.clone()) })
            .map_err(|e| TransportError::Rejected(e.to_string()))?;
        socket.send(Message::Text(request)).await.map_err(|e| transport(&e))?;

        while let Some(msg) = socket.next().await {
            let text = match msg.map_err(|e| transport(&e))? {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            match serde_json::from_str::<WorkerResponse>(&text) {
                Ok(WorkerResponse::Output { key: k, output }) if k == key => {
                    let _ = socket.close(None).await;
                    return Ok(*output);
                }
                Ok(WorkerResponse::Error { message, .. }) => {
                    let _ = socket.close(None).await;
                    return Err(TransportError::Rejected(message));
                }
                Ok(other) => debug!("{}: ignoring {:?}", self.url, other),
                Err(e) => return Err(transport(&e)),
            }
        }
        Err(TransportError::Transport(format!("{}: connection closed before a reply for {}", self.url, key)))
    }
}

impl Transport for WsTransport {
    fn run(&self, job: Arc<PipelineJob>) -> impl Future<Output = Result<PipelineOutput, TransportError>> + Send {
        async move { self.round_trip(&job).await }
    }
}
