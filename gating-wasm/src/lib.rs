//! WASM bindings for the automated gating engine.
//!
//! Every binding takes and returns plain JS objects (camelCase keys, as
//! serialized by `gating-core`). Input-shape problems reject with the error
//! message; ambiguous peak structure resolves with a `STATUS_FAIL` verdict.

use gating_core::{
    DensityGrid, Event, GateTemplateGroup, GatingOptions, Peak, PipelineJob, PlotScales, ZeroChannelDensity, R2,
};
use log::{error, info};
use serde::{de::DeserializeOwned, Serialize};
use wasm_bindgen::prelude::*;
use wasm_bindgen_console_logger::DEFAULT_LOGGER;

/// Initializes the logging system for WASM.
///
/// Sets up console logging and panic hooks for better error reporting in the browser.
/// Should be called once at application startup.
#[wasm_bindgen]
pub fn init_logs() {
    match log::set_logger(&DEFAULT_LOGGER) {
        Ok(_) => info!("Initialized console.logger"),
        Err(e) => error!("failed to set console.logger: {}", e),
    };
    console_error_panic_hook::set_once();
}

fn from_js<T: DeserializeOwned>(value: JsValue) -> Result<T, JsValue> {
    serde_wasm_bindgen::from_value(value).map_err(JsValue::from)
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value).map_err(JsValue::from)
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Updates the log level filter.
///
/// # Arguments
/// * `level` - Log level string: "off", "error", "warn", "info", "debug", or "trace".
///   Defaults to "info" if empty or null.
#[wasm_bindgen]
pub fn update_log_level(level: JsValue) -> Result<(), JsValue> {
    let level: Option<String> = from_js(level)?;
    let level = gating_core::parse_log_level(level.as_deref()).map_err(js_error)?;
    log::set_max_level(level);
    Ok(())
}

/// Bins and smooths events into a density grid.
///
/// # Arguments
/// * `events` - Array of `{id, x, y}` in raw instrument units.
/// * `scales` - `{x, y, width, height}`: one axis scale per parameter and the plot size.
/// * `options` - Gating options; only `machineType` and `densityWidth` matter here.
#[wasm_bindgen]
pub fn estimate_density(events: JsValue, scales: JsValue, options: JsValue) -> Result<JsValue, JsValue> {
    let events: Vec<Event> = from_js(events)?;
    let scales: PlotScales = from_js(scales)?;
    let options: GatingOptions = from_js(options)?;
    let grid = gating_core::estimate_density(&events, &scales, &options).map_err(js_error)?;
    to_js(&grid)
}

/// Runs peak finding over a density grid.
///
/// # Arguments
/// * `grid` - Grid returned by [`estimate_density`].
/// * `options` - Gating options.
/// * `known_nuclei` - Optional array of `{x, y}` pixel positions seeding protected peaks.
///
/// # Returns
/// A verdict: `{status: "STATUS_SUCCESS", peaks}` or `{status: "STATUS_FAIL", peaks, criteria}`.
#[wasm_bindgen]
pub fn find_peaks(grid: JsValue, options: JsValue, known_nuclei: JsValue) -> Result<JsValue, JsValue> {
    let grid: DensityGrid = from_js(grid)?;
    let options: GatingOptions = from_js(options)?;
    let known_nuclei: Option<Vec<R2<f64>>> = from_js(known_nuclei)?;
    let verdict = gating_core::find_peaks(&grid, &options, known_nuclei.as_deref().unwrap_or_default())
        .map_err(js_error)?;
    to_js(&verdict)
}

/// Assigns axis groups to peaks and matches them against a template group.
#[wasm_bindgen]
pub fn match_template(peaks: JsValue, group: JsValue, options: JsValue) -> Result<JsValue, JsValue> {
    let mut peaks: Vec<Peak> = from_js(peaks)?;
    let group: GateTemplateGroup = from_js(group)?;
    let options: GatingOptions = from_js(options)?;
    gating_core::assign_groups(&mut peaks, &options);
    to_js(&gating_core::match_template(peaks, &group))
}

/// Expands peaks into their zero channels and resolves overlaps.
///
/// # Returns
/// `{peaks, polygons}`: the peaks with their zero-channel flags and ranges
/// set, and one final polygon per peak.
#[wasm_bindgen]
pub fn reconcile_polygons(peaks: JsValue, zero_channels: JsValue, options: JsValue) -> Result<JsValue, JsValue> {
    let mut peaks: Vec<Peak> = from_js(peaks)?;
    let zero_channels: Option<ZeroChannelDensity> = from_js(zero_channels)?;
    let options: GatingOptions = from_js(options)?;
    let polygons = gating_core::reconcile_polygons(&mut peaks, zero_channels.as_ref(), &options);
    #[derive(Serialize)]
    struct Reconciled {
        peaks: Vec<Peak>,
        polygons: Vec<gating_core::FinalPolygon>,
    }
    to_js(&Reconciled { peaks, polygons })
}

/// Runs the whole pipeline on one job (see `PipelineJob`).
#[wasm_bindgen]
pub fn run_pipeline(job: JsValue) -> Result<JsValue, JsValue> {
    let job: PipelineJob = from_js(job)?;
    let label = job.key();
    web_sys::console::time_with_label(&label);
    let output = gating_core::run_pipeline(&job);
    web_sys::console::time_end_with_label(&label);
    to_js(&output.map_err(js_error)?)
}
