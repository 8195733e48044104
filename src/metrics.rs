//! Process-wide Prometheus recorder.
//!
//! Installed once by the binary for every command. The server renders it on
//! `/metrics`; batch commands write a snapshot file when they finish.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the global recorder. Idempotent; `None` when another recorder owns the slot.
pub fn init_metrics() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                info!("prometheus recorder installed");
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "failed to install prometheus recorder");
                None
            }
        })
        .clone()
}

/// Handle of the installed recorder, if any.
pub fn handle() -> Option<PrometheusHandle> {
    HANDLE.get().cloned().flatten()
}

/// Current exposition text, empty when no recorder is installed.
pub fn render() -> String {
    handle().map(|h| h.render()).unwrap_or_default()
}

/// Write the current exposition text to `path` for short-lived runs that are never scraped.
pub fn write_snapshot(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render())?;
    info!(path = %path.display(), "metrics snapshot written");
    Ok(())
}
