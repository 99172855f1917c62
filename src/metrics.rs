use std::net::SocketAddr;
use tracing::{info, warn};

/// Installs the Prometheus exporter when `REGISTRY_METRICS_PORT` is set.
/// Without it the `metrics` macros are no-ops.
pub fn init_metrics() {
    let port: u16 = match std::env::var("REGISTRY_METRICS_PORT").ok().and_then(|s| s.parse().ok()) {
        Some(p) => p,
        None => return,
    };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
        Err(e) => warn!("Prometheus exporter install failed (possibly already installed): {}", e),
    }
}
