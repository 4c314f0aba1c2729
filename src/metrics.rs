use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if one is already
    /// installed in this process.
    pub fn init(confidence_threshold: f64) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;

        // Static gauge with the active vision tie-break threshold
        gauge!("dragonfruit_confidence_threshold").set(confidence_threshold);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        metrics_router(self.handle.clone())
    }
}

pub(crate) fn metrics_router<S>(handle: PrometheusHandle) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/metrics",
        get(move || {
            let h = handle.clone();
            async move { h.render() }
        }),
    )
}
