use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the process-wide Prometheus recorder. Called once at startup;
/// the returned handle renders `/metrics`.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets(
            &prometheus::exponential_buckets(0.0001, 2.5, 12)
                .expect("calculating histogram buckets"),
        )
        .expect("calculating histogram buckets")
        .install_recorder()
        .expect("failed to install prometheus recorder")
}

/// Router for the `/metrics` route. It is merged alongside the API router
/// rather than nested under it, which exempts scrapes from admission
/// control without a priority-list check; it carries its own trace layer so
/// they still show up in request logs.
pub fn build_router(handle: PrometheusHandle) -> axum::Router<()> {
    use axum::routing::get;

    axum::Router::new()
        .route("/metrics", get(prometheus_metrics))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(handle)
}

#[tracing::instrument(skip_all)]
async fn prometheus_metrics(
    axum::extract::State(handle): axum::extract::State<PrometheusHandle>,
) -> (axum::http::StatusCode, String) {
    (axum::http::StatusCode::OK, handle.render())
}
