//! Prometheus exporter for the flush and push counters.

use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MetricsConfig;
use crate::error::{StatsError, StatsResult};

/// Install the global Prometheus recorder.
///
/// Fails if a recorder is already installed in this process.
pub fn init_metrics_recorder() -> StatsResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| StatsError::Config(format!("failed to install Prometheus recorder: {e}")))
}

/// Router exposing `handle` at `path`.
pub fn metrics_router(path: &str, handle: PrometheusHandle) -> Router {
    Router::new().route(
        path,
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    )
}

/// Serve the scrape endpoint until `cancel` fires.
pub async fn run_metrics_server(
    config: &MetricsConfig,
    handle: PrometheusHandle,
    cancel: CancellationToken,
) -> StatsResult<()> {
    let app = metrics_router(&config.path, handle);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    tracing::info!(address = %config.listen_addr, path = %config.path, "Metrics server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}

/// Install the recorder and spawn the scrape server in a background task.
pub fn spawn_metrics_server(
    config: MetricsConfig,
    cancel: CancellationToken,
) -> StatsResult<(PrometheusHandle, JoinHandle<StatsResult<()>>)> {
    let handle = init_metrics_recorder()?;
    let server_handle = handle.clone();
    let task = tokio::spawn(async move { run_metrics_server(&config, server_handle, cancel).await });
    Ok((handle, task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn renders_recorded_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("tally.flush.rows").increment(3);
        });

        let response = metrics_router("/metrics", handle)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("tally_flush_rows 3"), "{text}");
    }
}
