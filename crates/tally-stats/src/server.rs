//! Service wiring: ids, database, flusher, and the HTTP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use tally_id::{IdGenerator, Sonyflake};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::buffer::Flusher;
use crate::config::StatsConfig;
use crate::error::StatsResult;
use crate::exporter::spawn_metrics_server;
use crate::ingest::http::router;
use crate::ingest::StatsService;
use crate::store::{connect_with_retry, EventSink, MySqlSink};

/// Run the stats service until `cancel` fires.
///
/// Buffered events are flushed before this returns.
pub async fn run(config: StatsConfig, cancel: CancellationToken) -> StatsResult<()> {
    let _metrics = if let Some(ref metrics_config) = config.metrics {
        let (handle, task) = spawn_metrics_server(metrics_config.clone(), cancel.clone())?;
        tracing::info!(
            address = %metrics_config.listen_addr,
            path = %metrics_config.path,
            "Metrics server enabled"
        );
        Some((handle, task))
    } else {
        None
    };

    let ids: Arc<dyn IdGenerator> = Arc::new(Sonyflake::new((&config.ids).into())?);

    let pool = connect_with_retry(&config.database, &cancel).await?;
    let sink: Arc<dyn EventSink> = Arc::new(MySqlSink::new(pool));

    let listener = TcpListener::bind(config.server.listen_addr).await?;
    serve(listener, &config, ids, sink, cancel).await
}

/// Serve Push on an already bound listener, flushing on the way out.
pub async fn serve(
    listener: TcpListener,
    config: &StatsConfig,
    ids: Arc<dyn IdGenerator>,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) -> StatsResult<()> {
    let flusher = Arc::new(Flusher::new(&cancel, sink, &config.buffer)?);
    let service = Arc::new(StatsService::new(
        flusher.clone(),
        ids,
        &config.validation,
    ));
    let app = router(service, config.server.max_body_bytes);

    tracing::info!(address = %listener.local_addr()?, "Stats service listening");

    let shutdown = cancel.clone();
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await;

    if let Err(ref e) = result {
        tracing::error!(error = %e, "HTTP server error");
    }

    flusher.shutdown().await;
    tracing::info!("Stats service shutdown complete");
    result.map_err(Into::into)
}
