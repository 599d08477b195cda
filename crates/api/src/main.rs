use anyhow::Context;
use tracing::info;

use tracker_api::app::{self, services};
use tracker_api::config::AppConfig;
use tracker_api::shutdown::install_shutdown_handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracker_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    info!(
        backend = ?config.backend,
        queue = %config.queue,
        max_workers = config.max_workers,
        "starting tracker"
    );

    let cancel = install_shutdown_handler();
    let runtime = services::launch(&config, cancel.clone()).await?;

    let server = if config.use_http {
        let addr = config.http_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(addr = %listener.local_addr()?, "http listening");

        let router = app::build_app(runtime.api.clone());
        let stop = cancel.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
        }))
    } else {
        None
    };

    cancel.cancelled().await;
    runtime.handle.stopped().await;

    if let Some(server) = server {
        server
            .await
            .context("http server task failed")?
            .context("http server failed")?;
    }

    info!("done");
    Ok(())
}
