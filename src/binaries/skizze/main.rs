use anyhow::Context;
use clap::Parser;
use skizze_manager::Manager;
use skizze_server::{Config, HttpServer, Router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = if config.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("config: {:?}", config);

    let info_dir = config.info_path();
    let data_dir = config.data_path();
    let manager = Manager::open(&info_dir, &data_dir, config.manager_options())
        .with_context(|| format!("open stores at {:?} and {:?}", info_dir, data_dir))?;
    tracing::info!("using info dir {:?}, data dir {:?}", info_dir, data_dir);

    let flusher = manager.start_flusher();

    let addr = config.listen_addr()?;
    let server = HttpServer::bind(addr, Router::new(manager.clone()))
        .await
        .with_context(|| format!("bind {}", addr))?;

    let served = server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for ctrl-c: {}", e);
            }
            tracing::info!("shutting down");
        })
        .await;

    // drain before the stores go away, even if serving failed
    flusher.shutdown().await;
    let report = manager.close().await;
    tracing::info!(
        "bye, flushed: {}, failed: {}",
        report.flushed,
        report.failed
    );

    served?;
    Ok(())
}
