use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use ckbd::config::{load_repos_config, Cli};
use ckbd::cursor::CursorCodec;
use ckbd::manager::RepoManager;
use ckbd::{logging, metrics_server, server, App};
use index_store::Layout;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting ckbd");

    let prom = metrics_server::install_recorder();
    let config = cli.to_config();

    let layout = Layout::new(&config.data_dir);
    layout.ensure().context("failed to create data directory")?;

    let config_repos = match &cli.repos_config {
        Some(path) => load_repos_config(path)?,
        None => Vec::new(),
    };
    let manager = RepoManager::new(layout.clone(), &config_repos)?;

    let cursors = match &cli.cursor_secret {
        Some(secret) => CursorCodec::new(secret.as_bytes()),
        None => CursorCodec::generated(),
    };

    let app = Arc::new(App::new(config, manager, cursors));
    let router = server::build_router(app.clone()).merge(metrics_server::build_router(prom));

    // Sweep scratch files left behind by uploads that never completed.
    let sweep_interval = app.config.upload_sweep_interval;
    let sweep_max_age = app.config.upload_max_age;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            match layout.cleanup_old_uploads(sweep_max_age) {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "swept stale upload scratch files"),
                Err(err) => tracing::warn!(%err, "upload sweep failed"),
            }
        }
    });

    let addr = cli.listen_addr()?;
    tracing::info!(%addr, "listening");

    let serve = axum_server::bind(addr).serve(router.into_make_service());
    tokio::select! {
        result = serve => result.context("server failed")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }
    Ok(())
}
