use clap::Parser;
use epg_merged::config::{Cli, Config};
use epg_merged::AppContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::resolve(&cli);
    config.init_tracing();

    if cli.migrate_only {
        std::fs::create_dir_all(&config.config_dir)?;
        let mut conn = epg_merged::store::connection::establish_connection(&config.db_path.to_string_lossy())?;
        epg_merged::store::connection::run_migrations(&mut conn)?;
        tracing::info!("migrations applied, exiting (--migrate-only)");
        return Ok(());
    }

    let ctx = AppContext::bootstrap(config)?;

    let scheduler = ctx.scheduler.clone();
    let scheduler_handle = tokio::spawn(async move { scheduler.run().await });

    let state = epg_merged::server::AppState::new(ctx.facade.clone());
    let port = ctx.config.port;

    tracing::info!(port, "epg-merged: starting");

    epg_merged::server::start_server(state, port, shutdown_signal()).await?;

    tracing::info!("epg-merged: stopping scheduler");
    ctx.scheduler.request_cancel();
    for _ in 0..60 {
        if !ctx.scheduler.is_busy() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    scheduler_handle.abort();
    Ok(())
}

/// Wait for ctrl-c or SIGTERM (§4.E graceful shutdown of the Scheduler and
/// HTTP server side by side).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("epg-merged: shutdown signal received");
}
