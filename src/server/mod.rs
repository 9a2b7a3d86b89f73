//! The narrow HTTP surface over the Facade (§6 "Facade HTTP surface"). Not
//! itself part of the core — a thin JSON-over-HTTP adapter.

pub mod handlers;
pub mod routes;
pub mod state;

use std::net::SocketAddr;

pub use state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),
}

/// Bind to loopback only and serve the Facade's HTTP surface until the
/// supplied future resolves (graceful shutdown, SPEC_FULL.md §A step 5).
pub async fn start_server(
    state: AppState,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let app = routes::create_router(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(%addr, "server: listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Bind)?;

    Ok(())
}
