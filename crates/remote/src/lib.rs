pub mod auth;
pub mod config;
pub mod routes;
mod state;
pub mod store;

pub use config::RemoteServerConfig;
pub use routes::router;
pub use state::AppState;
use tokio::net::TcpListener;

/// Serves the backend on an already-bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}
