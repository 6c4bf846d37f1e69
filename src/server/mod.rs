/// Audit trail API server.
///
/// A thin routing layer over `AnchorService`. The host application calls
/// the anchor hook after a record mutation; operators use the remaining
/// routes to inspect and re-anchor audit rows.
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::audit::AnchorService;

/// Shared application state available to all handlers.
pub struct AppState {
    pub service: AnchorService,
}

/// Build the Axum application with all routes and middleware.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::audit_routes())
        .with_state(Arc::new(state))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the API server.
pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> crate::error::Result<()> {
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(crate::error::AnchorError::Io)?;

    tracing::info!("hms-anchor API server listening on {addr}");

    axum::serve(listener, app)
        .await
        .map_err(crate::error::AnchorError::Io)?;

    Ok(())
}
