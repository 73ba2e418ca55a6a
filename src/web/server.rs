use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::config::WebConfig;
use crate::watch::WatchSupervisor;

use super::api::{get_download_status, get_latest_document, health_check, start_download, AppState};

/// Build the application router. Archived files are served under `/files`.
pub fn build_router(supervisor: Arc<WatchSupervisor>) -> Router {
    let files = ServeDir::new(supervisor.archive().dir());
    let state = AppState { supervisor };

    Router::new()
        .route("/healthz", get(health_check))
        .route("/download", post(start_download))
        .route("/download/:customer_ident", get(get_download_status))
        .route("/documents/:customer_ident/latest", get(get_latest_document))
        .nest_service("/files", files)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown_rx` turns true
pub async fn run_server(
    supervisor: Arc<WatchSupervisor>,
    web_config: WebConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let app = build_router(supervisor);

    let listener = tokio::net::TcpListener::bind(&web_config.listen).await?;
    tracing::info!(addr = %web_config.listen, "Web server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await
}
