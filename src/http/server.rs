//! HTTP server hosting admission-controlled routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::Uri;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::middleware::{AdmissionControl, AdmissionLayer};
use crate::error::{Result, WindowGuardError};

/// Build the service router.
///
/// `/health` is never rate limited; the `/api` routes sit behind admission
/// control.
pub fn router(admission: Arc<AdmissionControl>) -> Router {
    let api = Router::new()
        .route("/status", get(api_status))
        .route("/echo/*path", get(api_echo).post(api_echo))
        .route_layer(AdmissionLayer::new(admission));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "windowguard",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn api_status() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn api_echo(uri: Uri) -> Json<Value> {
    Json(json!({ "path": uri.path() }))
}

/// HTTP server for admission-controlled routes.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Shared admission control
    admission: Arc<AdmissionControl>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, admission: Arc<AdmissionControl>) -> Self {
        Self { addr, admission }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// Starts the idle-window sweeper, then serves until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.admission.limiter().start_sweeper();

        let listener = TcpListener::bind(self.addr).await?;
        info!(
            addr = %listener.local_addr()?,
            "Starting HTTP server with admission control"
        );

        let app = router(self.admission);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            WindowGuardError::Io(e)
        })
    }
}
