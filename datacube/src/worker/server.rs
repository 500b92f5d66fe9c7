//! HTTP function service for the HTTP backend.
//!
//! | Method | Path | Body | Reply |
//! |--------|------|------|-------|
//! | POST | `/invoke` | `ChunkRequest` | `InvocationResponse` |
//! | GET | `/health` | | `200 OK` |

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;

use super::WorkerError;
use crate::executor::{ChunkHandler, ChunkRequest, InvocationResponse};

/// Routes for a worker service around `handler`.
pub fn router<H: ChunkHandler>(handler: Arc<H>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/invoke", post(invoke_handler::<H>))
        .with_state(handler)
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

async fn invoke_handler<H: ChunkHandler>(
    State(handler): State<Arc<H>>,
    Json(request): Json<ChunkRequest>,
) -> Json<InvocationResponse> {
    let job = request.job.to_string();
    let response = InvocationResponse::from(handler.handle(request).await);
    info!(job = %job, ok = matches!(response, InvocationResponse::Ok(_)), "Invocation served");
    Json(response)
}

/// Serves the worker routes on `addr` until the process is stopped.
pub async fn serve<H: ChunkHandler>(addr: SocketAddr, handler: H) -> Result<(), WorkerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Worker service listening");
    axum::serve(listener, router(Arc::new(handler))).await?;
    Ok(())
}
