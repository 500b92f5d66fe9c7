//! In-process backend.

use std::sync::Arc;

use tracing::{debug, Instrument};

use super::backend::{ChunkHandler, ChunkRequest, ExecutionBackend, InvokeError};
use crate::jobs::ChunkResult;

/// Runs each request as a tokio task on the local runtime.
///
/// A panicking handler is reported as [`InvokeError::Panicked`] and does not
/// take the dispatcher down.
pub struct LocalBackend<H: ChunkHandler> {
    handler: Arc<H>,
}

impl<H: ChunkHandler> LocalBackend<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}

impl<H: ChunkHandler> ExecutionBackend for LocalBackend<H> {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn invoke(&self, request: ChunkRequest) -> Result<ChunkResult, InvokeError> {
        let handler = Arc::clone(&self.handler);
        let span = tracing::debug_span!("local_invoke", job = %request.job);
        let task = tokio::spawn(
            async move { handler.handle(request).await }.instrument(span),
        );
        match task.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                debug!(error = %e, "Local chunk failed");
                Err(InvokeError::Remote(e.to_string()))
            }
            Err(e) => Err(InvokeError::Panicked(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests::{request, ScriptedHandler};

    #[tokio::test]
    async fn test_local_backend_returns_handler_result() {
        let backend = LocalBackend::new(ScriptedHandler::default());
        let result = backend.invoke(request(0, 0)).await.unwrap();
        assert!(result.success);
        assert_eq!(backend.handler().calls(), 1);
    }

    #[tokio::test]
    async fn test_local_backend_maps_handler_error() {
        let backend = LocalBackend::new(ScriptedHandler::default().failing_first(1));
        assert!(matches!(
            backend.invoke(request(0, 0)).await,
            Err(InvokeError::Remote(_))
        ));
    }

    #[tokio::test]
    async fn test_local_backend_survives_panic() {
        let backend = LocalBackend::new(ScriptedHandler::default().panicking());
        assert!(matches!(
            backend.invoke(request(0, 0)).await,
            Err(InvokeError::Panicked(_))
        ));
    }
}
