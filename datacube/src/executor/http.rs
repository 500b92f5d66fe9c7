//! Function-service backend over HTTP.

use tracing::trace;

use super::backend::{ChunkRequest, ExecutionBackend, InvocationResponse, InvokeError};
use crate::http::{AsyncHttpClient, AsyncReqwestClient};
use crate::jobs::ChunkResult;

/// Path appended to the endpoint for invocations.
pub const INVOKE_PATH: &str = "invoke";

/// Posts each request to `{endpoint}/invoke`.
///
/// The per-request timeout is the client's timeout.
pub struct HttpBackend<C: AsyncHttpClient> {
    client: C,
    endpoint: String,
}

impl HttpBackend<AsyncReqwestClient> {
    /// Backend with a reqwest client timing out after `timeout_secs`.
    pub fn connect(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self, InvokeError> {
        let client = AsyncReqwestClient::with_timeout(timeout_secs)
            .map_err(|e| InvokeError::Transport(e.to_string()))?;
        Ok(Self::new(client, endpoint))
    }
}

impl<C: AsyncHttpClient> HttpBackend<C> {
    pub fn new(client: C, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn invoke_url(&self) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), INVOKE_PATH)
    }
}

impl<C: AsyncHttpClient + 'static> ExecutionBackend for HttpBackend<C> {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn invoke(&self, request: ChunkRequest) -> Result<ChunkResult, InvokeError> {
        let url = self.invoke_url();
        let body =
            serde_json::to_value(&request).map_err(|e| InvokeError::Protocol(e.to_string()))?;
        trace!(url = %url, job = %request.job, "Posting chunk request");

        let bytes = self
            .client
            .post_json(&url, &body)
            .await
            .map_err(|e| InvokeError::Transport(e.to_string()))?;

        serde_json::from_slice::<InvocationResponse>(&bytes)
            .map_err(|e| InvokeError::Protocol(e.to_string()))?
            .into_result()
    }
}
