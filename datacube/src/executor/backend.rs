//! The execution backend abstraction.
//!
//! A backend runs one [`ChunkRequest`] somewhere and reports its
//! [`ChunkResult`]. Where it runs is the only thing that differs:
//!
//! ```text
//!   Dispatcher ──► Backend::Local   ──► tokio task ──► ChunkHandler
//!              ├─► Backend::Process ──► `datacube worker` (stdin/stdout JSON)
//!              └─► Backend::Http    ──► POST {endpoint}/invoke
//! ```

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{HttpBackend, LocalBackend, ProcessBackend};
use crate::http::AsyncReqwestClient;
use crate::jobs::{ChunkJob, ChunkResult};
use crate::processor::ProcessError;
use crate::storage::ArrayTarget;

/// Payload of one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRequest {
    pub job: ChunkJob,
    pub target: ArrayTarget,
    /// Verbose logging in the worker.
    #[serde(default)]
    pub debug: bool,
}

/// Reply envelope of remote workers: `{"ok": {...}}` or `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationResponse {
    Ok(ChunkResult),
    Error(String),
}

impl InvocationResponse {
    pub fn into_result(self) -> Result<ChunkResult, InvokeError> {
        match self {
            Self::Ok(result) => Ok(result),
            Self::Error(message) => Err(InvokeError::Remote(message)),
        }
    }
}

impl From<Result<ChunkResult, ProcessError>> for InvocationResponse {
    fn from(result: Result<ChunkResult, ProcessError>) -> Self {
        match result {
            Ok(result) => Self::Ok(result),
            Err(e) => Self::Error(e.to_string()),
        }
    }
}

/// Why an invocation produced no result. Every variant is retryable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvokeError {
    #[error("chunk failed in worker: {0}")]
    Remote(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invocation timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed worker response: {0}")]
    Protocol(String),

    #[error("failed to start worker: {0}")]
    Spawn(String),

    #[error("worker task panicked: {0}")]
    Panicked(String),
}

/// Runs one chunk request inside a worker.
pub trait ChunkHandler: Send + Sync + 'static {
    fn handle(
        &self,
        request: ChunkRequest,
    ) -> impl Future<Output = Result<ChunkResult, ProcessError>> + Send;
}

/// Runs one chunk request somewhere and reports the outcome.
pub trait ExecutionBackend: Send + Sync + 'static {
    /// Short name used in logs and the result log file name.
    fn name(&self) -> &'static str;

    fn invoke(
        &self,
        request: ChunkRequest,
    ) -> impl Future<Output = Result<ChunkResult, InvokeError>> + Send;
}

/// Selectable backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Process,
    Http,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Process => write!(f, "process"),
            Self::Http => write!(f, "http"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "process" => Ok(Self::Process),
            "http" => Ok(Self::Http),
            other => Err(format!(
                "unknown backend '{other}' (expected local, process or http)"
            )),
        }
    }
}

/// One of the three backends, chosen at runtime.
pub enum Backend<H: ChunkHandler> {
    Local(LocalBackend<H>),
    Process(ProcessBackend),
    Http(HttpBackend<AsyncReqwestClient>),
}

impl<H: ChunkHandler> Backend<H> {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Local(_) => BackendKind::Local,
            Self::Process(_) => BackendKind::Process,
            Self::Http(_) => BackendKind::Http,
        }
    }
}

impl<H: ChunkHandler> ExecutionBackend for Backend<H> {
    fn name(&self) -> &'static str {
        match self {
            Self::Local(b) => b.name(),
            Self::Process(b) => b.name(),
            Self::Http(b) => b.name(),
        }
    }

    async fn invoke(&self, request: ChunkRequest) -> Result<ChunkResult, InvokeError> {
        match self {
            Self::Local(b) => b.invoke(request).await,
            Self::Process(b) => b.invoke(request).await,
            Self::Http(b) => b.invoke(request).await,
        }
    }
}
