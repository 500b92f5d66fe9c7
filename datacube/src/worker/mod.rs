//! The worker side of a chunk invocation.
//!
//! Every backend ends up in a [`WorkerHandler`]: locally it is called
//! directly, the process backend reaches it through [`run_stdio`], the HTTP
//! backend through [`server::router`].
//!
//! ```text
//!   ChunkRequest ──► open ArrayTarget (ZarrChunkWriter)
//!                        │
//!                        ▼
//!                 ChunkProcessor::process ──► ChunkResult | ProcessError
//! ```

pub mod server;

use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::catalog::{
    SceneCatalog, StacCatalog, DEFAULT_CATALOG_URL, DEFAULT_COLLECTION, DEFAULT_SEARCH_LIMIT,
};
use crate::composite::MaskSettings;
use crate::executor::{ChunkHandler, ChunkRequest, InvocationResponse};
use crate::http::{AsyncReqwestClient, HttpError, DEFAULT_HTTP_TIMEOUT_SECS};
use crate::jobs::ChunkResult;
use crate::loader::{GeoTiffLoader, SceneLoader, DEFAULT_IO_CONCURRENCY, DEFAULT_MAX_WINDOW_BYTES};
use crate::processor::{ChunkProcessor, ProcessError, WorkerEnvironment};
use crate::storage::ZarrChunkWriter;

pub use server::{router, serve};

/// Errors of the worker entry points, outside of chunk processing itself.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid chunk request: {0}")]
    Request(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] HttpError),
}

/// Everything a worker needs to build its processor.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorSettings {
    pub catalog_url: String,
    pub collection: String,
    pub search_limit: usize,
    pub io_concurrency: usize,
    pub max_window_bytes: usize,
    pub http_timeout_secs: u64,
    pub mask: MaskSettings,
    pub environment: WorkerEnvironment,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            search_limit: DEFAULT_SEARCH_LIMIT,
            io_concurrency: DEFAULT_IO_CONCURRENCY,
            max_window_bytes: DEFAULT_MAX_WINDOW_BYTES,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            mask: MaskSettings::default(),
            environment: WorkerEnvironment::default(),
        }
    }
}

/// The STAC + GeoTIFF handler used in production.
pub type StacWorkerHandler =
    WorkerHandler<StacCatalog<AsyncReqwestClient>, GeoTiffLoader<AsyncReqwestClient>>;

/// [`ChunkHandler`] that opens the request's target and runs the processor.
pub struct WorkerHandler<S: SceneCatalog, L: SceneLoader> {
    processor: ChunkProcessor<S, L>,
}

impl StacWorkerHandler {
    pub fn from_settings(settings: &ProcessorSettings) -> Result<Self, WorkerError> {
        let client = AsyncReqwestClient::with_timeout(settings.http_timeout_secs)?;
        let catalog = StacCatalog::new(
            client.clone(),
            settings.catalog_url.clone(),
            settings.collection.clone(),
        )
        .with_limit(settings.search_limit);
        let loader = GeoTiffLoader::new(client)
            .with_io_concurrency(settings.io_concurrency)
            .with_max_window_bytes(settings.max_window_bytes);
        let processor = ChunkProcessor::new(catalog, loader)
            .with_mask(settings.mask.clone())
            .with_environment(settings.environment.clone());
        Ok(Self::new(processor))
    }
}

impl<S: SceneCatalog, L: SceneLoader> WorkerHandler<S, L> {
    pub fn new(processor: ChunkProcessor<S, L>) -> Self {
        Self { processor }
    }
}

impl<S: SceneCatalog + 'static, L: SceneLoader + 'static> ChunkHandler for WorkerHandler<S, L> {
    async fn handle(&self, request: ChunkRequest) -> Result<ChunkResult, ProcessError> {
        if request.debug {
            debug!(job = %request.job, target = %request.target, "Handling chunk request");
        }
        let target = request.target.clone();
        let writer = tokio::task::spawn_blocking(move || ZarrChunkWriter::open(&target))
            .await
            .map_err(|e| ProcessError::Task(e.to_string()))??;
        self.processor.process(&request.job, Arc::new(writer)).await
    }
}

/// Reads one JSON request from stdin, handles it, and writes one
/// [`InvocationResponse`] line to stdout.
pub async fn run_stdio<H: ChunkHandler>(handler: &H) -> Result<InvocationResponse, WorkerError> {
    let mut input = Vec::new();
    tokio::io::stdin().read_to_end(&mut input).await?;
    let response = handle_bytes(handler, &input).await;

    let mut line = serde_json::to_vec(&response)?;
    line.push(b'\n');
    let mut stdout = tokio::io::stdout();
    stdout.write_all(&line).await?;
    stdout.flush().await?;
    Ok(response)
}

/// Decodes and handles one request; decoding errors become error responses.
pub async fn handle_bytes<H: ChunkHandler>(handler: &H, input: &[u8]) -> InvocationResponse {
    match serde_json::from_slice::<ChunkRequest>(input) {
        Ok(request) => {
            let job = request.job.to_string();
            let response = InvocationResponse::from(handler.handle(request).await);
            info!(job = %job, ok = matches!(response, InvocationResponse::Ok(_)), "Chunk request handled");
            response
        }
        Err(e) => InvocationResponse::Error(WorkerError::Request(e).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CubeConfig, Extent, Period, TileIndex};
    use crate::jobs::ChunkJob;
    use crate::processor::tests::{scene, ConstantLoader, FixedCatalog};
    use crate::storage::{write_schema, ArrayTarget};
    use chrono::NaiveDate;

    fn config() -> CubeConfig {
        CubeConfig::new(
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            Extent::new(0.0, 0.0, 1.0, 1.0),
        )
        .with_resolution(0.25)
        .with_chunk_size(2)
    }

    fn request(root: &std::path::Path) -> ChunkRequest {
        ChunkRequest {
            job: ChunkJob::new(Arc::new(config()), TileIndex::new(0, 1), Period::new(2021, 1)),
            target: ArrayTarget::new(root, "rgb_median"),
            debug: true,
        }
    }

    fn handler(value: u16) -> WorkerHandler<FixedCatalog, ConstantLoader> {
        WorkerHandler::new(ChunkProcessor::new(
            FixedCatalog(vec![scene("a", 2)]),
            ConstantLoader(value),
        ))
    }

    #[test]
    fn test_default_settings() {
        let settings = ProcessorSettings::default();
        assert_eq!(settings.catalog_url, DEFAULT_CATALOG_URL);
        assert_eq!(settings.collection, DEFAULT_COLLECTION);
        assert!(StacWorkerHandler::from_settings(&settings).is_ok());
    }

    #[tokio::test]
    async fn test_handler_writes_into_target() {
        let dir = tempfile::TempDir::new().unwrap();
        write_schema(dir.path(), &config()).unwrap();
        let request = request(dir.path());
        let region = request.job.write_region();

        let result = handler(77).handle(request.clone()).await.unwrap();
        assert!(result.success);

        let reader = ZarrChunkWriter::open(&request.target).unwrap();
        assert_eq!(reader.read_region(&region).unwrap(), vec![77; 12]);
    }

    #[tokio::test]
    async fn test_handler_requires_existing_array() {
        let dir = tempfile::TempDir::new().unwrap();
        let outcome = handler(1).handle(request(dir.path())).await;
        assert!(matches!(outcome, Err(ProcessError::Storage(_))));
    }

    #[tokio::test]
    async fn test_handle_bytes_reports_bad_json() {
        let response = handle_bytes(&handler(1), b"not json").await;
        match response {
            InvocationResponse::Error(message) => assert!(message.contains("invalid chunk request")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
