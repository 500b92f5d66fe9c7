//! Per-chunk pipeline: search, load, mask, composite, write.
//!
//! ```text
//!   ChunkJob
//!      │ footprint + interval
//!      ▼
//!   SceneCatalog::search ──► 0 scenes ──► ChunkResult::no_data
//!      │
//!      ▼
//!   SceneLoader::load ──► composite (blocking pool) ──► ChunkWriter (blocking pool)
//! ```
//!
//! The processor never retries. Any error is returned to the caller, which
//! owns the retry decision.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::catalog::{CatalogError, SceneCatalog, SceneQuery};
use crate::composite::{composite, MaskSettings};
use crate::jobs::{ChunkJob, ChunkResult};
use crate::loader::{LoadError, SceneLoader};
use crate::storage::{ChunkWriter, StorageError};

/// Errors that abort one chunk attempt.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("scene search failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("band loading failed: {0}")]
    Load(#[from] LoadError),

    #[error("write failed: {0}")]
    Storage(#[from] StorageError),

    #[error("worker task failed: {0}")]
    Task(String),
}

/// Where the processor runs, recorded in every result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEnvironment {
    pub region: Option<String>,
    pub cloud_provider: Option<String>,
}

impl WorkerEnvironment {
    pub fn new(region: Option<String>, cloud_provider: Option<String>) -> Self {
        Self {
            region,
            cloud_provider,
        }
    }
}

/// Seconds since the Unix epoch.
pub(crate) fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Runs the chunk pipeline with injected catalog and loader.
pub struct ChunkProcessor<S: SceneCatalog, L: SceneLoader> {
    catalog: S,
    loader: L,
    mask: MaskSettings,
    environment: WorkerEnvironment,
}

impl<S: SceneCatalog, L: SceneLoader> ChunkProcessor<S, L> {
    pub fn new(catalog: S, loader: L) -> Self {
        Self {
            catalog,
            loader,
            mask: MaskSettings::default(),
            environment: WorkerEnvironment::default(),
        }
    }

    pub fn with_mask(mut self, mask: MaskSettings) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_environment(mut self, environment: WorkerEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn environment(&self) -> &WorkerEnvironment {
        &self.environment
    }

    /// Computes one chunk and writes it into the job's region of `writer`.
    #[instrument(skip_all, fields(job = %job))]
    pub async fn process<W: ChunkWriter + 'static>(
        &self,
        job: &ChunkJob,
        writer: Arc<W>,
    ) -> Result<ChunkResult, ProcessError> {
        let start_time = unix_seconds();
        let env = &self.environment;

        let search_started = Instant::now();
        let query = SceneQuery {
            footprint: job.footprint(),
            datetime: job.datetime_range(),
        };
        let scenes = self.catalog.search(&query).await?;
        let search_duration = search_started.elapsed().as_secs_f64();

        if scenes.is_empty() {
            info!(datetime = %query.datetime, "No scenes found");
            return Ok(ChunkResult::no_data(start_time, search_duration)
                .with_environment(env.region.clone(), env.cloud_provider.clone()));
        }
        debug!(scenes = scenes.len(), "Scenes found");

        let load_started = Instant::now();
        let geobox = job.geobox();
        let bands = job.config.bands().to_vec();
        let steps = self.loader.load(&scenes, &bands, &geobox).await?;
        let load_duration = load_started.elapsed().as_secs_f64();

        let mask = self.mask.clone();
        let (width, height, nbands) = (geobox.width, geobox.height, bands.len());
        let data = tokio::task::spawn_blocking(move || {
            composite(steps, width, height, nbands, &mask)
        })
        .await
        .map_err(|e| ProcessError::Task(e.to_string()))?;

        let write_started = Instant::now();
        let region = job.write_region();
        tokio::task::spawn_blocking(move || writer.write_region(&region, &data))
            .await
            .map_err(|e| ProcessError::Task(e.to_string()))??;
        let write_duration = write_started.elapsed().as_secs_f64();

        info!(
            scenes = scenes.len(),
            search_secs = search_duration,
            load_secs = load_duration,
            write_secs = write_duration,
            "Chunk written"
        );

        Ok(ChunkResult {
            success: true,
            num_scenes: scenes.len(),
            start_time,
            search_duration,
            load_duration,
            write_duration,
            region: env.region.clone(),
            cloud_provider: env.cloud_provider.clone(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::Scene;
    use crate::grid::{CubeConfig, Extent, GeoBox, Period, TileIndex};
    use crate::jobs::WriteRegion;
    use crate::loader::{Raster, SceneLayers};
    use chrono::{NaiveDate, TimeZone, Utc};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    pub(crate) fn scene(id: &str, day: u32) -> Scene {
        Scene {
            id: id.to_string(),
            datetime: Utc.with_ymd_and_hms(2021, 1, day, 10, 0, 0).unwrap(),
            assets: BTreeMap::new(),
            cloud_cover: None,
        }
    }

    /// Catalog returning a fixed scene list.
    pub(crate) struct FixedCatalog(pub Vec<Scene>);

    impl SceneCatalog for FixedCatalog {
        async fn search(&self, _query: &SceneQuery) -> Result<Vec<Scene>, CatalogError> {
            Ok(self.0.clone())
        }
    }

    struct FailingCatalog;

    impl SceneCatalog for FailingCatalog {
        async fn search(&self, _query: &SceneQuery) -> Result<Vec<Scene>, CatalogError> {
            Err(CatalogError::Parse("boom".to_string()))
        }
    }

    /// Loader producing one clear step per scene, every band set to `value`.
    pub(crate) struct ConstantLoader(pub u16);

    impl SceneLoader for ConstantLoader {
        async fn load(
            &self,
            scenes: &[Scene],
            bands: &[String],
            geobox: &GeoBox,
        ) -> Result<Vec<SceneLayers>, LoadError> {
            let (w, h) = (geobox.width, geobox.height);
            Ok(scenes
                .iter()
                .map(|_| SceneLayers {
                    scl: Raster::filled(w, h, crate::composite::SCL_VEGETATION),
                    bands: bands.iter().map(|_| Raster::filled(w, h, self.0)).collect(),
                })
                .collect())
        }
    }

    /// Writer recording every region and its data.
    #[derive(Default)]
    pub(crate) struct RecordingWriter {
        pub writes: Mutex<Vec<(WriteRegion, Vec<u16>)>>,
    }

    impl ChunkWriter for RecordingWriter {
        fn write_region(&self, region: &WriteRegion, data: &[u16]) -> Result<(), StorageError> {
            self.writes.lock().push((region.clone(), data.to_vec()));
            Ok(())
        }
    }

    fn job() -> ChunkJob {
        let config = CubeConfig::new(
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            Extent::new(0.0, 0.0, 1.0, 1.0),
        )
        .with_resolution(0.25)
        .with_chunk_size(2);
        ChunkJob::new(Arc::new(config), TileIndex::new(1, 0), Period::new(2021, 1))
    }

    fn environment() -> WorkerEnvironment {
        WorkerEnvironment::new(Some("eu-west-1".into()), Some("local".into()))
    }

    #[tokio::test]
    async fn test_zero_scenes_is_no_data() {
        let processor = ChunkProcessor::new(FixedCatalog(vec![]), ConstantLoader(1))
            .with_environment(environment());
        let writer = Arc::new(RecordingWriter::default());

        let result = processor.process(&job(), writer.clone()).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.num_scenes, 0);
        assert_eq!(result.load_duration, 0.0);
        assert_eq!(result.write_duration, 0.0);
        assert_eq!(result.region.as_deref(), Some("eu-west-1"));
        assert!(writer.writes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_scenes_are_composited_and_written() {
        let scenes = vec![scene("a", 3), scene("b", 8)];
        let processor = ChunkProcessor::new(FixedCatalog(scenes), ConstantLoader(420))
            .with_environment(environment());
        let writer = Arc::new(RecordingWriter::default());
        let job = job();

        let result = processor.process(&job, writer.clone()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.num_scenes, 2);
        assert_eq!(result.cloud_provider.as_deref(), Some("local"));

        let writes = writer.writes.lock();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, job.write_region());
        assert_eq!(writes[0].1, vec![420; 2 * 2 * 3]);
    }

    #[tokio::test]
    async fn test_search_error_propagates() {
        let processor = ChunkProcessor::new(FailingCatalog, ConstantLoader(1));
        let writer = Arc::new(RecordingWriter::default());
        assert!(matches!(
            processor.process(&job(), writer).await,
            Err(ProcessError::Catalog(_))
        ));
    }

    #[tokio::test]
    async fn test_write_error_propagates() {
        struct BrokenWriter;
        impl ChunkWriter for BrokenWriter {
            fn write_region(&self, _: &WriteRegion, _: &[u16]) -> Result<(), StorageError> {
                Err(StorageError::Zarr("disk full".to_string()))
            }
        }

        let processor = ChunkProcessor::new(FixedCatalog(vec![scene("a", 3)]), ConstantLoader(1));
        assert!(matches!(
            processor.process(&job(), Arc::new(BrokenWriter)).await,
            Err(ProcessError::Storage(_))
        ));
    }
}
