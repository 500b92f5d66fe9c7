//! Region writes into an existing array.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::trace;
use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs::storage::store::FilesystemStore;

use super::{ArrayTarget, StorageError};
use crate::jobs::WriteRegion;

/// Sink for composited chunk data.
///
/// `data` is laid out `(time, row, col, band)` in row-major order and must
/// hold exactly `region.element_count()` values.
pub trait ChunkWriter: Send + Sync {
    fn write_region(&self, region: &WriteRegion, data: &[u16]) -> Result<(), StorageError>;
}

/// [`ChunkWriter`] backed by a zarr array on the local filesystem.
pub struct ZarrChunkWriter {
    target: ArrayTarget,
    array: Array<FilesystemStore>,
}

impl ZarrChunkWriter {
    /// Opens the array named by `target`.
    ///
    /// The array must already exist; workers never create it.
    pub fn open(target: &ArrayTarget) -> Result<Self, StorageError> {
        if !target.exists() {
            return Err(StorageError::MissingArray(target.to_string()));
        }
        let store = Arc::new(FilesystemStore::new(&target.root).map_err(StorageError::zarr)?);
        let array = Array::open(store, &target.node_path()).map_err(StorageError::zarr)?;
        Ok(Self {
            target: target.clone(),
            array,
        })
    }

    pub fn target(&self) -> &ArrayTarget {
        &self.target
    }

    pub fn shape(&self) -> &[u64] {
        self.array.shape()
    }

    /// Reads back the values of `region`.
    pub fn read_region(&self, region: &WriteRegion) -> Result<Vec<u16>, StorageError> {
        let subset = ArraySubset::new_with_ranges(&region.ranges());
        self.array
            .retrieve_array_subset_elements::<u16>(&subset)
            .map_err(StorageError::zarr)
    }

    /// Files of the chunks `region` touches, whether written or not.
    pub fn chunk_paths(&self, region: &WriteRegion) -> Result<Vec<PathBuf>, StorageError> {
        let subset = ArraySubset::new_with_ranges(&region.ranges());
        let Some(chunks) = self
            .array
            .chunks_in_array_subset(&subset)
            .map_err(StorageError::zarr)?
        else {
            return Ok(Vec::new());
        };

        let start = chunks.start();
        let shape = chunks.shape();
        if shape.iter().any(|&n| n == 0) {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        let mut indices = start.to_vec();
        loop {
            let key = self.array.chunk_key(&indices);
            paths.push(self.target.root.join(key.as_str()));

            // Advance the last dimension first, carrying into earlier ones.
            let mut dim = indices.len();
            loop {
                if dim == 0 {
                    return Ok(paths);
                }
                dim -= 1;
                indices[dim] += 1;
                if indices[dim] < start[dim] + shape[dim] {
                    break;
                }
                indices[dim] = start[dim];
            }
        }
    }
}

impl ChunkWriter for ZarrChunkWriter {
    fn write_region(&self, region: &WriteRegion, data: &[u16]) -> Result<(), StorageError> {
        let expected = region.element_count();
        if data.len() != expected {
            return Err(StorageError::ShapeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let subset = ArraySubset::new_with_ranges(&region.ranges());
        self.array
            .store_array_subset_elements::<u16>(&subset, data)
            .map_err(StorageError::zarr)?;
        trace!(target = %self.target, region = ?region, "Region written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CubeConfig, Extent};
    use crate::storage::write_schema;
    use chrono::NaiveDate;

    fn config() -> CubeConfig {
        CubeConfig::new(
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2021, 2, 1).unwrap(),
            Extent::new(10.0, 40.0, 11.0, 41.0),
        )
        .with_resolution(0.25)
        .with_chunk_size(2)
    }

    #[test]
    fn test_open_missing_array_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = ArrayTarget::new(dir.path(), "rgb_median");
        assert!(matches!(
            ZarrChunkWriter::open(&target),
            Err(StorageError::MissingArray(_))
        ));
    }

    #[test]
    fn test_write_then_read_region() {
        let dir = tempfile::TempDir::new().unwrap();
        write_schema(dir.path(), &config()).unwrap();
        let writer = ZarrChunkWriter::open(&ArrayTarget::new(dir.path(), "rgb_median")).unwrap();
        assert_eq!(writer.shape(), &[2, 4, 4, 3]);

        let region = WriteRegion {
            time: 1..2,
            rows: 2..4,
            cols: 0..2,
            bands: 0..3,
        };
        let data: Vec<u16> = (1..=12).collect();
        writer.write_region(&region, &data).unwrap();
        assert_eq!(writer.read_region(&region).unwrap(), data);

        let untouched = WriteRegion {
            time: 0..1,
            ..region
        };
        assert_eq!(writer.read_region(&untouched).unwrap(), vec![0; 12]);
    }

    #[test]
    fn test_chunk_paths_cover_written_files() {
        let dir = tempfile::TempDir::new().unwrap();
        write_schema(dir.path(), &config()).unwrap();
        let writer = ZarrChunkWriter::open(&ArrayTarget::new(dir.path(), "rgb_median")).unwrap();

        // Two chunks along the rows of one time slice.
        let region = WriteRegion {
            time: 1..2,
            rows: 0..4,
            cols: 2..4,
            bands: 0..3,
        };
        let paths = writer.chunk_paths(&region).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| !p.exists()));

        writer.write_region(&region, &[5; 24]).unwrap();
        assert!(paths.iter().all(|p| p.is_file()));
        assert!(paths.iter().all(|p| p.starts_with(dir.path().join("rgb_median"))));
    }

    #[test]
    fn test_write_rejects_wrong_length() {
        let dir = tempfile::TempDir::new().unwrap();
        write_schema(dir.path(), &config()).unwrap();
        let writer = ZarrChunkWriter::open(&ArrayTarget::new(dir.path(), "rgb_median")).unwrap();
        let region = WriteRegion {
            time: 0..1,
            rows: 0..2,
            cols: 0..2,
            bands: 0..3,
        };
        assert!(matches!(
            writer.write_region(&region, &[1, 2, 3]),
            Err(StorageError::ShapeMismatch {
                expected: 12,
                actual: 3
            })
        ));
    }
}
