//! Layout of the output zarr hierarchy.
//!
//! ```text
//!   /                 group, title + cube attributes
//!   /time             int64 days since 1970-01-01, one per period
//!   /latitude         float64 pixel centres, north to south
//!   /longitude        float64 pixel centres, west to east
//!   /<varname>        uint16 (time, latitude, longitude, band),
//!                     chunks (1, cs, cs, nbands), fill 0
//! ```

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::GroupBuilder;
use zarrs::storage::store::FilesystemStore;

use super::StorageError;
use crate::grid::{days_since_epoch, CubeConfig};

/// `title` attribute of the root group.
pub const DATASET_TITLE: &str = "Sentinel 2 Data Cube";

fn attributes(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Creates a one-dimensional coordinate array of `len` elements in one chunk.
fn coordinate_array(
    store: &Arc<FilesystemStore>,
    name: &str,
    data_type: DataType,
    fill_value: FillValue,
    len: usize,
    attrs: Value,
) -> Result<Array<FilesystemStore>, StorageError> {
    let len = len as u64;
    let array = ArrayBuilder::new(
        vec![len],
        data_type,
        vec![len.max(1)]
            .try_into()
            .map_err(|_| StorageError::Zarr(format!("invalid chunk shape for {name}")))?,
        fill_value,
    )
    .dimension_names([name].into())
    .attributes(attributes(attrs))
    .build(store.clone(), &format!("/{name}"))
    .map_err(StorageError::zarr)?;
    array.store_metadata().map_err(StorageError::zarr)?;
    Ok(array)
}

/// Creates the group, coordinates and the empty data variable under `root`.
pub fn write_schema(root: &Path, config: &CubeConfig) -> Result<(), StorageError> {
    std::fs::create_dir_all(root).map_err(|e| StorageError::io(root, e))?;
    let store = Arc::new(FilesystemStore::new(root).map_err(StorageError::zarr)?);

    let geobox = config.geobox();
    let periods = config.periods();
    let bands = config.bands();

    GroupBuilder::new()
        .attributes(attributes(json!({
            "title": DATASET_TITLE,
            "crs": format!("EPSG:{}", config.epsg()),
            "resolution": config.resolution(),
            "time_frequency_months": config.time_frequency_months(),
            "bands": bands,
        })))
        .build(store.clone(), "/")
        .map_err(StorageError::zarr)?
        .store_metadata()
        .map_err(StorageError::zarr)?;

    let times: Vec<i64> = periods
        .iter()
        .map(|p| days_since_epoch(p.first_day()))
        .collect();
    let time = coordinate_array(
        &store,
        "time",
        DataType::Int64,
        FillValue::from(0i64),
        times.len(),
        json!({"units": "days since 1970-01-01", "calendar": "proleptic_gregorian"}),
    )?;
    time.store_array_subset_elements::<i64>(&ArraySubset::new_with_shape(time.shape().to_vec()), &times)
        .map_err(StorageError::zarr)?;

    let latitudes = geobox.latitudes();
    let latitude = coordinate_array(
        &store,
        "latitude",
        DataType::Float64,
        FillValue::from(0.0f64),
        latitudes.len(),
        json!({"units": "degrees_north", "standard_name": "latitude"}),
    )?;
    latitude
        .store_array_subset_elements::<f64>(&ArraySubset::new_with_shape(latitude.shape().to_vec()), &latitudes)
        .map_err(StorageError::zarr)?;

    let longitudes = geobox.longitudes();
    let longitude = coordinate_array(
        &store,
        "longitude",
        DataType::Float64,
        FillValue::from(0.0f64),
        longitudes.len(),
        json!({"units": "degrees_east", "standard_name": "longitude"}),
    )?;
    longitude
        .store_array_subset_elements::<f64>(&ArraySubset::new_with_shape(longitude.shape().to_vec()), &longitudes)
        .map_err(StorageError::zarr)?;

    let chunk = config.chunk_size() as u64;
    let shape = vec![
        periods.len() as u64,
        geobox.height as u64,
        geobox.width as u64,
        bands.len() as u64,
    ];
    let chunk_shape = vec![1, chunk, chunk, bands.len() as u64];
    let array = ArrayBuilder::new(
        shape,
        DataType::UInt16,
        chunk_shape
            .try_into()
            .map_err(|_| StorageError::Zarr("invalid data chunk shape".to_string()))?,
        FillValue::from(0u16),
    )
    .dimension_names(["time", "latitude", "longitude", "band"].into())
    .attributes(attributes(json!({
        "bands": bands,
        "long_name": "cloud-free median composite",
    })))
    .build(store.clone(), &format!("/{}", config.varname()))
    .map_err(StorageError::zarr)?;
    array.store_metadata().map_err(StorageError::zarr)?;

    tracing::debug!(
        root = %root.display(),
        shape = ?array.shape(),
        "Wrote cube schema"
    );
    Ok(())
}
