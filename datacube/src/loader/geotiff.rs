//! GeoTIFF / COG band loader.
//!
//! Only the part of an asset that a tile needs is transferred:
//!
//! ```text
//!   range [0, block) ──► parse IFD ──► missing byte? ──► range [pos, pos + block) ─┐
//!                           ▲                                                     │
//!                           └─────────────────────────────────────────────────────┘
//!                           │ layout: georeferencing, chunk offsets
//!                           ▼
//!   tile GeoBox ──► source pixel window ──► intersecting chunks ──► coalesced ranges
//!                                                                       │
//!                                  decode chunks (blocking pool) ◄──────┘
//!                                           │
//!                                           ▼
//!                                 resample onto the GeoBox
//! ```
//!
//! Fetches for all `(scene, band)` pairs of a job run concurrently, bounded
//! by `io_concurrency`. A window larger than `max_window_bytes` fails the
//! job with [`LoadError::WindowTooLarge`] instead of being decoded.

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::Range;

use rayon::prelude::*;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use super::projection::SourceCrs;
use super::{mosaic_by_solar_day, LoadError, Raster, SceneLayers, SceneLoader, SCL_BAND};
use crate::catalog::Scene;
use crate::grid::GeoBox;
use crate::http::AsyncHttpClient;

/// Maximum concurrent asset downloads per job.
pub const DEFAULT_IO_CONCURRENCY: usize = 16;

/// Size of each range request used to read TIFF headers.
pub const DEFAULT_BLOCK_BYTES: u64 = 64 * 1024;

/// Largest decoded source window of one asset.
pub const DEFAULT_MAX_WINDOW_BYTES: usize = 128 * 1024 * 1024;

/// Largest decoded buffer of a single TIFF chunk.
const MAX_CHUNK_DECODE_BYTES: usize = 64 * 1024 * 1024;

const MAX_HEADER_ROUNDS: usize = 16;

/// Ranges closer than this are fetched as one request.
const COALESCE_GAP_BYTES: u64 = 16 * 1024;

/// Source pixels added around the projected tile footprint.
const WINDOW_PADDING: f64 = 2.0;

/// Points sampled along each footprint edge when projecting it.
const EDGE_SAMPLES: usize = 16;

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;

const GEOKEY_GEOGRAPHIC_TYPE: u16 = 2048;
const GEOKEY_PROJECTED_CS_TYPE: u16 = 3072;

/// How source pixels are sampled onto the output grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resampling {
    Nearest,
    /// Falls back to nearest where a neighbour is missing or zero.
    Bilinear,
}

/// Loads scene assets from GeoTIFF files over HTTP range requests.
pub struct GeoTiffLoader<C: AsyncHttpClient> {
    client: C,
    io_concurrency: usize,
    block_bytes: u64,
    max_window_bytes: usize,
}

impl<C: AsyncHttpClient> GeoTiffLoader<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            io_concurrency: DEFAULT_IO_CONCURRENCY,
            block_bytes: DEFAULT_BLOCK_BYTES,
            max_window_bytes: DEFAULT_MAX_WINDOW_BYTES,
        }
    }

    pub fn with_io_concurrency(mut self, io_concurrency: usize) -> Self {
        self.io_concurrency = io_concurrency.max(1);
        self
    }

    pub fn with_block_bytes(mut self, block_bytes: u64) -> Self {
        self.block_bytes = block_bytes.max(16);
        self
    }

    pub fn with_max_window_bytes(mut self, max_window_bytes: usize) -> Self {
        self.max_window_bytes = max_window_bytes;
        self
    }

    /// Fetches header blocks until the first IFD parses.
    async fn read_layout(&self, url: &str, file: &mut SparseFile) -> Result<TiffLayout, LoadError> {
        let mut next = 0u64;
        for _ in 0..MAX_HEADER_ROUNDS {
            let bytes = self
                .client
                .get_range(url, next..next + self.block_bytes)
                .await?;
            file.insert(next, self.block_bytes, bytes);

            match TiffLayout::read(url, file) {
                Ok(layout) => return Ok(layout),
                Err(e) => match file.take_missing() {
                    Some(pos) if file.len.map_or(true, |len| pos < len) => next = pos,
                    _ => return Err(e),
                },
            }
        }
        Err(decode_error(url, "TIFF header spans too many blocks"))
    }

    async fn fetch_band(
        &self,
        semaphore: &Semaphore,
        scene: &Scene,
        asset: &str,
        geobox: GeoBox,
    ) -> Result<Raster, LoadError> {
        let href = scene
            .asset_href(asset)
            .ok_or_else(|| LoadError::MissingAsset {
                scene: scene.id.clone(),
                asset: asset.to_string(),
            })?
            .to_string();
        let resampling = if asset == SCL_BAND {
            Resampling::Nearest
        } else {
            Resampling::Bilinear
        };

        let (file, layout, window) = {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| LoadError::Task(e.to_string()))?;

            let mut file = SparseFile::default();
            let layout = self.read_layout(&href, &mut file).await?;
            let window = layout.window_for(&geobox);
            if window.is_empty() {
                debug!(scene = %scene.id, asset, "Asset does not cover the tile");
                return Ok(Raster::filled(geobox.width, geobox.height, 0));
            }

            let bytes = window.pixel_count() * std::mem::size_of::<u16>();
            if bytes > self.max_window_bytes {
                return Err(LoadError::WindowTooLarge {
                    url: href,
                    bytes,
                    limit: self.max_window_bytes,
                });
            }

            let ranges = coalesce(
                layout
                    .chunks_in(window)
                    .into_iter()
                    .map(|index| layout.chunk_range(index))
                    .filter(|range| !range.is_empty() && !file.covers(range))
                    .collect(),
                COALESCE_GAP_BYTES,
            );
            let fetched = futures::future::try_join_all(
                ranges
                    .iter()
                    .map(|range| self.client.get_range(&href, range.clone())),
            )
            .await?;
            for (range, bytes) in ranges.iter().zip(fetched) {
                file.insert(range.start, range.end - range.start, bytes);
            }
            debug!(
                scene = %scene.id,
                asset,
                requests = ranges.len(),
                fetched_bytes = file.fetched_bytes(),
                window = ?window,
                "Asset window fetched"
            );
            (file, layout, window)
        };

        tokio::task::spawn_blocking(move || {
            let image = SourceImage::decode_window(&href, file, &layout, window)?;
            Ok(image.resample(&geobox, resampling))
        })
        .await
        .map_err(|e| LoadError::Task(e.to_string()))?
    }
}

impl<C: AsyncHttpClient> SceneLoader for GeoTiffLoader<C> {
    #[instrument(skip_all, fields(scenes = scenes.len()))]
    async fn load(
        &self,
        scenes: &[Scene],
        bands: &[String],
        geobox: &GeoBox,
    ) -> Result<Vec<SceneLayers>, LoadError> {
        let semaphore = Semaphore::new(self.io_concurrency);
        let layer_names: Vec<&str> = std::iter::once(SCL_BAND)
            .chain(bands.iter().map(String::as_str))
            .collect();

        let fetches = scenes.iter().flat_map(|scene| {
            layer_names
                .iter()
                .map(|asset| self.fetch_band(&semaphore, scene, asset, *geobox))
        });
        let rasters = futures::future::try_join_all(fetches).await?;

        let per_scene = layer_names.len();
        let mut layers = Vec::with_capacity(scenes.len());
        let mut rasters = rasters.into_iter();
        for _ in scenes {
            let mut scene_rasters: Vec<Raster> = rasters.by_ref().take(per_scene).collect();
            let bands = scene_rasters.split_off(1);
            let scl = scene_rasters.pop().ok_or_else(|| {
                LoadError::Task("missing classification raster".to_string())
            })?;
            layers.push(SceneLayers { scl, bands });
        }

        Ok(mosaic_by_solar_day(
            scenes,
            layers,
            geobox.extent().center_lon(),
        ))
    }
}

// =============================================================================
// Sparse file
// =============================================================================

/// The fetched byte ranges of a remote file, readable as one file.
///
/// Reading a byte that was never fetched fails and records its position, so
/// the caller can fetch it and parse again.
#[derive(Debug, Default)]
struct SparseFile {
    segments: BTreeMap<u64, Vec<u8>>,
    /// Known once a range request came back short.
    len: Option<u64>,
    pos: u64,
    missing: Option<u64>,
}

impl SparseFile {
    /// Adds the answer to a request for `requested` bytes at `start`.
    fn insert(&mut self, start: u64, requested: u64, bytes: Vec<u8>) {
        if (bytes.len() as u64) < requested {
            self.len = Some(start + bytes.len() as u64);
        }
        if !bytes.is_empty() {
            self.segments.insert(start, bytes);
        }
    }

    fn segment_at(&self, pos: u64) -> Option<(u64, &[u8])> {
        self.segments
            .range(..=pos)
            .rev()
            .find(|(start, bytes)| pos < **start + bytes.len() as u64)
            .map(|(start, bytes)| (*start, bytes.as_slice()))
    }

    fn covers(&self, range: &Range<u64>) -> bool {
        self.segment_at(range.start)
            .is_some_and(|(start, bytes)| range.end <= start + bytes.len() as u64)
    }

    fn fetched_bytes(&self) -> usize {
        self.segments.values().map(Vec::len).sum()
    }

    fn rewind(&mut self) {
        self.pos = 0;
        self.missing = None;
    }

    fn take_missing(&mut self) -> Option<u64> {
        self.missing.take()
    }
}

impl Read for SparseFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.len.is_some_and(|len| self.pos >= len) {
            return Ok(0);
        }
        let pos = self.pos;
        let copied = self.segment_at(pos).map(|(start, bytes)| {
            let offset = (pos - start) as usize;
            let n = buf.len().min(bytes.len() - offset);
            buf[..n].copy_from_slice(&bytes[offset..offset + n]);
            n
        });
        match copied {
            Some(n) => {
                self.pos += n as u64;
                Ok(n)
            }
            None => {
                self.missing = Some(pos);
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("byte {pos} has not been fetched"),
                ))
            }
        }
    }
}

impl Seek for SparseFile {
    fn seek(&mut self, to: SeekFrom) -> io::Result<u64> {
        let pos = match to {
            SeekFrom::Start(pos) => Some(pos),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.len.and_then(|len| len.checked_add_signed(delta)),
        };
        let pos = pos.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek outside the known file")
        })?;
        self.pos = pos;
        Ok(pos)
    }
}

/// Sorts `ranges` and merges those at most `gap` bytes apart.
fn coalesce(mut ranges: Vec<Range<u64>>, gap: u64) -> Vec<Range<u64>> {
    ranges.sort_by_key(|range| range.start);
    let mut merged: Vec<Range<u64>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end + gap => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    merged
}

// =============================================================================
// Decoding
// =============================================================================

fn decode_error(url: &str, e: impl std::fmt::Display) -> LoadError {
    LoadError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    }
}

fn chunk_limits() -> Limits {
    let mut limits = Limits::default();
    limits.decoding_buffer_size = MAX_CHUNK_DECODE_BYTES;
    limits
}

/// Reads `key` from a GeoKeyDirectory stored inline (location 0).
fn geokey(directory: &[u16], key: u16) -> Option<u16> {
    let count = *directory.get(3)? as usize;
    directory
        .get(4..4 + count * 4)?
        .chunks_exact(4)
        .find(|entry| entry[0] == key && entry[1] == 0)
        .map(|entry| entry[3])
}

/// Affine mapping from model coordinates to raster positions.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Georeference {
    crs: SourceCrs,
    origin_x: f64,
    origin_y: f64,
    pixel_x: f64,
    pixel_y: f64,
}

impl Georeference {
    /// Fractional raster position of a model coordinate.
    fn position(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_x,
            (self.origin_y - y) / self.pixel_y,
        )
    }
}

/// Source pixels `[col0, col1) × [row0, row1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    col0: usize,
    row0: usize,
    col1: usize,
    row1: usize,
}

impl Window {
    const EMPTY: Window = Window {
        col0: 0,
        row0: 0,
        col1: 0,
        row1: 0,
    };

    fn width(&self) -> usize {
        self.col1.saturating_sub(self.col0)
    }

    fn height(&self) -> usize {
        self.row1.saturating_sub(self.row0)
    }

    fn pixel_count(&self) -> usize {
        self.width() * self.height()
    }

    fn is_empty(&self) -> bool {
        self.pixel_count() == 0
    }

    fn contains(&self, col: isize, row: isize) -> bool {
        col >= self.col0 as isize
            && row >= self.row0 as isize
            && col < self.col1 as isize
            && row < self.row1 as isize
    }
}

/// First-IFD facts needed to locate pixels in the file.
#[derive(Debug, Clone)]
struct TiffLayout {
    georef: Georeference,
    width: usize,
    height: usize,
    chunk_width: usize,
    chunk_height: usize,
    /// Interleaved samples per pixel inside one chunk.
    samples_per_pixel: usize,
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
}

impl TiffLayout {
    /// Parses the first IFD. On a missing byte the file records its position.
    fn read(url: &str, file: &mut SparseFile) -> Result<Self, LoadError> {
        file.rewind();
        let mut decoder = Decoder::new(&mut *file)
            .map_err(|e| decode_error(url, e))?
            .with_limits(chunk_limits());

        let (width, height) = decoder.dimensions().map_err(|e| decode_error(url, e))?;
        let (chunk_width, chunk_height) = decoder.chunk_dimensions();
        if chunk_width == 0 || chunk_height == 0 {
            return Err(decode_error(url, "image has empty chunks"));
        }

        let scale = decoder
            .get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_PIXEL_SCALE))
            .map_err(|e| decode_error(url, e))?;
        let tiepoint = decoder
            .get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_TIEPOINT))
            .map_err(|e| decode_error(url, e))?;
        let keys = decoder
            .get_tag_u16_vec(Tag::from_u16_exhaustive(TAG_GEO_KEY_DIRECTORY))
            .map_err(|e| decode_error(url, e))?;
        if scale.len() < 2 || tiepoint.len() < 6 {
            return Err(decode_error(url, "incomplete georeferencing tags"));
        }

        let epsg = geokey(&keys, GEOKEY_PROJECTED_CS_TYPE)
            .or_else(|| geokey(&keys, GEOKEY_GEOGRAPHIC_TYPE))
            .ok_or_else(|| LoadError::UnsupportedCrs {
                url: url.to_string(),
                crs: "no EPSG code in GeoKeyDirectory".to_string(),
            })?;
        let crs = SourceCrs::from_epsg(epsg as u32).ok_or_else(|| LoadError::UnsupportedCrs {
            url: url.to_string(),
            crs: format!("EPSG:{epsg}"),
        })?;

        let tiled = decoder
            .find_tag(Tag::TileOffsets)
            .map_err(|e| decode_error(url, e))?
            .is_some();
        let (offsets_tag, counts_tag) = if tiled {
            (Tag::TileOffsets, Tag::TileByteCounts)
        } else {
            (Tag::StripOffsets, Tag::StripByteCounts)
        };
        let offsets = decoder
            .get_tag_u64_vec(offsets_tag)
            .map_err(|e| decode_error(url, e))?;
        let byte_counts = decoder
            .get_tag_u64_vec(counts_tag)
            .map_err(|e| decode_error(url, e))?;
        if offsets.len() != byte_counts.len() {
            return Err(decode_error(url, "chunk offsets and byte counts differ"));
        }

        // Separate planes store one sample per chunk; the first plane comes first.
        let planar = decoder.get_tag_u32(Tag::PlanarConfiguration).unwrap_or(1);
        let samples_per_pixel = if planar == 2 {
            1
        } else {
            decoder.get_tag_u32(Tag::SamplesPerPixel).unwrap_or(1).max(1) as usize
        };

        Ok(Self {
            georef: Georeference {
                crs,
                // Tiepoint maps raster (I, J) to model (X, Y).
                origin_x: tiepoint[3] - tiepoint[0] * scale[0],
                origin_y: tiepoint[4] + tiepoint[1] * scale[1],
                pixel_x: scale[0],
                pixel_y: scale[1],
            },
            width: width as usize,
            height: height as usize,
            chunk_width: chunk_width as usize,
            chunk_height: chunk_height as usize,
            samples_per_pixel,
            offsets,
            byte_counts,
        })
    }

    #[cfg(test)]
    fn full_window(&self) -> Window {
        Window {
            col0: 0,
            row0: 0,
            col1: self.width,
            row1: self.height,
        }
    }

    /// Source pixels covering `geobox`, padded for bilinear sampling.
    fn window_for(&self, geobox: &GeoBox) -> Window {
        let extent = geobox.extent();
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for i in 0..=EDGE_SAMPLES {
            let t = i as f64 / EDGE_SAMPLES as f64;
            let lon = extent.min_lon + t * extent.width();
            let lat = extent.min_lat + t * extent.height();
            for (lon, lat) in [
                (lon, extent.min_lat),
                (lon, extent.max_lat),
                (extent.min_lon, lat),
                (extent.max_lon, lat),
            ] {
                let (x, y) = self.georef.crs.project(lon, lat);
                let (fx, fy) = self.georef.position(x, y);
                min_x = min_x.min(fx);
                max_x = max_x.max(fx);
                min_y = min_y.min(fy);
                max_y = max_y.max(fy);
            }
        }
        if !(min_x.is_finite() && max_x.is_finite() && min_y.is_finite() && max_y.is_finite()) {
            return Window::EMPTY;
        }

        let clamp = |v: f64, limit: usize| v.clamp(0.0, limit as f64) as usize;
        let window = Window {
            col0: clamp(min_x.floor() - WINDOW_PADDING, self.width),
            row0: clamp(min_y.floor() - WINDOW_PADDING, self.height),
            col1: clamp(max_x.ceil() + WINDOW_PADDING, self.width),
            row1: clamp(max_y.ceil() + WINDOW_PADDING, self.height),
        };
        if window.is_empty() {
            Window::EMPTY
        } else {
            window
        }
    }

    fn chunks_across(&self) -> usize {
        self.width.div_ceil(self.chunk_width)
    }

    /// Indices of the chunks intersecting `window`, row-major.
    fn chunks_in(&self, window: Window) -> Vec<usize> {
        if window.is_empty() {
            return Vec::new();
        }
        let across = self.chunks_across();
        let rows = window.row0 / self.chunk_height..=(window.row1 - 1) / self.chunk_height;
        let cols = window.col0 / self.chunk_width..=(window.col1 - 1) / self.chunk_width;
        rows.flat_map(|row| cols.clone().map(move |col| row * across + col))
            .filter(|&index| index < self.offsets.len())
            .collect()
    }

    fn chunk_range(&self, index: usize) -> Range<u64> {
        let start = self.offsets[index];
        start..start + self.byte_counts[index]
    }
}

/// A decoded window of a single-band image with its georeferencing.
#[derive(Debug, Clone)]
struct SourceImage {
    georef: Georeference,
    window: Window,
    data: Vec<u16>,
}

impl SourceImage {
    /// Decodes the chunks of `window` from `file`, which must hold them.
    fn decode_window(
        url: &str,
        mut file: SparseFile,
        layout: &TiffLayout,
        window: Window,
    ) -> Result<Self, LoadError> {
        file.rewind();
        let mut decoder = Decoder::new(file)
            .map_err(|e| decode_error(url, e))?
            .with_limits(chunk_limits());

        let width = window.width();
        let mut data = vec![0u16; window.pixel_count()];
        let across = layout.chunks_across();
        let spp = layout.samples_per_pixel;

        for index in layout.chunks_in(window) {
            // Sparse COGs leave empty chunks unwritten.
            if layout.byte_counts[index] == 0 {
                continue;
            }
            let samples = match decoder
                .read_chunk(index as u32)
                .map_err(|e| decode_error(url, e))?
            {
                DecodingResult::U16(samples) => samples,
                DecodingResult::U8(samples) => samples.into_iter().map(u16::from).collect(),
                _ => return Err(decode_error(url, "unsupported sample format")),
            };

            let (data_width, data_height) = decoder.chunk_data_dimensions(index as u32);
            let (data_width, data_height) = (data_width as usize, data_height as usize);
            let padded = layout.chunk_width * layout.chunk_height * spp;
            let row_width = if samples.len() >= padded {
                layout.chunk_width
            } else {
                data_width
            };

            let x0 = (index % across) * layout.chunk_width;
            let y0 = (index / across) * layout.chunk_height;
            for r in 0..data_height {
                let y = y0 + r;
                if y < window.row0 || y >= window.row1 {
                    continue;
                }
                for c in 0..data_width {
                    let x = x0 + c;
                    if x < window.col0 || x >= window.col1 {
                        continue;
                    }
                    if let Some(&value) = samples.get((r * row_width + c) * spp) {
                        data[(y - window.row0) * width + (x - window.col0)] = value;
                    }
                }
            }
        }

        Ok(Self {
            georef: layout.georef,
            window,
            data,
        })
    }

    fn value(&self, col: isize, row: isize) -> Option<u16> {
        if !self.window.contains(col, row) {
            return None;
        }
        let (col, row) = (col as usize - self.window.col0, row as usize - self.window.row0);
        Some(self.data[row * self.window.width() + col])
    }

    fn sample(&self, fx: f64, fy: f64, resampling: Resampling) -> u16 {
        let nearest = self
            .value(fx.floor() as isize, fy.floor() as isize)
            .unwrap_or(0);
        if resampling == Resampling::Nearest {
            return nearest;
        }

        let cx = fx - 0.5;
        let cy = fy - 0.5;
        let x0 = cx.floor();
        let y0 = cy.floor();
        let (wx, wy) = (cx - x0, cy - y0);
        let (x0, y0) = (x0 as isize, y0 as isize);

        let corners = [
            self.value(x0, y0),
            self.value(x0 + 1, y0),
            self.value(x0, y0 + 1),
            self.value(x0 + 1, y0 + 1),
        ];
        match corners {
            [Some(a), Some(b), Some(c), Some(d)] if a > 0 && b > 0 && c > 0 && d > 0 => {
                let top = a as f64 * (1.0 - wx) + b as f64 * wx;
                let bottom = c as f64 * (1.0 - wx) + d as f64 * wx;
                (top * (1.0 - wy) + bottom * wy).round() as u16
            }
            _ => nearest,
        }
    }

    /// Samples the image at every pixel centre of `geobox`.
    fn resample(&self, geobox: &GeoBox, resampling: Resampling) -> Raster {
        let mut data = vec![0u16; geobox.pixel_count()];
        if geobox.width == 0 {
            return Raster::new(0, geobox.height, data);
        }
        data.par_chunks_mut(geobox.width)
            .enumerate()
            .for_each(|(row, out)| {
                let lat = geobox.lat(row);
                for (col, value) in out.iter_mut().enumerate() {
                    let (x, y) = self.georef.crs.project(geobox.lon(col), lat);
                    let (fx, fy) = self.georef.position(x, y);
                    *value = self.sample(fx, fy, resampling);
                }
            });
        Raster::new(geobox.width, geobox.height, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Extent;
    use crate::http::tests::MockAsyncHttpClient;
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use tiff::encoder::{colortype, TiffEncoder};

    /// Encodes a single-band u16 GeoTIFF in EPSG:4326, optionally in strips
    /// of `rows_per_strip` rows.
    fn geotiff_4326(
        west: f64,
        north: f64,
        pixel: f64,
        (width, height): (u32, u32),
        rows_per_strip: Option<u32>,
        data: &[u16],
    ) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut cursor).unwrap();
            let mut image = encoder
                .new_image::<colortype::Gray16>(width, height)
                .unwrap();
            if let Some(rows) = rows_per_strip {
                image.rows_per_strip(rows).unwrap();
            }
            let scale = [pixel, pixel, 0.0];
            let tiepoint = [0.0, 0.0, 0.0, west, north, 0.0];
            let keys: [u16; 12] = [1, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4326];
            image
                .encoder()
                .write_tag(Tag::from_u16_exhaustive(TAG_MODEL_PIXEL_SCALE), &scale[..])
                .unwrap();
            image
                .encoder()
                .write_tag(Tag::from_u16_exhaustive(TAG_MODEL_TIEPOINT), &tiepoint[..])
                .unwrap();
            image
                .encoder()
                .write_tag(Tag::from_u16_exhaustive(TAG_GEO_KEY_DIRECTORY), &keys[..])
                .unwrap();
            image.write_data(data).unwrap();
        }
        cursor.into_inner()
    }

    fn small(west: f64, north: f64, pixel: f64, size: (u32, u32), data: &[u16]) -> Vec<u8> {
        geotiff_4326(west, north, pixel, size, None, data)
    }

    /// Decodes a whole in-memory file.
    fn decode(bytes: Vec<u8>) -> Result<SourceImage, LoadError> {
        let mut file = SparseFile::default();
        file.insert(0, u64::MAX, bytes);
        let layout = TiffLayout::read("mem://a.tif", &mut file)?;
        let window = layout.full_window();
        SourceImage::decode_window("mem://a.tif", file, &layout, window)
    }

    fn scene(assets: &[(&str, &str)]) -> Scene {
        Scene {
            id: "s1".into(),
            datetime: "2020-01-05T10:00:00Z".parse().unwrap(),
            assets: assets
                .iter()
                .map(|(name, href)| (name.to_string(), href.to_string()))
                .collect::<BTreeMap<_, _>>(),
            cloud_cover: None,
        }
    }

    #[test]
    fn test_geokey_lookup() {
        let keys = [1, 1, 0, 2, 1024, 0, 1, 1, 3072, 0, 1, 32633];
        assert_eq!(geokey(&keys, 3072), Some(32633));
        assert_eq!(geokey(&keys, 2048), None);
    }

    #[test]
    fn test_decode_reads_georeferencing() {
        let image = decode(small(10.0, 46.0, 0.5, (2, 2), &[1, 2, 3, 4])).unwrap();
        assert_eq!(image.georef.crs, SourceCrs::Geographic);
        assert_eq!((image.window.width(), image.window.height()), (2, 2));
        assert_eq!(image.georef.position(10.75, 45.25), (1.5, 1.5));
    }

    #[test]
    fn test_nearest_resample_identity_grid() {
        let image = decode(small(0.0, 2.0, 1.0, (2, 2), &[1, 2, 3, 4])).unwrap();
        let geobox = GeoBox::from_extent(&Extent::new(0.0, 0.0, 2.0, 2.0), 1.0);
        let raster = image.resample(&geobox, Resampling::Nearest);
        assert_eq!(raster.data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_resample_outside_source_is_zero() {
        let image = decode(small(0.0, 1.0, 1.0, (1, 1), &[9])).unwrap();
        let geobox = GeoBox::from_extent(&Extent::new(0.0, 0.0, 2.0, 1.0), 1.0);
        let raster = image.resample(&geobox, Resampling::Bilinear);
        assert_eq!(raster.data, vec![9, 0]);
    }

    #[test]
    fn test_bilinear_interpolates_between_centres() {
        let image = decode(small(0.0, 2.0, 1.0, (2, 2), &[100, 200, 100, 200])).unwrap();
        // Equidistant from all four pixel centres.
        assert_eq!(image.sample(1.0, 1.0, Resampling::Bilinear), 150);
        assert_eq!(image.sample(1.0, 1.0, Resampling::Nearest), 200);
    }

    #[test]
    fn test_bilinear_falls_back_to_nearest_at_edges() {
        let image = decode(small(0.0, 1.0, 1.0, (2, 1), &[100, 200])).unwrap();
        assert_eq!(image.sample(1.0, 0.5, Resampling::Bilinear), 200);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode(vec![0, 1, 2, 3]),
            Err(LoadError::Decode { .. })
        ));
    }

    #[test]
    fn test_sparse_file_reports_missing_bytes() {
        let mut file = SparseFile::default();
        file.insert(0, 4, vec![1, 2, 3, 4]);
        file.insert(10, 4, vec![5, 6]);
        assert_eq!(file.len, Some(12));

        let mut buf = [0u8; 3];
        file.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        assert!(file.read_exact(&mut buf).is_err());
        assert_eq!(file.take_missing(), Some(4));

        file.seek(SeekFrom::Start(10)).unwrap();
        let mut rest = Vec::new();
        file.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![5, 6]);
        assert!(file.covers(&(1..3)));
        assert!(!file.covers(&(3..6)));
    }

    #[test]
    fn test_coalesce_merges_close_ranges() {
        let ranges = coalesce(vec![100..200, 0..10, 12..20, 5..8], 2);
        assert_eq!(ranges, vec![0..20, 100..200]);
    }

    #[tokio::test]
    async fn test_loader_fetches_scl_and_bands() {
        let scl = small(0.0, 2.0, 1.0, (2, 2), &[4, 4, 5, 9]);
        let red = small(0.0, 2.0, 1.0, (2, 2), &[10, 20, 30, 40]);
        let client = MockAsyncHttpClient::default()
            .with_route("https://data/scl", Ok(scl))
            .with_route("https://data/red", Ok(red));
        let loader = GeoTiffLoader::new(client).with_io_concurrency(2);

        let scene = scene(&[
            ("scl", "https://data/scl.tif"),
            ("red", "https://data/red.tif"),
        ]);
        let geobox = GeoBox::from_extent(&Extent::new(0.0, 0.0, 2.0, 2.0), 1.0);
        let layers = loader
            .load(&[scene], &["red".to_string()], &geobox)
            .await
            .unwrap();

        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].scl.data, vec![4, 4, 5, 9]);
        assert_eq!(layers[0].bands.len(), 1);
        assert_eq!(layers[0].bands[0].data, vec![10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn test_loader_reads_only_the_tile_window() {
        // 128x128 pixels of 0.5 degrees, 32 strips of 4 rows (1 KiB each).
        let (width, height) = (128u32, 128u32);
        let data: Vec<u16> = (0..width * height).map(|i| i as u16 + 1).collect();
        let bytes = geotiff_4326(0.0, 64.0, 0.5, (width, height), Some(4), &data);
        let total = bytes.len() as u64;

        let client = MockAsyncHttpClient::default().with_route("https://data/scl", Ok(bytes));
        let loader = GeoTiffLoader::new(client).with_block_bytes(512);

        // Columns 10..14, rows 8..12 of the source.
        let geobox = GeoBox::from_extent(&Extent::new(5.0, 58.0, 7.0, 60.0), 0.5);
        let layers = loader
            .load(&[scene(&[("scl", "https://data/scl.tif")])], &[], &geobox)
            .await
            .unwrap();

        let expected: Vec<u16> = (8..12)
            .flat_map(|row| (10..14).map(move |col| (row * width + col) as u16 + 1))
            .collect();
        assert_eq!(layers[0].scl.data, expected);

        let client = &loader.client;
        assert!(client.requests.lock().iter().all(|(method, _, _)| *method == "RANGE"));
        assert!(
            client.range_bytes() < total / 2,
            "fetched {} of {} bytes",
            client.range_bytes(),
            total
        );
    }

    #[tokio::test]
    async fn test_asset_outside_tile_fetches_no_chunks() {
        let data = vec![7u16; 16 * 16];
        let bytes = geotiff_4326(0.0, 16.0, 1.0, (16, 16), Some(4), &data);
        let client = MockAsyncHttpClient::default().with_route("https://data/scl", Ok(bytes));
        let loader = GeoTiffLoader::new(client).with_block_bytes(4096);

        let geobox = GeoBox::from_extent(&Extent::new(40.0, 40.0, 42.0, 42.0), 1.0);
        let layers = loader
            .load(&[scene(&[("scl", "https://data/scl.tif")])], &[], &geobox)
            .await
            .unwrap();

        assert_eq!(layers[0].scl.data, vec![0; 4]);
        // The 4 KiB header block holds the whole file; nothing else is requested.
        assert_eq!(loader.client.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_window_is_a_typed_error() {
        let bytes = small(0.0, 2.0, 1.0, (2, 2), &[1, 2, 3, 4]);
        let client = MockAsyncHttpClient::default().with_route("https://data/scl", Ok(bytes));
        let loader = GeoTiffLoader::new(client).with_max_window_bytes(4);

        let geobox = GeoBox::from_extent(&Extent::new(0.0, 0.0, 2.0, 2.0), 1.0);
        let result = loader
            .load(&[scene(&[("scl", "https://data/scl.tif")])], &[], &geobox)
            .await;
        assert!(matches!(
            result,
            Err(LoadError::WindowTooLarge { bytes: 8, limit: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_loader_missing_asset_is_an_error() {
        let loader = GeoTiffLoader::new(MockAsyncHttpClient::default());
        let geobox = GeoBox::from_extent(&Extent::new(0.0, 0.0, 1.0, 1.0), 1.0);
        let result = loader.load(&[scene(&[])], &[], &geobox).await;
        assert!(matches!(result, Err(LoadError::MissingAsset { .. })));
    }
}
