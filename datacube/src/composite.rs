//! Cloud masking and the per-pixel temporal median composite.
//!
//! ```text
//!   SCL ──► bad = !(scl ∈ clear) ──► closing(r) ──► opening(r) ──┐
//!                                                               ▼
//!   bands ───────────────────────────────────────────────► erase(bad)
//!                                                               │
//!                                   median over time, ignoring 0 ◄┘
//! ```
//!
//! The output is band-last: `data[(row * width + col) * nbands + band]`.

use rayon::prelude::*;

use crate::loader::{Raster, SceneLayers};

/// Scene classification: vegetation.
pub const SCL_VEGETATION: u16 = 4;
/// Scene classification: bare soil / not vegetated.
pub const SCL_NOT_VEGETATED: u16 = 5;

/// Disk radius used for both mask closing and opening.
pub const DEFAULT_MASK_RADIUS: usize = 5;

/// Parameters of the cloud mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskSettings {
    /// Classification values that are kept; everything else is masked.
    pub clear_classes: Vec<u16>,
    pub closing_radius: usize,
    pub opening_radius: usize,
}

impl Default for MaskSettings {
    fn default() -> Self {
        Self {
            clear_classes: vec![SCL_VEGETATION, SCL_NOT_VEGETATED],
            closing_radius: DEFAULT_MASK_RADIUS,
            opening_radius: DEFAULT_MASK_RADIUS,
        }
    }
}

/// A boolean raster, `true` = masked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    pub width: usize,
    pub height: usize,
    pub data: Vec<bool>,
}

impl Mask {
    pub fn new(width: usize, height: usize, data: Vec<bool>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        self.data[row * self.width + col]
    }

    /// Masks every pixel whose classification is not in `clear_classes`.
    pub fn from_classification(scl: &Raster, clear_classes: &[u16]) -> Self {
        Self::new(
            scl.width,
            scl.height,
            scl.data.iter().map(|v| !clear_classes.contains(v)).collect(),
        )
    }

    /// Per-row prefix counts of set pixels, `width + 1` entries per row.
    fn prefix_counts(&self) -> Vec<u32> {
        let stride = self.width + 1;
        let mut counts = vec![0u32; stride * self.height];
        for row in 0..self.height {
            let base = row * stride;
            for col in 0..self.width {
                counts[base + col + 1] = counts[base + col] + self.get(row, col) as u32;
            }
        }
        counts
    }

    /// Binary dilation (`dilate = true`) or erosion with a disk of `radius`.
    ///
    /// Pixels outside the raster are neutral: they neither set a pixel during
    /// dilation nor clear it during erosion.
    fn morph(&self, radius: usize, dilate: bool) -> Mask {
        if radius == 0 || self.data.is_empty() {
            return self.clone();
        }
        let r = radius as isize;
        let half_widths: Vec<isize> = (-r..=r)
            .map(|dy| (((r * r - dy * dy) as f64).sqrt()).floor() as isize)
            .collect();
        let counts = self.prefix_counts();
        let stride = self.width + 1;
        let (width, height) = (self.width as isize, self.height as isize);

        let mut data = vec![false; self.data.len()];
        data.par_chunks_mut(self.width)
            .enumerate()
            .for_each(|(row, out)| {
                let row = row as isize;
                for (col, value) in out.iter_mut().enumerate() {
                    let col = col as isize;
                    let mut any = false;
                    let mut all = true;
                    for (i, dy) in (-r..=r).enumerate() {
                        let y = row + dy;
                        if y < 0 || y >= height {
                            continue;
                        }
                        let lo = (col - half_widths[i]).max(0);
                        let hi = (col + half_widths[i]).min(width - 1);
                        let base = y as usize * stride;
                        let set = counts[base + hi as usize + 1] - counts[base + lo as usize];
                        any |= set > 0;
                        all &= set as isize == hi - lo + 1;
                    }
                    *value = if dilate { any } else { all };
                }
            });
        Mask::new(self.width, self.height, data)
    }

    pub fn dilate(&self, radius: usize) -> Mask {
        self.morph(radius, true)
    }

    pub fn erode(&self, radius: usize) -> Mask {
        self.morph(radius, false)
    }

    /// Dilation followed by erosion: fills small gaps.
    pub fn closing(&self, radius: usize) -> Mask {
        self.dilate(radius).erode(radius)
    }

    /// Erosion followed by dilation: removes small specks.
    pub fn opening(&self, radius: usize) -> Mask {
        self.erode(radius).dilate(radius)
    }
}

/// Builds the cleaned cloud/shadow mask of one time step.
pub fn cloud_mask(scl: &Raster, settings: &MaskSettings) -> Mask {
    Mask::from_classification(scl, &settings.clear_classes)
        .closing(settings.closing_radius)
        .opening(settings.opening_radius)
}

/// Sets masked pixels of every band to 0.
pub fn erase_masked(layers: &mut SceneLayers, mask: &Mask) {
    for band in &mut layers.bands {
        for (value, &masked) in band.data.iter_mut().zip(&mask.data) {
            if masked {
                *value = 0;
            }
        }
    }
}

/// Median of the values, truncated to an integer; `None` if empty.
fn median(values: &mut [u16]) -> Option<u16> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some(((values[mid - 1] as u32 + values[mid] as u32) / 2) as u16)
    }
}

/// Per-pixel, per-band median over time steps, ignoring zeros.
///
/// Pixels with no valid observation are 0.
pub fn median_composite(
    steps: &[SceneLayers],
    width: usize,
    height: usize,
    nbands: usize,
) -> Vec<u16> {
    let mut out = vec![0u16; width * height * nbands];
    if steps.is_empty() || width == 0 {
        return out;
    }
    out.par_chunks_mut(width * nbands)
        .enumerate()
        .for_each(|(row, out_row)| {
            let mut values = Vec::with_capacity(steps.len());
            for col in 0..width {
                let pixel = row * width + col;
                for band in 0..nbands {
                    values.clear();
                    values.extend(
                        steps
                            .iter()
                            .filter_map(|s| s.bands.get(band))
                            .map(|raster| raster.data[pixel])
                            .filter(|v| *v > 0),
                    );
                    out_row[col * nbands + band] = median(&mut values).unwrap_or(0);
                }
            }
        });
    out
}

/// Masks every step and reduces the stack to a band-last median composite.
pub fn composite(
    mut steps: Vec<SceneLayers>,
    width: usize,
    height: usize,
    nbands: usize,
    settings: &MaskSettings,
) -> Vec<u16> {
    steps.par_iter_mut().for_each(|step| {
        let mask = cloud_mask(&step.scl, settings);
        erase_masked(step, &mask);
    });
    median_composite(&steps, width, height, nbands)
}
