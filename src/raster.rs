//! Raster data abstraction.
//!
//! [`RasterSource`] is what the window resolver and band extractor see: a
//! georeferenced grid with a windowed read. [`crate::CogReader`] implements it
//! over remote bytes, [`crate::WarpedView`] over another source, and
//! [`MemoryRaster`] over a pixel buffer.

use crate::error::RasterError;
use crate::geometry::BoundingBox;
use crate::window::{GeoTransform, Window};

/// Pixels read from a window, band-interleaved (`b0, b1, b0, b1, ...`).
#[derive(Debug, Clone)]
pub struct RasterBlock {
    pub pixels: Vec<f32>,
    pub bands: usize,
    pub width: usize,
    pub height: usize,
    /// Window actually read, after truncation at the source edges
    pub window: Window,
}

impl RasterBlock {
    /// Value of `band` at (`col`, `row`) within the block.
    #[inline]
    #[must_use]
    pub fn get(&self, col: usize, row: usize, band: usize) -> Option<f32> {
        if col >= self.width || row >= self.height || band >= self.bands {
            return None;
        }
        self.pixels.get((row * self.width + col) * self.bands + band).copied()
    }
}

/// A georeferenced raster that can be read window by window.
pub trait RasterSource {
    /// EPSG code of the raster's CRS, if known.
    fn crs(&self) -> Option<i32>;

    /// Pixel-to-world transform.
    fn transform(&self) -> GeoTransform;

    fn width(&self) -> usize;

    fn height(&self) -> usize;

    /// Samples per pixel.
    fn bands(&self) -> usize;

    fn nodata(&self) -> Option<f64> {
        None
    }

    /// Extent in the raster's own CRS.
    fn bounds(&self) -> BoundingBox {
        self.transform().bounds(self.width(), self.height())
    }

    /// Read a window that lies fully inside the raster.
    ///
    /// # Errors
    /// Implementation-specific I/O or decoding errors.
    fn read_pixels(&self, window: &Window) -> Result<Vec<f32>, RasterError>;

    /// Read a window, truncating it at the raster edges first.
    ///
    /// # Errors
    /// [`RasterError::EmptyRead`] if the window lies entirely outside the
    /// raster, otherwise whatever [`RasterSource::read_pixels`] returns.
    fn read_window(&self, window: &Window) -> Result<RasterBlock, RasterError> {
        let clipped = window
            .truncate_to(self.width(), self.height())
            .ok_or_else(|| RasterError::EmptyRead(window.to_string()))?;
        let pixels = self.read_pixels(&clipped)?;
        Ok(RasterBlock {
            pixels,
            bands: self.bands(),
            width: clipped.width,
            height: clipped.height,
            window: clipped,
        })
    }
}

/// Raster held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    pub pixels: Vec<f32>,
    pub bands: usize,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: Option<i32>,
    pub nodata: Option<f64>,
}

impl MemoryRaster {
    /// Raster with every sample set to `value`.
    #[must_use]
    pub fn filled(
        width: usize,
        height: usize,
        bands: usize,
        transform: GeoTransform,
        crs: Option<i32>,
        value: f32,
    ) -> Self {
        Self {
            pixels: vec![value; width * height * bands],
            bands,
            width,
            height,
            transform,
            crs,
            nodata: None,
        }
    }

    /// Raster whose samples are `f(col, row, band)`.
    #[must_use]
    pub fn from_fn(
        width: usize,
        height: usize,
        bands: usize,
        transform: GeoTransform,
        crs: Option<i32>,
        f: impl Fn(usize, usize, usize) -> f32,
    ) -> Self {
        let mut pixels = Vec::with_capacity(width * height * bands);
        for row in 0..height {
            for col in 0..width {
                for band in 0..bands {
                    pixels.push(f(col, row, band));
                }
            }
        }
        Self {
            pixels,
            bands,
            width,
            height,
            transform,
            crs,
            nodata: None,
        }
    }
}

impl RasterSource for MemoryRaster {
    fn crs(&self) -> Option<i32> {
        self.crs
    }

    fn transform(&self) -> GeoTransform {
        self.transform
    }

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn bands(&self) -> usize {
        self.bands
    }

    fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    fn read_pixels(&self, window: &Window) -> Result<Vec<f32>, RasterError> {
        let col0 = usize::try_from(window.col_off)
            .map_err(|_| RasterError::EmptyRead(window.to_string()))?;
        let row0 = usize::try_from(window.row_off)
            .map_err(|_| RasterError::EmptyRead(window.to_string()))?;

        let mut out = Vec::with_capacity(window.width * window.height * self.bands);
        for row in row0..row0 + window.height {
            let start = (row * self.width + col0) * self.bands;
            let end = start + window.width * self.bands;
            let line = self
                .pixels
                .get(start..end)
                .ok_or_else(|| RasterError::EmptyRead(window.to_string()))?;
            out.extend_from_slice(line);
        }
        Ok(out)
    }
}
