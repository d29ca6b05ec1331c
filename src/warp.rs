//! Warped virtual view: a [`RasterSource`] that presents another source as
//! if it were natively gridded in a different CRS.
//!
//! The view's grid is derived the way GDAL suggests a warp output: the
//! source extent is reprojected (densified edges), and the pixel size is
//! chosen so the diagonal spans the same number of pixels as in the source.
//! Pixels are resampled with nearest neighbour on read.

use tracing::debug;

use crate::error::RasterError;
use crate::geometry::projection::{transform_bounds, CoordTransformer};
use crate::geometry::BoundingBox;
use crate::raster::RasterSource;
use crate::window::{GeoTransform, Window};

/// Read-time reprojection of `source` into `dst_crs`.
pub struct WarpedView<'a> {
    source: &'a dyn RasterSource,
    dst_crs: i32,
    transform: GeoTransform,
    width: usize,
    height: usize,
    /// Destination CRS back to the source CRS, for sampling
    to_source: CoordTransformer,
}

impl<'a> WarpedView<'a> {
    /// Build a view of `source` in `dst_crs`.
    ///
    /// # Errors
    /// Fails if the source has no CRS or its extent cannot be reprojected.
    pub fn new(source: &'a dyn RasterSource, dst_crs: i32) -> Result<Self, RasterError> {
        let src_crs = source.crs().ok_or(RasterError::MissingGeoreference("CRS"))?;
        let src_bounds = source.bounds();
        let dst_bounds = transform_bounds(src_crs, dst_crs, &src_bounds)?;

        let (width, height, resolution) =
            suggested_grid(source.width(), source.height(), &dst_bounds)?;
        let transform = GeoTransform::north_up(dst_bounds.minx, dst_bounds.maxy, resolution, resolution);

        debug!(
            src_crs,
            dst_crs,
            width,
            height,
            resolution,
            bounds = %dst_bounds,
            "Built warped view"
        );

        Ok(Self {
            source,
            dst_crs,
            transform,
            width,
            height,
            to_source: CoordTransformer::new(dst_crs, src_crs)?,
        })
    }

    /// Source pixel coordinates of each output pixel centre, row-major.
    /// Rotated source grids are sampled through the full inverse affine.
    fn source_coords(&self, window: &Window) -> Result<Vec<Option<(f64, f64)>>, RasterError> {
        let to_pixel = self.source.transform().inverse().ok_or_else(|| {
            RasterError::Unsupported("degenerate source transform".to_string())
        })?;

        let mut coords = Vec::with_capacity(window.width * window.height);
        for row in 0..window.height {
            for col in 0..window.width {
                #[allow(clippy::cast_precision_loss)]
                let (x, y) = self.transform.pixel_to_world(
                    window.col_off as f64 + col as f64 + 0.5,
                    window.row_off as f64 + row as f64 + 0.5,
                );
                let src = self
                    .to_source
                    .transform(x, y)
                    .ok()
                    .map(|(sx, sy)| to_pixel.pixel_to_world(sx, sy));
                coords.push(src);
            }
        }
        Ok(coords)
    }
}

/// Output grid size and square pixel size for a warp into `dst_bounds`.
fn suggested_grid(
    src_width: usize,
    src_height: usize,
    dst_bounds: &BoundingBox,
) -> Result<(usize, usize, f64), RasterError> {
    #[allow(clippy::cast_precision_loss)]
    let src_diagonal = ((src_width * src_width + src_height * src_height) as f64).sqrt();
    let dst_diagonal = dst_bounds.width().hypot(dst_bounds.height());
    if src_diagonal == 0.0 || !dst_diagonal.is_finite() || dst_diagonal <= 0.0 {
        return Err(RasterError::Unsupported(format!(
            "cannot warp a {src_width}x{src_height} raster into {dst_bounds}"
        )));
    }
    let resolution = dst_diagonal / src_diagonal;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let width = ((dst_bounds.width() / resolution).ceil() as usize).max(1);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let height = ((dst_bounds.height() / resolution).ceil() as usize).max(1);
    Ok((width, height, resolution))
}

impl RasterSource for WarpedView<'_> {
    fn crs(&self) -> Option<i32> {
        Some(self.dst_crs)
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
        self.source.bands()
    }

    fn nodata(&self) -> Option<f64> {
        self.source.nodata()
    }

    fn read_pixels(&self, window: &Window) -> Result<Vec<f32>, RasterError> {
        let bands = self.source.bands();
        #[allow(clippy::cast_possible_truncation)]
        let fill = self.source.nodata().map_or(0.0, |v| v as f32);
        let mut out = vec![fill; window.width * window.height * bands];

        let coords = self.source_coords(window)?;

        // Source window covering every sampled point
        let mut min_c = f64::INFINITY;
        let mut min_r = f64::INFINITY;
        let mut max_c = f64::NEG_INFINITY;
        let mut max_r = f64::NEG_INFINITY;
        for (c, r) in coords.iter().flatten() {
            min_c = min_c.min(*c);
            min_r = min_r.min(*r);
            max_c = max_c.max(*c);
            max_r = max_r.max(*r);
        }
        if !min_c.is_finite() {
            return Ok(out);
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let needed = Window::new(
            min_c.floor() as i64,
            min_r.floor() as i64,
            (max_c.floor() - min_c.floor()) as usize + 1,
            (max_r.floor() - min_r.floor()) as usize + 1,
        );
        let Some(src_window) = needed.truncate_to(self.source.width(), self.source.height()) else {
            return Ok(out);
        };
        let block = self.source.read_window(&src_window)?;

        for (idx, coord) in coords.iter().enumerate() {
            let Some((c, r)) = coord else { continue };
            #[allow(clippy::cast_possible_truncation)]
            let (col, row) = (c.floor() as i64 - src_window.col_off, r.floor() as i64 - src_window.row_off);
            let (Ok(col), Ok(row)) = (usize::try_from(col), usize::try_from(row)) else {
                continue;
            };
            for band in 0..bands {
                if let Some(value) = block.get(col, row, band) {
                    out[idx * bands + band] = value;
                }
            }
        }

        Ok(out)
    }
}
