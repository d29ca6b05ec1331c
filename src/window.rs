//! Pixel windows and the window resolver.
//!
//! A [`Window`] is a rectangle in a raster's pixel grid. [`WindowProtocol`]
//! decides how a WGS84 request box becomes a window for a given source:
//!
//! - [`WindowProtocol::Direct`] reprojects the box into the source CRS and
//!   maps it through the source transform. Offsets may be negative or past the
//!   raster edge; the reader truncates them.
//! - [`WindowProtocol::Reprojecting`] works against a warped view in a fixed
//!   destination CRS. The requested box is intersected with the view bounds
//!   first, so the resulting window always lies inside the view.

use crate::error::WindowError;
use crate::geometry::projection::reproject_wgs84_bbox;
use crate::geometry::BoundingBox;
use crate::raster::RasterSource;

/// Affine transform from pixel (col, row) to world (x, y), GDAL coefficient order:
///
/// ```text
/// x = origin_x + col * pixel_width  + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// `pixel_height` is negative for north-up rasters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub col_rotation: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with no rotation.
    #[must_use]
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            pixel_width,
            row_rotation: 0.0,
            origin_y,
            col_rotation: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    /// From GeoTIFF `ModelTiepoint` (I, J, K, X, Y, Z) and `ModelPixelScale` (Sx, Sy, Sz).
    #[must_use]
    pub fn from_tiepoint_and_scale(tiepoint: &[f64; 6], scale: &[f64; 3]) -> Self {
        let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
        let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
        Self {
            origin_x,
            pixel_width: scale[0],
            row_rotation: 0.0,
            origin_y,
            col_rotation: 0.0,
            pixel_height: -scale[1],
        }
    }

    /// From a GeoTIFF `ModelTransformation` 4x4 row-major matrix.
    #[must_use]
    pub fn from_model_transformation(m: &[f64; 16]) -> Self {
        Self {
            origin_x: m[3],
            pixel_width: m[0],
            row_rotation: m[1],
            origin_y: m[7],
            col_rotation: m[4],
            pixel_height: m[5],
        }
    }

    #[must_use]
    pub fn is_rectilinear(&self) -> bool {
        self.row_rotation == 0.0 && self.col_rotation == 0.0
    }

    #[must_use]
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width + row * self.row_rotation,
            self.origin_y + col * self.col_rotation + row * self.pixel_height,
        )
    }

    /// Transform mapping world (x, y) back to pixel (col, row). `None` when
    /// the 2x2 part is singular.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        let det = self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let pixel_width = self.pixel_height / det;
        let row_rotation = -self.row_rotation / det;
        let col_rotation = -self.col_rotation / det;
        let pixel_height = self.pixel_width / det;
        Some(Self {
            origin_x: -(self.origin_x * pixel_width + self.origin_y * row_rotation),
            pixel_width,
            row_rotation,
            origin_y: -(self.origin_x * col_rotation + self.origin_y * pixel_height),
            col_rotation,
            pixel_height,
        })
    }

    /// Fractional pixel (col, row) of a world point. `None` for degenerate
    /// transforms.
    #[must_use]
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        self.inverse().map(|inverse| inverse.pixel_to_world(x, y))
    }

    /// Least-squares affine fit to ground control points given as
    /// `(col, row, x, y)`. `None` with fewer than three points or when they
    /// are collinear.
    #[must_use]
    pub fn from_control_points(points: &[(f64, f64, f64, f64)]) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = points.len() as f64;
        let mean_col = points.iter().map(|p| p.0).sum::<f64>() / n;
        let mean_row = points.iter().map(|p| p.1).sum::<f64>() / n;

        // Normal equations over rows [1, col - mean, row - mean]
        let mut ata = [[0.0_f64; 3]; 3];
        let mut atx = [0.0_f64; 3];
        let mut aty = [0.0_f64; 3];
        for &(col, row, x, y) in points {
            let basis = [1.0, col - mean_col, row - mean_row];
            for i in 0..3 {
                for j in 0..3 {
                    ata[i][j] += basis[i] * basis[j];
                }
                atx[i] += basis[i] * x;
                aty[i] += basis[i] * y;
            }
        }
        let [centre_x, pixel_width, row_rotation] = solve3(&ata, &atx)?;
        let [centre_y, col_rotation, pixel_height] = solve3(&ata, &aty)?;
        let origin_x = centre_x - pixel_width * mean_col - row_rotation * mean_row;
        let origin_y = centre_y - col_rotation * mean_col - pixel_height * mean_row;
        Some(Self {
            origin_x,
            pixel_width,
            row_rotation,
            origin_y,
            col_rotation,
            pixel_height,
        })
    }

    /// World-space extent of a `width` x `height` grid.
    #[must_use]
    pub fn bounds(&self, width: usize, height: usize) -> BoundingBox {
        #[allow(clippy::cast_precision_loss)]
        let (w, h) = (width as f64, height as f64);
        let corners = [
            self.pixel_to_world(0.0, 0.0),
            self.pixel_to_world(w, 0.0),
            self.pixel_to_world(0.0, h),
            self.pixel_to_world(w, h),
        ];
        let mut bbox = BoundingBox::new(f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (x, y) in corners {
            bbox.minx = bbox.minx.min(x);
            bbox.miny = bbox.miny.min(y);
            bbox.maxx = bbox.maxx.max(x);
            bbox.maxy = bbox.maxy.max(y);
        }
        bbox
    }

    /// Transform of the grid whose pixel (0, 0) is `window`'s top-left pixel.
    #[must_use]
    pub fn window_transform(&self, window: &Window) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let (x, y) = self.pixel_to_world(window.col_off as f64, window.row_off as f64);
        Self {
            origin_x: x,
            origin_y: y,
            ..*self
        }
    }
}

/// Solve a 3x3 linear system by Cramer's rule.
fn solve3(m: &[[f64; 3]; 3], b: &[f64; 3]) -> Option<[f64; 3]> {
    let det3 = |m: &[[f64; 3]; 3]| {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };
    let det = det3(m);
    let scale = m.iter().flatten().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if !det.is_finite() || det.abs() <= f64::EPSILON * scale.powi(3) {
        return None;
    }
    let mut solution = [0.0; 3];
    for (column, value) in solution.iter_mut().enumerate() {
        let mut replaced = *m;
        for row in 0..3 {
            replaced[row][column] = b[row];
        }
        *value = det3(&replaced) / det;
    }
    Some(solution)
}

/// Rectangular pixel region. Offsets may be negative for direct reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub col_off: i64,
    pub row_off: i64,
    pub width: usize,
    pub height: usize,
}

impl Window {
    #[must_use]
    pub fn new(col_off: i64, row_off: i64, width: usize, height: usize) -> Self {
        Self { col_off, row_off, width, height }
    }

    /// Compute the window covering `bbox` in the grid described by `transform`.
    ///
    /// Windows narrower or shorter than one pixel are rejected. Otherwise
    /// offsets are floored and lengths rounded to the nearest pixel.
    ///
    /// # Errors
    /// [`WindowError::RotatedTransform`] for non-rectilinear transforms,
    /// [`WindowError::InvalidWindow`] for sub-pixel windows.
    pub fn from_bounds(bbox: &BoundingBox, transform: &GeoTransform) -> Result<Self, WindowError> {
        if !transform.is_rectilinear() {
            return Err(WindowError::RotatedTransform);
        }
        let (c0, r0) = transform
            .world_to_pixel(bbox.minx, bbox.maxy)
            .ok_or(WindowError::RotatedTransform)?;
        let (c1, r1) = transform
            .world_to_pixel(bbox.maxx, bbox.miny)
            .ok_or(WindowError::RotatedTransform)?;

        let col_off = c0.min(c1);
        let row_off = r0.min(r1);
        let width = (c1 - c0).abs();
        let height = (r1 - r0).abs();

        if !(width >= 1.0 && height >= 1.0) {
            return Err(WindowError::InvalidWindow { width, height });
        }
        let rounded_width = (width + 0.5).floor();
        let rounded_height = (height + 0.5).floor();

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(Self {
            col_off: col_off.floor() as i64,
            row_off: row_off.floor() as i64,
            width: rounded_width as usize,
            height: rounded_height as usize,
        })
    }

    /// Clip to a `width` x `height` grid. `None` when nothing remains.
    #[must_use]
    pub fn truncate_to(&self, width: usize, height: usize) -> Option<Window> {
        let grid_w = i64::try_from(width).ok()?;
        let grid_h = i64::try_from(height).ok()?;
        let col_end = self.col_off.saturating_add(i64::try_from(self.width).ok()?).min(grid_w);
        let row_end = self.row_off.saturating_add(i64::try_from(self.height).ok()?).min(grid_h);
        let col_off = self.col_off.max(0);
        let row_off = self.row_off.max(0);
        if col_off >= col_end || row_off >= row_end {
            return None;
        }
        Some(Window {
            col_off,
            row_off,
            width: usize::try_from(col_end - col_off).ok()?,
            height: usize::try_from(row_end - row_off).ok()?,
        })
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}) {}x{}", self.col_off, self.row_off, self.width, self.height)
    }
}

/// How the window for a source is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowProtocol {
    /// Source grid is taken as-is; no overlap check.
    Direct,
    /// Source is read through a warped view in `dst_crs`.
    Reprojecting { dst_crs: i32 },
}

impl WindowProtocol {
    /// Default protocol for a catalog collection. Radar collections are not
    /// delivered on a map-aligned grid and go through the warped view.
    #[must_use]
    pub fn for_collection(collection: &str, warp_crs: i32) -> Self {
        if collection.starts_with("sentinel-1") {
            Self::Reprojecting { dst_crs: warp_crs }
        } else {
            Self::Direct
        }
    }

    /// Resolve the pixel window to read from `source` for a WGS84 box.
    ///
    /// For [`WindowProtocol::Reprojecting`], `source` must already be the
    /// warped view in `dst_crs`.
    ///
    /// # Errors
    /// - [`WindowError::NoOverlap`] when the reprojected box misses the view
    /// - [`WindowError::InvalidWindow`] for sub-pixel windows
    /// - projection errors from reprojecting the box
    pub fn resolve_window(
        &self,
        source: &dyn RasterSource,
        bbox_wgs84: &BoundingBox,
    ) -> Result<Window, WindowError> {
        match *self {
            Self::Direct => {
                let crs = source.crs().ok_or(WindowError::MissingCrs)?;
                let src_box = reproject_wgs84_bbox(bbox_wgs84, crs)?;
                Window::from_bounds(&src_box, &source.transform())
            }
            Self::Reprojecting { dst_crs } => {
                let dst_box = reproject_wgs84_bbox(bbox_wgs84, dst_crs)?;
                let view_bounds = source.bounds();
                let overlap = dst_box
                    .intersection(&view_bounds)
                    .ok_or(WindowError::NoOverlap)?;
                Window::from_bounds(&overlap, &source.transform())
            }
        }
    }

    /// CRS of the pixels this protocol produces, given the source CRS.
    #[must_use]
    pub fn output_crs(&self, source_crs: Option<i32>) -> Option<i32> {
        match *self {
            Self::Direct => source_crs,
            Self::Reprojecting { dst_crs } => Some(dst_crs),
        }
    }
}

impl std::fmt::Display for WindowProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Reprojecting { dst_crs } => write!(f, "reprojecting(EPSG:{dst_crs})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{MemoryRaster, RasterSource};

    fn utm_raster() -> MemoryRaster {
        // 20 m pixels over Taipei in UTM 51N: x 340-360 km, y 2760-2790 km
        MemoryRaster::filled(
            1000,
            1500,
            1,
            GeoTransform::north_up(340_000.0, 2_790_000.0, 20.0, 20.0),
            Some(32651),
            1.0,
        )
    }

    #[test]
    fn test_from_bounds_exact_pixels() {
        let gt = GeoTransform::north_up(0.0, 100.0, 1.0, 1.0);
        let w = Window::from_bounds(&BoundingBox::new(10.0, 50.0, 30.0, 90.0), &gt).unwrap();
        assert_eq!(w, Window::new(10, 10, 20, 40));
    }

    #[test]
    fn test_from_bounds_outside_extent_keeps_negative_offsets() {
        let gt = GeoTransform::north_up(0.0, 100.0, 1.0, 1.0);
        let w = Window::from_bounds(&BoundingBox::new(-5.0, 90.0, 5.0, 110.0), &gt).unwrap();
        assert_eq!(w.col_off, -5);
        assert_eq!(w.row_off, -10);
        assert_eq!((w.width, w.height), (10, 20));
    }

    #[test]
    fn test_from_bounds_subpixel_rejected() {
        let gt = GeoTransform::north_up(0.0, 100.0, 10.0, 10.0);
        let result = Window::from_bounds(&BoundingBox::new(1.0, 50.0, 2.0, 90.0), &gt);
        assert!(matches!(result, Err(WindowError::InvalidWindow { .. })));
    }

    #[test]
    fn test_from_bounds_partial_pixel_not_widened() {
        // 0.7 pixels wide at 10 m: rounding would make it one pixel
        let gt = GeoTransform::north_up(0.0, 100.0, 10.0, 10.0);
        let result = Window::from_bounds(&BoundingBox::new(1.0, 50.0, 8.0, 90.0), &gt);
        assert!(matches!(
            result,
            Err(WindowError::InvalidWindow { width, .. }) if (width - 0.7).abs() < 1e-9
        ));

        // Exactly one pixel is accepted
        let one = Window::from_bounds(&BoundingBox::new(0.0, 50.0, 10.0, 90.0), &gt).unwrap();
        assert_eq!((one.width, one.height), (1, 4));
    }

    #[test]
    fn test_inverse_of_rotated_transform() {
        let gt = GeoTransform {
            origin_x: 121.45,
            pixel_width: 0.001,
            row_rotation: 0.0002,
            origin_y: 25.15,
            col_rotation: 0.0001,
            pixel_height: -0.001,
        };
        let (x, y) = gt.pixel_to_world(37.25, 81.5);
        let (col, row) = gt.world_to_pixel(x, y).unwrap();
        assert!((col - 37.25).abs() < 1e-6, "col {col}");
        assert!((row - 81.5).abs() < 1e-6, "row {row}");

        let mut singular = gt;
        singular.pixel_width = 0.0;
        singular.col_rotation = 0.0;
        assert!(singular.inverse().is_none());
    }

    #[test]
    fn test_control_point_fit_recovers_affine() {
        let truth = GeoTransform {
            origin_x: 121.4,
            pixel_width: 0.001,
            row_rotation: 0.0001,
            origin_y: 25.2,
            col_rotation: 0.00005,
            pixel_height: -0.001,
        };
        let mut points = Vec::new();
        for col in [0.0, 100.0, 200.0] {
            for row in [0.0, 75.0, 150.0] {
                let (x, y) = truth.pixel_to_world(col, row);
                points.push((col, row, x, y));
            }
        }
        let fitted = GeoTransform::from_control_points(&points).unwrap();
        assert!((fitted.origin_x - truth.origin_x).abs() < 1e-8);
        assert!((fitted.origin_y - truth.origin_y).abs() < 1e-8);
        assert!((fitted.pixel_width - truth.pixel_width).abs() < 1e-10);
        assert!((fitted.row_rotation - truth.row_rotation).abs() < 1e-10);
        assert!((fitted.col_rotation - truth.col_rotation).abs() < 1e-10);
        assert!((fitted.pixel_height - truth.pixel_height).abs() < 1e-10);

        // Collinear points do not determine a transform
        let line = [(0.0, 0.0, 0.0, 0.0), (1.0, 1.0, 1.0, 1.0), (2.0, 2.0, 2.0, 2.0)];
        assert!(GeoTransform::from_control_points(&line).is_none());
        assert!(GeoTransform::from_control_points(&points[..2]).is_none());
    }

    #[test]
    fn test_from_bounds_rotated_rejected() {
        let mut gt = GeoTransform::north_up(0.0, 100.0, 1.0, 1.0);
        gt.row_rotation = 0.5;
        let result = Window::from_bounds(&BoundingBox::new(10.0, 50.0, 30.0, 90.0), &gt);
        assert!(matches!(result, Err(WindowError::RotatedTransform)));
    }

    #[test]
    fn test_truncate_to_grid() {
        let w = Window::new(-5, -10, 20, 30);
        assert_eq!(w.truncate_to(100, 100), Some(Window::new(0, 0, 15, 20)));

        let past_edge = Window::new(90, 95, 20, 20);
        assert_eq!(past_edge.truncate_to(100, 100), Some(Window::new(90, 95, 10, 5)));

        let outside = Window::new(200, 0, 10, 10);
        assert_eq!(outside.truncate_to(100, 100), None);
    }

    #[test]
    fn test_window_transform_shifts_origin() {
        let gt = GeoTransform::north_up(1000.0, 2000.0, 10.0, 10.0);
        let shifted = gt.window_transform(&Window::new(3, 4, 1, 1));
        assert_eq!(shifted.origin_x, 1030.0);
        assert_eq!(shifted.origin_y, 1960.0);
        assert_eq!(shifted.pixel_height, -10.0);
    }

    #[test]
    fn test_tiepoint_transform() {
        let gt = GeoTransform::from_tiepoint_and_scale(
            &[0.0, 0.0, 0.0, 500_000.0, 4_000_000.0, 0.0],
            &[10.0, 10.0, 0.0],
        );
        assert_eq!(gt.pixel_to_world(1.0, 1.0), (500_010.0, 3_999_990.0));
        let bounds = gt.bounds(100, 50);
        assert_eq!(bounds, BoundingBox::new(500_000.0, 3_999_500.0, 501_000.0, 4_000_000.0));
    }

    #[test]
    fn test_direct_window_in_source_crs() {
        let raster = utm_raster();
        let bbox = BoundingBox::new(121.5, 25.0, 121.6, 25.1);
        let w = WindowProtocol::Direct.resolve_window(&raster, &bbox).unwrap();
        // ~10 x 11 km box at 20 m resolution
        assert!(w.width > 480 && w.width < 530, "width {}", w.width);
        assert!(w.height > 530 && w.height < 580, "height {}", w.height);
        assert!(w.col_off > 0 && w.row_off > 0);
    }

    #[test]
    fn test_reprojecting_window_clamped_to_view() {
        let raster = utm_raster();
        // East edge runs well past the raster's 360 km easting
        let bbox = BoundingBox::new(121.55, 25.0, 121.75, 25.1);
        let protocol = WindowProtocol::Reprojecting { dst_crs: 32651 };
        let w = protocol.resolve_window(&raster, &bbox).unwrap();
        assert!(w.width > 0 && w.width < 400, "clipped width {}", w.width);
        assert!(w.col_off >= 0 && w.row_off >= 0);
        assert!(w.col_off as usize + w.width <= raster.width());
        assert!(w.row_off as usize + w.height <= raster.height());
    }

    #[test]
    fn test_reprojecting_window_no_overlap() {
        let raster = utm_raster();
        // Far south of the raster, still inside UTM zone 51
        let bbox = BoundingBox::new(121.5, 10.0, 121.6, 10.1);
        let protocol = WindowProtocol::Reprojecting { dst_crs: 32651 };
        let result = protocol.resolve_window(&raster, &bbox);
        assert!(matches!(result, Err(WindowError::NoOverlap)));
    }

    #[test]
    fn test_protocol_for_collection() {
        assert_eq!(
            WindowProtocol::for_collection("sentinel-1-grd", 32651),
            WindowProtocol::Reprojecting { dst_crs: 32651 }
        );
        assert_eq!(WindowProtocol::for_collection("sentinel-2-l2a", 32651), WindowProtocol::Direct);
    }
}
