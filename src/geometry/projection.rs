//! EPSG lookups and coordinate transforms, pure Rust (proj4rs + crs-definitions).

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use super::BoundingBox;
use crate::error::ProjectionError;

/// EPSG code of WGS84 longitude/latitude.
pub const WGS84: i32 = 4326;

/// Points sampled along each edge when reprojecting a box, so that curved
/// edges in the destination CRS are covered.
pub const DENSIFY_POINTS: usize = 21;

/// Get PROJ4 string for an EPSG code using the crs-definitions database
#[inline]
#[must_use]
pub fn get_proj_string(epsg: i32) -> Option<&'static str> {
    u16::try_from(epsg).ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

/// Check if an EPSG code represents a geographic (lon/lat) CRS
#[inline]
#[must_use]
pub fn is_geographic_crs(epsg: i32) -> bool {
    if let Some(proj_str) = get_proj_string(epsg) {
        proj_str.contains("+proj=longlat")
    } else {
        epsg == WGS84 || (4000..5000).contains(&epsg)
    }
}

fn build_proj(epsg: i32) -> Result<Proj, ProjectionError> {
    let proj_str = get_proj_string(epsg).ok_or(ProjectionError::UnknownEpsg(epsg))?;
    Proj::from_proj_string(proj_str).map_err(|e| ProjectionError::InvalidProjection {
        epsg,
        message: format!("{e:?}"),
    })
}

/// Reusable transformer between two EPSG codes.
///
/// Building a [`Proj`] parses the definition string, so callers projecting
/// many points (the warped view samples one per output pixel) build this once.
pub struct CoordTransformer {
    source_epsg: i32,
    target_epsg: i32,
    /// `None` when source and target are the same CRS
    projs: Option<(Proj, Proj)>,
    source_is_geographic: bool,
    target_is_geographic: bool,
}

impl CoordTransformer {
    /// Create a transformer from `source_epsg` to `target_epsg`.
    ///
    /// # Errors
    /// Returns an error if either code is unknown or its definition is invalid.
    pub fn new(source_epsg: i32, target_epsg: i32) -> Result<Self, ProjectionError> {
        let projs = if source_epsg == target_epsg {
            None
        } else {
            Some((build_proj(source_epsg)?, build_proj(target_epsg)?))
        };
        Ok(Self {
            source_epsg,
            target_epsg,
            projs,
            source_is_geographic: is_geographic_crs(source_epsg),
            target_is_geographic: is_geographic_crs(target_epsg),
        })
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    /// Transform one coordinate pair.
    ///
    /// # Errors
    /// Returns an error if proj4rs rejects the point or the result is not finite.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
        let Some((source_proj, target_proj)) = &self.projs else {
            return Ok((x, y));
        };

        // proj4rs uses radians for geographic coordinates
        let mut point = if self.source_is_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(source_proj, target_proj, &mut point).map_err(|e| ProjectionError::Transform {
            from: self.source_epsg,
            to: self.target_epsg,
            message: format!("{e:?}"),
        })?;

        let (out_x, out_y) = if self.target_is_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        if !out_x.is_finite() || !out_y.is_finite() {
            return Err(ProjectionError::NonFinite {
                from: self.source_epsg,
                to: self.target_epsg,
            });
        }
        Ok((out_x, out_y))
    }

    /// Reproject a box, densifying each edge with [`DENSIFY_POINTS`] samples
    /// and returning the envelope of the projected points.
    ///
    /// # Errors
    /// Returns an error if any sampled point fails to project.
    pub fn transform_bounds(&self, bbox: &BoundingBox) -> Result<BoundingBox, ProjectionError> {
        if self.is_identity() {
            return Ok(*bbox);
        }

        let mut minx = f64::INFINITY;
        let mut miny = f64::INFINITY;
        let mut maxx = f64::NEG_INFINITY;
        let mut maxy = f64::NEG_INFINITY;

        let steps = DENSIFY_POINTS - 1;
        for i in 0..=steps {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f64 / steps as f64;
            let x = bbox.minx + t * bbox.width();
            let y = bbox.miny + t * bbox.height();
            let edge_points = [
                (x, bbox.miny),
                (x, bbox.maxy),
                (bbox.minx, y),
                (bbox.maxx, y),
            ];
            for (px, py) in edge_points {
                let (tx, ty) = self.transform(px, py)?;
                minx = minx.min(tx);
                miny = miny.min(ty);
                maxx = maxx.max(tx);
                maxy = maxy.max(ty);
            }
        }

        Ok(BoundingBox::new(minx, miny, maxx, maxy))
    }
}

/// Project a point from one CRS to another.
///
/// # Errors
/// Returns an error if the EPSG code is not supported or the projection transformation fails.
#[inline]
pub fn project_point(source_epsg: i32, target_epsg: i32, x: f64, y: f64) -> Result<(f64, f64), ProjectionError> {
    CoordTransformer::new(source_epsg, target_epsg)?.transform(x, y)
}

/// Re-express a box given in `source_epsg` in `target_epsg` units.
///
/// The identity case (same CRS) returns the box unchanged.
///
/// # Errors
/// Returns an error if either CRS is unknown or the transform is undefined
/// for part of the box (poles, antimeridian, outside a projection's domain).
pub fn transform_bounds(
    source_epsg: i32,
    target_epsg: i32,
    bbox: &BoundingBox,
) -> Result<BoundingBox, ProjectionError> {
    CoordTransformer::new(source_epsg, target_epsg)?.transform_bounds(bbox)
}

/// Reproject a WGS84 `[west, south, east, north]` box into `target_epsg`.
///
/// # Errors
/// See [`transform_bounds`].
pub fn reproject_wgs84_bbox(bbox: &BoundingBox, target_epsg: i32) -> Result<BoundingBox, ProjectionError> {
    transform_bounds(WGS84, target_epsg, bbox)
}
