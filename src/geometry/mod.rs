//! Geometry types shared by the window resolver and the raster readers.

pub mod projection;

use serde::{Deserialize, Serialize};

/// Bounding box in a coordinate reference system.
///
/// For WGS84 boxes `minx`/`maxx` are west/east longitudes and `miny`/`maxy`
/// are south/north latitudes, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    /// Create a new bounding box
    #[must_use]
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self { minx, miny, maxx, maxy }
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    /// True if every coordinate is finite and the box has positive area.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite()) && !self.is_empty()
    }

    /// True if the box has no area (`left >= right` or `bottom >= top`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.minx >= self.maxx || self.miny >= self.maxy
    }

    /// Rectangular intersection: component-wise max of the lower bounds and
    /// min of the upper bounds. Returns `None` when the result is empty.
    #[must_use]
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let clipped = BoundingBox::new(
            self.minx.max(other.minx),
            self.miny.max(other.miny),
            self.maxx.min(other.maxx),
            self.maxy.min(other.maxy),
        );
        if clipped.is_empty() {
            None
        } else {
            Some(clipped)
        }
    }

    /// `[west, south, east, north]`
    #[must_use]
    pub fn to_array(&self) -> [f64; 4] {
        [self.minx, self.miny, self.maxx, self.maxy]
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        b.to_array()
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.minx, self.miny, self.maxx, self.maxy)
    }
}
