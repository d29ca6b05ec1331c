//! Error types.
//!
//! Every error below [`EventError`] is scoped to a single band of a single
//! item: the extractor logs it and moves on. Only catalog failures and event
//! validation failures end an event early, and nothing here ends a batch.

use thiserror::Error;

use crate::geotiff_writer::GeoTiffWriteError;

/// Coordinate system lookup or transformation failure.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("EPSG:{0} is not in the crs-definitions database")]
    UnknownEpsg(i32),
    #[error("invalid projection EPSG:{epsg}: {message}")]
    InvalidProjection { epsg: i32, message: String },
    #[error("transform from EPSG:{from} to EPSG:{to} failed: {message}")]
    Transform { from: i32, to: i32, message: String },
    #[error("transform from EPSG:{from} to EPSG:{to} produced non-finite coordinates")]
    NonFinite { from: i32, to: i32 },
}

/// Failure to turn a geographic box into a readable pixel window.
#[derive(Debug, Error)]
pub enum WindowError {
    #[error("requested box does not overlap the source bounds")]
    NoOverlap,
    #[error("computed window {width}x{height} is smaller than one pixel")]
    InvalidWindow { width: f64, height: f64 },
    #[error("rotated or sheared geotransforms are not supported")]
    RotatedTransform,
    #[error("source raster has no coordinate reference system")]
    MissingCrs,
    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Failure while reading bytes from a remote or local object.
#[derive(Debug, Error)]
pub enum RangeReadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("object storage error: {0}")]
    S3(String),
    #[error("object storage credential `{0}` is not configured")]
    MissingCredential(&'static str),
    #[error("range {offset}+{length} is outside object of {size} bytes")]
    OutOfRange { offset: u64, length: u64, size: u64 },
    #[error("server did not report an object size for {0}")]
    UnknownSize(String),
}

/// Failure while interpreting or reading a raster.
#[derive(Debug, Error)]
pub enum RasterError {
    #[error(transparent)]
    Range(#[from] RangeReadError),
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),
    #[error("raster has no georeferencing (missing {0})")]
    MissingGeoreference(&'static str),
    #[error("unsupported raster layout: {0}")]
    Unsupported(String),
    #[error("window {0} does not intersect the raster")]
    EmptyRead(String),
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error("raster reader state is poisoned")]
    Poisoned,
}

/// Catalog search failure. These end the event with `API_ERROR`.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("catalog returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("catalog response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Band-scoped extraction failure. Always recoverable.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("band `{band}` not found in item {item_id}")]
    BandNotFound { item_id: String, band: String },
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error("failed to open {href}: {source}")]
    Open {
        href: String,
        #[source]
        source: RasterError,
    },
    #[error("failed to read window: {0}")]
    Read(#[source] RasterError),
    #[error("failed to write output: {0}")]
    Write(#[from] GeoTiffWriteError),
    #[error("failed to prepare output directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid event input. The event is recorded as `API_ERROR`.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event {id}: {field} must be non-negative, got {value}")]
    NegativeOffset {
        id: String,
        field: &'static str,
        value: i64,
    },
    #[error("event {id}: effective range {start}/{end} ends before it starts")]
    InvertedRange {
        id: String,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },
    #[error("event {id}: date offset overflows the calendar")]
    DateOverflow { id: String },
    #[error("event {id}: invalid bounding box {bbox:?}")]
    InvalidBbox { id: String, bbox: [f64; 4] },
}

/// Failure to load an events file.
#[derive(Debug, Error)]
pub enum EventFileError {
    #[error("failed to read events file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid events CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid events JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event {id}: bbox `{value}` is not `[west, south, east, north]`")]
    Bbox { id: String, value: String },
}

/// Invalid process configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got `{value}`")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}
