#![doc = include_str!("../README.md")]
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`geometry`]: [`BoundingBox`] and EPSG projections
//! - [`window`]: Affine [`GeoTransform`], pixel [`Window`] and the [`WindowProtocol`] resolver
//! - [`raster`]: Raster data abstraction trait
//! - [`warp`]: Read-time reprojection via [`WarpedView`]
//! - [`range_reader`]: I/O abstraction for local/HTTP/in-memory sources
//! - [`s3`]: S3-compatible storage backend
//! - [`cog_reader`]: Windowed GeoTIFF reads over any range reader
//! - [`geotiff_writer`]: Tiled, deflate-compressed GeoTIFF output
//! - [`catalog`]: STAC search via the [`Catalog`] trait
//! - [`extract`]: Per-band crop and write with [`BandExtractor`]
//! - [`event`], [`processor`], [`batch`]: Events, per-event processing and the batch summary
//! - [`config`]: Environment-driven [`Settings`]

// ============================================================================
// Public modules
// ============================================================================

pub mod batch;
pub mod catalog;
pub mod cog_reader;
pub mod config;
pub mod error;
pub mod event;
pub mod extract;
pub mod geometry;
pub mod geotiff_writer;
pub mod processor;
pub mod range_reader;
pub mod raster;
pub mod s3;
pub mod warp;
pub mod window;

// ============================================================================
// Geometry & Projections
// ============================================================================

pub use geometry::BoundingBox;
pub use geometry::projection::{
    project_point,
    transform_bounds,
    reproject_wgs84_bbox,
    get_proj_string,
    is_geographic_crs,
    CoordTransformer,
};

// ============================================================================
// Windows
// ============================================================================
// Primary API: WindowProtocol::resolve_window(&source, &bbox)

pub use window::{
    GeoTransform,
    Window,
    WindowProtocol,
};

// ============================================================================
// Raster Abstraction
// ============================================================================

pub use raster::{
    MemoryRaster,
    RasterBlock,
    RasterSource,
};
pub use warp::WarpedView;
pub use cog_reader::CogReader;

// ============================================================================
// Range Readers (I/O Abstraction)
// ============================================================================

pub use range_reader::{
    AssetLocation,
    RangeReader,
    RangeCursor,
    LocalRangeReader,
    HttpRangeReader,
    MemoryRangeReader,
};

// ============================================================================
// S3 Support
// ============================================================================

pub use s3::{
    S3Config,
    S3RangeReaderSync,
};

// ============================================================================
// GeoTIFF Writing
// ============================================================================

pub use geotiff_writer::{
    GeoTiffCompression,
    GeoTiffWriteError,
    GeoTiffWriter,
};

// ============================================================================
// Catalog & Extraction
// ============================================================================

pub use catalog::{
    Asset,
    Catalog,
    ImageryItem,
    SearchRequest,
    StacClient,
};
pub use extract::{
    BandExtractor,
    ExtractionTarget,
    RasterOpener,
    RemoteRasterOpener,
};

// ============================================================================
// Events & Batches
// ============================================================================
// Primary API: BatchRunner::new(catalog, opener, options).run(&events)

pub use event::{
    load_events,
    DateRange,
    Event,
    EventResult,
    EventStatus,
    DEFAULT_BBOX,
};
pub use processor::{EventProcessor, ProcessingRequest};
pub use batch::{
    write_summary,
    BatchOptions,
    BatchRunner,
    ProtocolChoice,
    SummaryRow,
    SUMMARY_HEADER,
};

// ============================================================================
// Configuration & Errors
// ============================================================================

pub use config::Settings;
pub use error::{
    CatalogError,
    ConfigError,
    EventError,
    EventFileError,
    ExtractError,
    ProjectionError,
    RangeReadError,
    RasterError,
    WindowError,
};
