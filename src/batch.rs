//! Batch runner: every event, one summary row each.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::event::{Event, EventResult, EventStatus, DEFAULT_BBOX};
use crate::extract::RasterOpener;
use crate::geometry::BoundingBox;
use crate::processor::{EventProcessor, ProcessingRequest};
use crate::window::WindowProtocol;

/// How the window protocol is chosen for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolChoice {
    /// By collection id
    #[default]
    Auto,
    Direct,
    Reprojecting,
}

impl ProtocolChoice {
    #[must_use]
    pub fn resolve(self, collection: &str, warp_crs: i32) -> WindowProtocol {
        match self {
            Self::Auto => WindowProtocol::for_collection(collection, warp_crs),
            Self::Direct => WindowProtocol::Direct,
            Self::Reprojecting => WindowProtocol::Reprojecting { dst_crs: warp_crs },
        }
    }
}

/// Settings shared by every event in a batch.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub collection: String,
    pub bands: Vec<String>,
    pub base_dir: PathBuf,
    pub protocol: ProtocolChoice,
    pub warp_crs: i32,
    /// Substituted for events without a box
    pub default_bbox: BoundingBox,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            collection: "sentinel-2-l2a".to_string(),
            bands: vec!["B04_10m".to_string(), "TCI_10m".to_string()],
            base_dir: PathBuf::from("data"),
            protocol: ProtocolChoice::Auto,
            warp_crs: crate::config::DEFAULT_WARP_CRS,
            default_bbox: DEFAULT_BBOX,
        }
    }
}

/// Column names of the summary table, in [`SummaryRow`] field order.
pub const SUMMARY_HEADER: [&str; 7] = [
    "event_id",
    "metadata",
    "pre-event days",
    "post-event days",
    "cloud_coverage",
    "path",
    "status",
];

/// One row of the summary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub event_id: String,
    pub metadata: String,
    #[serde(rename = "pre-event days")]
    pub pre_event_days: i64,
    #[serde(rename = "post-event days")]
    pub post_event_days: i64,
    pub cloud_coverage: f64,
    pub path: String,
    pub status: EventStatus,
}

impl SummaryRow {
    #[must_use]
    pub fn new(event: &Event, result: &EventResult) -> Self {
        Self {
            event_id: result.event_id.clone(),
            metadata: result.metadata.clone(),
            pre_event_days: event.pre_event_days,
            post_event_days: event.post_event_days,
            cloud_coverage: result.cloud_coverage,
            path: result.path.display().to_string(),
            status: result.status,
        }
    }
}

pub struct BatchRunner<C, O> {
    processor: EventProcessor<C, O>,
    options: BatchOptions,
}

impl<C: Catalog, O: RasterOpener> BatchRunner<C, O> {
    #[must_use]
    pub fn new(catalog: C, opener: O, options: BatchOptions) -> Self {
        Self {
            processor: EventProcessor::new(catalog, opener),
            options,
        }
    }

    /// Validate an event and apply batch defaults.
    fn prepare(&self, event: &Event) -> Result<ProcessingRequest, crate::error::EventError> {
        let date_range = event.date_range()?;
        let bbox = event.bbox_or(self.options.default_bbox)?;
        Ok(ProcessingRequest {
            event_id: event.id.clone(),
            bbox,
            date_range,
            collection: self.options.collection.clone(),
            bands: self.options.bands.clone(),
            base_dir: self.options.base_dir.clone(),
            protocol: self
                .options
                .protocol
                .resolve(&self.options.collection, self.options.warp_crs),
        })
    }

    /// Process `events` in order. Always one row per event.
    pub fn run(&self, events: &[Event]) -> Vec<SummaryRow> {
        let mut rows = Vec::with_capacity(events.len());
        for (index, event) in events.iter().enumerate() {
            info!(event_id = %event.id, index = index + 1, total = events.len(), "Processing event");
            let result = match self.prepare(event) {
                Ok(request) => self.processor.process(&request),
                Err(e) => {
                    warn!(event_id = %event.id, error = %e, "Invalid event");
                    EventResult::api_error(&event.id, e.to_string(), self.options.base_dir.join(&event.id))
                }
            };
            rows.push(SummaryRow::new(event, &result));
        }
        rows
    }
}

/// Write the summary table, replacing any previous file. The header is
/// written even when there are no rows.
///
/// # Errors
/// I/O or serialization failures.
pub fn write_summary<P: AsRef<Path>>(path: P, rows: &[SummaryRow]) -> Result<(), csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path.as_ref())?;
    writer.write_record(SUMMARY_HEADER)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!(path = %path.as_ref().display(), rows = rows.len(), "Wrote summary");
    Ok(())
}
