//! Event processing: one search, every item, every band.

use std::fs;
use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::catalog::{Catalog, ImageryItem, SearchRequest};
use crate::event::{DateRange, EventResult, EventStatus};
use crate::extract::{BandExtractor, ExtractionTarget, RasterOpener};
use crate::geometry::BoundingBox;
use crate::window::WindowProtocol;

/// Everything needed to process one event.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingRequest {
    pub event_id: String,
    /// WGS84 box, already defaulted
    pub bbox: BoundingBox,
    pub date_range: DateRange,
    pub collection: String,
    /// Band (asset) keys, extracted in order
    pub bands: Vec<String>,
    pub base_dir: PathBuf,
    pub protocol: WindowProtocol,
}

impl ProcessingRequest {
    /// `{base_dir}/{event_id}`
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.base_dir.join(&self.event_id)
    }
}

/// Mean of the values present; 0 when none are.
#[must_use]
pub fn mean_cloud_cover<I>(values: I) -> f64
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let mean = sum / count as f64;
        mean
    }
}

pub struct EventProcessor<C, O> {
    catalog: C,
    extractor: BandExtractor<O>,
}

impl<C: Catalog, O: RasterOpener> EventProcessor<C, O> {
    #[must_use]
    pub fn new(catalog: C, opener: O) -> Self {
        Self {
            catalog,
            extractor: BandExtractor::new(opener),
        }
    }

    /// Process one event. Never fails: search errors become `API_ERROR`.
    pub fn process(&self, request: &ProcessingRequest) -> EventResult {
        let out_dir = request.output_dir();
        if let Err(e) = fs::create_dir_all(&out_dir) {
            error!(event_id = %request.event_id, dir = %out_dir.display(), error = %e, "Failed to create output directory");
            return EventResult::api_error(&request.event_id, e.to_string(), out_dir);
        }

        let search = SearchRequest {
            collections: vec![request.collection.clone()],
            bbox: request.bbox,
            datetime: request.date_range.to_interval_string(),
        };
        let items = match self.catalog.search(&search) {
            Ok(items) => items,
            Err(e) => {
                error!(event_id = %request.event_id, error = %e, "Catalog search failed");
                return EventResult::api_error(&request.event_id, e.to_string(), out_dir);
            }
        };

        if items.is_empty() {
            info!(event_id = %request.event_id, date_range = %request.date_range, "No imagery found");
            return EventResult {
                event_id: request.event_id.clone(),
                status: EventStatus::NoImage,
                metadata: String::new(),
                cloud_coverage: 0.0,
                path: out_dir,
            };
        }

        let target = ExtractionTarget {
            event_id: &request.event_id,
            bbox: request.bbox,
            out_dir: &out_dir,
            protocol: request.protocol,
        };

        let contributing: Vec<&ImageryItem> = items
            .iter()
            .filter(|item| {
                // Every band is attempted, even after one succeeds
                let extracted = request
                    .bands
                    .iter()
                    .filter(|band| self.extractor.extract(item, band, &target).is_some())
                    .count();
                extracted > 0
            })
            .collect();

        let status = if contributing.is_empty() {
            warn!(event_id = %request.event_id, items = items.len(), "No band could be extracted from any item");
            EventStatus::NoImage
        } else {
            EventStatus::Success
        };

        let metadata = contributing
            .iter()
            .map(|item| item.id.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let cloud_coverage = mean_cloud_cover(contributing.iter().map(|item| item.cloud_cover()));

        info!(
            event_id = %request.event_id,
            status = %status,
            items = items.len(),
            contributing = contributing.len(),
            cloud_coverage,
            "Event processed"
        );

        EventResult {
            event_id: request.event_id.clone(),
            status,
            metadata,
            cloud_coverage,
            path: out_dir,
        }
    }
}
