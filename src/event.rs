//! Events, their effective date ranges, and per-event outcomes.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{EventError, EventFileError};
use crate::geometry::BoundingBox;

/// Search box used for events that do not carry one (Taipei).
pub const DEFAULT_BBOX: BoundingBox = BoundingBox {
    minx: 121.5,
    miny: 25.0,
    maxx: 121.6,
    maxy: 25.1,
};

/// A disaster event: a site, a date window, and how far to widen it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub pre_event_days: i64,
    #[serde(default)]
    pub post_event_days: i64,
    /// WGS84 `[west, south, east, north]`
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

impl Event {
    /// `start - pre_event_days` to `end + post_event_days`, validated.
    ///
    /// # Errors
    /// Negative offsets, calendar overflow, or an effective range that ends
    /// before it starts.
    pub fn date_range(&self) -> Result<DateRange, EventError> {
        let pre = self.offset("pre_event_days", self.pre_event_days)?;
        let post = self.offset("post_event_days", self.post_event_days)?;
        let overflow = || EventError::DateOverflow { id: self.id.clone() };

        let start = self.start_date.checked_sub_days(pre).ok_or_else(overflow)?;
        let end = self.end_date.checked_add_days(post).ok_or_else(overflow)?;
        if start > end {
            return Err(EventError::InvertedRange {
                id: self.id.clone(),
                start,
                end,
            });
        }
        Ok(DateRange { start, end })
    }

    /// The event's box, or `default` when it has none.
    ///
    /// # Errors
    /// A supplied box that is non-finite or has no area.
    pub fn bbox_or(&self, default: BoundingBox) -> Result<BoundingBox, EventError> {
        match self.bbox {
            None => Ok(default),
            Some(bbox) if bbox.is_valid() => Ok(bbox),
            Some(bbox) => Err(EventError::InvalidBbox {
                id: self.id.clone(),
                bbox: bbox.to_array(),
            }),
        }
    }

    fn offset(&self, field: &'static str, value: i64) -> Result<Days, EventError> {
        u64::try_from(value)
            .map(Days::new)
            .map_err(|_| EventError::NegativeOffset {
                id: self.id.clone(),
                field,
                value,
            })
    }
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// `YYYY-MM-DD/YYYY-MM-DD`, the catalog's interval form.
    #[must_use]
    pub fn to_interval_string(&self) -> String {
        format!("{}/{}", self.start.format("%Y-%m-%d"), self.end.format("%Y-%m-%d"))
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_interval_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// At least one item contributed a band
    Success,
    /// Nothing found, or nothing extracted
    NoImage,
    /// Search or event setup failed
    ApiError,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "SUCCESS",
            Self::NoImage => "NO_IMAGE",
            Self::ApiError => "API_ERROR",
        })
    }
}

/// Outcome of processing one event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventResult {
    pub event_id: String,
    pub status: EventStatus,
    /// Contributing item ids joined with `", "`, or the error message
    pub metadata: String,
    /// Mean over contributing items that report cloud cover, else 0
    pub cloud_coverage: f64,
    /// Event output directory
    pub path: PathBuf,
}

impl EventResult {
    #[must_use]
    pub fn api_error(event_id: &str, message: impl Into<String>, path: PathBuf) -> Self {
        Self {
            event_id: event_id.to_string(),
            status: EventStatus::ApiError,
            metadata: message.into(),
            cloud_coverage: 0.0,
            path,
        }
    }
}

/// CSV row shape: `bbox` is a bracketed list in one quoted field.
#[derive(Debug, Deserialize)]
struct EventRecord {
    id: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    #[serde(default)]
    pre_event_days: Option<i64>,
    #[serde(default)]
    post_event_days: Option<i64>,
    #[serde(default)]
    bbox: Option<String>,
}

impl TryFrom<EventRecord> for Event {
    type Error = EventFileError;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        let bbox = match record.bbox.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(text) => {
                let json = if text.starts_with('[') {
                    text.to_string()
                } else {
                    format!("[{text}]")
                };
                let values: [f64; 4] = serde_json::from_str(&json).map_err(|_| EventFileError::Bbox {
                    id: record.id.clone(),
                    value: text.to_string(),
                })?;
                Some(BoundingBox::from(values))
            }
        };
        Ok(Self {
            id: record.id,
            start_date: record.start_date,
            end_date: record.end_date,
            pre_event_days: record.pre_event_days.unwrap_or(0),
            post_event_days: record.post_event_days.unwrap_or(0),
            bbox,
        })
    }
}

/// Load events from a JSON array or a CSV file with a header row.
///
/// # Errors
/// Read failures or malformed rows.
pub fn load_events<P: AsRef<Path>>(path: P) -> Result<Vec<Event>, EventFileError> {
    let text = fs::read_to_string(path.as_ref())?;
    let is_json = path
        .as_ref()
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        || text.trim_start().starts_with('[');
    if is_json {
        parse_events_json(&text)
    } else {
        parse_events_csv(&text)
    }
}

/// # Errors
/// Malformed JSON or event objects.
pub fn parse_events_json(text: &str) -> Result<Vec<Event>, EventFileError> {
    Ok(serde_json::from_str(text)?)
}

/// # Errors
/// Malformed rows or bounding boxes.
pub fn parse_events_csv(text: &str) -> Result<Vec<Event>, EventFileError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    reader
        .deserialize::<EventRecord>()
        .map(|record| Event::try_from(record?))
        .collect()
}
