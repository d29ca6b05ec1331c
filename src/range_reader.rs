//! Byte-range I/O over local files, HTTP, object storage and memory.
//!
//! Raster decoding needs `Read + Seek`; [`RangeCursor`] provides that on top
//! of any [`RangeReader`], fetching large read-ahead segments so a COG header
//! and a handful of tiles cost a handful of requests.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, RANGE};
use tracing::debug;

use crate::error::RangeReadError;

/// Bytes fetched per cache miss.
pub const READ_AHEAD_BYTES: usize = 512 * 1024;

/// Random-access reads from a sized object.
pub trait RangeReader: Send + Sync {
    /// Total object size in bytes.
    fn size(&self) -> u64;

    /// Read exactly `length` bytes starting at `offset`.
    ///
    /// # Errors
    /// I/O or network failures, or a range past the end of the object.
    fn read_range(&self, offset: u64, length: usize) -> Result<Vec<u8>, RangeReadError>;

    /// Human-readable name of the object (path or URL).
    fn identifier(&self) -> &str;
}

fn check_range(offset: u64, length: usize, size: u64) -> Result<(), RangeReadError> {
    let end = offset.checked_add(length as u64);
    match end {
        Some(end) if end <= size => Ok(()),
        _ => Err(RangeReadError::OutOfRange {
            offset,
            length: length as u64,
            size,
        }),
    }
}

/// Reads from a file on the local filesystem.
pub struct LocalRangeReader {
    path: String,
    file: Mutex<File>,
    size: u64,
}

impl LocalRangeReader {
    /// Open `path` for range reads.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or stat'ed.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RangeReadError> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.as_ref().display().to_string(),
            file: Mutex::new(file),
            size,
        })
    }
}

impl RangeReader for LocalRangeReader {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&self, offset: u64, length: usize) -> Result<Vec<u8>, RangeReadError> {
        check_range(offset, length, self.size)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "file handle poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0; length];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn identifier(&self) -> &str {
        &self.path
    }
}

/// Reads from an HTTP(S) URL with `Range` requests.
pub struct HttpRangeReader {
    url: String,
    client: reqwest::blocking::Client,
    size: u64,
}

impl HttpRangeReader {
    /// Send a HEAD request to `url` to learn its size.
    ///
    /// # Errors
    /// Network failures, non-success status, or a missing `Content-Length`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RangeReadError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("eventcog/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let response = client.head(url).send()?;
        if !response.status().is_success() {
            return Err(RangeReadError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| RangeReadError::UnknownSize(url.to_string()))?;

        debug!(url, size, "Opened HTTP range reader");
        Ok(Self {
            url: url.to_string(),
            client,
            size,
        })
    }
}

impl RangeReader for HttpRangeReader {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&self, offset: u64, length: usize) -> Result<Vec<u8>, RangeReadError> {
        check_range(offset, length, self.size)?;
        if length == 0 {
            return Ok(Vec::new());
        }
        let last = offset + length as u64 - 1;
        let response = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={offset}-{last}"))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(RangeReadError::Status {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        let body = response.bytes()?;
        // Servers that ignore Range send the whole object with 200
        if status == reqwest::StatusCode::PARTIAL_CONTENT {
            Ok(body.to_vec())
        } else {
            let start = usize::try_from(offset).map_err(|_| RangeReadError::OutOfRange {
                offset,
                length: length as u64,
                size: self.size,
            })?;
            body.get(start..start + length)
                .map(<[u8]>::to_vec)
                .ok_or(RangeReadError::OutOfRange {
                    offset,
                    length: length as u64,
                    size: body.len() as u64,
                })
        }
    }

    fn identifier(&self) -> &str {
        &self.url
    }
}

/// Reads from an in-memory buffer.
pub struct MemoryRangeReader {
    name: String,
    data: Vec<u8>,
}

impl MemoryRangeReader {
    #[must_use]
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

impl RangeReader for MemoryRangeReader {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&self, offset: u64, length: usize) -> Result<Vec<u8>, RangeReadError> {
        check_range(offset, length, self.size())?;
        // check_range guarantees the offset fits in the buffer
        #[allow(clippy::cast_possible_truncation)]
        let start = offset as usize;
        Ok(self.data[start..start + length].to_vec())
    }

    fn identifier(&self) -> &str {
        &self.name
    }
}

/// `Read + Seek` adapter over a [`RangeReader`], caching fetched segments.
pub struct RangeCursor {
    reader: Arc<dyn RangeReader>,
    position: u64,
    /// Fetched segments keyed by start offset
    segments: BTreeMap<u64, Vec<u8>>,
}

impl RangeCursor {
    #[must_use]
    pub fn new(reader: Arc<dyn RangeReader>) -> Self {
        Self {
            reader,
            position: 0,
            segments: BTreeMap::new(),
        }
    }

    fn cached(&self, pos: u64) -> Option<&[u8]> {
        let (start, data) = self.segments.range(..=pos).next_back()?;
        let skip = usize::try_from(pos - start).ok()?;
        data.get(skip..).filter(|rest| !rest.is_empty())
    }
}

impl Read for RangeCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.reader.size();
        if buf.is_empty() || self.position >= size {
            return Ok(0);
        }

        if self.cached(self.position).is_none() {
            let remaining = size - self.position;
            let wanted = buf.len().max(READ_AHEAD_BYTES) as u64;
            let length = usize::try_from(wanted.min(remaining))
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let data = self
                .reader
                .read_range(self.position, length)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            self.segments.insert(self.position, data);
        }

        let available = self
            .cached(self.position)
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "empty range response"))?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for RangeCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let size = self.reader.size();
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;
        self.position = target;
        Ok(target)
    }
}

/// Where an asset's bytes live, after href rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLocation {
    /// Local filesystem path
    Local(PathBuf),
    /// Object storage (`s3://bucket/key`)
    S3 { bucket: String, key: String },
    /// Plain HTTP(S) URL
    Http(String),
}

impl AssetLocation {
    /// Interpret an asset href.
    ///
    /// `s3://` and `/vsis3/` hrefs map to object storage, as do HTTP(S)
    /// hrefs on `storage_endpoint` (path-style `https://host/bucket/key`).
    #[must_use]
    pub fn parse(href: &str, storage_endpoint: Option<&str>) -> Self {
        if let Some(rest) = href
            .strip_prefix("s3://")
            .or_else(|| href.strip_prefix("/vsis3/"))
        {
            return Self::from_bucket_path(rest).unwrap_or_else(|| Self::Http(href.to_string()));
        }

        for scheme in ["https://", "http://"] {
            if let Some(rest) = href.strip_prefix(scheme) {
                let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
                let on_storage = storage_endpoint
                    .is_some_and(|endpoint| endpoint_host(endpoint).eq_ignore_ascii_case(host));
                if on_storage {
                    if let Some(location) = Self::from_bucket_path(path) {
                        return location;
                    }
                }
                return Self::Http(href.to_string());
            }
        }

        let path = href.strip_prefix("file://").unwrap_or(href);
        Self::Local(PathBuf::from(path))
    }

    fn from_bucket_path(path: &str) -> Option<Self> {
        let (bucket, key) = path.split_once('/')?;
        if bucket.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self::S3 {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// Get a display string for the location
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            AssetLocation::Local(path) => path.display().to_string(),
            AssetLocation::S3 { bucket, key } => format!("s3://{bucket}/{key}"),
            AssetLocation::Http(url) => url.clone(),
        }
    }
}

/// Hostname of an endpoint given either bare or as a URL.
fn endpoint_host(endpoint: &str) -> &str {
    let without_scheme = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
        .unwrap_or(endpoint);
    without_scheme.split('/').next().unwrap_or(without_scheme)
}
