//! S3-compatible object storage backend.
//!
//! The imagery archive is exposed through an S3 endpoint with static
//! credentials. [`S3RangeReaderSync`] wraps the async SDK behind a private
//! current-thread runtime so the rest of the pipeline stays blocking.
//! Each reader is one session: it is opened for a single band read and
//! dropped afterwards.

use std::time::Duration;

use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use tokio::runtime::Runtime;
use tracing::debug;

use crate::error::RangeReadError;
use crate::range_reader::RangeReader;

/// Connection settings for the imagery object store.
#[derive(Clone)]
pub struct S3Config {
    /// Endpoint hostname (`eodata.dataspace.copernicus.eu`) or full URL
    pub endpoint: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Applied to every request
    pub timeout: Duration,
}

impl S3Config {
    /// Endpoint as a URL, defaulting to HTTPS for bare hostnames.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            self.endpoint.clone()
        } else {
            format!("https://{}", self.endpoint)
        }
    }

    fn credentials(&self) -> Result<Credentials, RangeReadError> {
        let access_key = self
            .access_key_id
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or(RangeReadError::MissingCredential("AWS_ACCESS_KEY_ID"))?;
        let secret_key = self
            .secret_access_key
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or(RangeReadError::MissingCredential("AWS_SECRET_ACCESS_KEY"))?;
        Ok(Credentials::new(access_key, secret_key, None, None, "eventcog"))
    }
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "***"))
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn sdk_error<E>(err: E) -> RangeReadError
where
    E: std::error::Error,
{
    RangeReadError::S3(DisplayErrorContext(err).to_string())
}

/// Blocking range reader for one object.
pub struct S3RangeReaderSync {
    runtime: Runtime,
    client: Client,
    bucket: String,
    key: String,
    uri: String,
    size: u64,
}

impl S3RangeReaderSync {
    /// Open a session and stat `bucket/key`.
    ///
    /// Credentials are checked here, not when the configuration is loaded.
    ///
    /// # Errors
    /// Missing credentials, runtime construction failure, or a failed HEAD.
    pub fn open(config: &S3Config, bucket: &str, key: &str) -> Result<Self, RangeReadError> {
        let credentials = config.credentials()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint_url())
            .credentials_provider(credentials)
            .force_path_style(true)
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(config.timeout)
                    .build(),
            )
            .build();
        let client = Client::from_conf(sdk_config);

        let head = runtime
            .block_on(client.head_object().bucket(bucket).key(key).send())
            .map_err(sdk_error)?;
        let uri = format!("s3://{bucket}/{key}");
        let size = head
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| RangeReadError::UnknownSize(uri.clone()))?;

        debug!(uri = %uri, size, "Opened object storage session");
        Ok(Self {
            runtime,
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
            uri,
            size,
        })
    }
}

impl RangeReader for S3RangeReaderSync {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&self, offset: u64, length: usize) -> Result<Vec<u8>, RangeReadError> {
        let end = offset.checked_add(length as u64).filter(|end| *end <= self.size);
        if end.is_none() {
            return Err(RangeReadError::OutOfRange {
                offset,
                length: length as u64,
                size: self.size,
            });
        }
        if length == 0 {
            return Ok(Vec::new());
        }
        let last = offset + length as u64 - 1;

        self.runtime.block_on(async {
            let output = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .range(format!("bytes={offset}-{last}"))
                .send()
                .await
                .map_err(sdk_error)?;
            let body = output.body.collect().await.map_err(sdk_error)?;
            Ok(body.into_bytes().to_vec())
        })
    }

    fn identifier(&self) -> &str {
        &self.uri
    }
}
