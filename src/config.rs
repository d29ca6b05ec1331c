use std::time::Duration;

use tracing::info;

use crate::error::ConfigError;
use crate::s3::S3Config;

pub const DEFAULT_S3_ENDPOINT: &str = "eodata.dataspace.copernicus.eu";
pub const DEFAULT_STAC_API_URL: &str = "https://catalogue.dataspace.copernicus.eu/stac";
pub const DEFAULT_WARP_CRS: i32 = 32651;

/// Process configuration, loaded once at startup and passed by reference.
#[derive(Clone)]
pub struct Settings {
    /// Object storage access key (checked only when storage is read).
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Object storage endpoint hostname.
    pub s3_endpoint: String,
    pub region: String,
    /// STAC API root.
    pub stac_api_url: String,
    /// Timeout for catalog search and remote raster reads.
    pub http_timeout: Duration,
    /// Destination CRS of the reprojecting protocol.
    pub warp_crs: i32,
}

impl Settings {
    /// Load configuration from `.env` and the environment.
    ///
    /// | Env Var                      | Default                                          |
    /// |------------------------------|--------------------------------------------------|
    /// | `AWS_ACCESS_KEY_ID`          | unset                                            |
    /// | `AWS_SECRET_ACCESS_KEY`      | unset                                            |
    /// | `AWS_S3_ENDPOINT`            | `eodata.dataspace.copernicus.eu`                 |
    /// | `AWS_REGION`                 | `default`                                        |
    /// | `STAC_API_URL`               | `https://catalogue.dataspace.copernicus.eu/stac` |
    /// | `EVENTCOG_HTTP_TIMEOUT_SECS` | `60`                                             |
    /// | `EVENTCOG_WARP_CRS`          | `32651`                                          |
    ///
    /// # Errors
    /// Returns an error if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    ///
    /// # Errors
    /// Returns an error if a numeric variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let http_timeout_secs: u64 = match non_empty("EVENTCOG_HTTP_TIMEOUT_SECS") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "EVENTCOG_HTTP_TIMEOUT_SECS",
                value,
                expected: "a whole number of seconds",
            })?,
            None => 60,
        };

        let warp_crs: i32 = match non_empty("EVENTCOG_WARP_CRS") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "EVENTCOG_WARP_CRS",
                value,
                expected: "an EPSG code",
            })?,
            None => DEFAULT_WARP_CRS,
        };

        Ok(Self {
            access_key_id: non_empty("AWS_ACCESS_KEY_ID"),
            secret_access_key: non_empty("AWS_SECRET_ACCESS_KEY"),
            s3_endpoint: non_empty("AWS_S3_ENDPOINT").unwrap_or_else(|| DEFAULT_S3_ENDPOINT.into()),
            region: non_empty("AWS_REGION").unwrap_or_else(|| "default".into()),
            stac_api_url: non_empty("STAC_API_URL").unwrap_or_else(|| DEFAULT_STAC_API_URL.into()),
            http_timeout: Duration::from_secs(http_timeout_secs),
            warp_crs,
        })
    }

    #[must_use]
    pub fn s3_config(&self) -> S3Config {
        S3Config {
            endpoint: self.s3_endpoint.clone(),
            region: self.region.clone(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            timeout: self.http_timeout,
        }
    }

    /// Log the configuration with credentials masked.
    pub fn log_redacted(&self) {
        info!(
            s3_endpoint = %self.s3_endpoint,
            region = %self.region,
            stac_api_url = %self.stac_api_url,
            http_timeout_secs = self.http_timeout.as_secs(),
            warp_crs = self.warp_crs,
            access_key_id = redact(self.access_key_id.as_deref()),
            secret_access_key = redact(self.secret_access_key.as_deref()),
            "Loaded settings"
        );
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("access_key_id", &redact(self.access_key_id.as_deref()))
            .field("secret_access_key", &redact(self.secret_access_key.as_deref()))
            .field("s3_endpoint", &self.s3_endpoint)
            .field("region", &self.region)
            .field("stac_api_url", &self.stac_api_url)
            .field("http_timeout", &self.http_timeout)
            .field("warp_crs", &self.warp_crs)
            .finish()
    }
}

fn redact(value: Option<&str>) -> &'static str {
    if value.is_some() {
        "***"
    } else {
        "<unset>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.s3_endpoint, DEFAULT_S3_ENDPOINT);
        assert_eq!(s.region, "default");
        assert_eq!(s.stac_api_url, DEFAULT_STAC_API_URL);
        assert_eq!(s.http_timeout, Duration::from_secs(60));
        assert_eq!(s.warp_crs, 32651);
        assert!(s.access_key_id.is_none());
    }

    #[test]
    fn test_overrides_and_blank_values() {
        let s = settings(&[
            ("AWS_ACCESS_KEY_ID", "AKIA123"),
            ("AWS_SECRET_ACCESS_KEY", "  "),
            ("EVENTCOG_HTTP_TIMEOUT_SECS", "15"),
            ("EVENTCOG_WARP_CRS", "32650"),
        ])
        .unwrap();
        assert_eq!(s.access_key_id.as_deref(), Some("AKIA123"));
        assert!(s.secret_access_key.is_none());
        assert_eq!(s.s3_config().timeout, Duration::from_secs(15));
        assert_eq!(s.warp_crs, 32650);
    }

    #[test]
    fn test_invalid_number() {
        let err = settings(&[("EVENTCOG_HTTP_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("EVENTCOG_HTTP_TIMEOUT_SECS"));
    }

    #[test]
    fn test_debug_masks_secrets() {
        let s = settings(&[("AWS_SECRET_ACCESS_KEY", "hunter2")]).unwrap();
        let rendered = format!("{s:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}
