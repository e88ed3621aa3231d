use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Timeout '{0}' must be greater than 0")]
    InvalidTimeout(&'static str),

    #[error("Collection identifier cannot be empty")]
    EmptyCollection,

    #[error("Fan-out concurrency must be at least 1")]
    InvalidFanout,

    #[error("Envelope body limit must be greater than 0")]
    InvalidEnvelopeLimit,

    #[error("Backend URL for '{0}' cannot be used as a base (scheme must be http or https)")]
    InvalidBackendUrl(&'static str),
}

/// Bridge configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for inbound envelope calls
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Repository collection that content is addressed under
    pub collection: String,
    /// Maximum number of per-item backend calls in flight for list operations.
    /// 1 keeps list operations strictly sequential.
    #[serde(default = "default_fanout_concurrency")]
    pub fanout_concurrency: usize,
    /// Largest envelope request body accepted, in bytes
    #[serde(default = "default_max_envelope_bytes")]
    pub max_envelope_bytes: usize,
    /// One base URL per backend role
    pub backends: Backends,
}

fn default_fanout_concurrency() -> usize {
    1
}

fn default_max_envelope_bytes() -> usize {
    64 * 1024 * 1024
}

impl Config {
    /// Validates the bridge configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.timeouts.validate()?;

        if self.collection.trim().is_empty() {
            return Err(ValidationError::EmptyCollection);
        }

        if self.fanout_concurrency == 0 {
            return Err(ValidationError::InvalidFanout);
        }

        if self.max_envelope_bytes == 0 {
            return Err(ValidationError::InvalidEnvelopeLimit);
        }

        self.backends.validate()
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Outbound timeouts.
///
/// The connect timeout is fixed for the shared client. The read timeout is
/// applied to each request individually and bounds how long the backend may
/// stay silent, so long-running calls can carry a different value without
/// touching shared state.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Timeouts {
    /// Bounds socket and TLS setup
    pub connect_timeout_secs: u64,
    /// Longest silence once connected, for ordinary calls
    pub read_timeout_secs: u64,
    /// Read timeout for long-running synchronous backend computations (hashing)
    pub long_read_timeout_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            connect_timeout_secs: 10,
            read_timeout_secs: 120,
            long_read_timeout_secs: 24 * 60 * 60,
        }
    }
}

impl Timeouts {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.connect_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout("connect_timeout_secs"));
        }
        if self.read_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout("read_timeout_secs"));
        }
        if self.long_read_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout("long_read_timeout_secs"));
        }
        Ok(())
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn long_read(&self) -> Duration {
        Duration::from_secs(self.long_read_timeout_secs)
    }
}

/// Base URLs of the backend services.
///
/// Note: Uses the `url::Url` type so invalid URLs are rejected during config
/// deserialization.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Backends {
    pub repository: Url,
    pub configuration: Url,
    pub poller: Url,
    pub crawler: Url,
    pub metadata_extractor: Url,
    pub metadata_query: Url,
}

impl Backends {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, url) in [
            ("repository", &self.repository),
            ("configuration", &self.configuration),
            ("poller", &self.poller),
            ("crawler", &self.crawler),
            ("metadata_extractor", &self.metadata_extractor),
            ("metadata_query", &self.metadata_query),
        ] {
            if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
                return Err(ValidationError::InvalidBackendUrl(name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
listener:
    host: "0.0.0.0"
    port: 8080
admin_listener:
    host: "127.0.0.1"
    port: 8081
timeouts:
    read_timeout_secs: 60
collection: lockss
backends:
    repository: "http://repo.internal:24610"
    configuration: "http://config.internal:24620/api"
    poller: "http://poller.internal:24630"
    crawler: "http://crawler.internal:24660"
    metadata_extractor: "http://mdx.internal:24640"
    metadata_query: "http://mdq.internal:24650"
"#;

    #[test]
    fn test_parse_valid_config() {
        let config: Config = serde_yaml::from_str(YAML).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.listener.port, 8080);
        assert_eq!(config.collection, "lockss");
        assert_eq!(config.fanout_concurrency, 1);
        assert_eq!(config.max_envelope_bytes, 64 * 1024 * 1024);
        // unspecified timeouts keep their defaults
        assert_eq!(config.timeouts.connect(), Duration::from_secs(10));
        assert_eq!(config.timeouts.read(), Duration::from_secs(60));
        assert_eq!(config.timeouts.long_read(), Duration::from_secs(86400));
        assert_eq!(config.backends.configuration.path(), "/api");
    }

    #[test]
    fn test_validation_errors() {
        let base: Config = serde_yaml::from_str(YAML).unwrap();

        let mut config = base.clone();
        config.listener.port = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidPort
        ));

        let mut config = base.clone();
        config.timeouts.read_timeout_secs = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidTimeout("read_timeout_secs")
        ));

        let mut config = base.clone();
        config.collection = " ".to_string();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::EmptyCollection
        ));

        let mut config = base.clone();
        config.fanout_concurrency = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidFanout
        ));

        let mut config = base.clone();
        config.max_envelope_bytes = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidEnvelopeLimit
        ));

        let mut config = base;
        config.backends.poller = Url::parse("mailto:ops@example.com").unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidBackendUrl("poller")
        ));
    }

    #[test]
    fn test_deserialization_errors() {
        // Invalid URL
        assert!(
            serde_yaml::from_str::<Config>(&YAML.replace(
                "http://repo.internal:24610",
                "not-a-url"
            ))
            .is_err()
        );

        // Missing backend
        assert!(
            serde_yaml::from_str::<Config>(
                &YAML.replace("    crawler: \"http://crawler.internal:24660\"\n", "")
            )
            .is_err()
        );

        // Invalid port type
        assert!(serde_yaml::from_str::<Listener>(r#"{host: "0.0.0.0", port: "x"}"#).is_err());
    }
}
