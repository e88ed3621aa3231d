use bridge::config::{Config as BridgeConfig, ValidationError};
use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Errors are reported to Sentry when set
    pub sentry_dsn: Option<String>,
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            sentry_dsn: None,
            level: default_level(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub bridge: BridgeConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(metrics) = &self.common.metrics {
            if metrics.statsd_port == 0 {
                return Err(ValidationError::InvalidPort.into());
            }
        }
        if let Some(dsn) = self.sentry_dsn() {
            dsn.parse::<sentry::types::Dsn>()
                .map_err(|e| ConfigError::InvalidSentryDsn(e.to_string()))?;
        }
        self.bridge.validate()?;
        Ok(())
    }

    pub fn logging(&self) -> LoggingConfig {
        self.common.logging.clone().unwrap_or_default()
    }

    pub fn sentry_dsn(&self) -> Option<&str> {
        self.common
            .logging
            .as_ref()
            .and_then(|l| l.sentry_dsn.as_deref())
            .filter(|dsn| !dsn.is_empty())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
    #[error("invalid sentry dsn: {0}")]
    InvalidSentryDsn(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    const BRIDGE_YAML: &str = r#"
            bridge:
                listener:
                    host: 0.0.0.0
                    port: 8080
                admin_listener:
                    host: 127.0.0.1
                    port: 8081
                collection: lockss
                backends:
                    repository: http://repository.internal:24610
                    configuration: http://daemon.internal:24620
                    poller: http://daemon.internal:24630
                    crawler: http://daemon.internal:24660
                    metadata_extractor: http://metadata.internal:24640
                    metadata_query: http://metadata.internal:24650
            "#;

    #[test]
    fn bridge_config() {
        let tmp = write_tmp_file(BRIDGE_YAML);
        let config = Config::from_file(tmp.path()).expect("load config");
        assert_eq!(config.bridge.listener.port, 8080);
        assert_eq!(config.bridge.collection, "lockss");
        assert_eq!(config.bridge.fanout_concurrency, 1);
        assert_eq!(config.bridge.timeouts.read_timeout_secs, 120);
        assert_eq!(config.common.metrics, None);
        assert_eq!(config.logging(), LoggingConfig::default());
        assert_eq!(config.sentry_dsn(), None);
    }

    #[test]
    fn common_sections() {
        let yaml = format!(
            r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                sentry_dsn: https://public@sentry.example.com/1
                level: debug
            {BRIDGE_YAML}"#
        );
        let tmp = write_tmp_file(&yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        let metrics = config.common.metrics.clone().expect("metrics config");
        assert_eq!(metrics.statsd_host, "127.0.0.1");
        assert_eq!(metrics.statsd_port, 8125);
        assert_eq!(config.logging().level, "debug");
        assert_eq!(
            config.sentry_dsn(),
            Some("https://public@sentry.example.com/1")
        );
    }

    #[test]
    fn invalid_config() {
        let yaml = BRIDGE_YAML.replace("collection: lockss", "collection: \"\"");
        let tmp = write_tmp_file(&yaml);
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::Invalid(ValidationError::EmptyCollection))
        ));

        let yaml = format!(
            r#"
            logging:
                sentry_dsn: not a dsn
            {BRIDGE_YAML}"#
        );
        let tmp = write_tmp_file(&yaml);
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::InvalidSentryDsn(_))
        ));

        let tmp = write_tmp_file("bridge: [");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn missing_file() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/gateway.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::LoadError(_)));
    }
}
