use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the calendar service.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub http: HttpConfig,
    /// Session and credential configuration
    pub auth: AuthConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Capture-date extraction configuration
    #[serde(default)]
    pub media: MediaConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// API listen address
    #[serde(default = "default_http_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Session and credential configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Secret used to sign session tokens
    pub session_secret: String,
    /// Shared password granting a viewer session
    pub viewer_password: String,
    /// PIN granting an admin session (login body or fallback header)
    pub admin_pin: String,
    /// Viewer session lifetime in seconds (1 year)
    #[serde(default = "default_viewer_session_max_age")]
    pub viewer_session_max_age_secs: i64,
    /// Admin session lifetime in seconds (7 days)
    #[serde(default = "default_admin_session_max_age")]
    pub admin_session_max_age_secs: i64,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding originals, processed media and the date index
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Base URL media objects are publicly served from. Defaults to the
    /// bucket's virtual-hosted S3 URL, or `<endpoint>/<bucket>` when a
    /// custom endpoint is set.
    pub public_base_url: Option<String>,
    /// Key prefix of web-ready, size-reduced media
    #[serde(default = "default_processed_prefix")]
    pub processed_prefix: String,
    /// Key prefix of untouched camera originals
    #[serde(default = "default_originals_prefix")]
    pub originals_prefix: String,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Capture-date extraction configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// Objects dated concurrently per batch; batches run sequentially
    #[serde(default = "default_extraction_batch_size")]
    pub extraction_batch_size: usize,
    /// Leading byte range fetched for image metadata parsing (64 KiB)
    #[serde(default = "default_exif_scan_bytes")]
    pub exif_scan_bytes: u64,
    /// ffprobe binary used for video container tags
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
}

// Default value functions
fn default_service_name() -> String {
    "calendar-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_viewer_session_max_age() -> i64 {
    365 * 24 * 60 * 60
}

fn default_admin_session_max_age() -> i64 {
    7 * 24 * 60 * 60
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_processed_prefix() -> String {
    "processed".to_string()
}

fn default_originals_prefix() -> String {
    "originals".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_extraction_batch_size() -> usize {
    10
}

fn default_exif_scan_bytes() -> u64 {
    64 * 1024
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

impl Config {
    /// Load configuration from environment and config files.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "calendar-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/calendar").required(false))
            .add_source(config::File::with_name("/etc/calendar/service").required(false))
            // Override with environment variables
            // CALENDAR__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("CALENDAR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would only fail later, at the first login
    /// or token verification.
    pub fn validate(&self) -> Result<()> {
        if self.auth.session_secret.is_empty() {
            bail!("auth.session_secret must be configured");
        }
        if self.auth.viewer_password.is_empty() {
            bail!("auth.viewer_password must be configured");
        }
        if self.auth.admin_pin.is_empty() {
            bail!("auth.admin_pin must be configured");
        }
        if self.media.extraction_batch_size == 0 {
            bail!("media.extraction_batch_size must be at least 1");
        }
        Ok(())
    }

    /// Get database connection timeout as Duration
    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connect_timeout_secs)
    }

    /// Get database idle timeout as Duration
    pub fn db_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.database.idle_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            extraction_batch_size: default_extraction_batch_size(),
            exif_scan_bytes: default_exif_scan_bytes(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Config {
        Config {
            service: ServiceConfig::default(),
            http: HttpConfig::default(),
            auth: AuthConfig {
                session_secret: "s".to_string(),
                viewer_password: "p".to_string(),
                admin_pin: "1234".to_string(),
                viewer_session_max_age_secs: default_viewer_session_max_age(),
                admin_session_max_age_secs: default_admin_session_max_age(),
            },
            s3: S3Config {
                bucket: "memories".to_string(),
                region: default_region(),
                endpoint_url: None,
                force_path_style: false,
                public_base_url: None,
                processed_prefix: default_processed_prefix(),
                originals_prefix: default_originals_prefix(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/calendar".to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout_secs(),
                idle_timeout_secs: default_idle_timeout_secs(),
                run_migrations: true,
            },
            media: MediaConfig::default(),
        }
    }

    #[test]
    fn test_default_session_lifetimes() {
        assert_eq!(default_viewer_session_max_age(), 31_536_000);
        assert_eq!(default_admin_session_max_age(), 604_800);
        assert_eq!(default_extraction_batch_size(), 10);
        assert_eq!(default_exif_scan_bytes(), 65_536);
    }

    #[test]
    fn test_validate_rejects_empty_secret() {
        let mut config = minimal_config();
        config.auth.session_secret.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = minimal_config();
        config.media.extraction_batch_size = 0;
        assert!(config.validate().is_err());
    }
}
