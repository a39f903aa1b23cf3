//! Type-safe configuration loader using the `config` crate,
//! with manual environment-variable overrides for core settings.

use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::{env, path::PathBuf, time::Duration};
use uuid::Uuid;

/// Top-level application settings loaded from `Config.toml`
/// and then overridden (where applicable) by environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Postgres connection URL for the platform database (read-only access)
    pub database_url: String,

    /// Interval between each telemetry gather run (e.g. "4h", "24h")
    #[serde(with = "humantime_serde")]
    pub gather_interval: Duration,

    /// HTTP bind address for metrics & health endpoints
    pub server_bind: String,

    /// Directory that receives one dated archive directory per gather run
    pub output_dir: PathBuf,

    /// Install-time identity of the platform this collector reports on
    pub system_uuid: Uuid,

    /// Externally reachable base URL of the platform
    pub base_url: String,

    /// Version string of the platform (the collector's own version is
    /// reported separately, from the crate metadata)
    pub platform_version: String,

    /// Whether product usage tracking is switched on for this install
    #[serde(default)]
    pub tracking_state: bool,

    /// Enabled authentication backends, in configuration order
    #[serde(default)]
    pub authentication_backends: Vec<String>,

    /// External log aggregators the platform ships logs to
    #[serde(default)]
    pub log_aggregators: Vec<String>,

    /// Paths of custom execution environments installed beside the
    /// platform-provided one
    #[serde(default)]
    pub custom_venv_paths: Vec<String>,

    /// License record handed over by the (external) license validator;
    /// absent on unlicensed installs
    #[serde(default)]
    pub license: Option<LicenseInfo>,
}

/// Opaque license summary. Validation of the key itself happens outside
/// this service; we only report what we were given.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LicenseInfo {
    #[serde(default)]
    pub license_type: Option<String>,

    #[serde(default)]
    pub free_instances: Option<i64>,

    /// Seconds until the license expires
    #[serde(default)]
    pub time_remaining: Option<i64>,
}

impl Settings {
    /// Load settings from `Config.toml` (if present),
    /// then apply any overrides from these environment variables:
    ///
    /// - `APP__DATABASE_URL`
    /// - `APP__GATHER_INTERVAL`
    /// - `APP__SERVER_BIND`
    /// - `APP__OUTPUT_DIR`
    pub fn new() -> Result<Self, ConfigError> {
        // 1) Base defaults from Config.toml
        let cfg = Config::builder()
            .add_source(File::with_name("Config").required(false))
            .build()?;

        // Deserialize everything straight away
        let mut settings: Settings = cfg.try_deserialize()?;

        // 2) Manual overrides for core settings
        if let Ok(val) = env::var("APP__DATABASE_URL") {
            settings.database_url = val;
        }
        if let Ok(val) = env::var("APP__GATHER_INTERVAL") {
            settings.gather_interval = humantime::parse_duration(&val)
                .map_err(|e| ConfigError::Foreign(Box::new(e)))?;
        }
        if let Ok(val) = env::var("APP__SERVER_BIND") {
            settings.server_bind = val;
        }
        if let Ok(val) = env::var("APP__OUTPUT_DIR") {
            settings.output_dir = PathBuf::from(val);
        }

        Ok(settings)
    }
}
