use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::services::session_service::SessionSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct ProctoringSettings {
    pub extended_absence_grace_secs: u64,
    pub sample_interval_secs: u64,
    pub tick_interval_ms: u64,
    /// How long a finished session stays reachable before it is evicted.
    pub retention_secs: u64,
}

impl Default for ProctoringSettings {
    fn default() -> Self {
        Self {
            extended_absence_grace_secs: 5,
            sample_interval_secs: 30,
            tick_interval_ms: 1000,
            retention_secs: 300,
        }
    }
}

impl From<&ProctoringSettings> for SessionSettings {
    fn from(settings: &ProctoringSettings) -> Self {
        Self {
            tick_interval: Duration::from_millis(settings.tick_interval_ms.max(1)),
            extended_absence_grace: Duration::from_secs(settings.extended_absence_grace_secs),
            sample_interval: Duration::from_secs(settings.sample_interval_secs.max(1)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    pub proctoring: ProctoringSettings,
    /// External report collector. Reports are only archived in memory when unset.
    pub submission_url: Option<String>,
    pub submission_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".to_string(),
            proctoring: ProctoringSettings::default(),
            submission_url: None,
            submission_timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first (two levels up), then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + ENV overrides (APP__SECTION__KEY)
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let defaults = Config::default();

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or(defaults.bind_addr);

        let proctoring = ProctoringSettings {
            extended_absence_grace_secs: settings
                .get_int("proctoring.extended_absence_grace_secs")
                .map(|v| v.max(0) as u64)
                .unwrap_or(defaults.proctoring.extended_absence_grace_secs),
            sample_interval_secs: settings
                .get_int("proctoring.sample_interval_secs")
                .map(|v| v.max(1) as u64)
                .unwrap_or(defaults.proctoring.sample_interval_secs),
            tick_interval_ms: settings
                .get_int("proctoring.tick_interval_ms")
                .map(|v| v.max(1) as u64)
                .unwrap_or(defaults.proctoring.tick_interval_ms),
            retention_secs: settings
                .get_int("proctoring.retention_secs")
                .map(|v| v.max(0) as u64)
                .unwrap_or(defaults.proctoring.retention_secs),
        };

        let submission_url = settings
            .get_string("submission.url")
            .or_else(|_| env::var("SUBMISSION_URL"))
            .ok()
            .filter(|url| !url.trim().is_empty());

        let submission_timeout_secs = settings
            .get_int("submission.timeout_secs")
            .map(|v| v.max(1) as u64)
            .unwrap_or(defaults.submission_timeout_secs);

        if submission_url.is_none() {
            eprintln!("WARNING: SUBMISSION_URL not set, reports are kept in memory only");
        }

        Ok(Config {
            bind_addr,
            proctoring,
            submission_url,
            submission_timeout_secs,
        })
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings::from(&self.proctoring)
    }

    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(self.proctoring.retention_secs)
    }
}
