use std::time::Duration;

use serde::Deserialize;
use services::WatchThreshold;
use storage::sqlite::SqliteSettings;

fn default_db_url() -> String {
    "sqlite://progress.sqlite3".into()
}

fn default_user_id() -> String {
    "local".into()
}

fn default_db_max_connections() -> u32 {
    SqliteSettings::default().max_connections
}

fn default_db_busy_timeout_ms() -> u64 {
    5_000
}

/// Settings read from `PROGRESS_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_url")]
    pub db_url: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub watch_threshold: WatchThreshold,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_busy_timeout_ms")]
    pub db_busy_timeout_ms: u64,
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    ///
    /// # Errors
    ///
    /// Returns `envy::Error` when a variable is present but malformed, e.g. a
    /// `PROGRESS_WATCH_THRESHOLD` outside `1..=100`.
    pub fn from_env() -> Result<Self, envy::Error> {
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars())
    }

    /// Read settings from explicit key/value pairs.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed("PROGRESS_").from_iter(vars)
    }

    #[must_use]
    pub fn sqlite_settings(&self) -> SqliteSettings {
        SqliteSettings {
            max_connections: self.db_max_connections.max(1),
            busy_timeout: Duration::from_millis(self.db_busy_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_vars(vars(&[("UNRELATED", "1")])).unwrap();
        assert_eq!(config.db_url, "sqlite://progress.sqlite3");
        assert_eq!(config.user_id, "local");
        assert_eq!(config.watch_threshold.percent(), 90);
        assert_eq!(config.sqlite_settings(), SqliteSettings::default());
    }

    #[test]
    fn pool_settings_come_from_the_environment() {
        let config = Config::from_vars(vars(&[
            ("PROGRESS_DB_MAX_CONNECTIONS", "0"),
            ("PROGRESS_DB_BUSY_TIMEOUT_MS", "250"),
        ]))
        .unwrap();
        let settings = config.sqlite_settings();
        assert_eq!(settings.max_connections, 1);
        assert_eq!(settings.busy_timeout, Duration::from_millis(250));
    }

    #[test]
    fn prefixed_values_override_defaults() {
        let config = Config::from_vars(vars(&[
            ("PROGRESS_DB_URL", "sqlite://other.db"),
            ("PROGRESS_USER_ID", "patient-3"),
            ("PROGRESS_WATCH_THRESHOLD", "75"),
        ]))
        .unwrap();
        assert_eq!(config.db_url, "sqlite://other.db");
        assert_eq!(config.user_id, "patient-3");
        assert_eq!(config.watch_threshold.percent(), 75);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        assert!(Config::from_vars(vars(&[("PROGRESS_WATCH_THRESHOLD", "0")])).is_err());
    }
}
