use std::str::FromStr;
use std::time::Duration;

use briefing_core::job::DEFAULT_LOG_WINDOW;
use reqwest::Url;

/// Delay growth between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every attempt.
    Fixed,
    /// Delay doubles per attempt, capped at [`SyncConfig::max_backoff`].
    Exponential,
}

impl FromStr for Backoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" => Ok(Self::Exponential),
            other => Err(format!("expected `fixed` or `exponential`, got `{other}`")),
        }
    }
}

/// Sync core configuration.
///
/// All fields have defaults suitable for a dashboard talking to a
/// backend on `localhost:8000`. Override via environment variables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Origin of the backend, e.g. `https://briefing.example.com`.
    pub base_url: String,
    /// Prefix of the REST routes.
    pub api_prefix: String,
    /// Path of the streaming endpoint, resolved against `base_url`.
    pub ws_path: String,
    /// Delay before a reconnect attempt (first attempt for exponential).
    pub reconnect_interval: Duration,
    /// Consecutive failed reconnects tolerated before giving up.
    pub max_reconnect_attempts: u32,
    /// Interval between `"ping"` probes on a live connection.
    pub heartbeat_interval: Duration,
    pub backoff: Backoff,
    /// Upper bound on exponential backoff delays.
    pub max_backoff: Duration,
    /// Number of log entries kept in the job state.
    pub log_window: usize,
    /// Fetch a snapshot after every successful (re)connect.
    pub snapshot_on_connect: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            api_prefix: "/api/v1".into(),
            ws_path: "/api/v1/ws/processing".into(),
            reconnect_interval: Duration::from_millis(3_000),
            max_reconnect_attempts: 5,
            heartbeat_interval: Duration::from_millis(30_000),
            backoff: Backoff::Fixed,
            max_backoff: Duration::from_secs(30),
            log_window: DEFAULT_LOG_WINDOW,
            snapshot_on_connect: true,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default                  |
    /// |-----------------------------------|--------------------------|
    /// | `BRIEFING_BASE_URL`               | `http://localhost:8000`  |
    /// | `BRIEFING_API_PREFIX`             | `/api/v1`                |
    /// | `BRIEFING_WS_PATH`                | `/api/v1/ws/processing`  |
    /// | `BRIEFING_RECONNECT_INTERVAL_MS`  | `3000`                   |
    /// | `BRIEFING_MAX_RECONNECT_ATTEMPTS` | `5`                      |
    /// | `BRIEFING_HEARTBEAT_INTERVAL_MS`  | `30000`                  |
    /// | `BRIEFING_RECONNECT_BACKOFF`      | `fixed`                  |
    /// | `BRIEFING_LOG_WINDOW`             | `50`                     |
    /// | `BRIEFING_SNAPSHOT_ON_CONNECT`    | `true`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading values through
    /// `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            base_url: lookup("BRIEFING_BASE_URL").unwrap_or(defaults.base_url),
            api_prefix: lookup("BRIEFING_API_PREFIX").unwrap_or(defaults.api_prefix),
            ws_path: lookup("BRIEFING_WS_PATH").unwrap_or(defaults.ws_path),
            reconnect_interval: parse_or(&lookup, "BRIEFING_RECONNECT_INTERVAL_MS", 3_000)
                .map(Duration::from_millis)?,
            max_reconnect_attempts: parse_or(
                &lookup,
                "BRIEFING_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            )?,
            heartbeat_interval: parse_or(&lookup, "BRIEFING_HEARTBEAT_INTERVAL_MS", 30_000)
                .map(Duration::from_millis)?,
            backoff: parse_or(&lookup, "BRIEFING_RECONNECT_BACKOFF", defaults.backoff)?,
            max_backoff: defaults.max_backoff,
            log_window: parse_or(&lookup, "BRIEFING_LOG_WINDOW", defaults.log_window)?,
            snapshot_on_connect: parse_or(
                &lookup,
                "BRIEFING_SNAPSHOT_ON_CONNECT",
                defaults.snapshot_on_connect,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the connection task cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "BRIEFING_HEARTBEAT_INTERVAL_MS",
                reason: "must be greater than zero".into(),
            });
        }
        if self.log_window == 0 {
            return Err(ConfigError::Invalid {
                key: "BRIEFING_LOG_WINDOW",
                reason: "must be greater than zero".into(),
            });
        }
        self.ws_url()?;
        Ok(())
    }

    /// Streaming endpoint: `ws_path` resolved against `base_url`, with
    /// `http` upgraded to `ws` and `https` to `wss`.
    pub fn ws_url(&self) -> Result<String, ConfigError> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        let mut url = base
            .join(&self.ws_path)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {e}", self.ws_path)))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ConfigError::InvalidUrl(format!(
                    "unsupported scheme `{other}` in {}",
                    self.base_url
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| ConfigError::InvalidUrl(format!("cannot use scheme {scheme}")))?;
        Ok(url.to_string())
    }

    /// Base URL of the REST routes, without a trailing slash.
    pub fn api_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.api_prefix.trim_matches('/')
        )
        .trim_end_matches('/')
        .to_string()
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: format!("`{raw}`: {e}"),
        }),
        None => Ok(default),
    }
}

/// Errors raised while loading [`SyncConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.reconnect_interval, Duration::from_secs(3));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.backoff, Backoff::Fixed);
        assert_eq!(config.log_window, 50);
        assert!(config.snapshot_on_connect);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("BRIEFING_RECONNECT_INTERVAL_MS", "500"),
            ("BRIEFING_MAX_RECONNECT_ATTEMPTS", "2"),
            ("BRIEFING_RECONNECT_BACKOFF", "Exponential"),
            ("BRIEFING_SNAPSHOT_ON_CONNECT", "false"),
        ]))
        .unwrap();
        assert_eq!(config.reconnect_interval, Duration::from_millis(500));
        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.backoff, Backoff::Exponential);
        assert!(!config.snapshot_on_connect);
    }

    #[test]
    fn bad_number_is_reported_with_key() {
        let err = SyncConfig::from_lookup(lookup(&[("BRIEFING_MAX_RECONNECT_ATTEMPTS", "many")]))
            .unwrap_err();
        assert_matches!(
            err,
            ConfigError::Invalid {
                key: "BRIEFING_MAX_RECONNECT_ATTEMPTS",
                ..
            }
        );
    }

    #[test]
    fn zero_heartbeat_is_rejected() {
        let err = SyncConfig::from_lookup(lookup(&[("BRIEFING_HEARTBEAT_INTERVAL_MS", "0")]))
            .unwrap_err();
        assert_matches!(err, ConfigError::Invalid { .. });
    }

    #[test]
    fn validate_checks_hand_built_config() {
        let config = SyncConfig {
            heartbeat_interval: Duration::ZERO,
            ..Default::default()
        };
        assert_matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                key: "BRIEFING_HEARTBEAT_INTERVAL_MS",
                ..
            })
        );

        let config = SyncConfig {
            log_window: 0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(ConfigError::Invalid { .. }));
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn ws_url_upgrades_http() {
        let config = SyncConfig {
            base_url: "http://localhost:8000".into(),
            ..Default::default()
        };
        assert_eq!(
            config.ws_url().unwrap(),
            "ws://localhost:8000/api/v1/ws/processing"
        );
    }

    #[test]
    fn ws_url_upgrades_https_and_ignores_base_path() {
        let config = SyncConfig {
            base_url: "https://briefing.example.com/dashboard/".into(),
            ..Default::default()
        };
        assert_eq!(
            config.ws_url().unwrap(),
            "wss://briefing.example.com/api/v1/ws/processing"
        );
    }

    #[test]
    fn ws_url_rejects_unknown_scheme() {
        let config = SyncConfig {
            base_url: "ftp://example.com".into(),
            ..Default::default()
        };
        assert_matches!(config.ws_url(), Err(ConfigError::InvalidUrl(_)));
    }

    #[test]
    fn api_url_joins_prefix() {
        let config = SyncConfig {
            base_url: "http://localhost:8000/".into(),
            ..Default::default()
        };
        assert_eq!(config.api_url(), "http://localhost:8000/api/v1");
    }
}
