//! Settings read from `BOLTZLET_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::service::ServiceConfig;
use crate::transport::ServerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub jobs_dir: PathBuf,
    pub uploads_dir: PathBuf,
    /// Base predictor command, split on whitespace.
    pub predictor: Vec<String>,
    pub timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        let server = ServerConfig::default();
        let service = ServiceConfig::default();
        Self {
            host: server.host,
            port: server.port,
            jobs_dir: PathBuf::from("jobs"),
            uploads_dir: PathBuf::from("uploads"),
            predictor: service.predictor,
            timeout: service.timeout,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build settings from any variable source. Unset and empty variables
    /// keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut settings = Self::default();

        if let Some(host) = get("BOLTZLET_HOST") {
            settings.host = host;
        }
        if let Some(port) = get("BOLTZLET_PORT") {
            settings.port = port.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Invalid {
                    var: "BOLTZLET_PORT",
                    value: port.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(dir) = get("BOLTZLET_JOBS_DIR") {
            settings.jobs_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("BOLTZLET_UPLOADS_DIR") {
            settings.uploads_dir = PathBuf::from(dir);
        }
        if let Some(predictor) = get("BOLTZLET_PREDICTOR") {
            settings.predictor = predictor.split_whitespace().map(String::from).collect();
        }
        if let Some(timeout) = get("BOLTZLET_TIMEOUT_SECS") {
            let invalid = |reason: String| ConfigError::Invalid {
                var: "BOLTZLET_TIMEOUT_SECS",
                value: timeout.clone(),
                reason,
            };
            let secs: u64 = timeout.trim().parse().map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?;
            if secs == 0 {
                return Err(invalid("must be greater than zero".to_string()));
            }
            settings.timeout = Duration::from_secs(secs);
        }

        Ok(settings)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig::default()
            .with_predictor(self.predictor.clone())
            .with_timeout(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.host, "0.0.0.0");
        assert_eq!(s.port, 6969);
        assert_eq!(s.jobs_dir, PathBuf::from("jobs"));
        assert_eq!(s.uploads_dir, PathBuf::from("uploads"));
        assert_eq!(s.predictor, vec!["boltz"]);
        assert_eq!(s.timeout, Duration::from_secs(600));
    }

    #[test]
    fn overrides() {
        let s = settings(&[
            ("BOLTZLET_HOST", "127.0.0.1"),
            ("BOLTZLET_PORT", "8080"),
            ("BOLTZLET_JOBS_DIR", "/data/jobs"),
            ("BOLTZLET_PREDICTOR", "uv run  boltz"),
            ("BOLTZLET_TIMEOUT_SECS", "30"),
            ("BOLTZLET_UPLOADS_DIR", ""),
        ])
        .unwrap();
        assert_eq!(s.server_config().host, "127.0.0.1");
        assert_eq!(s.server_config().port, 8080);
        assert_eq!(s.jobs_dir, PathBuf::from("/data/jobs"));
        assert_eq!(s.uploads_dir, PathBuf::from("uploads"));
        assert_eq!(s.service_config().predictor, vec!["uv", "run", "boltz"]);
        assert_eq!(s.service_config().timeout, Duration::from_secs(30));
    }

    #[test]
    fn rejects_invalid_values() {
        let err = settings(&[("BOLTZLET_TIMEOUT_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
        assert!(settings(&[("BOLTZLET_TIMEOUT_SECS", "-5")]).is_err());
        assert!(settings(&[("BOLTZLET_PORT", "70000")]).is_err());
    }
}
