//! Server configuration
//!
//! Defaults plus `KUKARACHA_*` environment overrides.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::history::DEFAULT_HISTORY_CAPACITY;

/// Default listening port
pub const DEFAULT_PORT: u16 = 4242;

/// Default admin login
pub const DEFAULT_ADMIN_LOGIN: &str = "admin";

pub const ENV_ALLOW_AUTO_REGISTER: &str = "KUKARACHA_ALLOW_AUTO_REGISTER";
pub const ENV_USERS_FILE: &str = "KUKARACHA_USERS_FILE";
pub const ENV_LOG_DIR: &str = "KUKARACHA_LOG_DIR";
pub const ENV_HISTORY_CAPACITY: &str = "KUKARACHA_HISTORY_CAPACITY";
pub const ENV_ADMIN_LOGIN: &str = "KUKARACHA_ADMIN_LOGIN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// TCP port to listen on (0 picks a free one)
    pub port: u16,
    /// Register unknown logins on their first authentication attempt
    pub allow_registration: bool,
    /// Credential file location
    pub users_path: PathBuf,
    /// Directory for session logs; `None` disables the transcript
    pub log_dir: Option<PathBuf>,
    pub history_capacity: usize,
    /// Login granted moderation commands (compared case-insensitively)
    pub admin_login: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            allow_registration: false,
            users_path: PathBuf::from("users.json"),
            log_dir: Some(PathBuf::from("logs")),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            admin_login: DEFAULT_ADMIN_LOGIN.to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = parse_var::<i64>(&lookup, ENV_ALLOW_AUTO_REGISTER) {
            config.allow_registration = value != 0;
        }
        if let Some(path) = lookup(ENV_USERS_FILE).filter(|v| !v.is_empty()) {
            config.users_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup(ENV_LOG_DIR).filter(|v| !v.is_empty()) {
            config.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(capacity) = parse_var::<usize>(&lookup, ENV_HISTORY_CAPACITY) {
            config.history_capacity = capacity;
        }
        if let Some(admin) = lookup(ENV_ADMIN_LOGIN).filter(|v| !v.trim().is_empty()) {
            config.admin_login = admin.trim().to_string();
        }

        config
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_registration(mut self, allow: bool) -> Self {
        self.allow_registration = allow;
        self
    }

    pub fn with_users_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.users_path = path.into();
        self
    }

    pub fn with_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value '{}' for {}", raw, key);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(|_| None);
        assert_eq!(config, ServerConfig::default());
        assert!(!config.allow_registration);
        assert_eq!(config.port, 4242);
        assert_eq!(config.history_capacity, 1000);
        assert_eq!(config.admin_login, "admin");
    }

    #[test]
    fn test_registration_toggle() {
        let on = ServerConfig::from_lookup(lookup_from(&[(ENV_ALLOW_AUTO_REGISTER, "1")]));
        assert!(on.allow_registration);
        let off = ServerConfig::from_lookup(lookup_from(&[(ENV_ALLOW_AUTO_REGISTER, "0")]));
        assert!(!off.allow_registration);
        let junk = ServerConfig::from_lookup(lookup_from(&[(ENV_ALLOW_AUTO_REGISTER, "yes")]));
        assert!(!junk.allow_registration);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            (ENV_USERS_FILE, "/tmp/u.json"),
            (ENV_LOG_DIR, "/tmp/logs"),
            (ENV_HISTORY_CAPACITY, "50"),
            (ENV_ADMIN_LOGIN, " root "),
        ]));
        assert_eq!(config.users_path, PathBuf::from("/tmp/u.json"));
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/logs")));
        assert_eq!(config.history_capacity, 50);
        assert_eq!(config.admin_login, "root");
    }
}
