// --------------------------------------------------
// Process configuration, read once at start-up.
//
// Values come from the environment (optionally seeded
// from a .env file by main). Lookups go through a plain
// function so tests never touch the real environment.
// --------------------------------------------------

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be set when STORE_BACKEND={backend}")]
    Missing { name: &'static str, backend: &'static str },

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Supabase,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub frontend_url: String,
    pub rate_limit_window: Duration,
    /// 0 disables the limiter.
    pub rate_limit_max_requests: u32,
    pub production: bool,
    pub backend: StoreBackend,
    pub supabase: Option<SupabaseConfig>,
    pub keep_alive_url: Option<String>,
    pub keep_alive_interval: Duration,
}

// Local preset (in-memory backend, no credentials); `from_lookup` defaults to the hosted backend.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            frontend_url: "http://localhost:5173".to_string(),
            rate_limit_window: Duration::from_millis(15 * 60 * 1000),
            rate_limit_max_requests: 100,
            production: false,
            backend: StoreBackend::Memory,
            supabase: None,
            keep_alive_url: None,
            keep_alive_interval: Duration::from_secs(5 * 60),
        }
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let environment = lookup("APP_ENV")
            .or_else(|| lookup("NODE_ENV"))
            .unwrap_or_else(|| "development".to_string());
        let production = environment.eq_ignore_ascii_case("production");

        let backend = match lookup("STORE_BACKEND").as_deref().map(str::to_ascii_lowercase) {
            None => StoreBackend::Supabase,
            Some(b) if b == "supabase" => StoreBackend::Supabase,
            Some(b) if b == "memory" => StoreBackend::Memory,
            Some(value) => return Err(ConfigError::Invalid { name: "STORE_BACKEND", value }),
        };

        let supabase = match backend {
            StoreBackend::Memory => None,
            StoreBackend::Supabase => {
                let url = lookup("SUPABASE_URL")
                    .ok_or(ConfigError::Missing { name: "SUPABASE_URL", backend: "supabase" })?;
                if url::Url::parse(&url).is_err() {
                    return Err(ConfigError::Invalid { name: "SUPABASE_URL", value: url });
                }
                let service_key = lookup("SUPABASE_SERVICE_KEY")
                    .ok_or(ConfigError::Missing { name: "SUPABASE_SERVICE_KEY", backend: "supabase" })?;
                Some(SupabaseConfig { url, service_key })
            }
        };

        let window_ms = parse("RATE_LIMIT_WINDOW_MS", lookup("RATE_LIMIT_WINDOW_MS"), 15 * 60 * 1000u64)?;
        if window_ms == 0 {
            return Err(ConfigError::Invalid { name: "RATE_LIMIT_WINDOW_MS", value: "0".to_string() });
        }

        let keep_alive_url = lookup("KEEP_ALIVE_URL").or_else(|| {
            lookup("RENDER_EXTERNAL_HOSTNAME").map(|host| format!("https://{host}"))
        });

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse("PORT", lookup("PORT"), defaults.port)?,
            frontend_url: lookup("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            rate_limit_window: Duration::from_millis(window_ms),
            rate_limit_max_requests: parse(
                "RATE_LIMIT_MAX_REQUESTS",
                lookup("RATE_LIMIT_MAX_REQUESTS"),
                defaults.rate_limit_max_requests,
            )?,
            production,
            backend,
            supabase,
            keep_alive_url,
            keep_alive_interval: Duration::from_secs(parse(
                "KEEP_ALIVE_INTERVAL_SECS",
                lookup("KEEP_ALIVE_INTERVAL_SECS"),
                defaults.keep_alive_interval.as_secs(),
            )?),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn supabase_backend_requires_credentials() {
        let err = config(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name: "SUPABASE_URL", .. }));

        let err = config(&[("SUPABASE_URL", "https://abc.supabase.co")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name: "SUPABASE_SERVICE_KEY", .. }));
    }

    #[test]
    fn reads_defaults_and_overrides() {
        let cfg = config(&[
            ("SUPABASE_URL", "https://abc.supabase.co"),
            ("SUPABASE_SERVICE_KEY", "service"),
            ("PORT", "8080"),
            ("NODE_ENV", "production"),
            ("RENDER_EXTERNAL_HOSTNAME", "taskflow.onrender.com"),
        ])
        .unwrap();

        assert_eq!(cfg.port, 8080);
        assert!(cfg.production);
        assert_eq!(cfg.backend, StoreBackend::Supabase);
        assert_eq!(cfg.rate_limit_max_requests, 100);
        assert_eq!(cfg.rate_limit_window, Duration::from_secs(900));
        assert_eq!(cfg.keep_alive_url.as_deref(), Some("https://taskflow.onrender.com"));
        assert_eq!(cfg.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn default_preset_runs_locally() {
        let cfg = Config::default();
        assert_eq!(cfg.backend, StoreBackend::Memory);
        assert!(cfg.supabase.is_none());
        assert!(!cfg.production);
    }

    #[test]
    fn memory_backend_needs_no_credentials() {
        let cfg = config(&[("STORE_BACKEND", "memory"), ("APP_ENV", "development")]).unwrap();
        assert_eq!(cfg.backend, StoreBackend::Memory);
        assert!(cfg.supabase.is_none());
        assert!(!cfg.production);
    }

    #[test]
    fn rejects_malformed_numbers() {
        let err = config(&[("STORE_BACKEND", "memory"), ("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));

        let err = config(&[("STORE_BACKEND", "memory"), ("RATE_LIMIT_WINDOW_MS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "RATE_LIMIT_WINDOW_MS", .. }));
    }
}
