//! Service configuration, read from the environment. `main` loads `.env`
//! through dotenvy before this runs.

use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Without a database the service keeps classifications in memory.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub nats_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self { port: 8083, database_url: None, max_connections: 10, nats_url: None }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            port: try_load("PORT", defaults.port)?,
            database_url: optional("DATABASE_URL"),
            max_connections: try_load("DATABASE_MAX_CONNECTIONS", defaults.max_connections)?,
            nats_url: optional("NATS_URL"),
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e| {
            warn!("Invalid {key} value: {e}");
            anyhow::anyhow!("invalid {key}: {e}")
        }),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.port, 8083);
        assert_eq!(c.max_connections, 10);
        assert!(c.database_url.is_none());
    }

    #[test]
    fn test_try_load_parses_and_rejects() {
        env::set_var("CLASSIFICATIONS_TEST_PORT", "9001");
        assert_eq!(try_load::<u16>("CLASSIFICATIONS_TEST_PORT", 1).unwrap(), 9001);
        env::set_var("CLASSIFICATIONS_TEST_BAD", "nope");
        assert!(try_load::<u32>("CLASSIFICATIONS_TEST_BAD", 1).is_err());
        assert_eq!(try_load::<u32>("CLASSIFICATIONS_TEST_UNSET", 7).unwrap(), 7);
    }
}
