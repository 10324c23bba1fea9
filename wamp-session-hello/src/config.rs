use std::{
    str::FromStr,
    time::Duration,
};

use wamp_session::core::endpoint::Endpoint;

const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Configuration for the hello client, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct HelloConfig {
    /// Router to connect to (`WAMP_HOST`, `WAMP_PORT`).
    pub endpoint: Endpoint,
    /// Realm to join (`WAMP_REALM`).
    pub realm: String,
    /// Time between driver ticks (`WAMP_INTERVAL_MS`). Never zero.
    pub interval: Duration,
}

impl HelloConfig {
    /// Loads configuration from environment variables, falling back to defaults for missing or
    /// unparsable values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("WAMP_HOST").unwrap_or_else(|| "127.0.0.1".to_owned());
        let port = parse_var(&lookup, "WAMP_PORT").unwrap_or(8000);
        let realm = lookup("WAMP_REALM").unwrap_or_else(|| "realm1".to_owned());
        // A zero interval would make the driver spin.
        let interval_ms = parse_var(&lookup, "WAMP_INTERVAL_MS")
            .filter(|interval_ms| *interval_ms > 0)
            .unwrap_or(DEFAULT_INTERVAL_MS);
        Self {
            endpoint: Endpoint::new(host, port),
            realm,
            interval: Duration::from_millis(interval_ms),
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key).and_then(|value| value.parse().ok())
}
