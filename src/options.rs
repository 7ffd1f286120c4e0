use std::time::Duration;

/// Default cap on idle connections kept per target host.
pub const DEFAULT_MAX_IDLE_CONNS_PER_HOST: usize = 1000;
/// Default lifetime of an idle pooled connection.
pub const DEFAULT_IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(60);

const ENV_MAX_IDLE_CONNS_PER_HOST: &str = "HTTPX_MAX_IDLE_CONNS_PER_HOST";
const ENV_IDLE_CONN_TIMEOUT_MS: &str = "HTTPX_IDLE_CONN_TIMEOUT_MS";

/// Connection pool sizing used to build a client's transport.
///
/// Fixed once the [`Client`](crate::Client) is built. A zero
/// `max_idle_conns_per_host` disables idle pooling and a zero
/// `idle_conn_timeout` keeps idle connections without expiry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolConfig {
    /// Maximum idle connections kept per host.
    pub max_idle_conns_per_host: usize,
    /// How long an idle connection stays in the pool.
    pub idle_conn_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_conns_per_host: DEFAULT_MAX_IDLE_CONNS_PER_HOST,
            idle_conn_timeout: DEFAULT_IDLE_CONN_TIMEOUT,
        }
    }
}

impl PoolConfig {
    /// Seeds defaults and applies `options` in order; later options win.
    pub fn from_options<I>(options: I) -> Self
    where
        I: IntoIterator<Item = ClientOption>,
    {
        let mut config = Self::default();
        for option in options {
            option.apply(&mut config);
        }
        config
    }

    pub(crate) fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_conn_timeout.is_zero() {
            None
        } else {
            Some(self.idle_conn_timeout)
        }
    }
}

/// A single mutation of [`PoolConfig`] passed to client construction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClientOption {
    MaxIdleConnsPerHost(usize),
    IdleConnTimeout(Duration),
}

impl ClientOption {
    fn apply(self, config: &mut PoolConfig) {
        match self {
            Self::MaxIdleConnsPerHost(n) => config.max_idle_conns_per_host = n,
            Self::IdleConnTimeout(timeout) => config.idle_conn_timeout = timeout,
        }
    }
}

/// Overrides the per-host idle connection cap.
pub fn with_max_idle_conns_per_host(n: usize) -> ClientOption {
    ClientOption::MaxIdleConnsPerHost(n)
}

/// Overrides the idle connection timeout.
pub fn with_idle_conn_timeout(timeout: Duration) -> ClientOption {
    ClientOption::IdleConnTimeout(timeout)
}

/// Builds client options from environment-style lookups.
///
/// Unset keys are skipped so the defaults stay in place.
pub(crate) fn options_from_lookup<F>(lookup: F) -> std::result::Result<Vec<ClientOption>, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut options = Vec::with_capacity(2);

    if let Some(raw) = lookup(ENV_MAX_IDLE_CONNS_PER_HOST) {
        let n = raw
            .trim()
            .parse::<usize>()
            .map_err(|err| format!("invalid {ENV_MAX_IDLE_CONNS_PER_HOST} '{raw}': {err}"))?;
        options.push(with_max_idle_conns_per_host(n));
    }

    if let Some(raw) = lookup(ENV_IDLE_CONN_TIMEOUT_MS) {
        let ms = raw
            .trim()
            .parse::<u64>()
            .map_err(|err| format!("invalid {ENV_IDLE_CONN_TIMEOUT_MS} '{raw}': {err}"))?;
        options.push(with_idle_conn_timeout(Duration::from_millis(ms)));
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{
        options_from_lookup, with_idle_conn_timeout, with_max_idle_conns_per_host, PoolConfig,
    };

    #[test]
    fn defaults_match_documented_values() {
        let config = PoolConfig::default();
        assert_eq!(config.max_idle_conns_per_host, 1000);
        assert_eq!(config.idle_conn_timeout, Duration::from_secs(60));
    }

    #[test]
    fn options_on_different_fields_commute() {
        let a = PoolConfig::from_options([
            with_max_idle_conns_per_host(5),
            with_idle_conn_timeout(Duration::from_secs(10)),
        ]);
        let b = PoolConfig::from_options([
            with_idle_conn_timeout(Duration::from_secs(10)),
            with_max_idle_conns_per_host(5),
        ]);
        assert_eq!(a, b);
        assert_eq!(a.max_idle_conns_per_host, 5);
        assert_eq!(a.idle_conn_timeout, Duration::from_secs(10));
    }

    #[test]
    fn later_option_overrides_earlier_for_same_field() {
        let config = PoolConfig::from_options([
            with_max_idle_conns_per_host(5),
            with_max_idle_conns_per_host(7),
        ]);
        assert_eq!(config.max_idle_conns_per_host, 7);
        assert_eq!(config.idle_conn_timeout, Duration::from_secs(60));
    }

    #[test]
    fn zero_idle_timeout_means_no_expiry() {
        let config = PoolConfig::from_options([with_idle_conn_timeout(Duration::ZERO)]);
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(
            PoolConfig::default().idle_timeout(),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn env_lookup_parses_known_keys() {
        let env: HashMap<&str, &str> = [
            ("HTTPX_MAX_IDLE_CONNS_PER_HOST", "16"),
            ("HTTPX_IDLE_CONN_TIMEOUT_MS", " 2500 "),
        ]
        .into_iter()
        .collect();
        let options =
            options_from_lookup(|key| env.get(key).map(|value| (*value).to_owned())).unwrap();
        let config = PoolConfig::from_options(options);
        assert_eq!(config.max_idle_conns_per_host, 16);
        assert_eq!(config.idle_conn_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn env_lookup_rejects_garbage() {
        let err = options_from_lookup(|key| {
            (key == "HTTPX_MAX_IDLE_CONNS_PER_HOST").then(|| "lots".to_owned())
        })
        .unwrap_err();
        assert!(err.contains("HTTPX_MAX_IDLE_CONNS_PER_HOST"));
    }

    #[test]
    fn env_lookup_keeps_defaults_when_unset() {
        let options = options_from_lookup(|_| None).unwrap();
        assert!(options.is_empty());
    }
}
