use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use crate::options::{FetchPolicy, OperationOptions};

/// Defaults applied to operations created through an
/// [`OperationManager`](crate::OperationManager).
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    pub fetch_policy: FetchPolicy,
    pub eagerly_fetch: bool,
    pub fetch_on_subscribe: bool,
    pub poll_interval: Option<Duration>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            fetch_policy: FetchPolicy::default(),
            eagerly_fetch: false,
            fetch_on_subscribe: true,
            poll_interval: None,
        }
    }
}

impl ManagerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Unset keys keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let fetch_policy = match lookup("OBSERVABLE_QUERY_FETCH_POLICY") {
            Some(raw) => raw
                .trim()
                .parse::<FetchPolicy>()
                .context("OBSERVABLE_QUERY_FETCH_POLICY must be a known fetch policy")?,
            None => defaults.fetch_policy,
        };

        let eagerly_fetch = match lookup("OBSERVABLE_QUERY_EAGERLY_FETCH") {
            Some(raw) => parse_bool(&raw)
                .context("OBSERVABLE_QUERY_EAGERLY_FETCH must be true or false")?,
            None => defaults.eagerly_fetch,
        };

        let fetch_on_subscribe = match lookup("OBSERVABLE_QUERY_FETCH_ON_SUBSCRIBE") {
            Some(raw) => parse_bool(&raw)
                .context("OBSERVABLE_QUERY_FETCH_ON_SUBSCRIBE must be true or false")?,
            None => defaults.fetch_on_subscribe,
        };

        let poll_interval = match lookup("OBSERVABLE_QUERY_POLL_INTERVAL_MS") {
            Some(raw) => {
                let millis = raw
                    .trim()
                    .parse::<u64>()
                    .context("OBSERVABLE_QUERY_POLL_INTERVAL_MS must be a valid number")?;
                // 0 disables polling
                (millis > 0).then(|| Duration::from_millis(millis))
            }
            None => defaults.poll_interval,
        };

        Ok(Self {
            fetch_policy,
            eagerly_fetch,
            fetch_on_subscribe,
            poll_interval,
        })
    }

    /// Options for `document` with these defaults applied.
    pub fn options(&self, document: impl Into<String>) -> OperationOptions {
        let mut options = OperationOptions::new(document)
            .with_fetch_policy(self.fetch_policy)
            .with_eager_fetch(self.eagerly_fetch)
            .with_fetch_on_subscribe(self.fetch_on_subscribe);
        options.poll_interval = self.poll_interval;
        options
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("invalid boolean '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ManagerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ManagerConfig::default());
        assert_eq!(config.fetch_policy, FetchPolicy::CacheAndNetwork);
        assert!(config.fetch_on_subscribe);
        assert!(!config.eagerly_fetch);
    }

    #[test]
    fn test_reads_all_keys() {
        let config = ManagerConfig::from_lookup(lookup(&[
            ("OBSERVABLE_QUERY_FETCH_POLICY", "network-only"),
            ("OBSERVABLE_QUERY_EAGERLY_FETCH", "true"),
            ("OBSERVABLE_QUERY_FETCH_ON_SUBSCRIBE", "0"),
            ("OBSERVABLE_QUERY_POLL_INTERVAL_MS", "1500"),
        ]))
        .unwrap();

        assert_eq!(config.fetch_policy, FetchPolicy::NetworkOnly);
        assert!(config.eagerly_fetch);
        assert!(!config.fetch_on_subscribe);
        assert_eq!(config.poll_interval, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_zero_interval_disables_polling() {
        let config =
            ManagerConfig::from_lookup(lookup(&[("OBSERVABLE_QUERY_POLL_INTERVAL_MS", "0")])).unwrap();
        assert_eq!(config.poll_interval, None);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = ManagerConfig::from_lookup(lookup(&[("OBSERVABLE_QUERY_FETCH_POLICY", "sometimes")]))
            .unwrap_err();
        assert!(err.to_string().contains("OBSERVABLE_QUERY_FETCH_POLICY"));

        let err = ManagerConfig::from_lookup(lookup(&[("OBSERVABLE_QUERY_POLL_INTERVAL_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("must be a valid number"));

        assert!(
            ManagerConfig::from_lookup(lookup(&[("OBSERVABLE_QUERY_EAGERLY_FETCH", "maybe")])).is_err()
        );
    }

    #[test]
    fn test_options_carry_defaults() {
        let config = ManagerConfig {
            fetch_policy: FetchPolicy::NoCache,
            eagerly_fetch: true,
            fetch_on_subscribe: false,
            poll_interval: Some(Duration::from_secs(30)),
        };
        let options = config.options("query Q { q }");
        assert_eq!(options.document, "query Q { q }");
        assert_eq!(options.fetch_policy, FetchPolicy::NoCache);
        assert!(options.eagerly_fetch);
        assert!(!options.fetch_on_subscribe);
        assert_eq!(options.poll_interval, Some(Duration::from_secs(30)));
    }
}
