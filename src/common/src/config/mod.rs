use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// How watch notifications are folded into a service's membership.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Apply `set`/`delete` per instance key; `change` payloads are merged in.
    #[default]
    Incremental,
    /// Treat every `change` payload as the complete membership of the service.
    Snapshot,
}

impl std::fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MergePolicy::Incremental => "incremental",
            MergePolicy::Snapshot => "snapshot",
        };
        write!(f, "{s}")
    }
}

/// Configuration for service resolution against the coordination store
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Root segment under which services are registered (`/<prefix>/service/<name>`)
    pub prefix: String,
    /// Strategy used to fold watch events into membership
    pub merge_policy: MergePolicy,
    /// Delay before re-opening a watch stream that ended
    #[serde(with = "humantime_serde")]
    pub rewatch_delay: Duration,
    /// Capacity of each resolver's lifecycle event channel
    pub event_capacity: usize,
    /// How long callers should wait for a resolver to settle
    #[serde(with = "humantime_serde")]
    pub settle_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            prefix: String::from("discover"),
            merge_policy: MergePolicy::Incremental,
            rewatch_delay: Duration::from_secs(1),
            event_capacity: 64,
            settle_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Service prefix cannot be empty")]
    EmptyPrefix,
    #[error("Service prefix must be a single path segment, got: {0}")]
    InvalidPrefix(String),
    #[error("Event capacity must be greater than zero")]
    ZeroEventCapacity,
    #[error("Re-watch delay must be greater than zero")]
    ZeroRewatchDelay,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Configuration {
    /// Service resolution configuration
    pub discovery: DiscoveryConfig,
}

impl Configuration {
    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
    }

    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file("discover.toml"))
            .merge(Env::prefixed("DISCOVER__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        let config = Self::figment()
            .merge(Toml::file(path))
            .merge(Env::prefixed("DISCOVER__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.discovery.validate()
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        if self.prefix.contains('/') {
            return Err(ConfigError::InvalidPrefix(self.prefix.clone()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }
        if self.rewatch_delay.is_zero() {
            return Err(ConfigError::ZeroRewatchDelay);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();

        assert_eq!(config.discovery.prefix, "discover");
        assert_eq!(config.discovery.merge_policy, MergePolicy::Incremental);
        assert_eq!(config.discovery.rewatch_delay, Duration::from_secs(1));
        assert_eq!(config.discovery.event_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configless_operation() {
        Jail::expect_with(|_jail| {
            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.discovery.prefix, "discover");
            assert_eq!(config.discovery.settle_timeout, Duration::from_secs(5));
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "discover.toml",
                r#"
                [discovery]
                prefix = "registry"
                merge_policy = "snapshot"
                rewatch_delay = "250ms"
                "#,
            )?;

            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.discovery.prefix, "registry");
            assert_eq!(config.discovery.merge_policy, MergePolicy::Snapshot);
            assert_eq!(config.discovery.rewatch_delay, Duration::from_millis(250));
            // Untouched keys keep their defaults
            assert_eq!(config.discovery.event_capacity, 64);
            Ok(())
        });
    }

    #[test]
    fn test_env_var_override() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[discovery]\nprefix = \"from-file\"\n")?;
            jail.set_env("DISCOVER__DISCOVERY__PREFIX", "from-env");
            jail.set_env("DISCOVER__DISCOVERY__EVENT_CAPACITY", "8");

            let config =
                Configuration::load_from_path(Path::new("custom.toml")).map_err(|e| *e)?;
            assert_eq!(config.discovery.prefix, "from-env");
            assert_eq!(config.discovery.event_capacity, 8);
            Ok(())
        });
    }

    #[test]
    fn test_validate_rejects_bad_prefix() {
        let mut config = Configuration::default();

        config.discovery.prefix = String::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyPrefix));

        config.discovery.prefix = "a/b".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidPrefix("a/b".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = Configuration::default();
        config.discovery.event_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroEventCapacity));
    }

    #[test]
    fn test_validate_rejects_zero_rewatch_delay() {
        Jail::expect_with(|jail| {
            jail.create_file("discover.toml", "[discovery]\nrewatch_delay = \"0s\"\n")?;

            let config = Configuration::load().map_err(|e| *e)?;
            assert_eq!(config.discovery.rewatch_delay, Duration::ZERO);
            assert_eq!(config.validate(), Err(ConfigError::ZeroRewatchDelay));
            Ok(())
        });
    }

    #[test]
    fn test_merge_policy_display() {
        assert_eq!(MergePolicy::Incremental.to_string(), "incremental");
        assert_eq!(MergePolicy::Snapshot.to_string(), "snapshot");
    }
}
