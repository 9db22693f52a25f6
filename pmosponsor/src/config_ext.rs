//! Extension pour lire la configuration PMOSponsor depuis pmoconfig
//!
//! Ce module fournit le trait `SponsorConfigExt` qui ajoute à
//! `pmoconfig::Config` les getters de la section `sponsorblock`, et
//! `SponsorConfig`, la structure explicite transmise aux composants.
//!
//! # Exemple
//!
//! ```no_run
//! use pmoconfig::Config;
//! use pmosponsor::SponsorConfigExt;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::load_config("")?;
//! let settings = config.sponsor_config()?;
//! println!("Monitoring {}", settings.device_name);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use pmoconfig::Config;
use serde_yaml::Value;
use tracing::warn;

use crate::cache::DEFAULT_CACHE_TTL_HOURS;
use crate::chromecast::DEFAULT_OPERATION_TIMEOUT;
use crate::chromecast::discovery::DEFAULT_DISCOVERY_TIMEOUT;
use crate::resolver::{DEFAULT_RESOLVER_COMMAND, DEFAULT_RESOLVER_TIMEOUT};
use crate::source::{DEFAULT_API_URL, DEFAULT_HTTP_TIMEOUT};

const SECTION: &str = "sponsorblock";

pub const DEFAULT_DEVICE_NAME: &str = "Living Room TV";
pub const DEFAULT_APP_NAME: &str = "YouTube";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_IDLE_POLL_INTERVAL_SECS: u64 = 3;
pub const DEFAULT_CACHE_FILE: &str = "sponsorblock_cache.json";

/// Settings of one monitoring session, resolved from the configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct SponsorConfig {
    /// Friendly name of the Chromecast to monitor.
    pub device_name: String,
    /// Display name of the application whose playback is monitored.
    pub app_name: String,
    pub cache_ttl: Duration,
    pub poll_interval: Duration,
    pub idle_poll_interval: Duration,
    pub cache_file: PathBuf,
    pub api_url: String,
    pub http_timeout: Duration,
    pub discovery_timeout: Duration,
    /// Deadline of one Cast operation (status read or seek).
    pub cast_timeout: Duration,
    pub resolver_command: String,
    pub resolver_timeout: Duration,
}

impl Default for SponsorConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_HOURS * 3600),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            idle_poll_interval: Duration::from_secs(DEFAULT_IDLE_POLL_INTERVAL_SECS),
            cache_file: PathBuf::from(DEFAULT_CACHE_FILE),
            api_url: DEFAULT_API_URL.to_string(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            cast_timeout: DEFAULT_OPERATION_TIMEOUT,
            resolver_command: DEFAULT_RESOLVER_COMMAND.to_string(),
            resolver_timeout: DEFAULT_RESOLVER_TIMEOUT,
        }
    }
}

impl SponsorConfig {
    /// TTL as a chrono duration, as used by the segment cache.
    pub fn cache_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.cache_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(DEFAULT_CACHE_TTL_HOURS as i64))
    }
}

/// Trait d'extension pour la section `sponsorblock` de pmoconfig
pub trait SponsorConfigExt {
    fn get_sponsor_device_name(&self) -> Result<String>;
    fn set_sponsor_device_name(&self, name: &str) -> Result<()>;

    fn get_sponsor_app_name(&self) -> Result<String>;

    /// Durée de validité du cache de segments, en heures
    fn get_sponsor_cache_ttl_hours(&self) -> Result<u64>;

    /// Intervalle de polling pendant la lecture, en secondes
    fn get_sponsor_poll_interval_secs(&self) -> Result<u64>;

    /// Intervalle de polling quand rien n'est suivi, en secondes
    fn get_sponsor_idle_poll_interval_secs(&self) -> Result<u64>;

    /// Chemin du fichier de cache, résolu par rapport au répertoire de configuration
    fn get_sponsor_cache_file(&self) -> Result<PathBuf>;

    fn get_sponsor_api_url(&self) -> Result<String>;
    fn get_sponsor_http_timeout_secs(&self) -> Result<u64>;
    fn get_sponsor_discovery_timeout_secs(&self) -> Result<u64>;
    fn get_sponsor_cast_timeout_secs(&self) -> Result<u64>;
    fn get_sponsor_resolver_command(&self) -> Result<String>;
    fn get_sponsor_resolver_timeout_secs(&self) -> Result<u64>;

    /// Construit la configuration complète du moniteur
    fn sponsor_config(&self) -> Result<SponsorConfig>;
}

fn get_string(config: &Config, key: &str, default: &str) -> String {
    match config.get_value(&[SECTION, key]) {
        Ok(Value::String(s)) if !s.trim().is_empty() => s,
        Ok(Value::Null) | Err(_) => default.to_string(),
        Ok(other) => {
            warn!(key, value = ?other, "Invalid {}.{}, using default {}", SECTION, key, default);
            default.to_string()
        }
    }
}

/// Reads a strictly positive integer, accepting numbers and numeric strings.
fn get_positive_u64(config: &Config, key: &str, default: u64) -> u64 {
    let parsed = match config.get_value(&[SECTION, key]) {
        Ok(Value::Number(n)) => n.as_u64(),
        Ok(Value::String(s)) => s.trim().parse::<u64>().ok(),
        Ok(Value::Null) | Err(_) => return default,
        Ok(_) => None,
    };

    match parsed {
        Some(v) if v > 0 => v,
        _ => {
            warn!(key, "Invalid {}.{}, using default {}", SECTION, key, default);
            default
        }
    }
}

/// TTL in hours, falling back to the default when it does not fit in seconds.
fn ttl_from_hours(hours: u64) -> Duration {
    match hours.checked_mul(3600) {
        Some(secs) => Duration::from_secs(secs),
        None => {
            warn!(hours, "cache_ttl_hours too large, using default {}", DEFAULT_CACHE_TTL_HOURS);
            Duration::from_secs(DEFAULT_CACHE_TTL_HOURS * 3600)
        }
    }
}

impl SponsorConfigExt for Config {
    fn get_sponsor_device_name(&self) -> Result<String> {
        Ok(get_string(self, "device_name", DEFAULT_DEVICE_NAME))
    }

    fn set_sponsor_device_name(&self, name: &str) -> Result<()> {
        self.set_value(&[SECTION, "device_name"], Value::String(name.to_string()))
    }

    fn get_sponsor_app_name(&self) -> Result<String> {
        Ok(get_string(self, "app_name", DEFAULT_APP_NAME))
    }

    fn get_sponsor_cache_ttl_hours(&self) -> Result<u64> {
        Ok(get_positive_u64(self, "cache_ttl_hours", DEFAULT_CACHE_TTL_HOURS))
    }

    fn get_sponsor_poll_interval_secs(&self) -> Result<u64> {
        Ok(get_positive_u64(self, "poll_interval_secs", DEFAULT_POLL_INTERVAL_SECS))
    }

    fn get_sponsor_idle_poll_interval_secs(&self) -> Result<u64> {
        Ok(get_positive_u64(
            self,
            "idle_poll_interval_secs",
            DEFAULT_IDLE_POLL_INTERVAL_SECS,
        ))
    }

    fn get_sponsor_cache_file(&self) -> Result<PathBuf> {
        Ok(self.resolve_path(&get_string(self, "cache_file", DEFAULT_CACHE_FILE)))
    }

    fn get_sponsor_api_url(&self) -> Result<String> {
        Ok(get_string(self, "api_url", DEFAULT_API_URL))
    }

    fn get_sponsor_http_timeout_secs(&self) -> Result<u64> {
        Ok(get_positive_u64(
            self,
            "http_timeout_secs",
            DEFAULT_HTTP_TIMEOUT.as_secs(),
        ))
    }

    fn get_sponsor_discovery_timeout_secs(&self) -> Result<u64> {
        Ok(get_positive_u64(
            self,
            "discovery_timeout_secs",
            DEFAULT_DISCOVERY_TIMEOUT.as_secs(),
        ))
    }

    fn get_sponsor_cast_timeout_secs(&self) -> Result<u64> {
        Ok(get_positive_u64(
            self,
            "cast_timeout_secs",
            DEFAULT_OPERATION_TIMEOUT.as_secs(),
        ))
    }

    fn get_sponsor_resolver_command(&self) -> Result<String> {
        Ok(get_string(self, "resolver_command", DEFAULT_RESOLVER_COMMAND))
    }

    fn get_sponsor_resolver_timeout_secs(&self) -> Result<u64> {
        Ok(get_positive_u64(
            self,
            "resolver_timeout_secs",
            DEFAULT_RESOLVER_TIMEOUT.as_secs(),
        ))
    }

    fn sponsor_config(&self) -> Result<SponsorConfig> {
        Ok(SponsorConfig {
            device_name: self.get_sponsor_device_name()?,
            app_name: self.get_sponsor_app_name()?,
            cache_ttl: ttl_from_hours(self.get_sponsor_cache_ttl_hours()?),
            poll_interval: Duration::from_secs(self.get_sponsor_poll_interval_secs()?),
            idle_poll_interval: Duration::from_secs(self.get_sponsor_idle_poll_interval_secs()?),
            cache_file: self.get_sponsor_cache_file()?,
            api_url: self.get_sponsor_api_url()?,
            http_timeout: Duration::from_secs(self.get_sponsor_http_timeout_secs()?),
            discovery_timeout: Duration::from_secs(self.get_sponsor_discovery_timeout_secs()?),
            cast_timeout: Duration::from_secs(self.get_sponsor_cast_timeout_secs()?),
            resolver_command: self.get_sponsor_resolver_command()?,
            resolver_timeout: Duration::from_secs(self.get_sponsor_resolver_timeout_secs()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_match_struct_defaults() {
        let config = Config::from_yaml_str("", "/etc/pmosponsor").unwrap();
        let settings = config.sponsor_config().unwrap();

        let expected = SponsorConfig {
            cache_file: PathBuf::from("/etc/pmosponsor/sponsorblock_cache.json"),
            ..SponsorConfig::default()
        };
        assert_eq!(settings, expected);
    }

    #[test]
    fn test_recognized_options() {
        let config = Config::from_yaml_str(
            "sponsorblock:\n  device_name: Bedroom\n  cache_ttl_hours: 6\n  poll_interval_secs: \"2\"\n  cache_file: /var/cache/segments.json\n",
            "/etc/pmosponsor",
        )
        .unwrap();
        let settings = config.sponsor_config().unwrap();

        assert_eq!(settings.device_name, "Bedroom");
        assert_eq!(settings.cache_ttl, Duration::from_secs(6 * 3600));
        assert_eq!(settings.poll_interval, Duration::from_secs(2));
        assert_eq!(settings.cache_file, PathBuf::from("/var/cache/segments.json"));
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = Config::from_yaml_str(
            "sponsorblock:\n  poll_interval_secs: 0\n  cache_ttl_hours: soon\n  app_name: [1, 2]\n",
            "/etc/pmosponsor",
        )
        .unwrap();

        assert_eq!(
            config.get_sponsor_poll_interval_secs().unwrap(),
            DEFAULT_POLL_INTERVAL_SECS
        );
        assert_eq!(
            config.get_sponsor_cache_ttl_hours().unwrap(),
            DEFAULT_CACHE_TTL_HOURS
        );
        assert_eq!(config.get_sponsor_app_name().unwrap(), DEFAULT_APP_NAME);
    }

    #[test]
    fn test_env_override_reaches_settings() {
        let config = Config::from_yaml_str("", "/etc/pmosponsor").unwrap();
        config
            .apply_overrides(vec![(
                "PMOSPONSOR_CONFIG__SPONSORBLOCK__DEVICE_NAME".to_string(),
                "Kitchen".to_string(),
            )])
            .unwrap();

        assert_eq!(config.get_sponsor_device_name().unwrap(), "Kitchen");
    }

    #[test]
    fn test_set_device_name() {
        let config = Config::from_yaml_str("", "/etc/pmosponsor").unwrap();
        config.set_sponsor_device_name("Office").unwrap();
        assert_eq!(config.get_sponsor_device_name().unwrap(), "Office");
    }

    #[test]
    fn test_huge_ttl_falls_back_to_default() {
        let config = Config::from_yaml_str(
            "sponsorblock:\n  cache_ttl_hours: 18446744073709551615\n  cast_timeout_secs: 2\n",
            "/etc/pmosponsor",
        )
        .unwrap();
        let settings = config.sponsor_config().unwrap();

        assert_eq!(settings.cache_ttl, Duration::from_secs(2 * 3600));
        assert_eq!(settings.cast_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_cache_ttl_chrono() {
        let settings = SponsorConfig::default();
        assert_eq!(settings.cache_ttl_chrono(), chrono::Duration::hours(2));
    }
}
