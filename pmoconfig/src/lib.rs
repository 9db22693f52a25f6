//! # PMOSponsor Configuration Module
//!
//! Gestion de la configuration YAML de PMOSponsor :
//! - configuration par défaut embarquée dans le binaire
//! - fusion avec le fichier `config.yaml` du répertoire de configuration
//! - surcharges par variables d'environnement (`PMOSPONSOR_CONFIG__SECTION__KEY=value`)
//! - getters / setters génériques par chemin de clés
//!
//! Contrairement à une configuration globale, `Config` est chargée une fois
//! par le programme principal puis transmise explicitement aux composants.
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::Config;
//!
//! let config = Config::load_config("")?;
//! let level = config.get_log_min_level()?;
//! println!("log level: {}", level);
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use serde_yaml::{Mapping, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};
use tracing::{info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmosponsor.yaml");

const ENV_CONFIG_DIR: &str = "PMOSPONSOR_CONFIG";
const ENV_PREFIX: &str = "PMOSPONSOR_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmosponsor";
const CONFIG_FILE_NAME: &str = "config.yaml";

const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";

/// Configuration manager for PMOSponsor
///
/// Holds the merged YAML tree (defaults + `config.yaml` + environment) and
/// the directory it was loaded from, so that relative paths found in the
/// configuration (cache file, ...) can be resolved against it.
#[derive(Debug)]
pub struct Config {
    config_dir: PathBuf,
    /// `None` for in-memory configurations, which are never written back.
    path: Option<PathBuf>,
    data: Mutex<Value>,
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> PathBuf {
        // 1. Try provided directory
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return PathBuf::from(env_path);
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return PathBuf::from(CONFIG_DIR_NAME);
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config;
            }
        }

        PathBuf::from(CONFIG_DIR_NAME)
    }

    /// Crée le répertoire s'il n'existe pas et vérifie qu'il s'agit bien d'un répertoire
    fn prepare_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!(
                "Config path {} is not a directory",
                path.display()
            ));
        }

        Ok(())
    }

    /// Loads the configuration from the specified directory
    ///
    /// 1. Determines the configuration directory (argument, `PMOSPONSOR_CONFIG`,
    ///    `./.pmosponsor`, `~/.pmosponsor`)
    /// 2. Loads the embedded default configuration
    /// 3. Merges the external `config.yaml` if present
    /// 4. Applies environment variable overrides
    /// 5. Writes the merged configuration back so users get an editable file
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        Self::prepare_config_dir(&config_dir)?;
        info!(config_dir = %config_dir.display(), "Using config directory");

        let path = config_dir.join(CONFIG_FILE_NAME);

        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        match fs::read_to_string(&path) {
            Ok(data) => {
                info!(config_file = %path.display(), "Loaded config file");
                // Un fichier vide est une configuration vide, pas une erreur
                if !data.trim().is_empty() {
                    let external: Value = serde_yaml::from_str(&data)?;
                    merge_yaml(&mut value, &lower_keys_value(external));
                }
            }
            Err(_) => {
                info!(config_file = %path.display(), "Config file not found, using default embedded config");
            }
        }

        let mut value = lower_keys_value(value);
        apply_env_overrides(&mut value, env::vars());

        let config = Config {
            config_dir,
            path: Some(path),
            data: Mutex::new(value),
        };

        config.save()?;
        Ok(config)
    }

    /// Builds a configuration from a YAML document merged over the embedded
    /// defaults, without touching the filesystem or the environment.
    ///
    /// Relative paths are resolved against `config_dir`.
    pub fn from_yaml_str(yaml: &str, config_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        if !yaml.trim().is_empty() {
            let external: Value = serde_yaml::from_str(yaml)?;
            merge_yaml(&mut value, &lower_keys_value(external));
        }

        Ok(Config {
            config_dir: config_dir.into(),
            path: None,
            data: Mutex::new(lower_keys_value(value)),
        })
    }

    /// Applies `PMOSPONSOR_CONFIG__A__B=value` style overrides taken from
    /// an arbitrary list of variables.
    pub fn apply_overrides<I>(&self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut data = self.lock()?;
        apply_env_overrides(&mut data, vars);
        Ok(())
    }

    /// Directory the configuration was loaded from.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Resolves a path relative to the configuration directory.
    ///
    /// Absolute paths are returned unchanged.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.config_dir.join(candidate)
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Value>> {
        self.data
            .lock()
            .map_err(|e| anyhow!("Configuration lock poisoned: {}", e))
    }

    /// Saves the current configuration to the `config.yaml` file
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let yaml = {
            let data = self.lock()?;
            serde_yaml::to_string(&*data)?
        };
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// `path` est une liste de clés (ex: `&["sponsorblock", "device_name"]`).
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock()?;
            set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock()?;
        get_value_internal(&data, path)
    }

    /// Récupère le niveau de log minimum depuis la configuration
    pub fn get_log_min_level(&self) -> Result<String> {
        match self.get_value(&["host", "logger", "min_level"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Ok(s),
            Ok(other) => {
                warn!(value = ?other, "Invalid log level, using default {}", DEFAULT_LOG_MIN_LEVEL);
                Ok(DEFAULT_LOG_MIN_LEVEL.to_string())
            }
            Err(_) => Ok(DEFAULT_LOG_MIN_LEVEL.to_string()),
        }
    }
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    if path.is_empty() {
        *data = value;
        return Ok(());
    }
    if let Value::Mapping(map) = data {
        let key_value = Value::String(path[0].to_lowercase());
        if path.len() == 1 {
            map.insert(key_value, value);
        } else {
            let entry = map
                .entry(key_value)
                .or_insert(Value::Mapping(Mapping::new()));
            set_value_internal(entry, &path[1..], value)?;
        }
        Ok(())
    } else {
        Err(anyhow!("Current node is not a map"))
    }
}

fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
    let mut current = data;
    for (i, key) in path.iter().enumerate() {
        if let Value::Mapping(map) = current {
            match map.get(Value::String(key.to_lowercase())) {
                Some(next) => current = next,
                None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
            }
        } else {
            return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
        }
    }
    Ok(current.clone())
}

fn apply_env_overrides<I>(config: &mut Value, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
            let key_path = stripped.split("__").collect::<Vec<_>>();
            let yaml_value = convert_env_value(&value);
            if let Err(e) = set_value_internal(config, &key_path, yaml_value) {
                warn!(variable = %key, "Ignoring environment override: {}", e);
            }
        }
    }
}

fn convert_env_value(value: &str) -> Value {
    serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut new_map = Mapping::new();
            for (k, v) in map {
                let key = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                new_map.insert(key, lower_keys_value(v));
            }
            Value::Mapping(new_map)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

/// Merges external YAML configuration into default configuration
///
/// Mappings are merged key by key; scalars and sequences from `external`
/// replace the default ones.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_embedded() {
        let config = Config::from_yaml_str("", "/tmp/pmosponsor").unwrap();
        assert_eq!(
            config.get_value(&["sponsorblock", "app_name"]).unwrap(),
            Value::String("YouTube".to_string())
        );
        assert_eq!(config.get_log_min_level().unwrap(), "INFO");
    }

    #[test]
    fn test_external_yaml_is_merged_case_insensitively() {
        let config = Config::from_yaml_str(
            "SponsorBlock:\n  Device_Name: Bedroom\n",
            "/tmp/pmosponsor",
        )
        .unwrap();

        assert_eq!(
            config.get_value(&["sponsorblock", "device_name"]).unwrap(),
            Value::String("Bedroom".to_string())
        );
        // les autres clés de la section restent celles par défaut
        assert!(config.get_value(&["sponsorblock", "cache_ttl_hours"]).is_ok());
    }

    #[test]
    fn test_env_overrides_are_typed() {
        let config = Config::from_yaml_str("", "/tmp/pmosponsor").unwrap();
        config
            .apply_overrides(vec![
                (
                    "PMOSPONSOR_CONFIG__SPONSORBLOCK__POLL_INTERVAL_SECS".to_string(),
                    "2".to_string(),
                ),
                ("UNRELATED".to_string(), "x".to_string()),
            ])
            .unwrap();

        assert_eq!(
            config
                .get_value(&["sponsorblock", "poll_interval_secs"])
                .unwrap(),
            Value::Number(2.into())
        );
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let config = Config::from_yaml_str("", "/tmp/pmosponsor").unwrap();
        assert!(config.get_value(&["nope", "missing"]).is_err());
    }

    #[test]
    fn test_resolve_path() {
        let config = Config::from_yaml_str("", "/tmp/pmosponsor").unwrap();
        assert_eq!(
            config.resolve_path("cache.json"),
            PathBuf::from("/tmp/pmosponsor/cache.json")
        );
        assert_eq!(
            config.resolve_path("/var/cache.json"),
            PathBuf::from("/var/cache.json")
        );
    }

    #[test]
    fn test_load_config_writes_merged_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "sponsorblock:\n  device_name: Kitchen\n",
        )
        .unwrap();

        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(
            config.get_value(&["sponsorblock", "device_name"]).unwrap(),
            Value::String("Kitchen".to_string())
        );

        let written = fs::read_to_string(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert!(written.contains("app_name"));
    }
}
