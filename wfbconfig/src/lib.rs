//! # WFBMusic Configuration Module
//!
//! This module provides configuration management for WFBMusic, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for configuration values
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use wfbconfig::get_config;
//!
//! let config = get_config();
//! let data_dir = config.get_data_dir()?;
//! let level = config.get_log_min_level()?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Les crates consommatrices (`wfbcache`, `wfbplayer`, `wfbplatforms`) ajoutent
//! leurs propres getters via des traits d'extension derrière la feature `wfbconfig`.

use anyhow::{anyhow, Result};
use dirs::{document_dir, home_dir};
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::info;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("wfbmusic.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load WFBMusic configuration"));
}

const ENV_CONFIG_DIR: &str = "WFBMUSIC_CONFIG";
const ENV_PREFIX: &str = "WFBMUSIC_CONFIG__";

const CONFIG_DIR_NAME: &str = ".wfbmusic";
const DEFAULT_DATA_DIR_NAME: &str = "WFMusic";
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;
const DEFAULT_LOG_TO_FILE: bool = true;

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Macro to generate getter/setter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<String> {
            match self.get_value($path) {
                Ok(Value::String(s)) => Ok(s),
                _ => Ok($default.to_string()),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Configuration manager for WFBMusic
///
/// The configuration is a YAML tree. Keys are case-insensitive (stored lower-cased),
/// which is what makes `WFBMUSIC_CONFIG__PLAYER__FADE_OUT_MS=500` address
/// `player.fade_out_ms`.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.data.lock().unwrap().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        CONFIG_DIR_NAME.to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        // Droits d'écriture
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;
        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `WFBMUSIC_CONFIG` environment variable
    /// 3. `.wfbmusic` in the current directory
    /// 4. `.wfbmusic` in the user's home directory
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value = Self::lower_keys_value(serde_yaml::from_str(DEFAULT_CONFIG)?);

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            data
        } else {
            info!(config_file = %path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        // Les clés sont normalisées avant la fusion pour que `Player` surcharge `player`
        let external_value = Self::lower_keys_value(serde_yaml::from_slice(&yaml_data)?);
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = default_value;

        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Répertoire de configuration effectivement utilisé
    pub fn dir(&self) -> &str {
        &self.config_dir
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let data = self.data.lock().unwrap();
        let yaml = serde_yaml::to_string(&*data)?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["player", "fade_out_ms"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        Self::set_value_internal(&mut data, path, value)?;
        drop(data);
        self.save()
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
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().unwrap();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                match map.get(&Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    /// Désérialise la valeur à `path`, ou retourne `default` si elle est absente ou mal typée
    ///
    /// # Exemple
    ///
    /// ```no_run
    /// use wfbconfig::get_config;
    ///
    /// let delays: Vec<u64> = get_config().get_or(&["player", "retry_delays_ms"], vec![400, 1200, 2500]);
    /// ```
    pub fn get_or<T: DeserializeOwned>(&self, path: &[&str], default: T) -> T {
        match self.get_value(path) {
            Ok(value) => serde_yaml::from_value(value).unwrap_or_else(|e| {
                tracing::warn!(path = %path.join("."), error = %e, "Invalid config value, using default");
                default
            }),
            Err(_) => default,
        }
    }

    /// Entier non signé à `path`, ou `default`
    pub fn get_u64_or(&self, path: &[&str], default: u64) -> u64 {
        match self.get_value(path) {
            Ok(Value::Number(n)) if n.is_u64() => n.as_u64().unwrap_or(default),
            Ok(Value::String(s)) => s.parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Flottant à `path`, ou `default`
    pub fn get_f64_or(&self, path: &[&str], default: f64) -> f64 {
        match self.get_value(path) {
            Ok(Value::Number(n)) => n.as_f64().unwrap_or(default),
            Ok(Value::String(s)) => s.parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Écrit un entier non signé à `path`
    pub fn set_u64(&self, path: &[&str], value: u64) -> Result<()> {
        self.set_value(path, Value::Number(Number::from(value)))
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                let _ = Self::set_value_internal(config, &key_path, yaml_value);
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    if let Value::String(s) = k {
                        new_map.insert(Value::String(s.to_lowercase()), Self::lower_keys_value(v));
                    } else {
                        new_map.insert(k, Self::lower_keys_value(v));
                    }
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Racine des données de l'application
    ///
    /// `host.data_dir` s'il est renseigné, sinon `~/Documents/WFMusic`.
    /// Le répertoire est créé s'il n'existe pas.
    pub fn get_data_dir(&self) -> Result<PathBuf> {
        let dir = match self.get_value(&["host", "data_dir"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => PathBuf::from(s),
            _ => document_dir()
                .or_else(|| home_dir().map(|h| h.join("Documents")))
                .ok_or_else(|| anyhow!("Unable to determine a documents directory"))?
                .join(DEFAULT_DATA_DIR_NAME),
        };

        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            info!(directory = %dir.display(), "Created data directory");
        }
        Ok(dir)
    }

    /// Définit la racine des données
    pub fn set_data_dir(&self, directory: String) -> Result<()> {
        self.set_value(&["host", "data_dir"], Value::String(directory))
    }

    /// Récupère un répertoire géré par la configuration
    ///
    /// Le répertoire peut être absolu ou relatif à la racine des données.
    /// Il sera créé s'il n'existe pas.
    ///
    /// # Arguments
    ///
    /// * `path` - Chemin dans l'arbre de configuration (ex: `&["cache", "directory"]`)
    /// * `default` - Nom de répertoire par défaut si non configuré
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<PathBuf> {
        let dir_path = match self.get_value(path) {
            Ok(Value::String(s)) if !s.trim().is_empty() => s,
            _ => {
                self.set_managed_dir(path, default.to_string())?;
                default.to_string()
            }
        };

        let candidate = Path::new(&dir_path);
        let absolute = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.get_data_dir()?.join(candidate)
        };

        if !absolute.exists() {
            fs::create_dir_all(&absolute)?;
            info!(directory = %absolute.display(), "Created managed directory");
        }
        Ok(absolute)
    }

    /// Définit un répertoire géré par la configuration
    pub fn set_managed_dir(&self, path: &[&str], directory: String) -> Result<()> {
        self.set_value(path, Value::String(directory))
    }

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    impl_bool_config!(
        get_log_to_file,
        set_log_to_file,
        &["host", "logger", "log_to_file"],
        DEFAULT_LOG_TO_FILE
    );

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["host", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );
}

/// Returns the global configuration instance
///
/// The instance is lazily loaded on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
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
