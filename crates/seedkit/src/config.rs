//! Configuration for the seeder: connection, tracking table and environment profiles.
//!
//! Values are layered: built-in defaults, then a JSON config file, then
//! process environment variables. Only [`SeederConfig::load`] touches the
//! process environment; everything else takes explicit values.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::query_builder::quote_table;
use crate::tracker::DEFAULT_TRACKING_TABLE;

/// Config file names tried, in order, when no explicit path is given.
pub const CONFIG_FILE_NAMES: [&str; 3] = ["seeder.config.json", ".seederrc", ".seederrc.json"];

/// Variables consulted for the target environment, after `SEEDER_ENVIRONMENT`.
const ENVIRONMENT_VARS: [&str; 3] = ["ENVIRONMENT", "ENV", "APP_ENV"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Safety and selection settings of one environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentProfile {
    pub is_production: bool,
    pub require_confirmation: bool,
    /// When non-empty, only these units run in the environment.
    pub allowed_seeders: BTreeSet<String>,
    pub excluded_seeders: BTreeSet<String>,
}

impl EnvironmentProfile {
    fn new(is_production: bool, require_confirmation: bool) -> Self {
        Self {
            is_production,
            require_confirmation,
            ..Default::default()
        }
    }

    /// Whether the profile lets `name` run.
    pub fn permits(&self, name: &str) -> bool {
        !self.excluded_seeders.contains(name)
            && (self.allowed_seeders.is_empty() || self.allowed_seeders.contains(name))
    }
}

fn builtin_profiles() -> BTreeMap<String, EnvironmentProfile> {
    BTreeMap::from([
        ("development".to_string(), EnvironmentProfile::new(false, false)),
        ("testing".to_string(), EnvironmentProfile::new(false, false)),
        ("staging".to_string(), EnvironmentProfile::new(false, true)),
        ("production".to_string(), EnvironmentProfile::new(true, true)),
    ])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeederConfig {
    pub database_url: Option<String>,
    /// Directory that `make` writes new seed units into.
    pub seeders_path: PathBuf,
    pub default_environment: String,
    /// Upper bound on the chunk size any unit uses for bulk writes.
    pub batch_size: usize,
    pub require_confirmation_prod: bool,
    /// Accepted for compatibility; execution is always sequential.
    pub parallel: bool,
    pub tracking_table: String,
    /// Create the tracking table on connect when it is missing.
    pub auto_create_tracking_table: bool,
    pub environments: BTreeMap<String, EnvironmentProfile>,
}

impl Default for SeederConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            seeders_path: PathBuf::from("seeders"),
            default_environment: "development".to_string(),
            batch_size: 1000,
            require_confirmation_prod: true,
            parallel: false,
            tracking_table: DEFAULT_TRACKING_TABLE.to_string(),
            auto_create_tracking_table: true,
            environments: builtin_profiles(),
        }
    }
}

impl SeederConfig {
    /// Loads `.env`, then the config file (`path`, or the first of
    /// [`CONFIG_FILE_NAMES`] in the working directory), then environment
    /// variables, and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Ok(env_file) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", env_file.display());
        }

        let file = match path {
            Some(path) => Some(path.to_path_buf()),
            None => discover(Path::new(".")),
        };
        let mut config = match file {
            Some(file) => Self::from_file(&file)?,
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON config file over the defaults.
    ///
    /// Profiles listed under `environments` replace the built-in profile of
    /// the same name; the other built-ins are kept.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse = |source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };

        let mut data: Value = serde_json::from_str(&text).map_err(parse)?;
        let profiles = data
            .as_object_mut()
            .and_then(|object| object.remove("environments"));

        let mut config: SeederConfig = serde_json::from_value(data).map_err(parse)?;
        if let Some(profiles) = profiles {
            let profiles: BTreeMap<String, EnvironmentProfile> =
                serde_json::from_value(profiles).map_err(parse)?;
            config.environments.extend(profiles);
        }

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Overrides fields from variables returned by `lookup`. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = first_set(&lookup, &["SEEDER_DATABASE_URL", "DATABASE_URL"]) {
            self.database_url = Some(url);
        }
        if let Some(path) = first_set(&lookup, &["SEEDER_SEEDERS_PATH", "SEEDERS_PATH"]) {
            self.seeders_path = PathBuf::from(path);
        }
        if let Some(size) = first_set(&lookup, &["SEEDER_BATCH_SIZE", "BATCH_SIZE"]) {
            self.batch_size = size.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "batch_size".to_string(),
                value: size.clone(),
            })?;
        }
        if let Some(flag) = first_set(&lookup, &["SEEDER_REQUIRE_CONFIRMATION_PROD"]) {
            self.require_confirmation_prod = parse_flag(&flag)?;
        }
        if let Some(table) = first_set(&lookup, &["SEEDER_TRACKING_TABLE"]) {
            self.tracking_table = table;
        }

        let environment = first_set(&lookup, &["SEEDER_ENVIRONMENT"])
            .or_else(|| first_set(&lookup, &ENVIRONMENT_VARS));
        if let Some(environment) = environment {
            self.default_environment = environment.trim().to_lowercase();
            debug!("Detected environment: {}", self.default_environment);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "batch_size".to_string(),
                value: "0".to_string(),
            });
        }
        if self.default_environment.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "default_environment".to_string(),
                value: self.default_environment.clone(),
            });
        }
        if quote_table(&self.tracking_table).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "tracking_table".to_string(),
                value: self.tracking_table.clone(),
            });
        }
        if self.database_url.is_none() && self.is_production(&self.default_environment) {
            warn!("No database URL configured for production environment");
        }
        Ok(())
    }

    pub fn profile(&self, environment: &str) -> Option<&EnvironmentProfile> {
        self.environments.get(environment)
    }

    pub fn is_production(&self, environment: &str) -> bool {
        self.profile(environment).is_some_and(|p| p.is_production)
    }

    /// Whether running against `environment` needs interactive confirmation.
    pub fn requires_confirmation(&self, environment: &str) -> bool {
        match self.profile(environment) {
            Some(profile) if profile.is_production => {
                profile.require_confirmation && self.require_confirmation_prod
            }
            Some(profile) => profile.require_confirmation,
            None => false,
        }
    }
}

/// First of [`CONFIG_FILE_NAMES`] present in `dir`.
pub fn discover(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

fn first_set<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .find_map(|key| lookup(key).filter(|value| !value.trim().is_empty()))
}

fn parse_flag(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: "require_confirmation_prod".to_string(),
            value: value.to_string(),
        }),
    }
}
