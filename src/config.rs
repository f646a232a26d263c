//! Application configuration module
//!
//! Loads settings from the home-directory YAML file with environment
//! overrides (`RBC__POSTGRES__HOST`, `RBC__GRAPH__ALLOW_FALLBACK`, ...).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::error::AppError;

/// Overrides the configuration home directory
pub const HOME_ENV: &str = "BALDRICK_REBEC_HOME_DIR";
const HOME_DIR_NAME: &str = ".baldrick-rebec";
const CONFIG_FILE: &str = "config.yaml";
const ENV_PREFIX: &str = "RBC";

pub const DEFAULT_SERVER_PORT: u16 = 53051;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Server configuration (consumed by the RPC server, kept for a shared file)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVER_PORT,
        }
    }
}

/// TLS behaviour for PostgreSQL connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    #[default]
    Disable,
    Prefer,
    Require,
}

/// A login identity
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    /// Bootstrap password used while `password` is still empty
    pub password_temp: String,
}

impl Credentials {
    fn named(user: &str) -> Self {
        Self {
            user: user.to_string(),
            ..Default::default()
        }
    }

    pub fn effective_password(&self) -> &str {
        if self.password.is_empty() {
            &self.password_temp
        } else {
            &self.password
        }
    }

    /// Both a user and an effective password are configured
    pub fn is_present(&self) -> bool {
        !self.user.trim().is_empty() && !self.effective_password().is_empty()
    }
}

/// PostgreSQL configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub maintenance_db: String,
    pub schema: String,
    pub sslmode: SslMode,
    pub admin: Credentials,
    pub app: Credentials,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            dbname: "rbc".to_string(),
            maintenance_db: "postgres".to_string(),
            schema: "public".to_string(),
            sslmode: SslMode::Disable,
            admin: Credentials::named("rbc_admin"),
            app: Credentials::named("rbc_app"),
        }
    }
}

/// Graph store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Permit the relational mirror when a graph write fails
    pub allow_fallback: bool,
    pub name: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            allow_fallback: true,
            name: "rbc_graph".to_string(),
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub postgres: PostgresConfig,
    pub graph: GraphConfig,
}

/// Base directory for configuration and state
pub fn home_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(HOME_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => Path::new(&home).join(HOME_DIR_NAME),
        _ => PathBuf::from(HOME_DIR_NAME),
    }
}

/// Expected location of `config.yaml`
pub fn config_path() -> PathBuf {
    home_dir().join(CONFIG_FILE)
}

impl Settings {
    /// Load settings from `config.yaml` and the environment.
    /// A missing file is not an error; defaults apply.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let built = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = built.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.postgres.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue("postgres.host is empty".to_string()));
        }
        if self.postgres.port == 0 {
            return Err(ConfigError::InvalidValue("postgres.port must be non-zero".to_string()));
        }
        if self.graph.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue("graph.name is empty".to_string()));
        }
        Ok(())
    }
}
