//! Engine configuration
//!
//! Layers, later ones win:
//! 1. Defaults in code
//! 2. `procurement.toml` in the working directory, or an explicit file
//! 3. Environment variables such as `PROCUREMENT__CONSOLIDATION__AUTO_VALIDATE_ON_THRESHOLD=true`

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const SYSTEM_VALIDATOR: &str = "SYSTEM_AUTO";

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProcurementConfig {
    pub storage: StorageConfig,
    pub consolidation: ConsolidationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StorageConfig {
    /// sled database directory
    pub path: PathBuf,

    /// Throw the database away when the process exits
    pub temporary: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ConsolidationConfig {
    /// Name stamped as validator when a threshold triggers validation
    pub system_validator: String,

    /// Used for new grouped orders when the supplier has no preference
    pub auto_validate_on_threshold: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,

    pub json: bool,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            system_validator: SYSTEM_VALIDATOR.to_string(),
            auto_validate_on_threshold: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl Default for ProcurementConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                path: PathBuf::from("procurement.db"),
                temporary: false,
            },
            consolidation: ConsolidationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ProcurementConfig {
    /// Load from `procurement.toml` (optional) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(File::with_name("procurement").required(false))
    }

    /// Load from an explicit file, which must exist.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::build(File::from(path).required(true))
    }

    fn build<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        config::Config::builder()
            .set_default("storage.path", "procurement.db")?
            .set_default("storage.temporary", false)?
            .set_default("consolidation.system_validator", SYSTEM_VALIDATOR)?
            .set_default("consolidation.auto_validate_on_threshold", false)?
            .set_default("logging.filter", "info")?
            .set_default("logging.json", false)?
            .add_source(file)
            .add_source(
                Environment::with_prefix("PROCUREMENT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
