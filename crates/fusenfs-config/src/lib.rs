mod defaults;
mod env;
pub mod target;
pub mod types;
mod validation;

use std::path::Path;

pub use target::{RemoteTarget, TargetScheme};
pub use types::*;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing environment variables: {0:?}")]
    MissingEnvVars(Vec<String>),

    #[error("Invalid remote target '{0}': {1}")]
    InvalidTarget(String, String),

    #[error("No mount point configured. Pass --mountpoint or set 'mountpoint' in the config file.")]
    MissingMountpoint,

    #[error("No remote target configured. Pass --nfs-share or set 'target' in the config file.")]
    MissingTarget,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MountConfig {
    /// Parse a mount configuration from a YAML string.
    /// Environment variables in the format `${VAR_NAME}` will be interpolated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let interpolated = env::interpolate_env(yaml)?;
        let config: MountConfig = serde_yaml::from_str(&interpolated)?;
        Ok(config)
    }

    /// Load a mount configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}
