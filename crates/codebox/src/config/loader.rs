//! Configuration file loading for codebox
//!
//! Handles loading and parsing configuration files using the config crate.
//! [`Config::load`] layers the embedded defaults, an optional file and
//! `CODEBOX__`-prefixed environment variables, in that order.

use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::{Config, ConfigError, ENV_PREFIX, EXAMPLE_CONFIG};

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load layered configuration
    ///
    /// Embedded defaults, then `path` if given, then environment variables
    /// such as `CODEBOX__SESSION__LANG=go` or `CODEBOX__API_TIMEOUT=30`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder()
            .add_source(File::from_str(EXAMPLE_CONFIG, FileFormat::Toml));
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_timeout == 0 {
            return Err(ConfigError::Invalid(
                "api_timeout must be greater than zero".to_string(),
            ));
        }
        if self.command_timeout == Some(0) {
            return Err(ConfigError::Invalid(
                "command_timeout must be greater than zero".to_string(),
            ));
        }
        for (lang, image) in &self.images {
            if image.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "image override for '{lang}' is empty"
                )));
            }
        }
        // Dockerfile existence is checked when a session is created
        if self.session.image.is_some() && self.session.dockerfile.is_some() {
            return Err(ConfigError::ConflictingImageSource);
        }

        Ok(())
    }
}
