use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::language::{CompileTemplate, DEFAULT_WORKDIR, Language, LanguageProfile};

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../codebox.example.toml");

/// Prefix for environment variable overrides (e.g., `CODEBOX__SESSION__LANG`)
pub const ENV_PREFIX: &str = "CODEBOX";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("language '{0}' is not supported (expected one of: {names})", names = language::supported_names())]
    UnsupportedLanguage(String),

    #[error("only one of `image` or `dockerfile` may be set")]
    ConflictingImageSource,

    #[error("dockerfile not found at {}", .0.display())]
    DockerfileNotFound(PathBuf),

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for codebox
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Docker daemon address (`unix://` socket or `tcp://`/`http://` URL).
    /// Local defaults (DOCKER_HOST, then the local socket) apply when unset.
    #[serde(default)]
    pub docker_host: Option<String>,

    /// Timeout in seconds for container runtime API calls
    #[serde(default = "default_api_timeout")]
    pub api_timeout: u64,

    /// Deadline in seconds for each command executed in a session
    #[serde(default)]
    pub command_timeout: Option<u64>,

    /// Default image overrides keyed by language
    #[serde(default)]
    pub images: HashMap<Language, String>,

    /// Defaults for new sessions
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    /// Create a new config from the embedded defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config with no overrides at all
    pub fn empty() -> Self {
        Self {
            docker_host: None,
            api_timeout: default_api_timeout(),
            command_timeout: None,
            images: HashMap::new(),
            session: SessionConfig::default(),
        }
    }

    /// Image used for a language when a session names none
    pub fn default_image(&self, language: Language) -> &str {
        self.images
            .get(&language)
            .map(String::as_str)
            .unwrap_or(language.profile().default_image)
    }

    /// API timeout as a duration
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout)
    }

    /// Session settings with config-level defaults applied
    ///
    /// Fills in the per-language image override and the command timeout.
    pub fn session_config(&self) -> SessionConfig {
        self.session_config_for(self.session.lang)
    }

    /// Session settings for a specific language, with config-level defaults applied
    pub fn session_config_for(&self, language: Language) -> SessionConfig {
        let mut session = self.session.clone();
        session.lang = language;
        if session.image.is_none()
            && session.dockerfile.is_none()
            && let Some(image) = self.images.get(&language)
        {
            session.image = Some(image.clone());
        }
        if session.command_timeout.is_none() {
            session.command_timeout = self.command_timeout.map(Duration::from_secs);
        }
        session
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

/// Settings for a single session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Language the session runs
    #[serde(default = "default_language")]
    pub lang: Language,

    /// Image to run. Mutually exclusive with `dockerfile`.
    #[serde(default)]
    pub image: Option<String>,

    /// Dockerfile to build the image from. Mutually exclusive with `image`.
    #[serde(default)]
    pub dockerfile: Option<PathBuf>,

    /// Commit the container into the session image on close and keep the image
    #[serde(default)]
    pub keep_template: bool,

    /// Report progress at info level instead of debug
    #[serde(default = "default_verbose")]
    pub verbose: bool,

    /// Deadline for each executed command
    #[serde(default, with = "optional_secs")]
    pub command_timeout: Option<Duration>,
}

impl SessionConfig {
    /// Create session settings for a language with default options
    pub fn new(lang: Language) -> Self {
        Self {
            lang,
            image: None,
            dockerfile: None,
            keep_template: false,
            verbose: default_verbose(),
            command_timeout: None,
        }
    }

    /// Create session settings from a language name
    pub fn for_language(name: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(name.parse()?))
    }

    /// Run an existing image
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Build the image from a dockerfile
    pub fn with_dockerfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.dockerfile = Some(path.into());
        self
    }

    /// Set whether the image outlives the session
    pub fn with_keep_template(mut self, keep: bool) -> Self {
        self.keep_template = keep;
        self
    }

    /// Set progress verbosity
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the per-command deadline
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Validate the settings
    ///
    /// Checks that at most one image source is named and that a named
    /// dockerfile exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image.is_some() && self.dockerfile.is_some() {
            return Err(ConfigError::ConflictingImageSource);
        }
        if let Some(image) = &self.image
            && image.trim().is_empty()
        {
            return Err(ConfigError::Invalid("session image is empty".to_string()));
        }
        if let Some(path) = &self.dockerfile
            && !path.is_file()
        {
            return Err(ConfigError::DockerfileNotFound(path.clone()));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(default_language())
    }
}

fn default_language() -> Language {
    Language::Python
}

fn default_verbose() -> bool {
    true
}

fn default_api_timeout() -> u64 {
    120
}

/// Whole-second durations as plain integers in config files
mod optional_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
    }
}
