//! Configuration with layered loading.
//!
//! Configuration is resolved in layers: built-in defaults, then environment
//! overrides, then explicit setters. [`MuxConfig::apply`] validates the
//! result and installs process-wide settings (the default message locale).

use crate::error::{Error, ErrorKind};
use crate::locale::{self, Locale};

/// Environment variable selecting the default message locale.
pub const ENV_LOCALE: &str = "RWMUX_LOCALE";
/// Environment variable bounding the context registry.
pub const ENV_REGISTRY_CAPACITY: &str = "RWMUX_REGISTRY_CAPACITY";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxConfig {
    /// Default locale for user-visible messages.
    pub locale: Locale,
    /// Upper bound on the number of owner contexts a [`ContextRegistry`]
    /// will hold. `None` means unbounded.
    ///
    /// [`ContextRegistry`]: crate::sync::ContextRegistry
    pub registry_capacity: Option<usize>,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            locale: Locale::En,
            registry_capacity: None,
        }
    }
}

impl MuxConfig {
    /// Loads configuration from defaults plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when an override is present but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var(ENV_LOCALE) {
            config.locale = value
                .parse()
                .map_err(|()| ConfigError::InvalidLocale(value))?;
        }

        if let Ok(value) = std::env::var(ENV_REGISTRY_CAPACITY) {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidRegistryCapacity(value))?;
            config.registry_capacity = Some(parsed);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for basic sanity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry_capacity == Some(0) {
            return Err(ConfigError::ZeroRegistryCapacity);
        }
        Ok(())
    }

    /// Validates and installs process-wide settings.
    pub fn apply(&self) -> Result<(), ConfigError> {
        self.validate()?;
        locale::set_default_locale(self.locale);
        tracing::debug!(locale = %self.locale, capacity = ?self.registry_capacity, "configuration applied");
        Ok(())
    }
}

/// A configuration validation or parse error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The locale override could not be parsed.
    InvalidLocale(String),
    /// The registry capacity override could not be parsed.
    InvalidRegistryCapacity(String),
    /// A registry capacity of zero would reject every attach.
    ZeroRegistryCapacity,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLocale(value) => write!(f, "unsupported locale {value:?}"),
            Self::InvalidRegistryCapacity(value) => {
                write!(f, "invalid registry capacity {value:?}")
            }
            Self::ZeroRegistryCapacity => write!(f, "registry capacity must be nonzero"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::new(ErrorKind::ConfigError).with_detail(e.to_string())
    }
}
