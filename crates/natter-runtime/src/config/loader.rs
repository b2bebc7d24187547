//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: enables TOML configuration files (`natter.toml`)
//! - `yaml-config`: enables YAML configuration files (`natter.yaml`, `natter.yml`)
//!
//! Both features can be enabled simultaneously; if so, both file formats are searched and loaded.
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. A programmatic base passed to [`ConfigLoader::merge`]
//! 3. Profile-specific config file (`natter.{profile}.toml`)
//! 4. Main config file (`natter.toml`)
//! 5. Environment variables (`NATTER_*`)
//!
//! # Environment Variable Mapping
//!
//! Environment variables use the `NATTER_` prefix with `__` as separator:
//!
//! - `NATTER_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `NATTER_BOT__ADMINS=[alice,bob]` → `bot.admins = ["alice", "bob"]`
//! - `NATTER_PLUGINS__WEATHER__ENDPOINT=...` → `plugins.weather.endpoint = "..."`
//!
//! `NATTER_PROFILE` selects the profile.
//!
//! # Example
//!
//! ```rust,ignore
//! use natter_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./config/natter.toml")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::NatterConfig;
use super::validation::validate_config;

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `NATTER_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var("NATTER_PROFILE")
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    base: Option<NatterConfig>,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            base: None,
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.search_path(cwd)
        } else {
            self
        }
    }

    pub fn with_user_config_dir(self) -> Self {
        if let Some(config_dir) = dirs::config_dir() {
            self.search_path(config_dir.join("natter"))
        } else {
            self
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Uses `config` instead of the built-in defaults as the lowest layer.
    pub fn merge(mut self, config: NatterConfig) -> Self {
        self.base = Some(config);
        self
    }

    /// Loads and validates the configuration.
    pub fn load(self) -> ConfigResult<NatterConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: NatterConfig = figment.extract()?;
        validate_config(&config)?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            plugins = config.plugins.len(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn build_figment(self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(NatterConfig::default()));
        if let Some(base) = &self.base {
            figment = figment.merge(Serialized::defaults(base));
        }

        if let Some(path) = &self.config_file {
            if path.exists() {
                info!(path = %path.display(), "Loading configuration file");
                figment = Self::merge_config_file(figment, path)?;
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!("Loading environment variables with NATTER_ prefix");
            figment = figment.merge(Env::prefixed("NATTER_").ignore(&["profile"]).split("__"));
        }

        Ok(figment)
    }

    /// Merges a single config file, dispatching on its extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if self.search_paths.is_empty() {
            let mut paths = Vec::new();
            if let Ok(cwd) = std::env::current_dir() {
                paths.push(cwd);
            }
            if let Some(config_dir) = dirs::config_dir() {
                paths.push(config_dir.join("natter"));
            }
            paths
        } else {
            self.search_paths.clone()
        }
    }

    /// Tries `search_paths × base_names`, the profile variant before the base
    /// file. Stops at the first base file found.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        base_names: &[&str],
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for search_path in search_paths {
            for base_name in base_names {
                let Some((stem, ext)) = base_name.rsplit_once('.') else {
                    continue;
                };

                let profile_path =
                    search_path.join(format!("{stem}.{}.{ext}", self.profile.as_str()));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile-specific config");
                    figment = merge_fn(figment, &profile_path);
                }

                let base_path = search_path.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading configuration file");
                    figment = merge_fn(figment, &base_path);
                    return (figment, true);
                }
            }
        }
        (figment, false)
    }

    #[allow(unused_mut)]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) =
                self.load_format_files(figment, &search_paths, &["natter.toml"], |fig, path| {
                    fig.merge(Toml::file(path))
                });
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["natter.yaml", "natter.yml"],
                |fig, path| fig.merge(Yaml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        if !found {
            warn!("No configuration file found, using defaults");
        }
        figment
    }
}

/// Loads the configuration from the default locations.
pub fn load_config() -> ConfigResult<NatterConfig> {
    ConfigLoader::new().load()
}

/// Loads the configuration from `path`, plus environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<NatterConfig> {
    ConfigLoader::new().file(path).load()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use figment::Jail;

    #[test]
    fn test_default_config() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::new().without_env().load().unwrap();
            assert_eq!(config.logging.level.as_str(), "info");
            assert_eq!(config.bot.prefix, "!");
            assert_eq!(config.queue.capacity, 1024);
            assert_eq!(config.flows.max_auto_advances, 32);
            assert!(!config.flows.exclusive);
            Ok(())
        });
    }

    #[test]
    fn test_profile_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env("NATTER_PROFILE", "prod");
            assert_eq!(Profile::from_env(), Profile::Production);
            jail.set_env("NATTER_PROFILE", "staging");
            assert_eq!(Profile::from_env(), Profile::Custom("staging".into()));
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "natter.toml",
                r#"
                [bot]
                prefix = "?"
                admins = ["alice"]

                [flows]
                exclusive = true

                [plugins.weather]
                endpoint = "https://example.org"
                "#,
            )?;
            jail.set_env("NATTER_LOGGING__LEVEL", "debug");
            jail.set_env("NATTER_BOT__PREFIX", "#");

            let config = ConfigLoader::new().load().unwrap();
            assert_eq!(config.bot.prefix, "#");
            assert_eq!(config.bot.admins, vec!["alice".to_string()]);
            assert!(config.flows.exclusive);
            assert_eq!(config.logging.level, LogLevel::Debug);
            assert_eq!(
                config.plugins["weather"]["endpoint"],
                serde_json::json!("https://example.org")
            );
            Ok(())
        });
    }

    #[test]
    fn test_profile_file_is_overridden_by_main_file() {
        Jail::expect_with(|jail| {
            jail.create_file("natter.test.toml", "[queue]\ncapacity = 8\n[workers]\nsize = 3")?;
            jail.create_file("natter.toml", "[queue]\ncapacity = 16")?;

            let config = ConfigLoader::new().profile("test").without_env().load().unwrap();
            assert_eq!(config.queue.capacity, 16);
            assert_eq!(config.workers.size, 3);
            Ok(())
        });
    }

    #[test]
    fn test_programmatic_base_is_below_files() {
        Jail::expect_with(|jail| {
            jail.create_file("natter.toml", "[bot]\nprefix = \"?\"")?;
            let mut base = NatterConfig::default();
            base.bot.admins = vec!["root".into()];
            base.bot.prefix = "$".into();

            let config = ConfigLoader::new().merge(base).without_env().load().unwrap();
            assert_eq!(config.bot.prefix, "?");
            assert_eq!(config.bot.admins, vec!["root".to_string()]);
            Ok(())
        });
    }

    #[test]
    fn test_missing_or_invalid_file() {
        Jail::expect_with(|jail| {
            let err = ConfigLoader::new().file("nope.toml").load().unwrap_err();
            assert!(matches!(err, ConfigError::FileNotFound(_)));

            jail.create_file("natter.ini", "x=1")?;
            let err = ConfigLoader::new().file("natter.ini").load().unwrap_err();
            assert!(matches!(err, ConfigError::UnsupportedFormat(ref e) if e == "ini"));

            jail.create_file("bad.toml", "[flows]\nmax_auto_advances = 0")?;
            let err = ConfigLoader::new().file("bad.toml").without_env().load().unwrap_err();
            assert!(matches!(err, ConfigError::ValidationError { .. }));

            jail.create_file("level.toml", "[logging]\nlevel = \"loud\"")?;
            let err = ConfigLoader::new().file("level.toml").without_env().load().unwrap_err();
            assert!(matches!(err, ConfigError::ParseError(_)));
            Ok(())
        });
    }
}
