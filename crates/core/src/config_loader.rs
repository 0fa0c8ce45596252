use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};

use crate::config::EngineConfig;
use crate::error::ConfigurationError;

/// Prefix of environment overrides, e.g. `CONFLUENCE_DIVERGENCE__THRESHOLD=0.6`.
pub const ENV_PREFIX: &str = "CONFLUENCE_";

/// Layers engine configuration from defaults, files and environment.
///
/// Later layers win: built-in defaults, `Confluence.toml`, the optional
/// `Confluence.{profile}.toml`, `CONFLUENCE_*` variables, then
/// `Confluence.json` joined in for keys nothing else set.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    dir: PathBuf,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new("config")
    }
}

impl ConfigLoader {
    /// Loader reading files from `dir`.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Loads and validates configuration from `config/`.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the merged
    /// configuration fails validation.
    pub fn load() -> Result<EngineConfig, ConfigurationError> {
        Self::default().extract(None)
    }

    /// Loads and validates configuration from `config/` with a profile overlay.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the merged
    /// configuration fails validation.
    pub fn load_with_profile(profile: &str) -> Result<EngineConfig, ConfigurationError> {
        Self::default().extract(Some(profile))
    }

    /// Builds the layered figment without extracting it.
    #[must_use]
    pub fn figment(&self, profile: Option<&str>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file(self.dir.join("Confluence.toml")));
        if let Some(profile) = profile {
            let profile_file = self.dir.join(format!("Confluence.{profile}.toml"));
            figment = figment.merge(Toml::file(profile_file));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .join(Json::file(self.dir.join("Confluence.json")))
    }

    /// Extracts and validates configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the merged
    /// configuration fails validation.
    pub fn extract(&self, profile: Option<&str>) -> Result<EngineConfig, ConfigurationError> {
        let config: EngineConfig = self.figment(profile).extract()?;
        config.validate()?;
        tracing::debug!(dir = %self.dir.display(), ?profile, "configuration loaded");
        Ok(config)
    }
}
