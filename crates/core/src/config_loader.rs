use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads application configuration by merging defaults, a TOML file,
    /// and `ROTATOR_`-prefixed environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed.
    pub fn load(path: &str) -> Result<AppConfig> {
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("ROTATOR_").split("__"))
            .extract()?;

        Ok(config)
    }

    /// Loads application configuration with a specific profile overlay.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn load_with_profile(path: &str, profile: &str) -> Result<AppConfig> {
        let base = path.trim_end_matches(".toml");
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Toml::file(format!("{base}.{profile}.toml")))
            .merge(Env::prefixed("ROTATOR_").split("__"))
            .extract()?;

        Ok(config)
    }
}
