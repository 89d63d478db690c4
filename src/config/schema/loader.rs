use super::Config;
use crate::error::ConfigError;
use directories::UserDirs;
use std::fs;
use std::path::{Path, PathBuf};

fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .ok_or_else(|| ConfigError::Load("could not find home directory".into()))?;
    Ok(home.join(".runcommand").join("config.toml"))
}

impl Config {
    /// Load `path_override` or `$HOME/.runcommand/config.toml`, writing the
    /// defaults there first when the file does not exist yet.
    pub fn load_or_init(path_override: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path_override {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };

        let mut config = if config_path.exists() {
            let contents = fs::read_to_string(&config_path)?;
            let mut config: Config = toml::from_str(&contents).map_err(|e| {
                ConfigError::Load(format!("failed to parse {}: {e}", config_path.display()))
            })?;
            config.config_path.clone_from(&config_path);
            config
        } else {
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let config = Self {
                config_path,
                ..Self::default()
            };
            config.save()?;
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Load(format!("failed to serialize config: {e}")))?;
        fs::write(&self.config_path, toml_str)?;
        Ok(())
    }
}
