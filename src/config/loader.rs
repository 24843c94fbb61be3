use std::path::Path;

use super::{validate_services, AppConfig, ConfigError, ServicesFile};

/// Load and validate configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }

    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_yaml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Load a discovery file (a bare `services:` map)
pub fn load_services_file<P: AsRef<Path>>(path: P) -> Result<ServicesFile, ConfigError> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }

    let content = std::fs::read_to_string(path)?;
    let file: ServicesFile = serde_yaml::from_str(&content)?;
    validate_services(&file.services)?;

    Ok(file)
}
