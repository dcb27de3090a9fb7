// Configuration loader
// Reads cifra.toml from the working directory or ~/.cifra/config.toml;
// missing files mean defaults, a present-but-broken file is an error.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use super::settings::Config;

/// Load configuration from the first config file found, or defaults.
pub fn load_config() -> Result<Config> {
    for path in candidate_paths() {
        if !path.exists() {
            continue;
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded configuration file");
        return Ok(config);
    }

    Ok(Config::default())
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("cifra.toml")];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".cifra").join("config.toml"));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_overlays_defaults() {
        let config: Config = toml::from_str(
            r#"
            bind_address = "0.0.0.0:8080"

            [training]
            max_epochs = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.training.max_epochs, 50);
        // Untouched fields keep their defaults.
        assert_eq!(config.training.default_epochs, 30);
        assert_eq!(config.max_upload_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.bind_address, Config::default().bind_address);
    }

    #[test]
    fn test_broken_toml_is_an_error() {
        assert!(toml::from_str::<Config>("bind_address = [").is_err());
    }
}
