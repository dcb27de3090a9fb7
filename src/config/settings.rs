// Configuration structs

use serde::Deserialize;
use std::path::PathBuf;

/// Service configuration with working-directory defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address for the HTTP server
    pub bind_address: String,
    /// Directory for model checkpoints
    pub model_dir: PathBuf,
    /// Directory for the MNIST dataset
    pub data_dir: PathBuf,
    /// Directory for timestamped log files
    pub log_dir: PathBuf,
    /// Maximum accepted upload size in bytes
    pub max_upload_bytes: usize,
    /// Training defaults and limits
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Epochs when the request omits them
    pub default_epochs: usize,
    /// Hard cap on requested epochs
    pub max_epochs: usize,
    /// Learning rate when the request omits it
    pub default_learning_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5000".to_string(),
            model_dir: PathBuf::from("models"),
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
            max_upload_bytes: 5 * 1024 * 1024,
            training: TrainingConfig::default(),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            default_epochs: 30,
            max_epochs: 100,
            default_learning_rate: 0.001,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_address, "127.0.0.1:5000");
        assert_eq!(config.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.training.default_epochs, 30);
        assert_eq!(config.training.max_epochs, 100);
        assert_eq!(config.training.default_learning_rate, 0.001);
    }
}
