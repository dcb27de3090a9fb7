// Model persistence utilities
// Handles saving/loading weights + metadata

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Metadata saved alongside model weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Model type identifier
    pub model_type: String,
    /// Whether the weights come from a completed training run
    pub trained: bool,
    /// Test-set accuracy (percent) at save time
    pub test_accuracy: f64,
    /// Timestamp of save
    pub timestamp: String,
    /// Version of the persistence format
    pub format_version: u32,
}

impl ModelMetadata {
    pub fn new(model_type: impl Into<String>, trained: bool, test_accuracy: f64) -> Self {
        Self {
            model_type: model_type.into(),
            trained,
            test_accuracy,
            timestamp: chrono::Utc::now().to_rfc3339(),
            format_version: 1,
        }
    }
}

/// Weights file for a checkpoint stem.
pub fn weights_path(stem: &Path) -> PathBuf {
    stem.with_extension("safetensors")
}

/// Metadata file for a checkpoint stem.
pub fn metadata_path(stem: &Path) -> PathBuf {
    stem.with_extension("json")
}

/// Save model weights and metadata.
///
/// Creates two files from one stem:
/// - `{stem}.safetensors` - model weights (Candle's VarMap format)
/// - `{stem}.json` - metadata (accuracy, timestamps)
pub fn save_model_with_metadata(
    stem: &Path,
    varmap: &candle_nn::VarMap,
    metadata: &ModelMetadata,
) -> Result<()> {
    if let Some(parent) = stem.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create model directory: {:?}", parent))?;
    }

    let weights = weights_path(stem);
    varmap
        .save(&weights)
        .with_context(|| format!("Failed to save model weights to {:?}", weights))?;

    let metadata_file = metadata_path(stem);
    let metadata_json = serde_json::to_string_pretty(metadata)
        .context("Failed to serialize model metadata")?;
    fs::write(&metadata_file, metadata_json)
        .with_context(|| format!("Failed to write metadata to {:?}", metadata_file))?;

    tracing::info!(
        model_type = %metadata.model_type,
        test_accuracy = metadata.test_accuracy,
        path = %weights.display(),
        "Saved model"
    );

    Ok(())
}

/// Load model metadata for a checkpoint stem.
pub fn load_model_metadata(stem: &Path) -> Result<ModelMetadata> {
    let metadata_file = metadata_path(stem);

    if !metadata_file.exists() {
        anyhow::bail!("Model metadata not found at {:?}", metadata_file);
    }

    let metadata_json = fs::read_to_string(&metadata_file)
        .with_context(|| format!("Failed to read metadata from {:?}", metadata_file))?;

    let metadata: ModelMetadata =
        serde_json::from_str(&metadata_json).context("Failed to parse model metadata JSON")?;

    Ok(metadata)
}

/// Check if a saved model exists at a checkpoint stem.
pub fn model_exists(stem: &Path) -> bool {
    weights_path(stem).exists() && metadata_path(stem).exists()
}
