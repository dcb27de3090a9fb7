// Checkpoint management
//
// Two fixed checkpoint stems under the model directory: the weights of the
// last completed run, and the best-accuracy weights seen so far.

use anyhow::{Context, Result};
use candle_core::Device;
use std::fs;
use std::path::PathBuf;

use crate::models::{load_model_metadata, model_exists, MnistClassifier, Saveable};

const REGULAR_STEM: &str = "mnist_classifier";
const BEST_STEM: &str = "mnist_classifier_best";

/// Stores and retrieves classifier checkpoints.
pub struct CheckpointStore {
    model_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(model_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&model_dir)
            .with_context(|| format!("Failed to create model directory: {:?}", model_dir))?;
        Ok(Self { model_dir })
    }

    /// Stem of the last-completed-run checkpoint.
    pub fn regular_stem(&self) -> PathBuf {
        self.model_dir.join(REGULAR_STEM)
    }

    /// Stem of the best-accuracy checkpoint.
    pub fn best_stem(&self) -> PathBuf {
        self.model_dir.join(BEST_STEM)
    }

    /// Startup model selection: best checkpoint, then regular, then a fresh
    /// untrained model. Load failures are logged and fallen through, never
    /// fatal.
    pub fn load_or_init(&self, device: &Device) -> Result<MnistClassifier> {
        for stem in [self.best_stem(), self.regular_stem()] {
            if !model_exists(&stem) {
                continue;
            }
            match MnistClassifier::load(&stem) {
                Ok(model) => {
                    tracing::info!(
                        checkpoint = %stem.display(),
                        test_accuracy = model.test_accuracy(),
                        "Loaded classifier checkpoint"
                    );
                    return Ok(model);
                }
                Err(e) => {
                    tracing::warn!(
                        checkpoint = %stem.display(),
                        error = %e,
                        "Failed to load checkpoint, falling through"
                    );
                }
            }
        }

        tracing::info!("No usable checkpoint, initializing untrained classifier");
        MnistClassifier::new(device.clone())
    }

    /// Accuracy recorded in the persisted best checkpoint, if any.
    pub fn persisted_best_accuracy(&self) -> Option<f64> {
        let stem = self.best_stem();
        if !model_exists(&stem) {
            return None;
        }
        load_model_metadata(&stem).ok().map(|m| m.test_accuracy)
    }

    /// Persist a freshly trained model: always the regular checkpoint, and
    /// the best checkpoint when this run beats the persisted best.
    pub fn save_after_training(&self, model: &MnistClassifier) -> Result<()> {
        model.save(&self.regular_stem())?;

        let beats_best = self
            .persisted_best_accuracy()
            .map_or(true, |best| model.test_accuracy() > best);
        if beats_best {
            model.save(&self.best_stem())?;
            tracing::info!(
                test_accuracy = model.test_accuracy(),
                "New best checkpoint"
            );
        }

        Ok(())
    }
}
