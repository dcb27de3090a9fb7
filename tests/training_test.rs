// Integration tests: full training pipeline against a miniature dataset

use std::collections::HashMap;
use std::path::Path;
use tempfile::TempDir;

use cifra::data::load_mnist;
use cifra::models::MnistClassifier;
use cifra::training::{
    epoch_progress, train_classifier, CheckpointStore, TrainingOrchestrator, TrainingParams,
    TrainingPhase,
};

/// Miniature MNIST in idx format; brightness encodes the digit.
fn seed_mnist(dir: &Path, train: usize, test: usize) {
    std::fs::create_dir_all(dir).unwrap();

    let images = |n: usize| {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2051u32.to_be_bytes());
        buf.extend_from_slice(&(n as u32).to_be_bytes());
        buf.extend_from_slice(&28u32.to_be_bytes());
        buf.extend_from_slice(&28u32.to_be_bytes());
        for i in 0..n {
            buf.extend(std::iter::repeat(((i % 10) * 25) as u8).take(28 * 28));
        }
        buf
    };
    let labels = |n: usize| {
        let mut buf = Vec::new();
        buf.extend_from_slice(&2049u32.to_be_bytes());
        buf.extend_from_slice(&(n as u32).to_be_bytes());
        buf.extend((0..n).map(|i| (i % 10) as u8));
        buf
    };

    std::fs::write(dir.join("train-images-idx3-ubyte"), images(train)).unwrap();
    std::fs::write(dir.join("train-labels-idx1-ubyte"), labels(train)).unwrap();
    std::fs::write(dir.join("t10k-images-idx3-ubyte"), images(test)).unwrap();
    std::fs::write(dir.join("t10k-labels-idx1-ubyte"), labels(test)).unwrap();
}

#[test]
fn test_load_mnist_reads_idx_files() {
    let dir = TempDir::new().unwrap();
    seed_mnist(dir.path(), 64, 16);

    let dataset = load_mnist(dir.path()).unwrap();

    assert_eq!(dataset.train_images.dims(), &[64, 784]);
    assert_eq!(dataset.train_labels.dims(), &[64]);
    assert_eq!(dataset.test_images.dims(), &[16, 784]);
    assert_eq!(dataset.labels, 10);
}

#[test]
fn test_training_drives_status_to_completed() {
    let dir = TempDir::new().unwrap();
    seed_mnist(dir.path(), 128, 16);
    let dataset = load_mnist(dir.path()).unwrap();

    let orchestrator = TrainingOrchestrator::new();
    orchestrator.try_start().unwrap();

    let mut model = MnistClassifier::new(candle_core::Device::Cpu).unwrap();
    let params = TrainingParams {
        epochs: 2,
        learning_rate: 0.01,
    };

    let mut progress_seen = Vec::new();
    let summary = train_classifier(&mut model, &dataset, &params, |epoch, total, metrics| {
        let progress = epoch_progress(epoch, total);
        progress_seen.push(progress);
        orchestrator.update(
            progress,
            format!("Epoch {}/{}", epoch + 1, total),
            HashMap::from([("test_accuracy".to_string(), metrics.test_accuracy)]),
        );
    })
    .unwrap();

    orchestrator.complete(
        format!(
            "Training completed! Test accuracy: {:.2}%",
            summary.test_accuracy
        ),
        HashMap::from([("test_accuracy".to_string(), summary.test_accuracy)]),
    );

    assert_eq!(progress_seen, vec![50, 100]);

    let report = orchestrator.snapshot();
    assert_eq!(report.status, TrainingPhase::Completed);
    assert_eq!(report.progress, 100);
    assert!(report.metrics["test_accuracy"] >= 0.0);
    assert!(report.elapsed_time >= 0.0);
    assert!(report.elapsed_time_str.is_some());
    assert!(!orchestrator.is_running());
}

#[test]
fn test_checkpoints_survive_restart() {
    let dir = TempDir::new().unwrap();
    seed_mnist(dir.path(), 128, 16);
    let dataset = load_mnist(dir.path()).unwrap();
    let model_dir = dir.path().join("models");

    // First "process": train and persist.
    let trained_accuracy = {
        let checkpoints = CheckpointStore::new(model_dir.clone()).unwrap();
        let mut model = MnistClassifier::new(candle_core::Device::Cpu).unwrap();
        let params = TrainingParams {
            epochs: 1,
            learning_rate: 0.01,
        };
        train_classifier(&mut model, &dataset, &params, |_, _, _| {}).unwrap();
        checkpoints.save_after_training(&model).unwrap();
        model.test_accuracy()
    };

    // Second "process": startup selection finds the trained weights.
    let checkpoints = CheckpointStore::new(model_dir).unwrap();
    let restored = checkpoints
        .load_or_init(&candle_core::Device::Cpu)
        .unwrap();

    assert!(restored.is_trained());
    assert_eq!(restored.test_accuracy(), trained_accuracy);
    assert_eq!(checkpoints.persisted_best_accuracy(), Some(trained_accuracy));
}

#[test]
fn test_failure_path_records_and_releases() {
    // A run that errors out must surface via the status record and release
    // the run slot for the next attempt.
    let orchestrator = TrainingOrchestrator::new();
    orchestrator.try_start().unwrap();
    orchestrator.update(5, "Loading and preparing data...", HashMap::new());

    orchestrator.fail("Training failed: dataset unavailable");

    let report = orchestrator.snapshot();
    assert_eq!(report.status, TrainingPhase::Failed);
    assert_eq!(report.progress, 0);
    assert!(report.message.starts_with("Training failed:"));
    assert!(!orchestrator.is_running());
    assert!(orchestrator.try_start().is_ok());
}
