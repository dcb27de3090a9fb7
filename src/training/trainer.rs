// Epoch training loop for the digit classifier

use anyhow::Result;
use candle_core::{DType, Tensor, D};
use candle_nn::{loss, ops, AdamW, Optimizer, ParamsAdamW};
use rand::prelude::*;

use super::orchestrator::TrainingParams;
use crate::models::MnistClassifier;

const BATCH_SIZE: usize = 64;

/// Metrics reported after each epoch.
#[derive(Debug, Clone)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch: usize,
    /// Mean training loss over the epoch's batches
    pub train_loss: f64,
    /// Accuracy on the held-out split, percent
    pub test_accuracy: f64,
}

/// Final result of a training run.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub epochs: usize,
    pub final_loss: f64,
    /// Accuracy of the final weights on the held-out split, percent
    pub test_accuracy: f64,
}

/// Overall percent after finishing `epoch` (0-based) of `total` epochs.
pub fn epoch_progress(epoch: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (100.0 * (epoch + 1) as f64 / total as f64).round() as u8
}

/// Train `model` in place, invoking `on_epoch(epoch, total, metrics)` after
/// every epoch. The model is marked trained with its final test accuracy.
pub fn train_classifier(
    model: &mut MnistClassifier,
    dataset: &candle_datasets::vision::Dataset,
    params: &TrainingParams,
    mut on_epoch: impl FnMut(usize, usize, &EpochMetrics),
) -> Result<TrainingSummary> {
    let device = model.device().clone();
    let train_images = dataset.train_images.to_device(&device)?;
    let train_labels = dataset
        .train_labels
        .to_dtype(DType::U32)?
        .to_device(&device)?;
    let test_images = dataset.test_images.to_device(&device)?;
    let test_labels = dataset
        .test_labels
        .to_dtype(DType::U32)?
        .to_device(&device)?;

    let mut optimizer = AdamW::new(
        model.varmap().all_vars(),
        ParamsAdamW {
            lr: params.learning_rate,
            ..Default::default()
        },
    )?;

    let n_batches = train_images.dim(0)? / BATCH_SIZE;
    let mut batch_order: Vec<usize> = (0..n_batches).collect();
    let mut rng = rand::thread_rng();

    tracing::info!(
        epochs = params.epochs,
        learning_rate = params.learning_rate,
        batches = n_batches,
        "Starting training run"
    );

    let mut final_loss = 0.0;
    let mut test_accuracy = 0.0;
    for epoch in 0..params.epochs {
        batch_order.shuffle(&mut rng);

        let mut loss_sum = 0f64;
        for &batch in &batch_order {
            let images = train_images.narrow(0, batch * BATCH_SIZE, BATCH_SIZE)?;
            let labels = train_labels.narrow(0, batch * BATCH_SIZE, BATCH_SIZE)?;
            let logits = model.forward_t(&images, true)?;
            let log_sm = ops::log_softmax(&logits, D::Minus1)?;
            let batch_loss = loss::nll(&log_sm, &labels)?;
            optimizer.backward_step(&batch_loss)?;
            loss_sum += f64::from(batch_loss.to_scalar::<f32>()?);
        }
        final_loss = loss_sum / n_batches.max(1) as f64;

        test_accuracy = evaluate(model, &test_images, &test_labels)? * 100.0;

        let metrics = EpochMetrics {
            epoch: epoch + 1,
            train_loss: final_loss,
            test_accuracy,
        };
        tracing::info!(
            epoch = metrics.epoch,
            total = params.epochs,
            train_loss = metrics.train_loss,
            test_accuracy = metrics.test_accuracy,
            "Epoch finished"
        );
        on_epoch(epoch, params.epochs, &metrics);
    }

    model.set_trained(test_accuracy);

    Ok(TrainingSummary {
        epochs: params.epochs,
        final_loss,
        test_accuracy,
    })
}

/// Fraction of held-out samples classified correctly.
fn evaluate(model: &MnistClassifier, images: &Tensor, labels: &Tensor) -> Result<f64> {
    let logits = model.forward_t(images, false)?;
    let correct = logits
        .argmax(D::Minus1)?
        .eq(labels)?
        .to_dtype(DType::F32)?
        .sum_all()?
        .to_scalar::<f32>()?;
    Ok(f64::from(correct) / labels.dim(0)? as f64)
}
