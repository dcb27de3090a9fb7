// MNIST dataset access

mod preprocess;

pub use preprocess::{decode_image, encode_png_gray, to_tensor};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use candle_core::Tensor;
use candle_datasets::vision::{self, mnist};
use rand::Rng;
use std::path::Path;

use crate::models::IMAGE_DIM;

/// Load the MNIST train/test splits.
///
/// Prefers raw idx files under `data_dir`; falls back to fetching the
/// dataset from the HuggingFace hub when no local copy is present.
pub fn load_mnist(data_dir: &Path) -> Result<vision::Dataset> {
    match mnist::load_dir(data_dir) {
        Ok(dataset) => Ok(dataset),
        Err(e) => {
            tracing::warn!(
                dir = %data_dir.display(),
                error = %e,
                "No local MNIST copy, fetching from the hub"
            );
            mnist::load().context("Failed to fetch MNIST dataset")
        }
    }
}

/// One held-out sample, encoded for JSON transport.
#[derive(Debug, Clone)]
pub struct TestSample {
    /// PNG bytes, base64-encoded
    pub png_base64: String,
    /// Ground-truth digit
    pub label: u8,
}

/// The held-out evaluation split, kept in memory for sampling.
pub struct TestSet {
    images: Tensor,
    labels: Tensor,
}

impl TestSet {
    pub fn from_dataset(dataset: &vision::Dataset) -> Self {
        Self {
            images: dataset.test_images.clone(),
            labels: dataset.test_labels.clone(),
        }
    }

    pub fn load(data_dir: &Path) -> Result<Self> {
        let dataset = load_mnist(data_dir)?;
        Ok(Self::from_dataset(&dataset))
    }

    pub fn len(&self) -> usize {
        self.images.dim(0).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-encode the sample at `idx` as a base64 PNG with its label.
    pub fn sample(&self, idx: usize) -> Result<TestSample> {
        let pixels = self.images.get(idx)?.to_vec1::<f32>()?;
        let bytes: Vec<u8> = pixels
            .iter()
            .map(|p| (p * 255.0).round().clamp(0.0, 255.0) as u8)
            .collect();
        let png = encode_png_gray(IMAGE_DIM as u32, IMAGE_DIM as u32, &bytes)?;

        let label = self.labels.get(idx)?.to_scalar::<u8>()?;

        Ok(TestSample {
            png_base64: BASE64.encode(png),
            label,
        })
    }

    /// A uniformly random held-out sample.
    pub fn random_sample(&self) -> Result<TestSample> {
        if self.is_empty() {
            anyhow::bail!("Test set is empty");
        }
        let idx = rand::thread_rng().gen_range(0..self.len());
        self.sample(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn tiny_test_set() -> TestSet {
        let device = Device::Cpu;
        // Four flat images with distinct constant intensities.
        let pixels: Vec<f32> = (0..4)
            .flat_map(|i| vec![i as f32 / 4.0; IMAGE_DIM * IMAGE_DIM])
            .collect();
        let images = Tensor::from_vec(pixels, (4, IMAGE_DIM * IMAGE_DIM), &device).unwrap();
        let labels = Tensor::new(&[7u8, 1, 3, 9], &device).unwrap();
        TestSet { images, labels }
    }

    #[test]
    fn test_sample_encodes_png_and_label() {
        let set = tiny_test_set();
        let sample = set.sample(0).unwrap();

        assert_eq!(sample.label, 7);
        let png = BASE64.decode(sample.png_base64).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (IMAGE_DIM as u32, IMAGE_DIM as u32));
    }

    #[test]
    fn test_random_sample_in_range() {
        let set = tiny_test_set();
        for _ in 0..16 {
            let sample = set.random_sample().unwrap();
            assert!([7u8, 1, 3, 9].contains(&sample.label));
        }
    }

    #[test]
    fn test_empty_set_rejects_sampling() {
        let device = Device::Cpu;
        let set = TestSet {
            images: Tensor::zeros((0, IMAGE_DIM * IMAGE_DIM), DType::F32, &device).unwrap(),
            labels: Tensor::zeros(0, DType::U8, &device).unwrap(),
        };
        assert!(set.random_sample().is_err());
    }
}
