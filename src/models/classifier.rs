// MNIST classifier - small convolutional network on Candle

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{conv2d, linear, ops, Conv2d, Dropout, Linear, ModuleT, VarBuilder, VarMap};
use std::path::Path;

use super::common::Saveable;
use super::persistence::{load_model_metadata, save_model_with_metadata, weights_path, ModelMetadata};

/// Input images are 28x28 grayscale.
pub const IMAGE_DIM: usize = 28;
/// Ten digit classes.
pub const LABELS: usize = 10;

/// Convolutional network: two conv/pool stages and a two-layer head.
///
/// 28x28 -> conv5 -> 24x24 -> pool -> 12x12 -> conv5 -> 8x8 -> pool -> 4x4,
/// so the flattened feature size entering the head is 64 * 4 * 4 = 1024.
struct ConvNet {
    conv1: Conv2d,
    conv2: Conv2d,
    fc1: Linear,
    fc2: Linear,
    dropout: Dropout,
}

impl ConvNet {
    fn new(vb: VarBuilder) -> Result<Self> {
        let conv1 = conv2d(1, 32, 5, Default::default(), vb.pp("c1"))?;
        let conv2 = conv2d(32, 64, 5, Default::default(), vb.pp("c2"))?;
        let fc1 = linear(1024, 1024, vb.pp("fc1"))?;
        let fc2 = linear(1024, LABELS, vb.pp("fc2"))?;
        Ok(Self {
            conv1,
            conv2,
            fc1,
            fc2,
            dropout: Dropout::new(0.5),
        })
    }

    /// Forward pass over a batch of flattened images, shape (batch, 784).
    fn forward(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, _) = xs.dims2()?;
        let xs = xs
            .reshape((batch, 1, IMAGE_DIM, IMAGE_DIM))?
            .apply(&self.conv1)?
            .max_pool2d(2)?
            .apply(&self.conv2)?
            .max_pool2d(2)?
            .flatten_from(1)?
            .apply(&self.fc1)?
            .relu()?;
        let xs = self.dropout.forward_t(&xs, train)?;
        Ok(xs.apply(&self.fc2)?)
    }
}

/// Result of classifying one image.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Predicted class, 0..=9
    pub digit: u8,
    /// Softmax probabilities for all ten classes
    pub probabilities: Vec<f32>,
}

/// The served classifier: network, weights, and training provenance.
pub struct MnistClassifier {
    net: ConvNet,
    varmap: VarMap,
    device: Device,
    trained: bool,
    test_accuracy: f64,
}

impl MnistClassifier {
    /// Create a fresh, untrained classifier on the given device.
    pub fn new(device: Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let net = ConvNet::new(vb)?;
        Ok(Self {
            net,
            varmap,
            device,
            trained: false,
            test_accuracy: 0.0,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Test-set accuracy (percent) of the loaded weights; 0.0 when untrained.
    pub fn test_accuracy(&self) -> f64 {
        self.test_accuracy
    }

    /// Mark the model as trained with the given test accuracy (percent).
    pub fn set_trained(&mut self, test_accuracy: f64) {
        self.trained = true;
        self.test_accuracy = test_accuracy;
    }

    /// Number of trainable parameters.
    pub fn parameter_count(&self) -> usize {
        self.varmap.all_vars().iter().map(|v| v.elem_count()).sum()
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Batched forward pass; `train` enables dropout.
    pub fn forward_t(&self, images: &Tensor, train: bool) -> Result<Tensor> {
        self.net.forward(images, train)
    }

    /// Classify one flattened image tensor of shape (1, 784).
    pub fn predict(&self, image: &Tensor) -> Result<Prediction> {
        let logits = self.net.forward(image, false)?;
        let probabilities = ops::softmax(&logits, D::Minus1)?
            .squeeze(0)?
            .to_vec1::<f32>()?;
        let digit = probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i as u8)
            .unwrap_or(0);
        Ok(Prediction {
            digit,
            probabilities,
        })
    }
}

impl Saveable for MnistClassifier {
    fn save(&self, stem: &Path) -> Result<()> {
        let metadata = ModelMetadata::new("MnistClassifier", self.trained, self.test_accuracy);
        save_model_with_metadata(stem, &self.varmap, &metadata)
    }

    fn load(stem: &Path) -> Result<Self> {
        let metadata = load_model_metadata(stem)?;
        let device = super::common::get_device()?;

        let mut model = Self::new(device)?;
        model
            .varmap
            .load(weights_path(stem))
            .with_context(|| format!("Failed to load model weights from {:?}", stem))?;
        model.trained = metadata.trained;
        model.test_accuracy = metadata.test_accuracy;

        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_model() -> MnistClassifier {
        MnistClassifier::new(Device::Cpu).unwrap()
    }

    #[test]
    fn test_parameter_count() {
        // conv1: 32*1*5*5 + 32, conv2: 64*32*5*5 + 64,
        // fc1: 1024*1024 + 1024, fc2: 1024*10 + 10
        let model = test_model();
        assert_eq!(model.parameter_count(), 832 + 51_264 + 1_049_600 + 10_250);
    }

    #[test]
    fn test_predict_returns_distribution() {
        let model = test_model();
        let image = Tensor::zeros((1, IMAGE_DIM * IMAGE_DIM), DType::F32, &Device::Cpu).unwrap();

        let prediction = model.predict(&image).unwrap();

        assert!(prediction.digit < 10);
        assert_eq!(prediction.probabilities.len(), LABELS);
        let sum: f32 = prediction.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4, "probabilities sum to {}", sum);
    }

    #[test]
    fn test_new_model_is_untrained() {
        let model = test_model();
        assert!(!model.is_trained());
        assert_eq!(model.test_accuracy(), 0.0);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let stem = dir.path().join("classifier");

        let mut model = test_model();
        model.set_trained(97.5);
        model.save(&stem).unwrap();

        let loaded = MnistClassifier::load(&stem).unwrap();
        assert!(loaded.is_trained());
        assert_eq!(loaded.test_accuracy(), 97.5);
        assert_eq!(loaded.parameter_count(), model.parameter_count());
    }
}
