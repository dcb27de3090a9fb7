// Neural network model for digit classification

mod classifier;
mod common;
mod persistence;

pub use classifier::{MnistClassifier, Prediction, IMAGE_DIM, LABELS};
pub use common::{device_label, format_param_count, get_device, Saveable};
pub use persistence::{
    load_model_metadata, metadata_path, model_exists, save_model_with_metadata, weights_path,
    ModelMetadata,
};
