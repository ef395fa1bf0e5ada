pub mod ml_model;
pub mod augment;
pub mod training;
pub mod inference;

pub use ml_model::{FruitClassifier, ModelConfig, IMAGE_SIZE, feature_map_size, image_to_chw, load_rgb_resized, load_and_normalize_image_with_size};
pub use augment::Augmenter;
pub use training::{FruitDataset, EpochMetrics, TrainingReport, train_model};
pub use inference::{Prediction, Predictor};
