pub mod class_indices;
pub mod model_metadata;
pub mod model_storage;
pub mod inference_config;
pub mod config;

pub use class_indices::ClassIndices;
pub use model_metadata::ModelMetadata;
pub use model_storage::{save_model_with_metadata, load_metadata, load_model_with_metadata, print_metadata_info};
pub use inference_config::InferenceConfig;
pub use config::{AppConfig, AugmentationSettings, DeviceType, GuiSettings, ModelSettings, TrainingSettings};
