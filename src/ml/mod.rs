pub mod cnn;
pub mod dataset;
pub mod inference;
pub mod training;

pub use cnn::{
    feature_map_size, load_and_normalize_image, load_and_normalize_image_with_size,
    FractureClassifier, ModelConfig, CLASS_NAMES, IMAGE_SIZE, THRESHOLD,
};
pub use dataset::{FractureBatch, FractureBatcher, FractureDataset, FractureItem};
pub use inference::{label_for, InferenceEngine, Prediction};
pub use training::{select_device, train_model};
