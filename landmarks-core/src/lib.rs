#[cfg(any(feature = "ndarray", feature = "tch", feature = "candle"))]
mod cli;
mod convert;
mod data;
mod dataset;
mod error;
mod forest;
mod info;
mod labels;
mod metrics;
mod model;
mod plot;
mod predict;
mod prepare;
mod simple;
mod train;
mod utils;

#[cfg(any(feature = "ndarray", feature = "tch", feature = "candle"))]
pub use cli::run;
pub use convert::{convert, ConversionReport, ConvertConfig, COMPACT_MODEL_FILE};
pub use dataset::{DataSplit, LandmarkDataset, Sample};
pub use error::{LandmarkError, Result};
pub use forest::{Features, ForestConfig, RandomForest, FOREST_FILE};
pub use info::{ModelInfo, MODEL_INFO_FILE};
pub use labels::{Labels, LABELS_FILE};
pub use metrics::{accuracy, ClassificationReport, ConfusionMatrix};
pub use model::{
    LandmarkClassifier, MobileNetV2Config, ModelConfig, NetworkConfig, BEST_MODEL_FILE,
    MODEL_CONFIG_FILE, MODEL_FILE,
};
pub use plot::{EpochRecord, TrainingHistory};
pub use predict::{Prediction, PredictConfig, Predictor};
pub use prepare::{prepare, FolderReport, PrepareConfig, PrepareReport, DEFAULT_FOLDERS};
pub use simple::{train_simple, SimpleTrainingConfig, SimpleTrainingReport};
pub use train::{train, TrainingConfig, TrainingOutcome};
