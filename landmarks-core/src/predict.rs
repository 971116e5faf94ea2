use crate::{
    dataset::{grayscale_features, load_resized},
    error::{self, LandmarkError},
    forest::{RandomForest, FOREST_FILE},
    labels::{Labels, LABELS_FILE},
};
use burn::config::Config;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
};

#[derive(Config, Debug)]
pub struct PredictConfig {
    /// Directory written by `train-simple`
    artifact_dir: PathBuf,
    #[config(default = 224)]
    image_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{:.4}", self.label, self.confidence)
    }
}

/// A fitted forest together with the label file written beside it.
#[derive(Debug)]
pub struct Predictor {
    forest: RandomForest,
    labels: Labels,
    image_size: u32,
}

impl Predictor {
    pub fn load(config: &PredictConfig) -> error::Result<Self> {
        let forest_path = config.artifact_dir.join(FOREST_FILE);
        if !forest_path.exists() {
            return Err(LandmarkError::MissingInput {
                path: forest_path,
                hint: "Run `landmarks train-simple` first.",
            });
        }
        let forest = RandomForest::load(&forest_path)?;
        let labels = Labels::load(config.artifact_dir.join(LABELS_FILE))?;
        if labels.len() != forest.n_classes() {
            return Err(LandmarkError::Other(format!(
                "{} labels for a forest of {} classes",
                labels.len(),
                forest.n_classes()
            )));
        }
        Ok(Self {
            forest,
            labels,
            image_size: config.image_size,
        })
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn predict(&self, path: &Path) -> error::Result<Prediction> {
        let image = load_resized(path, self.image_size)?;
        let (class, confidence) = self.forest.predict(&grayscale_features(&image))?;
        Ok(Prediction {
            label: self.labels[class].to_string(),
            confidence,
        })
    }
}
