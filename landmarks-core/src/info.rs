use crate::error::Result;
use crate::utils::{json_from, json_into};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MODEL_INFO_FILE: &str = "model_info.json";
pub const MODEL_NAME: &str = "berlin_landmarks_model";

/// Deployment notes written next to every trained or converted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub version: String,
    pub description: String,
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model_size_mb: Option<f64>,
    pub framework: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub optimization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub feature_type: Option<String>,
}

impl ModelInfo {
    pub fn new(
        description: impl Into<String>,
        framework: impl Into<String>,
        input_shape: Vec<usize>,
        output_shape: Vec<usize>,
        labels: Vec<String>,
    ) -> Self {
        Self {
            model_name: MODEL_NAME.to_string(),
            version: "1.0".to_string(),
            description: description.into(),
            input_shape,
            output_shape,
            labels,
            accuracy: None,
            model_size_mb: None,
            framework: framework.into(),
            optimization: None,
            feature_type: None,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        json_into(path.as_ref(), self)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        json_from(path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_keys_are_omitted() {
        let mut info = ModelInfo::new("d", "Random Forest", vec![4], vec![2], vec![]);
        info.accuracy = Some(0.5);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["model_name"], MODEL_NAME);
        assert_eq!(json["accuracy"], 0.5);
        assert!(json.get("model_size_mb").is_none());
        assert!(json.get("optimization").is_none());
    }
}
