use crate::{
    dataset::{grayscale_features, LandmarkDataset},
    error::{self, LandmarkError},
    forest::{Features, ForestConfig, FOREST_FILE},
    info::{ModelInfo, MODEL_INFO_FILE},
    metrics::{accuracy, ClassificationReport},
    utils::create_dir,
};
use burn::config::Config;
use std::path::{Path, PathBuf};

#[derive(Config, Debug)]
pub struct SimpleTrainingConfig {
    forest: ForestConfig,
    /// Directory holding the `*_processed` folders
    data_dir: PathBuf,
    #[config(default = 224)]
    image_size: u32,
    #[config(default = 42)]
    seed: u64,
}

#[derive(Debug)]
pub struct SimpleTrainingReport {
    /// Reported for feedback only, never used to pick a model
    pub valid_accuracy: f64,
    pub test_accuracy: f64,
    pub report: ClassificationReport,
    pub files: Vec<PathBuf>,
}

pub fn train_simple(artifact_dir: &Path, config: SimpleTrainingConfig) -> error::Result<SimpleTrainingReport> {
    create_dir(artifact_dir)?;
    let config_path = artifact_dir.join("train_config.json");
    config
        .save(&config_path)
        .map_err(LandmarkError::io(&config_path))?;

    let dataset = LandmarkDataset::discover(&config.data_dir, config.image_size)?;
    println!("{dataset}");
    let n_features = (config.image_size * config.image_size) as usize;
    let rows = dataset
        .samples
        .iter()
        .map(|s| grayscale_features(&s.image))
        .collect::<Vec<_>>();
    let targets = dataset.targets();
    let split = dataset.split(config.seed);
    println!("{split}");

    let subset = |indices: &[usize]| -> error::Result<(Features, Vec<usize>)> {
        let x = Features::with_rows(n_features, indices.iter().map(|&i| rows[i].as_slice()))?;
        Ok((x, indices.iter().map(|&i| targets[i]).collect()))
    };
    let (x_train, y_train) = subset(&split.train)?;
    let (x_valid, y_valid) = subset(&split.valid)?;
    let (x_test, y_test) = subset(&split.test)?;

    log::info!(
        "fitting {} trees (max depth {}) on {} samples",
        config.forest.n_trees,
        config.forest.max_depth,
        x_train.len()
    );
    let forest = config.forest.fit(&x_train, &y_train, dataset.labels.len())?;

    let valid_accuracy = accuracy(&y_valid, &forest.predict_many(&x_valid)?);
    println!(
        "Validation Accuracy: {valid_accuracy:.4} ({:.2}%)",
        valid_accuracy * 100.
    );

    let predictions = forest.predict_many(&x_test)?;
    let test_accuracy = accuracy(&y_test, &predictions);
    let report = ClassificationReport::new(dataset.labels.names(), &y_test, &predictions);
    println!("Test Accuracy: {test_accuracy:.4} ({:.2}%)", test_accuracy * 100.);
    println!("Classification Report:\n{report}");

    let forest_path = artifact_dir.join(FOREST_FILE);
    forest.save(&forest_path)?;
    let labels_path = dataset.labels.save_into(artifact_dir)?;
    let info_path = artifact_dir.join(MODEL_INFO_FILE);
    let mut info = ModelInfo::new(
        "Random Forest model for Berlin landmarks recognition",
        "Random Forest",
        vec![n_features],
        vec![dataset.labels.len()],
        dataset.labels.names().to_vec(),
    );
    info.accuracy = Some(test_accuracy);
    info.feature_type = Some("Flattened grayscale".to_string());
    info.save(&info_path)?;

    Ok(SimpleTrainingReport {
        valid_accuracy,
        test_accuracy,
        report,
        files: vec![forest_path, labels_path, info_path, config_path],
    })
}
