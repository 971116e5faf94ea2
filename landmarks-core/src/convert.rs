use crate::{
    error::{self, LandmarkError},
    info::{ModelInfo, MODEL_INFO_FILE},
    labels::{Labels, LABELS_FILE},
    model::{FullRecorder, LandmarkClassifier, NetworkConfig, MODEL_CONFIG_FILE, MODEL_FILE},
    utils::file_size_mb,
};
use burn::{
    prelude::*,
    record::{FileRecorder, HalfPrecisionSettings, NamedMpkGzFileRecorder},
    tensor::Distribution,
};
use std::{fmt, path::PathBuf};

/// Written next to the full-precision network, which is left untouched
pub const COMPACT_MODEL_FILE: &str = "landmark_model_fp16";

/// Gzipped named MessagePack with half-precision floats.
pub type CompactGzRecorder = NamedMpkGzFileRecorder<HalfPrecisionSettings>;

#[derive(Config, Debug)]
pub struct ConvertConfig {
    /// Directory written by `train-deep`
    artifact_dir: PathBuf,
    #[config(default = 42)]
    seed: u64,
}

#[derive(Debug)]
pub struct ConversionReport {
    pub path: PathBuf,
    pub size_mb: f64,
    pub output_shape: [usize; 2],
    pub output_sum: f32,
    pub info_path: PathBuf,
}

impl fmt::Display for ConversionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Converted model: {} ({:.2} MB)", self.path.display(), self.size_mb)?;
        writeln!(
            f,
            "Test inference: output shape {:?}, sum {:.4}",
            self.output_shape, self.output_sum
        )?;
        write!(f, "Model info: {}", self.info_path.display())
    }
}

/// Checks a single-image probability row and returns its sum.
fn check_output(shape: [usize; 2], values: &[f32], num_classes: usize) -> error::Result<f32> {
    if shape != [1, num_classes] {
        return Err(LandmarkError::Other(format!(
            "converted model produced shape {shape:?}, expected [1, {num_classes}]"
        )));
    }
    if values.iter().any(|v| v.is_nan()) {
        return Err(LandmarkError::Other("converted model produced NaN".into()));
    }
    Ok(values.iter().sum())
}

/// Rewrites the full-precision network as a gzipped half-precision record
/// and checks that the result still runs.
pub fn convert<B: Backend>(config: &ConvertConfig, device: B::Device) -> error::Result<ConversionReport> {
    let dir = &config.artifact_dir;
    let source = dir.join(MODEL_FILE);
    if !source.with_extension("mpk").exists() {
        return Err(LandmarkError::MissingInput {
            path: source.with_extension("mpk"),
            hint: "Run `landmarks train-deep` first.",
        });
    }
    let network_path = dir.join(MODEL_CONFIG_FILE);
    let network = NetworkConfig::load(&network_path).map_err(|e| LandmarkError::Other(format!(
        "cannot read {}: {e}",
        network_path.display()
    )))?;

    B::seed(config.seed);

    let model: LandmarkClassifier<B> = network
        .init(&device)
        .load_file(source.clone(), &FullRecorder::new(), &device)
        .map_err(LandmarkError::record(&source))?;
    log::info!("loaded {}", source.with_extension("mpk").display());

    let target = dir.join(COMPACT_MODEL_FILE);
    model
        .save_file(target.clone(), &CompactGzRecorder::new())
        .map_err(LandmarkError::record(&target))?;
    let path = target.with_extension(<CompactGzRecorder as FileRecorder<B>>::file_extension());
    let size_mb = file_size_mb(&path)?;
    log::info!("saved {} ({size_mb:.2} MB)", path.display());

    let converted: LandmarkClassifier<B> = network
        .init(&device)
        .load_file(target.clone(), &CompactGzRecorder::new(), &device)
        .map_err(LandmarkError::record(&target))?;
    let input_shape = network.model.input_shape();
    let input = Tensor::<B, 4>::random(input_shape, Distribution::Uniform(0., 1.), &device);
    let output = converted.infer(input);
    let output_shape = output.dims();
    let values = output.into_data().convert::<f32>().to_vec::<f32>().map_err(|e| {
        LandmarkError::Other(format!("cannot read converted model output: {e:?}"))
    })?;
    let output_sum = check_output(output_shape, &values, network.num_classes)?;

    let labels = Labels::load_or_empty(dir.join(LABELS_FILE))?;
    let mut info = ModelInfo::new(
        "Custom Berlin landmarks recognition model",
        "Burn",
        input_shape.to_vec(),
        vec![1, network.num_classes],
        labels.names().to_vec(),
    );
    info.model_size_mb = Some(size_mb);
    info.optimization = Some("Quantized (FP16)".to_string());
    let info_path = dir.join(MODEL_INFO_FILE);
    info.save(&info_path)?;

    Ok(ConversionReport {
        path,
        size_mb,
        output_shape,
        output_sum,
        info_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_check_accepts_probabilities() {
        let sum = check_output([1, 3], &[0.2, 0.3, 0.5], 3).unwrap();
        assert!((sum - 1.).abs() < 1e-6);
    }

    #[test]
    fn output_check_rejects_nan() {
        let err = check_output([1, 2], &[f32::NAN, 0.5], 2).unwrap_err();
        assert!(err.to_string().contains("NaN"));
    }

    #[test]
    fn output_check_rejects_wrong_shape() {
        assert!(check_output([1, 2], &[0.5, 0.5], 3).is_err());
        assert!(check_output([2, 3], &[0.; 6], 3).is_err());
    }
}
