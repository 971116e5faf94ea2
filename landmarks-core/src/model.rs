use crate::error::{self, LandmarkError};
use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder, RecorderError},
    tensor::activation::softmax,
    train::ClassificationOutput,
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use std::{fmt::Write as _, path::Path};

/// Full-precision network, saved as `<name>.mpk`
pub const MODEL_FILE: &str = "landmark_model";
/// Best validation-accuracy snapshot taken during training
pub const BEST_MODEL_FILE: &str = "best_landmark_model";
pub const MODEL_CONFIG_FILE: &str = "model_config.json";

pub type FullRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Statistics the torchvision ImageNet weights were trained with.
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// `[t, c, n, s]`: expansion factor, output channels, repeats, first stride.
const INVERTED_RESIDUAL_SETTINGS: [[usize; 4]; 7] = [
    [1, 16, 1, 1],
    [6, 24, 2, 2],
    [6, 32, 3, 2],
    [6, 64, 4, 2],
    [6, 96, 3, 1],
    [6, 160, 3, 2],
    [6, 320, 1, 1],
];

fn make_divisible(v: f64, divisor: usize) -> usize {
    let rounded = ((v + divisor as f64 / 2.) as usize / divisor * divisor).max(divisor);
    if (rounded as f64) < 0.9 * v {
        rounded + divisor
    } else {
        rounded
    }
}

#[derive(Module, Clone, Debug, Default)]
pub struct Relu6;

impl Relu6 {
    pub fn forward<B: Backend, const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        input.clamp(0., 6.)
    }
}

#[derive(Module, Debug)]
pub struct ConvNorm<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    activation: Option<Relu6>,
}

impl<B: Backend> ConvNorm<B> {
    fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        groups: usize,
        activation: bool,
        device: &B::Device,
    ) -> Self {
        let padding = (kernel - 1) / 2;
        Self {
            conv: Conv2dConfig::new(channels, [kernel, kernel])
                .with_stride([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .with_groups(groups)
                .with_bias(false)
                .init(device),
            norm: BatchNormConfig::new(channels[1]).init(device),
            activation: activation.then_some(Relu6),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.norm.forward(self.conv.forward(input));
        match &self.activation {
            Some(act) => act.forward(x),
            None => x,
        }
    }
}

#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvNorm<B>>,
    depthwise: ConvNorm<B>,
    project: ConvNorm<B>,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(input: usize, output: usize, stride: usize, expand_ratio: usize, device: &B::Device) -> Self {
        let hidden = input * expand_ratio;
        Self {
            expand: (expand_ratio != 1).then(|| ConvNorm::new([input, hidden], 1, 1, 1, true, device)),
            depthwise: ConvNorm::new([hidden, hidden], 3, stride, hidden, true, device),
            project: ConvNorm::new([hidden, output], 1, 1, 1, false, device),
        }
    }

    /// The shortcut applies whenever the block keeps the input shape.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone()),
            None => input.clone(),
        };
        let x = self.project.forward(self.depthwise.forward(x));
        if x.dims() == input.dims() {
            x + input
        } else {
            x
        }
    }
}

/// MobileNetV2 without its classifier.
#[derive(Module, Debug)]
pub struct MobileNetV2<B: Backend> {
    stem: ConvNorm<B>,
    blocks: Vec<InvertedResidual<B>>,
    last: ConvNorm<B>,
}

impl<B: Backend> MobileNetV2<B> {
    /// # Shapes
    ///   - Images [batch_size, 3, height, width]
    ///   - Output [batch_size, out_channels, height / 32, width / 32]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let device = images.device();
        let mean = Tensor::<B, 1>::from_floats(IMAGENET_MEAN, &device).reshape([1, 3, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(IMAGENET_STD, &device).reshape([1, 3, 1, 1]);
        let x = self.stem.forward((images - mean) / std);
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        self.last.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct MobileNetV2Config {
    #[config(default = 1.0)]
    width_mult: f64,
}

impl MobileNetV2Config {
    pub fn out_channels(&self) -> usize {
        make_divisible(1280. * self.width_mult.max(1.), 8)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> MobileNetV2<B> {
        let mut input = make_divisible(32. * self.width_mult, 8);
        let stem = ConvNorm::new([3, input], 3, 2, 1, true, device);
        let mut blocks = vec![];
        for [t, c, n, s] in INVERTED_RESIDUAL_SETTINGS {
            let output = make_divisible(c as f64 * self.width_mult, 8);
            for i in 0..n {
                let stride = if i == 0 { s } else { 1 };
                blocks.push(InvertedResidual::new(input, output, stride, t, device));
                input = output;
            }
        }
        let last = ConvNorm::new([input, self.out_channels()], 1, 1, 1, true, device);
        MobileNetV2 { stem, blocks, last }
    }

    /// Builds the backbone and loads pretrained weights.
    ///
    /// `.pt` / `.pth` files are torchvision `mobilenet_v2` state dicts. Anything
    /// else is read as a burn record holding either a bare backbone or a whole
    /// [`LandmarkClassifier`], whose backbone is taken.
    pub fn init_pretrained<B: Backend>(&self, weights: &Path, device: &B::Device) -> error::Result<MobileNetV2<B>> {
        let torchvision = weights
            .extension()
            .is_some_and(|e| e == "pt" || e == "pth");
        let record = if torchvision {
            if self.width_mult != 1.0 {
                return Err(LandmarkError::Other(format!(
                    "torchvision weights need width multiplier 1.0, got {}",
                    self.width_mult
                )));
            }
            load_torchvision(weights, device).map_err(LandmarkError::record(weights))?
        } else {
            let recorder = FullRecorder::new();
            let path = weights.to_path_buf();
            match <FullRecorder as Recorder<B>>::load::<MobileNetV2Record<B>>(&recorder, path.clone(), device) {
                Ok(record) => record,
                Err(_) => {
                    <FullRecorder as Recorder<B>>::load::<LandmarkClassifierRecord<B>>(&recorder, path, device)
                        .map_err(LandmarkError::record(weights))?
                        .backbone
                }
            }
        };
        log::info!("loaded backbone weights from {}", weights.display());
        Ok(self.init::<B>(device).load_record(record))
    }
}

fn load_torchvision<B: Backend>(path: &Path, device: &B::Device) -> Result<MobileNetV2Record<B>, RecorderError> {
    let args = torchvision_key_remap()
        .iter()
        .fold(LoadArgs::new(path.to_path_buf()), |args, (pattern, replacement)| {
            args.with_key_remap(pattern, replacement)
        });
    PyTorchFileRecorder::<FullPrecisionSettings>::default().load(args, device)
}

/// `(pattern, replacement)` pairs renaming torchvision `mobilenet_v2` keys
/// (`features.N...`) to this module tree. The classifier keys are left
/// unmatched and ignored.
fn torchvision_key_remap() -> Vec<(String, String)> {
    let mut remap = vec![
        (r"^features\.0\.0\.".to_string(), "stem.conv.".to_string()),
        (r"^features\.0\.1\.".to_string(), "stem.norm.".to_string()),
    ];
    let mut feature = 1;
    for [t, _, n, _] in INVERTED_RESIDUAL_SETTINGS {
        let layers: &[(&str, &str)] = if t == 1 {
            &[
                ("conv.0.0", "depthwise.conv"),
                ("conv.0.1", "depthwise.norm"),
                ("conv.1", "project.conv"),
                ("conv.2", "project.norm"),
            ]
        } else {
            &[
                ("conv.0.0", "expand.conv"),
                ("conv.0.1", "expand.norm"),
                ("conv.1.0", "depthwise.conv"),
                ("conv.1.1", "depthwise.norm"),
                ("conv.2", "project.conv"),
                ("conv.3", "project.norm"),
            ]
        };
        for _ in 0..n {
            for (from, to) in layers {
                remap.push((
                    format!(r"^features\.{feature}\.{}\.", from.replace('.', r"\.")),
                    format!("blocks.{}.{to}.", feature - 1),
                ));
            }
            feature += 1;
        }
    }
    remap.push((format!(r"^features\.{feature}\.0\."), "last.conv.".to_string()));
    remap.push((format!(r"^features\.{feature}\.1\."), "last.norm.".to_string()));
    remap
}

/// Pooling, two hidden layers with dropout, and the class logits.
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pool: AdaptiveAvgPool2d,
    fc1: Linear<B>,
    dropout1: Dropout,
    fc2: Linear<B>,
    dropout2: Dropout,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> ClassifierHead<B> {
    /// # Shapes
    ///   - Features [batch_size, channels, height, width]
    ///   - Output [batch_size, num_classes]
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(features).flatten::<2>(1, 3);
        let x = self.dropout1.forward(self.activation.forward(self.fc1.forward(x)));
        let x = self.dropout2.forward(self.activation.forward(self.fc2.forward(x)));
        self.output.forward(x)
    }

    pub fn forward_classification(
        &self,
        features: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(features);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());
        ClassificationOutput::new(loss, output, targets)
    }
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    backbone: MobileNetV2Config,
    #[config(default = 224)]
    pub image_size: usize,
    #[config(default = 1024)]
    hidden1: usize,
    #[config(default = 512)]
    hidden2: usize,
    #[config(default = 0.5)]
    dropout1: f64,
    #[config(default = 0.3)]
    dropout2: f64,
}

impl ModelConfig {
    pub fn init_backbone<B: Backend>(&self, device: &B::Device, weights: Option<&Path>) -> error::Result<MobileNetV2<B>> {
        match weights {
            Some(path) => self.backbone.init_pretrained(path, device),
            None => Ok(self.backbone.init(device)),
        }
    }

    pub fn init_head<B: Backend>(&self, device: &B::Device, num_classes: usize) -> ClassifierHead<B> {
        ClassifierHead {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: LinearConfig::new(self.backbone.out_channels(), self.hidden1).init(device),
            dropout1: DropoutConfig::new(self.dropout1).init(),
            fc2: LinearConfig::new(self.hidden1, self.hidden2).init(device),
            dropout2: DropoutConfig::new(self.dropout2).init(),
            output: LinearConfig::new(self.hidden2, num_classes).init(device),
            activation: Relu::new(),
        }
    }

    pub fn input_shape(&self) -> [usize; 4] {
        [1, 3, self.image_size, self.image_size]
    }
}

/// What the converter needs to rebuild a trained network.
#[derive(Config, Debug)]
pub struct NetworkConfig {
    pub model: ModelConfig,
    pub num_classes: usize,
}

impl NetworkConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LandmarkClassifier<B> {
        LandmarkClassifier {
            backbone: self.model.backbone.init(device),
            head: self.model.init_head(device, self.num_classes),
        }
    }
}

/// Frozen backbone plus trainable head.
#[derive(Module, Debug)]
pub struct LandmarkClassifier<B: Backend> {
    backbone: MobileNetV2<B>,
    head: ClassifierHead<B>,
}

impl<B: Backend> LandmarkClassifier<B> {
    pub fn new(backbone: MobileNetV2<B>, head: ClassifierHead<B>) -> Self {
        Self { backbone, head }
    }

    /// # Shapes
    ///   - Images [batch_size, 3, height, width]
    ///   - Output [batch_size, num_classes], unnormalised logits
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images))
    }

    /// Class probabilities.
    pub fn infer(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// Layer table with output shapes and parameter counts.
    pub fn summary(&self, config: &NetworkConfig) -> String {
        let size = config.model.image_size;
        let grid = size.div_ceil(32);
        let channels = config.model.backbone.out_channels();
        let head = &self.head;
        let rows = [
            (
                "mobilenet_v2 (frozen)".to_string(),
                format!("[N, {channels}, {grid}, {grid}]"),
                self.backbone.num_params(),
            ),
            ("global_average_pooling".into(), format!("[N, {channels}]"), 0),
            ("dense_relu".into(), format!("[N, {}]", config.model.hidden1), head.fc1.num_params()),
            (format!("dropout({})", config.model.dropout1), format!("[N, {}]", config.model.hidden1), 0),
            ("dense_relu".into(), format!("[N, {}]", config.model.hidden2), head.fc2.num_params()),
            (format!("dropout({})", config.model.dropout2), format!("[N, {}]", config.model.hidden2), 0),
            ("dense_softmax".into(), format!("[N, {}]", config.num_classes), head.output.num_params()),
        ];
        let mut out = String::new();
        let _ = writeln!(out, "Input: [N, 3, {size}, {size}]");
        let _ = writeln!(out, "{:<26}{:<24}{:>12}", "Layer", "Output shape", "Params");
        let _ = writeln!(out, "{}", "=".repeat(62));
        for (name, shape, params) in rows {
            let _ = writeln!(out, "{name:<26}{shape:<24}{params:>12}");
        }
        let _ = writeln!(out, "{}", "=".repeat(62));
        let total = self.num_params();
        let trainable = head.num_params();
        let _ = writeln!(out, "Total params: {total}");
        let _ = writeln!(out, "Trainable params: {trainable}");
        let _ = writeln!(out, "Non-trainable params: {}", total - trainable);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn network(num_classes: usize) -> NetworkConfig {
        NetworkConfig::new(
            ModelConfig::new(MobileNetV2Config::new().with_width_mult(0.25))
                .with_image_size(32)
                .with_hidden1(16)
                .with_hidden2(8),
            num_classes,
        )
    }

    #[test]
    fn divisible_channels() {
        assert_eq!(make_divisible(32., 8), 32);
        assert_eq!(make_divisible(8., 8), 8);
        assert_eq!(make_divisible(24. * 0.35, 8), 8);
        assert_eq!(make_divisible(1280., 8), 1280);
    }

    #[test]
    fn backbone_shapes() {
        let device = Default::default();
        let backbone = MobileNetV2Config::new()
            .with_width_mult(0.25)
            .init::<B>(&device);
        let x = Tensor::<B, 4>::zeros([2, 3, 64, 64], &device);
        assert_eq!(backbone.forward(x).dims(), [2, 1280, 2, 2]);
    }

    #[test]
    fn probabilities_per_class() {
        let device = Default::default();
        let config = network(5);
        let model = config.init::<B>(&device);
        let x = Tensor::<B, 4>::ones([3, 3, 32, 32], &device);
        let probs = model.infer(x);
        assert_eq!(probs.dims(), [3, 5]);
        let sums = probs.sum_dim(1).into_data().to_vec::<f32>().unwrap();
        assert!(sums.iter().all(|s| (s - 1.).abs() < 1e-4));
    }

    #[test]
    fn summary_counts_trainable_head() {
        let device = Default::default();
        let config = network(3);
        let model = config.init::<B>(&device);
        let summary = model.summary(&config);
        let head = (1280 * 16 + 16) + (16 * 8 + 8) + (8 * 3 + 3);
        assert!(summary.contains(&format!("Trainable params: {head}")));
        assert!(summary.contains("mobilenet_v2 (frozen)"));
    }

    fn features(backbone: &MobileNetV2<B>) -> TensorData {
        let x = Tensor::<B, 4>::ones([1, 3, 32, 32], &Default::default());
        backbone.forward(x).into_data()
    }

    #[test]
    fn backbone_from_saved_network() {
        let device = Default::default();
        let config = network(2);
        let model = config.init::<B>(&device);
        let expected = features(&model.backbone);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MODEL_FILE);
        model.save_file(path.clone(), &FullRecorder::new()).unwrap();

        let backbone = config
            .model
            .init_backbone::<B>(&device, Some(path.with_extension("mpk").as_path()))
            .unwrap();
        features(&backbone).assert_approx_eq(&expected, 5);
    }

    #[test]
    fn backbone_from_backbone_record() {
        let device = Default::default();
        let config = MobileNetV2Config::new().with_width_mult(0.25);
        let backbone = config.init::<B>(&device);
        let expected = features(&backbone);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backbone");
        backbone.save_file(path.clone(), &FullRecorder::new()).unwrap();

        let loaded = config.init_pretrained::<B>(&path, &device).unwrap();
        features(&loaded).assert_approx_eq(&expected, 5);
    }

    #[test]
    fn torchvision_weights_need_full_width() {
        let err = MobileNetV2Config::new()
            .with_width_mult(0.5)
            .init_pretrained::<B>(Path::new("mobilenet_v2.pth"), &Default::default())
            .unwrap_err();
        assert!(err.to_string().contains("width multiplier"));
    }

    /// Applies the remap the way the loader does: first matching prefix wins.
    fn rename(key: &str) -> Option<String> {
        torchvision_key_remap().into_iter().find_map(|(pattern, replacement)| {
            let prefix = pattern.trim_start_matches('^').replace(r"\.", ".");
            key.strip_prefix(&prefix).map(|rest| format!("{replacement}{rest}"))
        })
    }

    #[test]
    fn torchvision_keys_map_onto_modules() {
        assert_eq!(rename("features.0.0.weight").unwrap(), "stem.conv.weight");
        assert_eq!(rename("features.0.1.running_var").unwrap(), "stem.norm.running_var");
        assert_eq!(rename("features.1.conv.0.0.weight").unwrap(), "blocks.0.depthwise.conv.weight");
        assert_eq!(rename("features.1.conv.1.weight").unwrap(), "blocks.0.project.conv.weight");
        assert_eq!(rename("features.1.conv.2.bias").unwrap(), "blocks.0.project.norm.bias");
        assert_eq!(rename("features.2.conv.0.0.weight").unwrap(), "blocks.1.expand.conv.weight");
        assert_eq!(rename("features.2.conv.1.1.weight").unwrap(), "blocks.1.depthwise.norm.weight");
        assert_eq!(rename("features.11.conv.3.running_mean").unwrap(), "blocks.10.project.norm.running_mean");
        assert_eq!(rename("features.17.conv.2.weight").unwrap(), "blocks.16.project.conv.weight");
        assert_eq!(rename("features.18.0.weight").unwrap(), "last.conv.weight");
        assert_eq!(rename("features.18.1.bias").unwrap(), "last.norm.bias");
        assert_eq!(rename("classifier.1.weight"), None);
    }

    #[test]
    fn every_block_has_a_remap() {
        let blocks = MobileNetV2Config::new().init::<B>(&Default::default()).blocks.len();
        assert_eq!(blocks, 17);
        for block in 1..blocks {
            let key = format!("features.{}.conv.2.weight", block + 1);
            assert_eq!(rename(&key).unwrap(), format!("blocks.{block}.project.conv.weight"));
        }
    }
}
