use crate::{
    convert, train, train_simple, ConvertConfig, ForestConfig,
    MobileNetV2Config, ModelConfig, PrepareConfig, PredictConfig, Predictor, SimpleTrainingConfig,
    TrainingConfig, DEFAULT_FOLDERS,
};
use anyhow::Context as _;
use burn::{backend::Autodiff, optim::AdamConfig};
use clap::{CommandFactory as _, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    #[clap(subcommand)]
    subcmd: SubCmd,
}

#[derive(Debug, Subcommand)]
enum SubCmd {
    /// Pad and resize the raw landmark photos into `<name>_processed` folders.
    Prepare {
        /// Directory holding the landmark folders
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
        /// Comma separated landmark folder names
        #[arg(short, long, value_delimiter = ',', default_values = DEFAULT_FOLDERS)]
        folders: Vec<String>,
        /// Side of the square output images
        #[arg(short, long, default_value = "224")]
        size: u32,
        /// JPEG quality of the output images
        #[arg(short, long, default_value = "85")]
        quality: u8,
    },
    /// Fit a random forest on flattened grayscale images.
    TrainSimple {
        /// Directory holding the `*_processed` folders
        #[arg(short, long, default_value = ".")]
        data_dir: PathBuf,
        /// Directory to save the forest, labels and model info
        #[arg(short, long, default_value = "landmarks_simple")]
        artifact_dir: PathBuf,
        #[arg(short, long, default_value = "100")]
        n_trees: usize,
        #[arg(short, long, default_value = "20")]
        max_depth: usize,
        #[arg(short, long, default_value = "224")]
        image_size: u32,
        /// Random seed for the split and the forest
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
    /// Train the MobileNetV2 transfer-learning network.
    TrainDeep {
        /// Directory holding the `*_processed` folders
        #[arg(short, long, default_value = ".")]
        data_dir: PathBuf,
        /// Directory to save the network, labels, summary and history
        #[arg(short, long, default_value = "landmarks_deep")]
        artifact_dir: PathBuf,
        /// Pretrained MobileNetV2 weights: a torchvision state dict (`.pt`/`.pth`),
        /// a burn backbone record, or a network saved by an earlier `train-deep`
        #[arg(short, long)]
        pretrained: Option<PathBuf>,
        /// Backbone width multiplier
        #[arg(short, long, default_value = "1.0")]
        width_mult: f64,
        #[arg(short, long, default_value = "224")]
        image_size: usize,
        #[arg(short, long, default_value = "50")]
        num_epochs: usize,
        #[arg(short, long, default_value = "32")]
        batch_size: usize,
        /// Number of workers for data loading
        #[arg(long, default_value = "1")]
        num_workers: usize,
        /// Initial learning rate, halved when the validation loss plateaus
        #[arg(short, long, default_value = "1.0e-3")]
        learning_rate: f64,
        /// Epochs without a better validation accuracy before stopping
        #[arg(short, long, default_value = "10")]
        early_stopping: usize,
        /// Epochs without a better validation loss before reducing the learning rate
        #[arg(long, default_value = "5")]
        lr_patience: usize,
        /// Random seed for reproducibility
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
    /// Compress the deep network to a half-precision record and smoke-test it.
    Convert {
        /// Directory written by `train-deep`
        #[arg(short, long, default_value = "landmarks_deep")]
        artifact_dir: PathBuf,
        /// Seed of the random test input
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
    /// Classify images with the random forest.
    Predict {
        /// Directory written by `train-simple`
        #[arg(short, long, default_value = "landmarks_simple")]
        artifact_dir: PathBuf,
        #[arg(short, long, default_value = "224")]
        image_size: u32,
        /// Images to classify
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// generate auto completion script
    GenCompletion {
        /// shell name
        shell: Shell,
    },
}

#[cfg(all(feature = "tch", not(feature = "f16")))]
type MyBackend = burn::backend::LibTorch<f32, i8>;
#[cfg(all(feature = "tch", feature = "f16"))]
type MyBackend = burn::backend::LibTorch<burn::tensor::f16, i8>;
#[cfg(all(feature = "candle", not(feature = "tch"), not(feature = "f16")))]
type MyBackend = burn::backend::Candle<f32, i64>;
#[cfg(all(feature = "candle", not(feature = "tch"), feature = "f16"))]
type MyBackend = burn::backend::Candle<burn::tensor::f16, i64>;
#[cfg(all(feature = "ndarray", not(any(feature = "tch", feature = "candle"))))]
type MyBackend = burn::backend::NdArray<f32>;

type MyAutodiffBackend = Autodiff<MyBackend>;

fn device() -> <MyBackend as burn::tensor::backend::Backend>::Device {
    #[cfg(all(feature = "tch", target_os = "macos"))]
    let device = burn::backend::libtorch::LibTorchDevice::Mps;
    #[cfg(all(feature = "tch", not(target_os = "macos")))]
    let device = burn::backend::libtorch::LibTorchDevice::Cuda(0);

    #[cfg(all(feature = "candle", not(feature = "tch"), target_os = "macos"))]
    let device = burn::backend::candle::CandleDevice::metal(0);
    #[cfg(all(feature = "candle", not(feature = "tch"), not(target_os = "macos")))]
    let device = burn::backend::candle::CandleDevice::cuda(0);

    #[cfg(all(feature = "ndarray", not(any(feature = "tch", feature = "candle"))))]
    let device = burn::backend::ndarray::NdArrayDevice::Cpu;

    device
}

/// Missing inputs and empty datasets end the command with a message, not a failure.
fn graceful<T>(result: crate::error::Result<T>, what: &str) -> anyhow::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_graceful() => {
            println!("{e}");
            Ok(None)
        }
        Err(e) => Err(anyhow::Error::from(e).context(format!("{what} failed"))),
    }
}

fn print_files(files: &[PathBuf]) {
    println!("Files created:");
    for file in files {
        println!("- {}", file.display());
    }
}

pub fn run() -> anyhow::Result<()> {
    let args = Cli::parse();
    match args.subcmd {
        SubCmd::Prepare {
            root,
            folders,
            size,
            quality,
        } => {
            let config = PrepareConfig::new(root, folders)
                .with_size(size)
                .with_quality(quality);
            let report = crate::prepare(&config).context("image preparation failed")?;
            println!("{report}");
        }
        SubCmd::TrainSimple {
            data_dir,
            artifact_dir,
            n_trees,
            max_depth,
            image_size,
            seed,
        } => {
            let config = SimpleTrainingConfig::new(
                ForestConfig::new()
                    .with_n_trees(n_trees)
                    .with_max_depth(max_depth)
                    .with_seed(seed),
                data_dir,
            )
            .with_image_size(image_size)
            .with_seed(seed);
            if let Some(report) = graceful(train_simple(&artifact_dir, config), "simple training")? {
                print_files(&report.files);
            }
        }
        SubCmd::TrainDeep {
            data_dir,
            artifact_dir,
            pretrained,
            width_mult,
            image_size,
            num_epochs,
            batch_size,
            num_workers,
            learning_rate,
            early_stopping,
            lr_patience,
            seed,
        } => {
            let config = TrainingConfig::new(
                ModelConfig::new(MobileNetV2Config::new().with_width_mult(width_mult))
                    .with_image_size(image_size),
                AdamConfig::new(),
                data_dir,
            )
            .with_backbone_weights(pretrained)
            .with_num_epochs(num_epochs)
            .with_batch_size(batch_size)
            .with_num_workers(num_workers)
            .with_learning_rate(learning_rate)
            .with_early_stopping(early_stopping)
            .with_lr_patience(lr_patience)
            .with_seed(seed);
            let outcome = train::<MyAutodiffBackend>(&artifact_dir, config, device());
            if let Some(outcome) = graceful(outcome, "deep training")? {
                print_files(&outcome.files);
            }
        }
        SubCmd::Convert { artifact_dir, seed } => {
            let config = ConvertConfig::new(artifact_dir).with_seed(seed);
            if let Some(report) = graceful(convert::<MyBackend>(&config, device()), "conversion")? {
                println!("{report}");
            }
        }
        SubCmd::Predict {
            artifact_dir,
            image_size,
            images,
        } => {
            let config = PredictConfig::new(artifact_dir).with_image_size(image_size);
            let Some(predictor) = graceful(Predictor::load(&config), "loading the forest")? else {
                return Ok(());
            };
            for image in images {
                let prediction = predictor
                    .predict(&image)
                    .with_context(|| format!("cannot classify {}", image.display()))?;
                println!("{}\t{prediction}", image.display());
            }
        }
        SubCmd::GenCompletion { shell } => {
            generate(shell, &mut Cli::command(), "landmarks", &mut std::io::stdout());
        }
    }
    Ok(())
}

