use crate::{
    data::{ImageBatch, ImageBatcher, ImageDataSet},
    dataset::LandmarkDataset,
    error::{self, LandmarkError},
    labels::Labels,
    metrics::{ClassificationReport, ConfusionMatrix},
    model::{
        ClassifierHead, FullRecorder, LandmarkClassifier, MobileNetV2, ModelConfig, NetworkConfig,
        BEST_MODEL_FILE, MODEL_CONFIG_FILE, MODEL_FILE,
    },
    plot::{EpochRecord, TrainingHistory},
    utils::create_dir,
};
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

#[derive(Config)]
pub struct TrainingConfig {
    model: ModelConfig,
    optimizer: AdamConfig,
    /// Directory holding the `*_processed` folders
    data_dir: PathBuf,
    /// Burn record with pretrained MobileNetV2 weights
    backbone_weights: Option<PathBuf>,
    #[config(default = 50)]
    num_epochs: usize,
    #[config(default = 32)]
    batch_size: usize,
    #[config(default = 1)]
    num_workers: usize,
    #[config(default = 42)]
    seed: u64,
    #[config(default = 1.0e-3)]
    learning_rate: f64,
    /// Epochs without a better validation accuracy before stopping
    #[config(default = 10)]
    early_stopping: usize,
    /// Epochs without a better validation loss before halving the learning rate
    #[config(default = 5)]
    lr_patience: usize,
    #[config(default = 0.5)]
    lr_factor: f64,
    #[config(default = 1.0e-7)]
    min_learning_rate: f64,
}

#[derive(Debug)]
pub struct TrainingOutcome {
    pub labels: Labels,
    pub history: TrainingHistory,
    pub test_accuracy: f64,
    pub confusion: ConfusionMatrix,
    pub files: Vec<PathBuf>,
}

/// Running loss and hit counts over one pass.
#[derive(Debug, Default)]
struct Tally {
    loss: f64,
    correct: usize,
    seen: usize,
}

impl Tally {
    fn add<B: Backend>(&mut self, loss: Tensor<B, 1>, output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) {
        let n = targets.dims()[0];
        self.loss += loss.into_scalar().elem::<f64>() * n as f64;
        self.correct += output
            .argmax(1)
            .squeeze::<1>(1)
            .equal(targets)
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>() as usize;
        self.seen += n;
    }

    fn loss(&self) -> f64 {
        if self.seen == 0 {
            0.
        } else {
            self.loss / self.seen as f64
        }
    }

    fn accuracy(&self) -> f64 {
        if self.seen == 0 {
            0.
        } else {
            self.correct as f64 / self.seen as f64
        }
    }
}

/// Learning-rate reduction when the validation loss stops improving.
#[derive(Debug)]
struct Plateau {
    best: f64,
    wait: usize,
    patience: usize,
    factor: f64,
    min: f64,
}

impl Plateau {
    fn step(&mut self, loss: f64, lr: f64) -> f64 {
        if loss < self.best {
            self.best = loss;
            self.wait = 0;
            return lr;
        }
        self.wait += 1;
        if self.wait < self.patience {
            return lr;
        }
        self.wait = 0;
        (lr * self.factor).max(self.min)
    }
}

/// Keeps the model with the best validation accuracy and stops once it has
/// not improved for `patience` epochs.
#[derive(Debug)]
struct EarlyStopping<M> {
    best: Option<(f64, M)>,
    since_best: usize,
    patience: usize,
}

impl<M: Clone> EarlyStopping<M> {
    fn new(patience: usize) -> Self {
        Self {
            best: None,
            since_best: 0,
            patience,
        }
    }

    /// Records one epoch. `checkpoint` runs only when `accuracy` beats every
    /// earlier epoch. Returns whether training should stop.
    fn end_epoch(
        &mut self,
        accuracy: f64,
        model: &M,
        checkpoint: impl FnOnce(&M) -> error::Result<()>,
    ) -> error::Result<bool> {
        if self.best.as_ref().map_or(true, |(best, _)| accuracy > *best) {
            checkpoint(model)?;
            self.best = Some((accuracy, model.clone()));
            self.since_best = 0;
        } else {
            self.since_best += 1;
        }
        Ok(self.since_best >= self.patience)
    }

    fn into_best(self) -> Option<(f64, M)> {
        self.best
    }
}

fn save_network<B: Backend>(model: LandmarkClassifier<B>, path: &Path) -> error::Result<()> {
    model
        .save_file(path, &FullRecorder::new())
        .map_err(LandmarkError::record(path))
}

fn evaluate<B: Backend>(
    backbone: &MobileNetV2<B>,
    head: &ClassifierHead<B>,
    loader: &Arc<dyn DataLoader<ImageBatch<B>>>,
) -> (Tally, Vec<usize>) {
    let mut tally = Tally::default();
    let mut predictions = vec![];
    for batch in loader.iter() {
        let output = head.forward_classification(backbone.forward(batch.images), batch.targets);
        predictions.extend(
            output
                .output
                .clone()
                .argmax(1)
                .into_data()
                .convert::<i64>()
                .iter::<i64>()
                .map(|p| p as usize),
        );
        tally.add(output.loss, output.output, output.targets);
    }
    (tally, predictions)
}

pub fn train<B: AutodiffBackend>(
    artifact_dir: &Path,
    config: TrainingConfig,
    device: B::Device,
) -> error::Result<TrainingOutcome> {
    create_dir(artifact_dir)?;

    B::seed(config.seed);

    let config_path = artifact_dir.join("train_config.json");
    config
        .save(&config_path)
        .map_err(LandmarkError::io(&config_path))?;

    let dataset = LandmarkDataset::discover(&config.data_dir, config.model.image_size as u32)?;
    println!("{dataset}");
    let split = dataset.split(config.seed);
    println!("{split}");
    let LandmarkDataset { labels, samples, .. } = dataset;
    let num_classes = labels.len();
    let samples = Arc::new(samples);

    let backbone = config
        .model
        .init_backbone::<B::InnerBackend>(&device, config.backbone_weights.as_deref())?;
    if config.backbone_weights.is_none() {
        log::warn!("no pretrained backbone weights given, the frozen backbone is randomly initialised");
    }
    let mut head = config.model.init_head::<B>(&device, num_classes);
    let mut optim = config.optimizer.init::<B, ClassifierHead<B>>();

    let dataloader_train = DataLoaderBuilder::new(ImageBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(ImageDataSet::train(samples.clone(), split.train.clone()));
    let dataloader_valid = DataLoaderBuilder::new(ImageBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(ImageDataSet::eval(samples.clone(), split.valid.clone()));
    let test_set = ImageDataSet::eval(samples.clone(), split.test.clone());
    let test_targets = test_set.targets();
    let dataloader_test = DataLoaderBuilder::new(ImageBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(test_set);

    let network = NetworkConfig::new(config.model.clone(), num_classes);
    let best_path = artifact_dir.join(BEST_MODEL_FILE);
    let mut history = TrainingHistory::default();
    let mut lr = config.learning_rate;
    let mut plateau = Plateau {
        best: f64::INFINITY,
        wait: 0,
        patience: config.lr_patience,
        factor: config.lr_factor,
        min: config.min_learning_rate,
    };
    let mut stopping = EarlyStopping::new(config.early_stopping);

    for epoch in 1..=config.num_epochs {
        let mut train_tally = Tally::default();
        for batch in dataloader_train.iter() {
            let features = Tensor::<B, 4>::from_inner(backbone.forward(batch.images));
            let targets = Tensor::<B, 1, Int>::from_inner(batch.targets);
            let output = head.forward_classification(features, targets);
            let grads = GradientsParams::from_grads(output.loss.backward(), &head);
            train_tally.add(
                output.loss.inner(),
                output.output.inner(),
                output.targets.inner(),
            );
            head = optim.step(lr, head, grads);
        }

        let (valid_tally, _) = evaluate(&backbone, &head.valid(), &dataloader_valid);
        let record = EpochRecord {
            epoch,
            train_loss: train_tally.loss(),
            train_accuracy: train_tally.accuracy(),
            valid_loss: valid_tally.loss(),
            valid_accuracy: valid_tally.accuracy(),
            learning_rate: lr,
        };
        log::info!(
            "epoch {epoch}/{}: loss {:.4} acc {:.4} val_loss {:.4} val_acc {:.4} lr {lr:e}",
            config.num_epochs,
            record.train_loss,
            record.train_accuracy,
            record.valid_loss,
            record.valid_accuracy
        );
        history.epochs.push(record);

        let stop = stopping.end_epoch(valid_tally.accuracy(), &head, |head| {
            log::info!(
                "validation accuracy improved to {:.4}, saving {}",
                valid_tally.accuracy(),
                best_path.display()
            );
            save_network(LandmarkClassifier::new(backbone.clone(), head.valid()), &best_path)
        })?;

        let next_lr = plateau.step(valid_tally.loss(), lr);
        if next_lr < lr {
            log::info!("reducing learning rate to {next_lr:e}");
        }
        lr = next_lr;

        if stop {
            log::info!(
                "no improvement in validation accuracy for {} epochs, stopping",
                config.early_stopping
            );
            break;
        }
    }

    if let Some((acc, best_head)) = stopping.into_best() {
        log::info!("restoring weights with validation accuracy {acc:.4}");
        head = best_head;
    }
    let head = head.valid();

    let (test_tally, predictions) = evaluate(&backbone, &head, &dataloader_test);
    let confusion = ConfusionMatrix::new(num_classes, &test_targets, &predictions);
    let report = ClassificationReport::from_confusion(labels.names(), &confusion);
    let test_accuracy = test_tally.accuracy();
    println!("Test Accuracy: {test_accuracy:.4} ({:.2}%)", test_accuracy * 100.);
    println!("Confusion Matrix:\n{confusion}");
    println!("Classification Report:\n{report}");

    let model = LandmarkClassifier::new(backbone, head);
    let summary_path = artifact_dir.join("model_summary.txt");
    std::fs::write(&summary_path, model.summary(&network)).map_err(LandmarkError::io(&summary_path))?;

    let model_path = artifact_dir.join(MODEL_FILE);
    save_network(model, &model_path)?;
    let network_path = artifact_dir.join(MODEL_CONFIG_FILE);
    network
        .save(&network_path)
        .map_err(LandmarkError::io(&network_path))?;
    let labels_path = labels.save_into(artifact_dir)?;
    let history_json = artifact_dir.join("training_history.json");
    history.save(&history_json)?;
    let history_png = artifact_dir.join("training_history.png");
    history.plot(&history_png)?;

    Ok(TrainingOutcome {
        labels,
        history,
        test_accuracy,
        confusion,
        files: vec![
            model_path.with_extension("mpk"),
            network_path,
            labels_path,
            summary_path,
            history_json,
            history_png,
            config_path,
        ],
    })
}
