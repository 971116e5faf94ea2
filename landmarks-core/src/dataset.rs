use crate::error::{LandmarkError, Result};
use crate::labels::Labels;
use crate::prepare::PROCESSED_SUFFIX;
use crate::utils::images_in;
use image::{imageops::FilterType, RgbImage};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone)]
pub struct Sample {
    pub path: PathBuf,
    pub label: usize,
    pub image: RgbImage,
}

/// Every image of every `*_processed` folder under a root, decoded and
/// resized to a square of the requested size.
#[derive(Debug, Clone)]
pub struct LandmarkDataset {
    pub labels: Labels,
    pub samples: Vec<Sample>,
    /// Images that failed to decode
    pub skipped: usize,
}

/// `*_processed` directories under `root` sorted by name, with the suffix
/// stripped from the landmark name. The position in this list is the
/// class index.
pub fn processed_folders(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut res = vec![];
    for entry in std::fs::read_dir(root).map_err(LandmarkError::io(root))? {
        let path = entry.map_err(LandmarkError::io(root))?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(landmark) = name.strip_suffix(PROCESSED_SUFFIX) {
            if !landmark.is_empty() {
                res.push((landmark.to_string(), path.clone()));
            }
        }
    }
    res.sort();
    Ok(res)
}

pub fn load_resized(path: &Path, size: u32) -> Result<RgbImage> {
    let img = image::open(path).map_err(LandmarkError::image(path))?;
    let img = if img.width() == size && img.height() == size {
        img
    } else {
        img.resize_exact(size, size, FilterType::CatmullRom)
    };
    Ok(img.to_rgb8())
}

/// Mean of the three channels per pixel, scaled to [0, 1], row-major.
pub fn grayscale_features(img: &RgbImage) -> Vec<f32> {
    img.pixels()
        .map(|p| (p[0] as f32 + p[1] as f32 + p[2] as f32) / 3. / 255.)
        .collect()
}

impl LandmarkDataset {
    pub fn discover(root: &Path, size: u32) -> Result<Self> {
        let folders = processed_folders(root)?;
        let mut samples = vec![];
        let mut skipped = 0;
        let mut names = Vec::with_capacity(folders.len());
        for (label, (name, folder)) in folders.into_iter().enumerate() {
            log::info!("{}. {name}", label + 1);
            for path in images_in(&folder) {
                match load_resized(&path, size) {
                    Ok(image) => samples.push(Sample { path, label, image }),
                    Err(e) => {
                        log::error!("skipping {}: {e}", path.display());
                        skipped += 1;
                    }
                }
            }
            names.push(name);
        }
        if samples.is_empty() {
            return Err(LandmarkError::EmptyDataset {
                root: root.to_path_buf(),
            });
        }
        Ok(Self {
            labels: Labels::new(names),
            samples,
            skipped,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn targets(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.label).collect()
    }

    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.labels.len()];
        for s in &self.samples {
            counts[s.label] += 1;
        }
        counts
    }

    pub fn split(&self, seed: u64) -> DataSplit {
        DataSplit::stratified(&self.targets(), seed)
    }
}

impl fmt::Display for LandmarkDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dataset Summary:")?;
        writeln!(f, "  Total images: {}", self.len())?;
        writeln!(f, "  Skipped images: {}", self.skipped)?;
        writeln!(f, "  Number of classes: {}", self.labels.len())?;
        writeln!(f, "Class Distribution:")?;
        for (name, count) in self.labels.names().iter().zip(self.class_counts()) {
            writeln!(f, "  {name}: {count} images")?;
        }
        Ok(())
    }
}

/// Sample indices of a 70/15/15 train/validation/test partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSplit {
    pub train: Vec<usize>,
    pub valid: Vec<usize>,
    pub test: Vec<usize>,
}

impl DataSplit {
    pub const HOLDOUT: f64 = 0.3;

    /// Holds out 30% per class, then halves the holdout per class into
    /// validation and test.
    pub fn stratified(targets: &[usize], seed: u64) -> Self {
        let all = (0..targets.len()).collect::<Vec<_>>();
        let (train, holdout) = stratified_split(&all, targets, Self::HOLDOUT, seed);
        let (valid, test) = stratified_split(&holdout, targets, 0.5, seed);
        Self { train, valid, test }
    }
}

impl fmt::Display for DataSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Data Split:")?;
        writeln!(f, "  Training: {} images", self.train.len())?;
        writeln!(f, "  Validation: {} images", self.valid.len())?;
        write!(f, "  Test: {} images", self.test.len())
    }
}

/// Splits `indices` into `(kept, held_out)`. Each class contributes
/// `round(count * fraction)` of its members to `held_out`. Both halves are
/// returned sorted.
pub fn stratified_split(
    indices: &[usize],
    targets: &[usize],
    fraction: f64,
    seed: u64,
) -> (Vec<usize>, Vec<usize>) {
    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for &i in indices {
        by_class.entry(targets[i]).or_default().push(i);
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut kept = vec![];
    let mut held_out = vec![];
    for members in by_class.values_mut() {
        members.shuffle(&mut rng);
        let n = ((members.len() as f64 * fraction).round() as usize).min(members.len());
        held_out.extend_from_slice(&members[..n]);
        kept.extend_from_slice(&members[n..]);
    }
    kept.sort_unstable();
    held_out.sort_unstable();
    (kept, held_out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn targets() -> Vec<usize> {
        (0..200).map(|i| if i < 140 { 0 } else if i < 180 { 1 } else { 2 }).collect()
    }

    #[test]
    fn split_is_a_partition() {
        let targets = targets();
        let split = DataSplit::stratified(&targets, 42);
        let mut seen = HashSet::new();
        for i in split.train.iter().chain(&split.valid).chain(&split.test) {
            assert!(seen.insert(*i), "index {i} appears twice");
        }
        assert_eq!(seen.len(), targets.len());
    }

    #[test]
    fn split_keeps_class_proportions() {
        let targets = targets();
        let split = DataSplit::stratified(&targets, 42);
        assert_eq!(split.train.len(), 140);
        assert_eq!(split.valid.len(), 30);
        assert_eq!(split.test.len(), 30);
        let count = |set: &[usize], class| set.iter().filter(|&&i| targets[i] == class).count();
        assert_eq!(count(&split.train, 0), 98);
        assert_eq!(count(&split.train, 1), 28);
        assert_eq!(count(&split.train, 2), 14);
        assert_eq!(count(&split.test, 1), 6);
    }

    #[test]
    fn split_is_deterministic() {
        let targets = targets();
        assert_eq!(
            DataSplit::stratified(&targets, 7),
            DataSplit::stratified(&targets, 7)
        );
        assert_ne!(
            DataSplit::stratified(&targets, 7),
            DataSplit::stratified(&targets, 8)
        );
    }

    #[test]
    fn grayscale_is_channel_mean() {
        let img = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 {
                image::Rgb([255, 255, 255])
            } else {
                image::Rgb([255, 0, 0])
            }
        });
        let features = grayscale_features(&img);
        assert_eq!(features.len(), 2);
        assert!((features[0] - 1.).abs() < 1e-6);
        assert!((features[1] - 1. / 3.).abs() < 1e-6);
    }

    #[test]
    fn folders_sorted_and_stripped() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["zoo_processed", "gate_processed", "gate", "_processed"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        let names = processed_folders(dir.path())
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect::<Vec<_>>();
        assert_eq!(names, ["gate", "zoo"]);
    }
}
