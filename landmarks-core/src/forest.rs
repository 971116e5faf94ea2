//! A random forest of CART trees over dense `f32` features.
//!
//! Each tree sees a bootstrap sample of the rows and, at every node, a fresh
//! random subset of √n features; splits minimise weighted Gini impurity.
//! Leaves keep class fractions, and the forest averages them.

use crate::error::{self, LandmarkError};
use crate::utils::{bincode_from, bincode_into};
use burn::config::Config;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const FOREST_FILE: &str = "landmark_forest.bin";

#[derive(Config, Debug)]
pub struct ForestConfig {
    #[config(default = 100)]
    pub n_trees: usize,
    #[config(default = 20)]
    pub max_depth: usize,
    #[config(default = 2)]
    pub min_samples_split: usize,
    #[config(default = 42)]
    pub seed: u64,
}

/// Row-major feature matrix.
#[derive(Debug, Clone, Default)]
pub struct Features {
    data: Vec<f32>,
    n_features: usize,
}

impl Features {
    pub fn new(n_features: usize) -> Self {
        Self {
            data: vec![],
            n_features,
        }
    }

    pub fn with_rows<'a>(n_features: usize, rows: impl IntoIterator<Item = &'a [f32]>) -> error::Result<Self> {
        let mut features = Self::new(n_features);
        for row in rows {
            features.push(row)?;
        }
        Ok(features)
    }

    pub fn push(&mut self, row: &[f32]) -> error::Result<()> {
        if row.len() != self.n_features {
            return Err(LandmarkError::FeatureMismatch {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len().checked_div(self.n_features).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.n_features..(i + 1) * self.n_features]
    }

    fn get(&self, row: usize, feature: usize) -> f32 {
        self.data[row * self.n_features + feature]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        proba: Vec<f32>,
    },
    Split {
        feature: u32,
        threshold: f32,
        left: u32,
        right: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn leaf(&self, row: &[f32]) -> &[f32] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { proba } => return proba,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature as usize] <= *threshold {
                        *left as usize
                    } else {
                        *right as usize
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    n_features: usize,
    n_classes: usize,
    trees: Vec<DecisionTree>,
}

impl ForestConfig {
    /// Fits one tree per seed `seed + i`, so the result does not depend on
    /// how rayon schedules the trees.
    pub fn fit(&self, x: &Features, y: &[usize], n_classes: usize) -> error::Result<RandomForest> {
        if x.is_empty() || x.len() != y.len() {
            return Err(LandmarkError::Other(format!(
                "cannot fit a forest on {} rows and {} targets",
                x.len(),
                y.len()
            )));
        }
        if let Some(bad) = y.iter().find(|&&c| c >= n_classes) {
            return Err(LandmarkError::Other(format!(
                "target {bad} out of range for {n_classes} classes"
            )));
        }
        let max_features = ((x.n_features() as f64).sqrt() as usize).clamp(1, x.n_features());
        let trees = (0..self.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(i as u64));
                let mut rows = (0..x.len())
                    .map(|_| rng.gen_range(0..x.len()))
                    .collect::<Vec<_>>();
                let mut builder = TreeBuilder {
                    x,
                    y,
                    n_classes,
                    max_features,
                    max_depth: self.max_depth,
                    min_samples_split: self.min_samples_split.max(2),
                    nodes: vec![],
                };
                builder.grow(&mut rows, 0, &mut rng);
                DecisionTree {
                    nodes: builder.nodes,
                }
            })
            .collect();
        Ok(RandomForest {
            n_features: x.n_features(),
            n_classes,
            trees,
        })
    }
}

struct TreeBuilder<'a> {
    x: &'a Features,
    y: &'a [usize],
    n_classes: usize,
    max_features: usize,
    max_depth: usize,
    min_samples_split: usize,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn grow(&mut self, rows: &mut [usize], depth: usize, rng: &mut StdRng) -> u32 {
        let idx = self.nodes.len() as u32;
        let counts = self.counts(rows);
        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        let split = if pure || depth >= self.max_depth || rows.len() < self.min_samples_split {
            None
        } else {
            self.best_split(rows, &counts, rng)
        };
        let Some((feature, threshold)) = split else {
            let total = rows.len() as f32;
            self.nodes.push(Node::Leaf {
                proba: counts.iter().map(|&c| c as f32 / total).collect(),
            });
            return idx;
        };

        let mid = partition(rows, |r| self.x.get(r, feature) <= threshold);
        self.nodes.push(Node::Split {
            feature: feature as u32,
            threshold,
            left: 0,
            right: 0,
        });
        let (l, r) = rows.split_at_mut(mid);
        let left = self.grow(l, depth + 1, rng);
        let right = self.grow(r, depth + 1, rng);
        if let Node::Split {
            left: l, right: r, ..
        } = &mut self.nodes[idx as usize]
        {
            *l = left;
            *r = right;
        }
        idx
    }

    fn counts(&self, rows: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &r in rows {
            counts[self.y[r]] += 1;
        }
        counts
    }

    fn best_split(&self, rows: &[usize], counts: &[usize], rng: &mut StdRng) -> Option<(usize, f32)> {
        let n = rows.len();
        let mut best: Option<(f64, usize, f32)> = None;
        let mut values = Vec::with_capacity(n);
        let mut left = vec![0usize; self.n_classes];
        for feature in rand::seq::index::sample(rng, self.x.n_features(), self.max_features) {
            values.clear();
            values.extend(rows.iter().map(|&r| (self.x.get(r, feature), self.y[r])));
            values.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));
            if values[0].0 == values[n - 1].0 {
                continue;
            }
            left.fill(0);
            for i in 0..n - 1 {
                left[values[i].1] += 1;
                let (lo, hi) = (values[i].0, values[i + 1].0);
                if lo == hi {
                    continue;
                }
                let n_left = i + 1;
                let impurity = weighted_gini(&left, counts, n_left, n);
                if best.map_or(true, |(b, _, _)| impurity < b) {
                    let mut threshold = lo / 2. + hi / 2.;
                    if threshold >= hi {
                        threshold = lo;
                    }
                    best = Some((impurity, feature, threshold));
                }
            }
        }
        best.map(|(_, feature, threshold)| (feature, threshold))
    }
}

/// Gini impurity of a split weighted by the size of each side.
fn weighted_gini(left: &[usize], total: &[usize], n_left: usize, n: usize) -> f64 {
    let n_right = n - n_left;
    let (mut sq_left, mut sq_right) = (0., 0.);
    for (&l, &t) in left.iter().zip(total) {
        sq_left += (l * l) as f64;
        sq_right += ((t - l) * (t - l)) as f64;
    }
    let gini_left = 1. - sq_left / (n_left * n_left) as f64;
    let gini_right = 1. - sq_right / (n_right * n_right) as f64;
    (n_left as f64 * gini_left + n_right as f64 * gini_right) / n as f64
}

/// Moves the rows matching `pred` to the front, returning how many matched.
fn partition(rows: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut mid = 0;
    for i in 0..rows.len() {
        if pred(rows[i]) {
            rows.swap(i, mid);
            mid += 1;
        }
    }
    mid
}

impl RandomForest {
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Mean of the trees' leaf class fractions.
    pub fn predict_proba(&self, row: &[f32]) -> error::Result<Vec<f32>> {
        if row.len() != self.n_features {
            return Err(LandmarkError::FeatureMismatch {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        let mut proba = vec![0f32; self.n_classes];
        for tree in &self.trees {
            for (p, leaf) in proba.iter_mut().zip(tree.leaf(row)) {
                *p += leaf;
            }
        }
        let n = self.trees.len().max(1) as f32;
        proba.iter_mut().for_each(|p| *p /= n);
        Ok(proba)
    }

    /// Most probable class and its probability.
    pub fn predict(&self, row: &[f32]) -> error::Result<(usize, f32)> {
        let proba = self.predict_proba(row)?;
        Ok(proba
            .into_iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, p)| if p > best.1 { (i, p) } else { best }))
    }

    pub fn predict_many(&self, x: &Features) -> error::Result<Vec<usize>> {
        (0..x.len())
            .into_par_iter()
            .map(|i| self.predict(x.row(i)).map(|(c, _)| c))
            .collect()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> error::Result<()> {
        bincode_into(path.as_ref(), self)
    }

    pub fn load(path: impl AsRef<Path>) -> error::Result<Self> {
        bincode_from(path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Class 0 lives below 0.5 on feature 1, class 1 above; feature 0 is noise.
    fn toy() -> (Features, Vec<usize>) {
        let mut rng = StdRng::seed_from_u64(0);
        let mut x = Features::new(2);
        let mut y = vec![];
        for i in 0..60 {
            let class = i % 2;
            let signal = if class == 0 {
                rng.gen_range(0.0..0.4)
            } else {
                rng.gen_range(0.6..1.0)
            };
            x.push(&[rng.gen(), signal]).unwrap();
            y.push(class);
        }
        (x, y)
    }

    #[test]
    fn separates_toy_classes() {
        let (x, y) = toy();
        let forest = ForestConfig::new().with_n_trees(25).fit(&x, &y, 2).unwrap();
        assert_eq!(forest.n_trees(), 25);
        assert_eq!(forest.predict(&[0.5, 0.1]).unwrap().0, 0);
        assert_eq!(forest.predict(&[0.5, 0.9]).unwrap().0, 1);
        assert_eq!(forest.predict_many(&x).unwrap(), y);
    }

    #[test]
    fn probabilities_sum_to_one() {
        let (x, y) = toy();
        let forest = ForestConfig::new().with_n_trees(5).fit(&x, &y, 3).unwrap();
        let proba = forest.predict_proba(x.row(0)).unwrap();
        assert_eq!(proba.len(), 3);
        assert!((proba.iter().sum::<f32>() - 1.).abs() < 1e-5);
        assert_eq!(proba[2], 0.);
    }

    #[test]
    fn same_seed_same_forest() {
        let (x, y) = toy();
        let config = ForestConfig::new().with_n_trees(4).with_seed(3);
        let a = config.fit(&x, &y, 2).unwrap();
        let b = config.fit(&x, &y, 2).unwrap();
        for row in [[0.2, 0.45], [0.7, 0.55], [0.9, 0.5]] {
            assert_eq!(a.predict_proba(&row).unwrap(), b.predict_proba(&row).unwrap());
        }
    }

    #[test]
    fn depth_limit_keeps_mixed_leaves() {
        let (x, y) = toy();
        let forest = ForestConfig::new()
            .with_n_trees(1)
            .with_max_depth(0)
            .fit(&x, &y, 2)
            .unwrap();
        let (_, confidence) = forest.predict(x.row(0)).unwrap();
        assert!(confidence < 1.);
    }

    #[test]
    fn rejects_wrong_width() {
        let (x, y) = toy();
        let forest = ForestConfig::new().with_n_trees(1).fit(&x, &y, 2).unwrap();
        assert!(matches!(
            forest.predict(&[0.1]),
            Err(LandmarkError::FeatureMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn save_and_load() {
        let (x, y) = toy();
        let forest = ForestConfig::new().with_n_trees(3).fit(&x, &y, 2).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FOREST_FILE);
        forest.save(&path).unwrap();
        let loaded = RandomForest::load(&path).unwrap();
        assert_eq!(
            loaded.predict_proba(x.row(5)).unwrap(),
            forest.predict_proba(x.row(5)).unwrap()
        );
    }

    #[test]
    fn config_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forest.json");
        let config = ForestConfig::new().with_n_trees(7).with_max_depth(3).with_seed(9);
        config.save(&path).unwrap();
        let loaded = ForestConfig::load(&path).unwrap();
        assert_eq!(
            (loaded.n_trees, loaded.max_depth, loaded.min_samples_split, loaded.seed),
            (7, 3, 2, 9)
        );
    }
}
