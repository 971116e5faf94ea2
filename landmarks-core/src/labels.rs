//! The label file: one `"<index>: <name>"` line per class, in index order.
//!
//! Indices come from the sorted order of the `*_processed` folders at
//! training time. Adding or removing a folder between runs shifts every
//! later index, so the file written next to a model is the only mapping the
//! model can be trusted with.

use crate::error::{LandmarkError, Result};
use std::{
    fmt::Write as _,
    ops::Index,
    path::{Path, PathBuf},
};

pub const LABELS_FILE: &str = "landmark_labels.txt";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels {
    names: Vec<String>,
}

impl Labels {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn to_text(&self) -> String {
        self.names
            .iter()
            .enumerate()
            .fold(String::new(), |mut acc, (i, name)| {
                let _ = writeln!(acc, "{i}: {name}");
                acc
            })
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let mut names = vec![];
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let malformed = || LandmarkError::MalformedLabel {
                path: path.to_path_buf(),
                line: line_no + 1,
                content: line.to_string(),
            };
            let (index, name) = line.split_once(": ").ok_or_else(malformed)?;
            let index: usize = index.trim().parse().map_err(|_| malformed())?;
            if index != names.len() || name.is_empty() {
                return Err(malformed());
            }
            names.push(name.to_string());
        }
        Ok(Self { names })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_text()).map_err(LandmarkError::io(path))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(LandmarkError::io(path))?;
        Self::parse(&text, path)
    }

    /// Loads the label file, or an empty list when it does not exist.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::warn!("{} not found, continuing without labels", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// The label file already in `dir`, when it assigns different indices
    /// than `self`.
    pub fn drift(&self, dir: &Path) -> Option<Labels> {
        Self::load(dir.join(LABELS_FILE))
            .ok()
            .filter(|previous| previous != self)
    }

    /// Writes `self` to `dir/landmark_labels.txt`, warning when a previous
    /// file there assigns different indices.
    pub fn save_into(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(LABELS_FILE);
        if let Some(previous) = self.drift(dir) {
            log::warn!(
                "class indices changed since the last run ({} -> {} classes); models trained before this run no longer match {}",
                previous.len(),
                self.len(),
                path.display()
            );
        }
        self.save(&path)?;
        Ok(path)
    }
}

impl Index<usize> for Labels {
    type Output = str;

    fn index(&self, index: usize) -> &str {
        &self.names[index]
    }
}
