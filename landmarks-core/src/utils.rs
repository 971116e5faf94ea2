use crate::error::{LandmarkError, Result};
use mime_guess::MimeGuess;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

pub(crate) fn json_from<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let f = File::open(path).map_err(LandmarkError::io(path))?;
    serde_json::from_reader(BufReader::new(f)).map_err(|source| LandmarkError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn json_into<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let f = File::create(path).map_err(LandmarkError::io(path))?;
    serde_json::to_writer_pretty(BufWriter::new(f), data).map_err(|source| LandmarkError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn bincode_from<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let f = File::open(path).map_err(LandmarkError::io(path))?;
    bincode::deserialize_from(BufReader::new(f)).map_err(|source| LandmarkError::Bincode {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn bincode_into<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let f = File::create(path).map_err(LandmarkError::io(path))?;
    bincode::serialize_into(BufWriter::new(f), data).map_err(|source| LandmarkError::Bincode {
        path: path.to_path_buf(),
        source,
    })
}

/// Image files directly inside `dir`, sorted by path.
pub(crate) fn images_in(dir: impl AsRef<Path>) -> Vec<PathBuf> {
    let mut res = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|res| res.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| match MimeGuess::from_path(e.path()).first() {
            Some(mime) if mime.type_() == "image" => Some(e.into_path()),
            _ => None,
        })
        .collect::<Vec<_>>();
    res.sort();
    res
}

pub(crate) fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(LandmarkError::io(dir))
}

pub(crate) fn file_size_mb(path: &Path) -> Result<f64> {
    let meta = std::fs::metadata(path).map_err(LandmarkError::io(path))?;
    Ok(meta.len() as f64 / (1024. * 1024.))
}
