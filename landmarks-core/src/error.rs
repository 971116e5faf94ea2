use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LandmarkError>;

#[derive(Debug, Error)]
pub enum LandmarkError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("bincode error at {path}: {source}")]
    Bincode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
    #[error("failed to record model at {path}: {msg}")]
    Record { path: PathBuf, msg: String },
    /// An input produced by an earlier step is absent.
    #[error("{path} not found. {hint}")]
    MissingInput { path: PathBuf, hint: &'static str },
    #[error("no images found under {root}, add images to the landmark folders first")]
    EmptyDataset { root: PathBuf },
    #[error("malformed label line {line} in {path}: {content:?}")]
    MalformedLabel {
        path: PathBuf,
        line: usize,
        content: String,
    },
    #[error("expected {expected} features, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },
    #[error("{0}")]
    Other(String),
}

impl LandmarkError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    pub(crate) fn image(path: impl Into<PathBuf>) -> impl FnOnce(image::ImageError) -> Self {
        let path = path.into();
        move |source| Self::Image { path, source }
    }

    pub(crate) fn record(path: impl Into<PathBuf>) -> impl FnOnce(burn::record::RecorderError) -> Self {
        let path = path.into();
        move |e| Self::Record {
            path,
            msg: e.to_string(),
        }
    }

    /// Errors that stop a pipeline before it does any work; reported, not raised.
    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::MissingInput { .. } | Self::EmptyDataset { .. })
    }
}
