use markers::{Marker, MarkerError};
use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HtcError {
    #[error(transparent)]
    Marker(#[from] MarkerError),
    #[error("required file {file} is missing in {dir:?}")]
    RequiredOutputMissing { dir: PathBuf, file: String },
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to handle JSON data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to handle YAML data: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid structure pattern: {0}")]
    GlobPattern(#[from] glob::PatternError),
    #[error("unable to walk structure pattern: {0}")]
    Glob(#[from] glob::GlobError),
    #[error("scan in {dir:?} failed: {reason}")]
    Scan { dir: PathBuf, reason: String },
    #[error("collaborator {name} failed in {dir:?}: {reason}")]
    Collaborator {
        name: String,
        dir: PathBuf,
        reason: String,
    },
}

impl HtcError {
    /// The marker the caller expected was not there: someone else touched the
    /// directory, or a previous run crashed halfway through a transition.
    pub fn missing_marker(&self) -> Option<Marker> {
        match self {
            Self::Marker(MarkerError::MissingMarker { marker, .. }) => Some(*marker),
            _ => None,
        }
    }
}

pub type Result<T, E = HtcError> = std::result::Result<T, E>;

pub(crate) trait IoContext<T> {
    fn at_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| HtcError::Io {
            path: path.into(),
            source,
        })
    }
}
