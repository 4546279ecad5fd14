use serde::{Deserialize, Serialize};
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Sentinel files whose names encode the lifecycle of a calculation directory.
///
/// The names are shared with the external batch layer, so they must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Marker {
    Vis,
    Ready,
    PriorReady,
    Running,
    Done,
    Error,
    Killed,
    Skipped,
    Manual,
    SubDirCal,
    PostProcess,
    PostProcessDone,
    DoneCleanedAnalyzed,
    DoneFailedToCleanAnalyze,
}

impl Marker {
    pub const ALL: [Marker; 14] = [
        Marker::Vis,
        Marker::Ready,
        Marker::PriorReady,
        Marker::Running,
        Marker::Done,
        Marker::Error,
        Marker::Killed,
        Marker::Skipped,
        Marker::Manual,
        Marker::SubDirCal,
        Marker::PostProcess,
        Marker::PostProcessDone,
        Marker::DoneCleanedAnalyzed,
        Marker::DoneFailedToCleanAnalyze,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Vis => "__vis__",
            Self::Ready => "__ready__",
            Self::PriorReady => "__prior_ready__",
            Self::Running => "__running__",
            Self::Done => "__done__",
            Self::Error => "__error__",
            Self::Killed => "__killed__",
            Self::Skipped => "__skipped__",
            Self::Manual => "__manual__",
            Self::SubDirCal => "__sub_dir_cal__",
            Self::PostProcess => "__post_process__",
            Self::PostProcessDone => "__post_process_done__",
            Self::DoneCleanedAnalyzed => "__done_cleaned_analyzed__",
            Self::DoneFailedToCleanAnalyze => "__done_failed_to_clean_analyze__",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|marker| marker.file_name() == name)
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }

    pub fn exists_in(&self, dir: &Path) -> bool {
        self.path_in(dir).is_file()
    }

    pub fn terminal(&self) -> Option<TerminalMarker> {
        match self {
            Self::Done => Some(TerminalMarker::Done),
            Self::Skipped => Some(TerminalMarker::Skipped),
            Self::PostProcessDone => Some(TerminalMarker::PostProcessDone),
            Self::DoneCleanedAnalyzed => Some(TerminalMarker::DoneCleanedAnalyzed),
            Self::DoneFailedToCleanAnalyze => Some(TerminalMarker::DoneFailedToCleanAnalyze),
            _ => None,
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Every way a directory can end up with no internal work left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminalMarker {
    Done,
    Skipped,
    PostProcessDone,
    DoneCleanedAnalyzed,
    DoneFailedToCleanAnalyze,
}

impl TerminalMarker {
    pub fn marker(&self) -> Marker {
        match self {
            Self::Done => Marker::Done,
            Self::Skipped => Marker::Skipped,
            Self::PostProcessDone => Marker::PostProcessDone,
            Self::DoneCleanedAnalyzed => Marker::DoneCleanedAnalyzed,
            Self::DoneFailedToCleanAnalyze => Marker::DoneFailedToCleanAnalyze,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailedMarker {
    Error,
    Killed,
}

/// Lifecycle of one step directory, re-derived from its listing on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "marker")]
pub enum StepState {
    /// The directory does not exist.
    Absent,
    /// The directory exists but carries no marker, e.g. after a crash right
    /// after it was created. Driven exactly like `Absent`.
    Unmarked,
    Visiting,
    Ready,
    PriorReady,
    Running,
    Failed(FailedMarker),
    SubDirCal,
    PostProcess,
    Manual,
    Terminal(TerminalMarker),
}

impl StepState {
    pub fn from_marker(marker: Marker) -> Self {
        match marker {
            Marker::Vis => Self::Visiting,
            Marker::Ready => Self::Ready,
            Marker::PriorReady => Self::PriorReady,
            Marker::Running => Self::Running,
            Marker::Error => Self::Failed(FailedMarker::Error),
            Marker::Killed => Self::Failed(FailedMarker::Killed),
            Marker::Manual => Self::Manual,
            Marker::SubDirCal => Self::SubDirCal,
            Marker::PostProcess => Self::PostProcess,
            Marker::Done => Self::Terminal(TerminalMarker::Done),
            Marker::Skipped => Self::Terminal(TerminalMarker::Skipped),
            Marker::PostProcessDone => Self::Terminal(TerminalMarker::PostProcessDone),
            Marker::DoneCleanedAnalyzed => Self::Terminal(TerminalMarker::DoneCleanedAnalyzed),
            Marker::DoneFailedToCleanAnalyze => {
                Self::Terminal(TerminalMarker::DoneFailedToCleanAnalyze)
            }
        }
    }

    // Used only to pick a winner when several markers coexist.
    fn rank(&self) -> u8 {
        match self {
            Self::Absent => 0,
            Self::Unmarked => 1,
            Self::Visiting => 2,
            Self::Ready => 3,
            Self::PriorReady => 4,
            Self::Running => 5,
            Self::Failed(_) => 6,
            Self::SubDirCal => 7,
            Self::PostProcess => 8,
            Self::Manual => 9,
            Self::Terminal(_) => 10,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    /// Handed over to the external layer, nothing to do until it moves on.
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::Ready | Self::PriorReady | Self::Running)
    }

    pub fn marker(&self) -> Option<Marker> {
        match self {
            Self::Absent | Self::Unmarked => None,
            Self::Visiting => Some(Marker::Vis),
            Self::Ready => Some(Marker::Ready),
            Self::PriorReady => Some(Marker::PriorReady),
            Self::Running => Some(Marker::Running),
            Self::Failed(FailedMarker::Error) => Some(Marker::Error),
            Self::Failed(FailedMarker::Killed) => Some(Marker::Killed),
            Self::SubDirCal => Some(Marker::SubDirCal),
            Self::PostProcess => Some(Marker::PostProcess),
            Self::Manual => Some(Marker::Manual),
            Self::Terminal(terminal) => Some(terminal.marker()),
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("absent"),
            Self::Unmarked => f.write_str("unmarked"),
            _ => match self.marker() {
                Some(marker) => write!(f, "{}", marker),
                None => Ok(()),
            },
        }
    }
}

pub fn is_terminal(state: &StepState) -> bool {
    state.is_terminal()
}

/// Infer the state of an existing directory from the names it contains.
///
/// Names outside the marker vocabulary are ignored. Should several markers
/// coexist, the most advanced one wins.
pub fn infer_state<I, S>(listing: I) -> StepState
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    listing
        .into_iter()
        .filter_map(|name| Marker::from_file_name(name.as_ref()))
        .map(StepState::from_marker)
        .max_by_key(|state| state.rank())
        .unwrap_or(StepState::Unmarked)
}

pub fn read_state(dir: &Path) -> Result<StepState, MarkerError> {
    if !dir.is_dir() {
        return Ok(StepState::Absent);
    }
    let names = fs::read_dir(dir)
        .and_then(|entries| {
            entries
                .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().to_string()))
                .collect::<Result<Vec<_>, _>>()
        })
        .map_err(|source| MarkerError::Listing {
            dir: dir.to_path_buf(),
            source,
        })?;
    Ok(infer_state(names))
}

#[derive(Debug, Error)]
pub enum MarkerError {
    #[error("expected marker {marker} is missing in {dir:?}")]
    MissingMarker { dir: PathBuf, marker: Marker },
    #[error("unable to move marker {from} to {to} in {dir:?}: {source}")]
    Rename {
        dir: PathBuf,
        from: Marker,
        to: Marker,
        #[source]
        source: io::Error,
    },
    #[error("unable to create marker {marker} in {dir:?}: {source}")]
    Create {
        dir: PathBuf,
        marker: Marker,
        #[source]
        source: io::Error,
    },
    #[error("unable to list {dir:?}: {source}")]
    Listing {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Rename marker `from` into `to` in one filesystem operation.
///
/// Content of the marker file travels with it.
pub fn transition(dir: &Path, from: Marker, to: Marker) -> Result<(), MarkerError> {
    fs::rename(from.path_in(dir), to.path_in(dir)).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            MarkerError::MissingMarker {
                dir: dir.to_path_buf(),
                marker: from,
            }
        } else {
            MarkerError::Rename {
                dir: dir.to_path_buf(),
                from,
                to,
                source,
            }
        }
    })
}

pub fn touch(dir: &Path, marker: Marker) -> Result<(), MarkerError> {
    fs::File::create(marker.path_in(dir))
        .map(|_| ())
        .map_err(|source| MarkerError::Create {
            dir: dir.to_path_buf(),
            marker,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for marker in Marker::ALL {
            assert_eq!(Marker::from_file_name(marker.file_name()), Some(marker));
        }
        assert_eq!(Marker::from_file_name("INCAR"), None);
    }

    #[test]
    fn empty_listing_is_unmarked() {
        assert_eq!(infer_state(Vec::<String>::new()), StepState::Unmarked);
        assert_eq!(infer_state(["POSCAR", "INCAR"]), StepState::Unmarked);
    }

    #[test]
    fn single_marker_listing() {
        assert_eq!(infer_state(["POSCAR", "__vis__"]), StepState::Visiting);
        assert_eq!(infer_state(["__prior_ready__"]), StepState::PriorReady);
        assert_eq!(
            infer_state(["__killed__"]),
            StepState::Failed(FailedMarker::Killed)
        );
        assert_eq!(
            infer_state(["OUTCAR", "__done_cleaned_analyzed__"]),
            StepState::Terminal(TerminalMarker::DoneCleanedAnalyzed)
        );
    }

    #[test]
    fn most_advanced_marker_wins() {
        assert_eq!(
            infer_state(["__ready__", "__done__"]),
            StepState::Terminal(TerminalMarker::Done)
        );
        assert_eq!(infer_state(["__vis__", "__running__"]), StepState::Running);
    }

    #[test]
    fn terminal_set_is_closed() {
        let terminal = Marker::ALL
            .into_iter()
            .filter(|marker| StepState::from_marker(*marker).is_terminal())
            .collect::<Vec<_>>();
        assert_eq!(
            terminal,
            vec![
                Marker::Done,
                Marker::Skipped,
                Marker::PostProcessDone,
                Marker::DoneCleanedAnalyzed,
                Marker::DoneFailedToCleanAnalyze
            ]
        );
        assert!(!is_terminal(&StepState::PostProcess));
        assert!(!is_terminal(&StepState::Manual));
    }

    #[test]
    fn transition_renames_marker() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), Marker::Vis).unwrap();
        transition(dir.path(), Marker::Vis, Marker::Ready).unwrap();
        assert!(!Marker::Vis.exists_in(dir.path()));
        assert!(Marker::Ready.exists_in(dir.path()));
        assert_eq!(read_state(dir.path()).unwrap(), StepState::Ready);
    }

    #[test]
    fn transition_without_source_marker_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = transition(dir.path(), Marker::Vis, Marker::Ready).unwrap_err();
        assert!(matches!(
            err,
            MarkerError::MissingMarker {
                marker: Marker::Vis,
                ..
            }
        ));
        assert!(!Marker::Ready.exists_in(dir.path()));
    }

    #[test]
    fn missing_directory_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            read_state(&dir.path().join("step_1")).unwrap(),
            StepState::Absent
        );
    }
}
