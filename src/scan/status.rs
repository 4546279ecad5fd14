use std::{io::Write, path::Path};

use markers::Marker;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{IoContext, Result};

/// Persisted progress of a scan. Lives inside the `__sub_dir_cal__` marker of
/// the scan's step folder, so it follows the marker when it is renamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanStatus {
    pub parameters: Vec<f64>,
    #[serde(default)]
    pub sub_dirs: Vec<String>,
    /// `[parameter, observable]` at the minimum of the fitted curve.
    #[serde(default)]
    pub prediction: Option<[f64; 2]>,
    #[serde(default)]
    pub verification_dir: Option<String>,
    #[serde(default)]
    pub verification: Option<Verification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub observable: f64,
    pub deviation: f64,
    pub accepted: bool,
}

impl ScanStatus {
    pub fn new(parameters: Vec<f64>) -> Self {
        Self {
            parameters,
            sub_dirs: vec![],
            prediction: None,
            verification_dir: None,
            verification: None,
        }
    }

    /// Read the record held by `marker` in `step_dir`. An empty marker, left
    /// by a crash right after the folder was handed to the scan, yields a
    /// fresh record over `parameters`.
    pub fn load(step_dir: &Path, marker: Marker, parameters: &[f64]) -> Result<Self> {
        let path = marker.path_in(step_dir);
        let content = std::fs::read_to_string(&path).at_path(&path)?;
        if content.trim().is_empty() {
            return Ok(Self::new(parameters.to_vec()));
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Replace the `__sub_dir_cal__` record in one rename, a reader never
    /// sees a half written file.
    pub fn save(&self, step_dir: &Path) -> Result<()> {
        let path = Marker::SubDirCal.path_in(step_dir);
        let mut file = NamedTempFile::new_in(step_dir).at_path(step_dir)?;
        serde_json::to_writer_pretty(&mut file, self)?;
        file.write_all(b"\n").at_path(file.path())?;
        file.persist(&path)
            .map_err(|err| err.error)
            .at_path(&path)?;
        Ok(())
    }
}
