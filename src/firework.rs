use std::{collections::BTreeSet, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    error::{HtcError, Result},
    scan::case_dir_name,
    serde_default::{default_resolution, default_tolerance},
};

/// One stage of a structure's workflow, materialized as a folder under the
/// structure directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Firework {
    pub step_no: usize,
    pub firework_folder_name: String,
    /// Step whose folder supplies the staged files. Defaults to the previous
    /// step, ignored for step 1.
    #[serde(default)]
    pub copy_which_step: Option<usize>,
    #[serde(default)]
    pub copy_from_prev_cal: Vec<String>,
    #[serde(default)]
    pub move_from_prev_cal: Vec<String>,
    #[serde(default)]
    pub contcar_to_poscar: bool,
    #[serde(default)]
    pub extra_copy: Vec<PathBuf>,
    #[serde(default)]
    pub final_extra_copy: Vec<PathBuf>,
    #[serde(default)]
    pub remove_after_cal: Vec<String>,
    #[serde(default)]
    pub scan: Option<ScanSettings>,
}

impl Firework {
    pub fn source_step_no(&self) -> Option<usize> {
        if self.step_no == 1 {
            None
        } else {
            Some(self.copy_which_step.unwrap_or(self.step_no - 1))
        }
    }

    pub fn is_scan(&self) -> bool {
        self.scan.is_some()
    }
}

/// Upper bound on the points sampled along the fitted curve.
pub const MAX_SCAN_SAMPLES: f64 = 1e6;

/// Lattice-constant scan carried out in sibling sub-directories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Scaling factors applied to the parent structure, one sibling each.
    pub parameters: Vec<f64>,
    /// Largest accepted gap between the interpolated and the verified observable.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Sampling step used to locate the minimum of the fitted curve.
    #[serde(default = "default_resolution")]
    pub resolution: f64,
}

impl ScanSettings {
    fn validate(&self, step_no: usize) -> Result<()> {
        let invalid = |reason: String| {
            Err(HtcError::InvalidWorkflow(format!(
                "scan of step {}: {}",
                step_no, reason
            )))
        };
        if self.parameters.len() < 3 {
            return invalid(format!(
                "at least 3 parameters are required, got {}",
                self.parameters.len()
            ));
        }
        if self.parameters.iter().any(|value| !value.is_finite() || *value <= 0.) {
            return invalid("parameters must be positive finite numbers".to_string());
        }
        let names = self
            .parameters
            .iter()
            .map(|value| case_dir_name(*value))
            .collect::<BTreeSet<_>>();
        if names.len() != self.parameters.len() {
            return invalid("parameters must differ in their first 4 decimals".to_string());
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.) {
            return invalid(format!("tolerance {} is not positive", self.tolerance));
        }
        if !(self.resolution.is_finite() && self.resolution > 0.) {
            return invalid(format!("resolution {} is not positive", self.resolution));
        }
        let (low, high) = self
            .parameters
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), value| {
                (low.min(*value), high.max(*value))
            });
        if (high - low) / self.resolution > MAX_SCAN_SAMPLES {
            return invalid(format!(
                "resolution {} samples [{}, {}] more than {} times",
                self.resolution, low, high, MAX_SCAN_SAMPLES
            ));
        }
        Ok(())
    }
}

/// An ordered, validated chain of fireworks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Firework>", into = "Vec<Firework>")]
pub struct Workflow(Vec<Firework>);

impl Workflow {
    pub fn new(fireworks: Vec<Firework>) -> Result<Self> {
        if fireworks.is_empty() {
            return Err(HtcError::InvalidWorkflow(
                "the workflow has no firework".to_string(),
            ));
        }
        let mut folder_names = BTreeSet::new();
        for (index, firework) in fireworks.iter().enumerate() {
            let invalid = |reason: String| {
                Err(HtcError::InvalidWorkflow(format!(
                    "firework {} ({}): {}",
                    index + 1,
                    firework.firework_folder_name,
                    reason
                )))
            };
            if firework.step_no != index + 1 {
                return invalid(format!(
                    "step_no {} does not match its position {} in the list",
                    firework.step_no,
                    index + 1
                ));
            }
            let folder = &firework.firework_folder_name;
            if folder.is_empty() || folder.contains(&['/', '\\'][..]) || folder == "." || folder == ".."
            {
                return invalid("folder name must be a plain directory name".to_string());
            }
            if !folder_names.insert(folder.clone()) {
                return invalid("folder name is used by another firework".to_string());
            }
            if let Some(source) = firework.source_step_no() {
                if source == 0 || source >= firework.step_no {
                    return invalid(format!(
                        "copy_which_step {} must point to an earlier step",
                        source
                    ));
                }
            }
            let mut requested = BTreeSet::new();
            for name in firework
                .copy_from_prev_cal
                .iter()
                .chain(&firework.move_from_prev_cal)
            {
                if !requested.insert(name) {
                    return invalid(format!("{} is requested more than once", name));
                }
            }
            if let Some(path) = firework
                .extra_copy
                .iter()
                .chain(&firework.final_extra_copy)
                .find(|path| !path.is_absolute())
            {
                return invalid(format!("extra copy path {:?} is not absolute", path));
            }
            if let Some(scan) = &firework.scan {
                scan.validate(firework.step_no)?;
            }
        }
        Ok(Self(fireworks))
    }

    pub fn steps(&self) -> &[Firework] {
        &self.0
    }

    pub fn get(&self, step_no: usize) -> Option<&Firework> {
        step_no.checked_sub(1).and_then(|index| self.0.get(index))
    }

    pub fn last(&self) -> &Firework {
        // A workflow is never empty once constructed.
        &self.0[self.0.len() - 1]
    }

    pub fn source_of(&self, firework: &Firework) -> Option<&Firework> {
        firework.source_step_no().and_then(|step_no| self.get(step_no))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<Firework>> for Workflow {
    type Error = HtcError;

    fn try_from(value: Vec<Firework>) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Workflow> for Vec<Firework> {
    fn from(value: Workflow) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn firework(step_no: usize, folder: &str) -> Firework {
        Firework {
            step_no,
            firework_folder_name: folder.to_string(),
            copy_which_step: None,
            copy_from_prev_cal: vec![],
            move_from_prev_cal: vec![],
            contcar_to_poscar: false,
            extra_copy: vec![],
            final_extra_copy: vec![],
            remove_after_cal: vec![],
            scan: None,
        }
    }

    #[test]
    fn parse_from_yaml() {
        let workflow: Workflow = serde_yaml::from_str(
            r#"
- step_no: 1
  firework_folder_name: step_1_str_opt
  remove_after_cal: [WAVECAR, CHGCAR]
- step_no: 2
  firework_folder_name: step_2_scf
  copy_which_step: 1
  copy_from_prev_cal: [INCAR, KPOINTS]
  move_from_prev_cal: [CONTCAR]
  contcar_to_poscar: true
- step_no: 3
  firework_folder_name: step_3_lattice
  scan:
    parameters: [0.98, 1.0, 1.02]
"#,
        )
        .unwrap();
        assert_eq!(workflow.len(), 3);
        assert_eq!(workflow.get(2).unwrap().source_step_no(), Some(1));
        assert_eq!(workflow.get(3).unwrap().source_step_no(), Some(2));
        let scan = workflow.last().scan.as_ref().unwrap();
        assert_eq!(scan.tolerance, 0.01);
        assert_eq!(scan.resolution, 1e-4);
    }

    #[test]
    fn step_numbers_must_follow_list_order() {
        let err = Workflow::new(vec![firework(1, "a"), firework(3, "b")]).unwrap_err();
        assert!(matches!(err, HtcError::InvalidWorkflow(_)));
    }

    #[test]
    fn copy_source_must_be_earlier() {
        let mut second = firework(2, "b");
        second.copy_which_step = Some(2);
        assert!(Workflow::new(vec![firework(1, "a"), second.clone()]).is_err());
        second.copy_which_step = Some(0);
        assert!(Workflow::new(vec![firework(1, "a"), second]).is_err());
    }

    #[test]
    fn first_step_ignores_copy_source() {
        let mut first = firework(1, "a");
        first.copy_which_step = Some(4);
        let workflow = Workflow::new(vec![first]).unwrap();
        assert_eq!(workflow.source_of(workflow.last()), None);
    }

    #[test]
    fn folder_names_are_unique_and_plain() {
        assert!(Workflow::new(vec![firework(1, "a"), firework(2, "a")]).is_err());
        assert!(Workflow::new(vec![firework(1, "a/b")]).is_err());
        assert!(Workflow::new(vec![]).is_err());
    }

    #[test]
    fn file_requested_twice_is_rejected() {
        let mut second = firework(2, "b");
        second.copy_from_prev_cal = vec!["CONTCAR".to_string()];
        second.move_from_prev_cal = vec!["CONTCAR".to_string()];
        assert!(Workflow::new(vec![firework(1, "a"), second]).is_err());
    }

    #[test]
    fn relative_extra_copy_is_rejected() {
        let mut first = firework(1, "a");
        first.extra_copy = vec![PathBuf::from("vdw_kernel.bindat")];
        assert!(Workflow::new(vec![first]).is_err());
    }

    #[test]
    fn scan_needs_three_distinct_parameters() {
        let mut first = firework(1, "a");
        first.scan = Some(ScanSettings {
            parameters: vec![0.98, 1.0],
            tolerance: 0.01,
            resolution: 1e-4,
        });
        assert!(Workflow::new(vec![first.clone()]).is_err());
        first.scan = Some(ScanSettings {
            parameters: vec![0.98, 1.0, 1.0],
            tolerance: 0.01,
            resolution: 1e-4,
        });
        assert!(Workflow::new(vec![first]).is_err());
    }

    #[test]
    fn resolution_is_bounded_by_the_range() {
        let mut first = firework(1, "a");
        first.scan = Some(ScanSettings {
            parameters: vec![0.96, 1.0, 1.04],
            tolerance: 0.01,
            resolution: 1e-12,
        });
        assert!(Workflow::new(vec![first.clone()]).is_err());
        first.scan = Some(ScanSettings {
            parameters: vec![0.96, 1.0, 1.04],
            tolerance: 0.01,
            resolution: 1e-6,
        });
        assert!(Workflow::new(vec![first]).is_ok());
    }
}
