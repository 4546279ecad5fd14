use std::path::Path;

use markers::{read_state, touch, transition, Marker, StepState, TerminalMarker};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    error::{HtcError, IoContext, Result},
    external::{Incar, ObservableReader},
    firework::ScanSettings,
    log::StructureLog,
    utils::fs::copy_plain_files,
};

pub mod spline;
pub mod status;

use spline::CubicSpline;
use status::{ScanStatus, Verification};

/// Files of a sibling kept under `<name>.relax` before its follow-up run.
pub const RELAX_ARCHIVE: [&str; 5] = ["INCAR", "POSCAR", "CONTCAR", "OSZICAR", "OUTCAR"];

pub fn case_dir_name(parameter: f64) -> String {
    format!("case_{:.4}", parameter)
}

pub fn verification_dir_name(parameter: f64) -> String {
    format!("verify_{:.4}", parameter)
}

/// Builds one sibling folder from the scan's parent folder.
pub trait VariantGenerator {
    fn generate_variant(&self, parent: &Path, sibling: &Path, parameter: f64) -> Result<()>;
}

/// Copies the parent's input files and scales the lattice through the
/// universal scaling factor on the second line of POSCAR.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoscarScaling;

impl PoscarScaling {
    /// `None` when line 2 holds neither one factor nor three per-axis factors.
    pub fn scale(poscar: &str, parameter: f64) -> Option<String> {
        let mut lines = poscar.lines().map(str::to_string).collect::<Vec<_>>();
        let factors = lines
            .get(1)?
            .split_whitespace()
            .map_while(|token| token.parse::<f64>().ok())
            .take(3)
            .collect::<Vec<_>>();
        let scaled = match factors[..] {
            // a negative factor is the cell volume, which goes with the cube
            [factor] if factor < 0. => vec![factor * parameter.powi(3)],
            [factor] => vec![factor * parameter],
            [_, _, _] if factors.iter().all(|factor| *factor > 0.) => {
                factors.iter().map(|factor| factor * parameter).collect()
            }
            _ => return None,
        };
        lines[1] = scaled
            .iter()
            .map(|factor| format!("  {:.10}", factor))
            .collect();
        let mut scaled = lines.join("\n");
        scaled.push('\n');
        Some(scaled)
    }
}

impl VariantGenerator for PoscarScaling {
    fn generate_variant(&self, parent: &Path, sibling: &Path, parameter: f64) -> Result<()> {
        copy_plain_files(parent, sibling, |_| true)?;
        let poscar = sibling.join("POSCAR");
        let content = std::fs::read_to_string(&poscar).map_err(|_| {
            HtcError::RequiredOutputMissing {
                dir: parent.to_path_buf(),
                file: "POSCAR".to_string(),
            }
        })?;
        let scaled = Self::scale(&content, parameter).ok_or_else(|| HtcError::Scan {
            dir: parent.to_path_buf(),
            reason: "POSCAR has no readable scaling factor".to_string(),
        })?;
        std::fs::write(&poscar, scaled).at_path(&poscar)
    }
}

/// What one call to [`FanOutController::advance`] achieved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ScanOutcome {
    Launched { siblings: Vec<String> },
    Restaged { siblings: Vec<String> },
    Waiting { pending: Vec<String> },
    VerificationLaunched {
        dir: String,
        parameter: f64,
        predicted: f64,
    },
    Accepted { parameter: f64, observable: f64 },
    /// The verification disagreed with the fit; the step now needs an operator.
    Rejected {
        parameter: f64,
        predicted: f64,
        observable: f64,
    },
}

pub struct FanOutController<'a> {
    variants: &'a dyn VariantGenerator,
    observable: &'a dyn ObservableReader,
}

impl<'a> FanOutController<'a> {
    pub fn new(variants: &'a dyn VariantGenerator, observable: &'a dyn ObservableReader) -> Self {
        Self {
            variants,
            observable,
        }
    }

    /// Drive the scan owned by `step_dir` one stage further. The folder must
    /// carry `__sub_dir_cal__`.
    pub fn advance(
        &self,
        step_dir: &Path,
        settings: &ScanSettings,
        log: &StructureLog,
        step: &str,
    ) -> Result<ScanOutcome> {
        let mut status = ScanStatus::load(step_dir, Marker::SubDirCal, &settings.parameters)?;
        if status.parameters != settings.parameters {
            warn!(dir = ?step_dir, "scan parameters differ from the workflow, the saved ones are used");
        }

        if status.sub_dirs.len() < status.parameters.len() {
            return self.launch(step_dir, &mut status, log, step);
        }

        let restaged = self.restage_relaxed(step_dir, &status.sub_dirs, log, step)?;
        if !restaged.is_empty() {
            return Ok(ScanOutcome::Restaged { siblings: restaged });
        }
        let pending = pending_siblings(step_dir, &status.sub_dirs)?;
        if !pending.is_empty() {
            return Ok(ScanOutcome::Waiting { pending });
        }

        let (parameter, predicted) = match status.prediction {
            Some([parameter, predicted]) => (parameter, predicted),
            None => {
                let [parameter, predicted] = self.predict(step_dir, &status, settings)?;
                status.prediction = Some([parameter, predicted]);
                status.save(step_dir)?;
                log.append(
                    step,
                    format!(
                        "interpolated optimum {:.4} with predicted observable {:.6}",
                        parameter, predicted
                    ),
                )?;
                (parameter, predicted)
            }
        };

        let Some(verification_dir) = status.verification_dir.clone() else {
            let name = verification_dir_name(parameter);
            let sibling = step_dir.join(&name);
            self.variants.generate_variant(step_dir, &sibling, parameter)?;
            touch(&sibling, Marker::Ready)?;
            status.verification_dir = Some(name.clone());
            status.save(step_dir)?;
            info!(dir = ?sibling, parameter, "verification sibling ready");
            log.append(step, format!("verification {} is ready", name))?;
            return Ok(ScanOutcome::VerificationLaunched {
                dir: name,
                parameter,
                predicted,
            });
        };

        let restaged = self.restage_relaxed(step_dir, &[verification_dir.clone()], log, step)?;
        if !restaged.is_empty() {
            return Ok(ScanOutcome::Restaged { siblings: restaged });
        }
        let pending = pending_siblings(step_dir, &[verification_dir.clone()])?;
        if !pending.is_empty() {
            return Ok(ScanOutcome::Waiting { pending });
        }

        let sibling = step_dir.join(&verification_dir);
        let observable = self.observable.read_observable(&sibling)?;
        let deviation = (observable - predicted).abs();
        let accepted = deviation <= settings.tolerance;
        status.verification = Some(Verification {
            observable,
            deviation,
            accepted,
        });
        status.save(step_dir)?;

        if accepted {
            copy_plain_files(&sibling, step_dir, |name| name != StructureLog::FILE_NAME)?;
            transition(step_dir, Marker::SubDirCal, Marker::Done)?;
            info!(dir = ?step_dir, parameter, observable, "scan accepted");
            log.append(
                step,
                format!(
                    "verification accepted, observable {:.6} deviates {:.6} from the prediction",
                    observable, deviation
                ),
            )?;
            Ok(ScanOutcome::Accepted {
                parameter,
                observable,
            })
        } else {
            transition(step_dir, Marker::SubDirCal, Marker::Manual)?;
            warn!(dir = ?step_dir, parameter, predicted, observable, "scan rejected, manual intervention required");
            log.append(
                step,
                format!(
                    "verification rejected, observable {:.6} deviates {:.6} from the prediction {:.6}; moved to {}",
                    observable,
                    deviation,
                    predicted,
                    Marker::Manual
                ),
            )?;
            Ok(ScanOutcome::Rejected {
                parameter,
                predicted,
                observable,
            })
        }
    }

    fn launch(
        &self,
        step_dir: &Path,
        status: &mut ScanStatus,
        log: &StructureLog,
        step: &str,
    ) -> Result<ScanOutcome> {
        let mut launched = vec![];
        for parameter in status.parameters.clone() {
            let name = case_dir_name(parameter);
            if status.sub_dirs.contains(&name) {
                continue;
            }
            let sibling = step_dir.join(&name);
            self.variants.generate_variant(step_dir, &sibling, parameter)?;
            touch(&sibling, Marker::Ready)?;
            // saved after each sibling, a crash never recreates a running one
            status.sub_dirs.push(name.clone());
            status.save(step_dir)?;
            launched.push(name);
        }
        info!(dir = ?step_dir, siblings = launched.len(), "scan siblings ready");
        log.append(step, format!("scan siblings ready: {}", launched.join(", ")))?;
        Ok(ScanOutcome::Launched { siblings: launched })
    }

    /// Turn finished relaxations into single-point follow-ups. Only one
    /// rewrite ever happens per sibling: the stripped INCAR no longer relaxes.
    fn restage_relaxed(
        &self,
        step_dir: &Path,
        siblings: &[String],
        log: &StructureLog,
        step: &str,
    ) -> Result<Vec<String>> {
        let mut restaged = vec![];
        for name in siblings {
            let sibling = step_dir.join(name);
            if read_state(&sibling)? != StepState::Terminal(TerminalMarker::Done) {
                continue;
            }
            let incar_path = sibling.join("INCAR");
            if !incar_path.is_file() {
                continue;
            }
            let incar = Incar::from_file(&incar_path)?;
            if !incar.is_relaxation_enabled() {
                continue;
            }
            if !sibling.join("CONTCAR").is_file() {
                return Err(HtcError::RequiredOutputMissing {
                    dir: sibling,
                    file: "CONTCAR".to_string(),
                });
            }
            for file in RELAX_ARCHIVE {
                let path = sibling.join(file);
                if path.is_file() {
                    let archived = sibling.join(format!("{}.relax", file));
                    std::fs::rename(&path, &archived).at_path(&path)?;
                }
            }
            let relaxed = sibling.join("CONTCAR.relax");
            let poscar = sibling.join("POSCAR");
            std::fs::copy(&relaxed, &poscar).at_path(&poscar)?;
            incar.strip_relaxation_options().save(&incar_path)?;
            transition(&sibling, Marker::Done, Marker::Ready)?;
            info!(dir = ?sibling, "relaxed sibling restaged for a single-point run");
            log.append(step, format!("{} relaxed, restaged for a single-point run", name))?;
            restaged.push(name.clone());
        }
        Ok(restaged)
    }

    fn predict(&self, step_dir: &Path, status: &ScanStatus, settings: &ScanSettings) -> Result<[f64; 2]> {
        let samples = status
            .parameters
            .iter()
            .zip(&status.sub_dirs)
            .map(|(parameter, name)| {
                Ok((*parameter, self.observable.read_observable(&step_dir.join(name))?))
            })
            .collect::<Result<Vec<_>>>()?;
        let spline = CubicSpline::natural(&samples).map_err(|err| HtcError::Scan {
            dir: step_dir.to_path_buf(),
            reason: err.to_string(),
        })?;
        let (parameter, predicted) = spline.minimum(settings.resolution);
        Ok([parameter, predicted])
    }
}

fn pending_siblings(step_dir: &Path, siblings: &[String]) -> Result<Vec<String>> {
    let mut pending = vec![];
    for name in siblings {
        let state = read_state(&step_dir.join(name))?;
        if let StepState::Failed(_) = state {
            warn!(dir = ?step_dir.join(name), %state, "scan sibling failed");
        }
        if !state.is_terminal() {
            pending.push(name.clone());
        }
    }
    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_factor_is_multiplied() {
        let poscar = "Si\n  5.43\n 0.0 0.5 0.5\n 0.5 0.0 0.5\n 0.5 0.5 0.0\nSi\n2\nDirect\n0 0 0\n0.25 0.25 0.25\n";
        let scaled = PoscarScaling::scale(poscar, 1.02).unwrap();
        let lines = scaled.lines().collect::<Vec<_>>();
        let factor: f64 = lines[1].trim().parse().unwrap();
        assert!((factor - 5.43 * 1.02).abs() < 1e-9);
        assert_eq!(lines[0], "Si");
        assert_eq!(lines.len(), 10);
    }

    #[test]
    fn negative_factor_is_a_volume() {
        let scaled = PoscarScaling::scale("Si\n-40.0\n", 1.1).unwrap();
        let factor: f64 = scaled.lines().nth(1).unwrap().trim().parse().unwrap();
        assert!((factor + 40.0 * 1.1f64.powi(3)).abs() < 1e-9);
    }

    #[test]
    fn per_axis_factors_are_all_scaled() {
        let scaled = PoscarScaling::scale("Si\n 5.0 5.5 6.0\n", 1.1).unwrap();
        let factors = scaled
            .lines()
            .nth(1)
            .unwrap()
            .split_whitespace()
            .map(|token| token.parse::<f64>().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(factors.len(), 3);
        for (factor, original) in factors.iter().zip([5.0, 5.5, 6.0]) {
            assert!((factor - original * 1.1).abs() < 1e-9);
        }
    }

    #[test]
    fn unreadable_poscar() {
        assert_eq!(PoscarScaling::scale("Si\n", 1.0), None);
        assert_eq!(PoscarScaling::scale("Si\nabc\n", 1.0), None);
        assert_eq!(PoscarScaling::scale("Si\n5.0 5.5\n", 1.0), None);
        assert_eq!(PoscarScaling::scale("Si\n-5.0 5.5 6.0\n", 1.0), None);
    }

    #[test]
    fn sibling_names() {
        assert_eq!(case_dir_name(0.96), "case_0.9600");
        assert_eq!(verification_dir_name(0.99731), "verify_0.9973");
    }
}
