use std::path::{Path, PathBuf};

use markers::{read_state, touch, transition, Marker, MarkerError, StepState};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::{
    error::{HtcError, IoContext, Result},
    external::InputGenerator,
    firework::{Firework, Workflow},
    log::StructureLog,
    resolver::resolve,
    scan::{status::ScanStatus, FanOutController, ScanOutcome},
    staging::{stage, RenameRule},
    utils::fs::{copy_into, remove_files},
};

/// Result of driving one structure once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PipelineOutcome {
    /// The step was staged and handed over with `__ready__`.
    Prepared { step: usize },
    Waiting { step: usize, state: StepState },
    /// The external layer gave up on the job; left to the operator.
    Failed { step: usize, state: StepState },
    Manual { step: usize },
    Scanning { step: usize, outcome: ScanOutcome },
    PostProcessed { step: usize },
    AllDone,
}

pub struct StagePipeline<'a> {
    cal_folder: &'a Path,
    workflow: &'a Workflow,
    generator: &'a dyn InputGenerator,
    fan_out: FanOutController<'a>,
}

impl<'a> StagePipeline<'a> {
    pub fn new(
        cal_folder: &'a Path,
        workflow: &'a Workflow,
        generator: &'a dyn InputGenerator,
        fan_out: FanOutController<'a>,
    ) -> Self {
        Self {
            cal_folder,
            workflow,
            generator,
            fan_out,
        }
    }

    pub fn structure_dir(&self, structure_file: &Path) -> Result<PathBuf> {
        let name = structure_file
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| {
                HtcError::InvalidWorkflow(format!(
                    "structure file {:?} has no usable name",
                    structure_file
                ))
            })?;
        Ok(self.cal_folder.join(name))
    }

    /// Move the structure one transition further. Everything is decided from
    /// the markers on disk, so calling this again on a step that is ready or
    /// later changes nothing.
    ///
    /// A marker that vanished under the pipeline halts the step it belongs to
    /// with `__manual__`; the error is still returned to the caller.
    pub fn run(&self, structure_file: &Path) -> Result<PipelineOutcome> {
        let structure_dir = self.structure_dir(structure_file)?;
        let _span = info_span!("structure", dir = ?structure_dir).entered();
        std::fs::create_dir_all(&structure_dir).at_path(&structure_dir)?;
        let log = StructureLog::new(&structure_dir);

        match self.advance(&structure_dir, structure_file, &log) {
            Err(HtcError::Marker(MarkerError::MissingMarker { dir, marker })) => {
                self.halt(&structure_dir, &dir, marker, &log)?;
                Err(HtcError::Marker(MarkerError::MissingMarker { dir, marker }))
            }
            outcome => outcome,
        }
    }

    fn halt(&self, structure_dir: &Path, dir: &Path, marker: Marker, log: &StructureLog) -> Result<()> {
        let Some(step) = self
            .workflow
            .steps()
            .iter()
            .find(|step| dir.starts_with(structure_dir.join(&step.firework_folder_name)))
        else {
            return Ok(());
        };
        let step_dir = structure_dir.join(&step.firework_folder_name);
        std::fs::create_dir_all(&step_dir).at_path(&step_dir)?;
        touch(&step_dir, Marker::Manual)?;
        error!(step = %step.firework_folder_name, dir = ?dir, %marker, "marker missing, step halted");
        log.append(
            &step.firework_folder_name,
            format!(
                "expected {} is missing in {:?}, halted with {}",
                marker,
                dir,
                Marker::Manual
            ),
        )
    }

    fn advance(
        &self,
        structure_dir: &Path,
        structure_file: &Path,
        log: &StructureLog,
    ) -> Result<PipelineOutcome> {
        self.post_process_requested(structure_dir, log)?;

        let current = resolve(structure_dir, self.workflow)?;
        let step = current.firework;
        let step_dir = structure_dir.join(&step.firework_folder_name);
        let folder = step.firework_folder_name.as_str();
        match current.state {
            StepState::Terminal(_) => {
                debug!("workflow finished");
                Ok(PipelineOutcome::AllDone)
            }
            StepState::Absent | StepState::Unmarked => {
                std::fs::create_dir_all(&step_dir).at_path(&step_dir)?;
                touch(&step_dir, Marker::Vis)?;
                info!(step = folder, "step folder created");
                log.append(folder, "created")?;
                self.prepare(step, &step_dir, structure_dir, structure_file, log)
            }
            StepState::Visiting => {
                info!(step = folder, "resuming an interrupted preparation");
                self.prepare(step, &step_dir, structure_dir, structure_file, log)
            }
            StepState::Ready | StepState::PriorReady | StepState::Running => {
                debug!(step = folder, state = %current.state, "waiting for the calculation");
                Ok(PipelineOutcome::Waiting {
                    step: step.step_no,
                    state: current.state,
                })
            }
            StepState::Failed(_) => {
                warn!(step = folder, state = %current.state, "calculation failed, needs an operator");
                Ok(PipelineOutcome::Failed {
                    step: step.step_no,
                    state: current.state,
                })
            }
            StepState::Manual => {
                debug!(step = folder, "waiting for manual intervention");
                Ok(PipelineOutcome::Manual { step: step.step_no })
            }
            StepState::SubDirCal => self.scan(step, &step_dir, log),
            StepState::PostProcess => {
                self.finish_post_process(step, &step_dir, log)?;
                Ok(PipelineOutcome::PostProcessed { step: step.step_no })
            }
        }
    }

    fn prepare(
        &self,
        step: &Firework,
        step_dir: &Path,
        structure_dir: &Path,
        structure_file: &Path,
        log: &StructureLog,
    ) -> Result<PipelineOutcome> {
        let folder = step.firework_folder_name.as_str();
        for file in &step.extra_copy {
            self.copy_extra(file, step_dir)?;
        }

        let source = match self.workflow.source_of(step) {
            Some(source_step) => {
                let src_dir = structure_dir.join(&source_step.firework_folder_name);
                let rename = step.contcar_to_poscar.then(RenameRule::contcar_to_poscar);
                let report = stage(
                    &src_dir,
                    step_dir,
                    &step.copy_from_prev_cal[..],
                    &step.move_from_prev_cal[..],
                    rename.as_ref(),
                )?;
                if !report.is_complete() {
                    warn!(step = folder, missing = ?report.missing, from = ?src_dir, "files missing while staging");
                    log.append(
                        folder,
                        format!(
                            "missing in {}: {}",
                            source_step.firework_folder_name,
                            report.missing.join(", ")
                        ),
                    )?;
                }
                src_dir
            }
            None => structure_file.to_path_buf(),
        };

        self.generator.generate_structure_input(step_dir, &source)?;
        self.generator.generate_parameter_input(step_dir, &source)?;
        self.generator.generate_potential_input(step_dir, &source)?;
        self.generator.generate_kpoints_input(step_dir, &source)?;

        for file in &step.final_extra_copy {
            self.copy_extra(file, step_dir)?;
        }

        if !step_dir.join("POSCAR").is_file() {
            log.append(folder, "POSCAR is missing after staging, structure skipped")?;
            return Err(HtcError::RequiredOutputMissing {
                dir: step_dir.to_path_buf(),
                file: "POSCAR".to_string(),
            });
        }

        if let Some(settings) = &step.scan {
            transition(step_dir, Marker::Vis, Marker::SubDirCal)?;
            ScanStatus::new(settings.parameters.clone()).save(step_dir)?;
            info!(step = folder, "handed over to the scan");
            log.append(folder, "handed over to the scan")?;
            return self.scan(step, step_dir, log);
        }

        transition(step_dir, Marker::Vis, Marker::Ready)?;
        info!(step = folder, "step ready");
        log.append(folder, "ready")?;
        Ok(PipelineOutcome::Prepared { step: step.step_no })
    }

    fn copy_extra(&self, file: &Path, step_dir: &Path) -> Result<()> {
        if !file.is_file() {
            return Err(HtcError::RequiredOutputMissing {
                dir: file
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default(),
                file: file
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default(),
            });
        }
        copy_into(file, step_dir)?;
        Ok(())
    }

    fn scan(&self, step: &Firework, step_dir: &Path, log: &StructureLog) -> Result<PipelineOutcome> {
        let settings = step.scan.as_ref().ok_or_else(|| {
            HtcError::InvalidWorkflow(format!(
                "{:?} carries {} but firework {} has no scan settings",
                step_dir,
                Marker::SubDirCal,
                step.step_no
            ))
        })?;
        let outcome = self
            .fan_out
            .advance(step_dir, settings, log, &step.firework_folder_name)?;
        Ok(PipelineOutcome::Scanning {
            step: step.step_no,
            outcome,
        })
    }

    /// Clean up every step the external layer marked with `__post_process__`.
    /// A plain `__done__` is final as it is.
    fn post_process_requested(&self, structure_dir: &Path, log: &StructureLog) -> Result<()> {
        for step in self.workflow.steps() {
            let step_dir = structure_dir.join(&step.firework_folder_name);
            if read_state(&step_dir)? == StepState::PostProcess {
                self.finish_post_process(step, &step_dir, log)?;
            }
        }
        Ok(())
    }

    fn finish_post_process(&self, step: &Firework, step_dir: &Path, log: &StructureLog) -> Result<()> {
        let removed = remove_files(step_dir, &step.remove_after_cal[..])?;
        transition(step_dir, Marker::PostProcess, Marker::PostProcessDone)?;
        info!(step = %step.firework_folder_name, removed = ?removed, "post-processed");
        log.append(
            &step.firework_folder_name,
            format!("post-processed, removed [{}]", removed.join(", ")),
        )
    }
}
