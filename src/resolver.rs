use std::path::Path;

use markers::{read_state, StepState};

use crate::{
    error::Result,
    firework::{Firework, Workflow},
};

/// The step a structure is currently at, with the state of its folder.
#[derive(Debug, Clone, Copy)]
pub struct CurrentStep<'a> {
    pub firework: &'a Firework,
    pub state: StepState,
}

impl CurrentStep<'_> {
    /// Only possible for the last step: every folder carries a terminal marker.
    pub fn workflow_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Walk the workflow in order and stop at the first step whose folder is
/// missing or has no terminal marker. Falls back to the last step when every
/// step is terminal.
pub fn resolve_with<'a, F>(workflow: &'a Workflow, mut state_of: F) -> Result<CurrentStep<'a>>
where
    F: FnMut(&Firework) -> Result<StepState>,
{
    for firework in workflow.steps() {
        let state = state_of(firework)?;
        if !state.is_terminal() {
            return Ok(CurrentStep { firework, state });
        }
    }
    let firework = workflow.last();
    Ok(CurrentStep {
        firework,
        state: state_of(firework)?,
    })
}

pub fn resolve<'a>(structure_dir: &Path, workflow: &'a Workflow) -> Result<CurrentStep<'a>> {
    resolve_with(workflow, |firework| {
        Ok(read_state(
            &structure_dir.join(&firework.firework_folder_name),
        )?)
    })
}

pub fn resolve_current_step<'a>(structure_dir: &Path, workflow: &'a Workflow) -> Result<&'a Firework> {
    Ok(resolve(structure_dir, workflow)?.firework)
}
