use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HtcError, IoContext, Result};

pub mod incar;
pub mod oszicar;

pub use incar::Incar;
pub use oszicar::OszicarEnergy;

/// Produces the physics input files of a step folder.
///
/// `source` is the structure file for the first step and the folder of the
/// step the files were staged from otherwise.
pub trait InputGenerator {
    fn generate_structure_input(&self, dir: &Path, source: &Path) -> Result<()>;
    fn generate_parameter_input(&self, dir: &Path, source: &Path) -> Result<()>;
    fn generate_potential_input(&self, dir: &Path, source: &Path) -> Result<()>;
    fn generate_kpoints_input(&self, dir: &Path, source: &Path) -> Result<()>;
}

/// Extracts the scalar result of a finished calculation.
pub trait ObservableReader {
    fn read_observable(&self, dir: &Path) -> Result<f64>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorCommands {
    #[serde(default)]
    pub structure: Option<CommandSpec>,
    #[serde(default)]
    pub parameters: Option<CommandSpec>,
    #[serde(default)]
    pub potential: Option<CommandSpec>,
    #[serde(default)]
    pub kpoints: Option<CommandSpec>,
}

/// Runs user supplied programs inside the step folder. The program receives
/// the source path in `HTC_SOURCE` and the folder in `HTC_TARGET`.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    commands: GeneratorCommands,
    search_paths: Vec<PathBuf>,
}

impl CommandGenerator {
    pub fn new(commands: GeneratorCommands, search_paths: Vec<PathBuf>) -> Self {
        Self {
            commands,
            search_paths,
        }
    }

    fn resolve_program(&self, program: &str) -> PathBuf {
        if program.contains('/') {
            return PathBuf::from(program);
        }
        self.search_paths
            .iter()
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
            .unwrap_or_else(|| PathBuf::from(program))
    }

    fn run(&self, name: &str, spec: &CommandSpec, dir: &Path, source: &Path) -> Result<()> {
        let program = self.resolve_program(&spec.program);
        let collaborator_error = |reason: String| HtcError::Collaborator {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            reason,
        };
        debug!(generator = name, program = ?program, dir = ?dir, "running input generator");
        let output = Command::new(&program)
            .args(&spec.args)
            .envs(&spec.envs)
            .env("HTC_SOURCE", source)
            .env("HTC_TARGET", dir)
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| collaborator_error(format!("unable to start {:?}: {}", program, err)))?;
        if !output.status.success() {
            return Err(collaborator_error(format!(
                "{:?} exited with {:?}: {}",
                program,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl InputGenerator for CommandGenerator {
    fn generate_structure_input(&self, dir: &Path, source: &Path) -> Result<()> {
        match &self.commands.structure {
            Some(spec) => self.run("structure", spec, dir, source),
            // a plain structure file is taken as the POSCAR itself
            None if source.is_file() => {
                let poscar = dir.join("POSCAR");
                std::fs::copy(source, &poscar).at_path(&poscar)?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn generate_parameter_input(&self, dir: &Path, source: &Path) -> Result<()> {
        match &self.commands.parameters {
            Some(spec) => self.run("parameters", spec, dir, source),
            None => Ok(()),
        }
    }

    fn generate_potential_input(&self, dir: &Path, source: &Path) -> Result<()> {
        match &self.commands.potential {
            Some(spec) => self.run("potential", spec, dir, source),
            None => Ok(()),
        }
    }

    fn generate_kpoints_input(&self, dir: &Path, source: &Path) -> Result<()> {
        match &self.commands.kpoints {
            Some(spec) => self.run("kpoints", spec, dir, source),
            None => Ok(()),
        }
    }
}
