use std::{
    fs::File,
    path::{Path, PathBuf},
};

use glob::glob;
use serde::Deserialize;

use crate::{
    error::{IoContext, Result},
    external::GeneratorCommands,
    firework::Workflow,
    serde_default::{default_cal_folder, default_log_level},
};

/// Campaign description, read once at start-up and never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct CampaignConfig {
    /// Glob pattern of the input structure files.
    pub structure_pattern: String,
    #[serde(default = "default_cal_folder")]
    pub cal_folder: PathBuf,
    /// Directories searched first for generator programs.
    #[serde(default)]
    pub binaries: Vec<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub generators: GeneratorCommands,
    pub fireworks: Workflow,
}

impl CampaignConfig {
    /// Relative paths in the file are taken relative to the file's directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path).at_path(path)?;
        let config: Self = serde_yaml::from_reader(file)?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(config.anchored(&base))
    }

    fn anchored(mut self, base: &Path) -> Self {
        if !Path::new(&self.structure_pattern).is_absolute() {
            self.structure_pattern = base
                .join(&self.structure_pattern)
                .to_string_lossy()
                .to_string();
        }
        self.cal_folder = base.join(&self.cal_folder);
        self.binaries = self
            .binaries
            .into_iter()
            .map(|binary| base.join(binary))
            .collect();
        self
    }

    /// Structure files matched by the pattern, in a stable order.
    pub fn structures(&self) -> Result<Vec<PathBuf>> {
        let mut structures = glob(&self.structure_pattern)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();
        structures.sort();
        Ok(structures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
structure_pattern: "structures/*.vasp"
binaries: [bin]
generators:
  parameters:
    program: write_incar
    args: ["--functional", "PBE"]
fireworks:
  - step_no: 1
    firework_folder_name: step_1_str_opt
  - step_no: 2
    firework_folder_name: step_2_scf
    copy_from_prev_cal: [CONTCAR]
    contcar_to_poscar: true
"#;

    #[test]
    fn relative_paths_follow_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campaign.yaml");
        std::fs::write(&path, CONFIG).unwrap();
        std::fs::create_dir(dir.path().join("structures")).unwrap();
        std::fs::write(dir.path().join("structures").join("b.vasp"), "").unwrap();
        std::fs::write(dir.path().join("structures").join("a.vasp"), "").unwrap();
        std::fs::write(dir.path().join("structures").join("notes.txt"), "").unwrap();

        let config = CampaignConfig::from_file(&path).unwrap();
        assert_eq!(config.cal_folder, dir.path().join("cal"));
        assert_eq!(config.binaries, vec![dir.path().join("bin")]);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.fireworks.len(), 2);
        assert_eq!(
            config.generators.parameters.as_ref().unwrap().program,
            "write_incar"
        );
        let names = config
            .structures()
            .unwrap()
            .into_iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.vasp", "b.vasp"]);
    }

    #[test]
    fn invalid_workflow_is_rejected_at_load() {
        let yaml = r#"
structure_pattern: "*.vasp"
fireworks:
  - step_no: 2
    firework_folder_name: step_2
"#;
        assert!(serde_yaml::from_str::<CampaignConfig>(yaml).is_err());
    }
}
