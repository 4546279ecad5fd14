#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use htc_vasp::{
    error::Result,
    external::InputGenerator,
    firework::Workflow,
    markers::{transition, Marker},
};

pub const SI_POSCAR: &str = "Si\n  5.43\n 0.0 0.5 0.5\n 0.5 0.0 0.5\n 0.5 0.5 0.0\nSi\n2\nDirect\n0 0 0\n0.25 0.25 0.25\n";

pub const SINGLE_POINT_INCAR: &str = "ENCUT = 520\nISMEAR = 0\nSIGMA = 0.05\n";

pub const RELAX_INCAR: &str = "ENCUT = 520\nIBRION = 2\nNSW = 50\nISIF = 3\nEDIFFG = -0.01\n";

/// Writes fixed INCAR, KPOINTS and POTCAR files, and the structure file as
/// POSCAR when the step starts from it.
pub struct FakeGenerator {
    pub incar: String,
}

impl FakeGenerator {
    pub fn new(incar: &str) -> Self {
        Self {
            incar: incar.to_string(),
        }
    }
}

impl InputGenerator for FakeGenerator {
    fn generate_structure_input(&self, dir: &Path, source: &Path) -> Result<()> {
        if source.is_file() {
            std::fs::copy(source, dir.join("POSCAR")).unwrap();
        }
        Ok(())
    }

    fn generate_parameter_input(&self, dir: &Path, _source: &Path) -> Result<()> {
        std::fs::write(dir.join("INCAR"), &self.incar).unwrap();
        Ok(())
    }

    fn generate_potential_input(&self, dir: &Path, _source: &Path) -> Result<()> {
        std::fs::write(dir.join("POTCAR"), "PAW_PBE Si 05Jan2001\n").unwrap();
        Ok(())
    }

    fn generate_kpoints_input(&self, dir: &Path, _source: &Path) -> Result<()> {
        std::fs::write(dir.join("KPOINTS"), "Automatic\n0\nGamma\n4 4 4\n").unwrap();
        Ok(())
    }
}

/// Deletes `__vis__` while the inputs are written, as a concurrent actor would.
pub struct VanishingMarkerGenerator(pub FakeGenerator);

impl InputGenerator for VanishingMarkerGenerator {
    fn generate_structure_input(&self, dir: &Path, source: &Path) -> Result<()> {
        self.0.generate_structure_input(dir, source)
    }

    fn generate_parameter_input(&self, dir: &Path, source: &Path) -> Result<()> {
        self.0.generate_parameter_input(dir, source)
    }

    fn generate_potential_input(&self, dir: &Path, source: &Path) -> Result<()> {
        self.0.generate_potential_input(dir, source)
    }

    fn generate_kpoints_input(&self, dir: &Path, source: &Path) -> Result<()> {
        let _ = std::fs::remove_file(Marker::Vis.path_in(dir));
        self.0.generate_kpoints_input(dir, source)
    }
}

pub fn workflow(yaml: &str) -> Workflow {
    serde_yaml::from_str(yaml).unwrap()
}

/// A campaign folder holding one structure file `Si.vasp`.
pub fn campaign() -> (tempfile::TempDir, PathBuf, PathBuf) {
    let root = tempfile::tempdir().unwrap();
    let structure = root.path().join("Si.vasp");
    std::fs::write(&structure, SI_POSCAR).unwrap();
    let cal_folder = root.path().join("cal");
    (root, structure, cal_folder)
}

/// Play the batch layer: leave the outputs of a finished job and mark it done.
pub fn finish_job(dir: &Path, energy: f64, outputs: &[&str]) {
    let oszicar = format!(
        "       N       E                     dE             d eps       ncg     rms          rms(c)\n   1 F= {:.8E} E0= {:.8E}  d E =0.000000E+00\n",
        energy, energy
    );
    std::fs::write(dir.join("OSZICAR"), oszicar).unwrap();
    for output in outputs {
        std::fs::write(dir.join(output), format!("{} of {:?}\n", output, dir)).unwrap();
    }
    transition(dir, Marker::Ready, Marker::Done).unwrap();
}

/// Every file below `dir` with its content.
pub fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path.clone());
                files.insert(path, vec![]);
            } else {
                let content = std::fs::read(&path).unwrap();
                files.insert(path, content);
            }
        }
    }
    files
}

pub fn parabola(parameter: f64) -> f64 {
    -10.8 + 40. * (parameter - 1.).powi(2)
}
