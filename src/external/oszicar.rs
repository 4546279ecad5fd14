use std::path::Path;

use crate::{
    error::{HtcError, IoContext, Result},
    external::ObservableReader,
};

/// Reads the `E0=` energy of the last ionic step from OSZICAR.
#[derive(Debug, Clone, Copy, Default)]
pub struct OszicarEnergy;

impl OszicarEnergy {
    pub const FILE_NAME: &'static str = "OSZICAR";
}

//    1 F= -.85097948E+02 E0= -.85096866E+02  d E =-.850979E+02  mag=     2.9646
fn parse_energy(line: &str) -> Option<f64> {
    let mut tokens = line.split_whitespace();
    while let Some(token) = tokens.next() {
        if let Some(value) = token.strip_prefix("E0=") {
            let value = if value.is_empty() { tokens.next()? } else { value };
            return value.parse().ok();
        }
    }
    None
}

impl ObservableReader for OszicarEnergy {
    fn read_observable(&self, dir: &Path) -> Result<f64> {
        let path = dir.join(Self::FILE_NAME);
        let content = std::fs::read_to_string(&path).at_path(&path)?;
        content
            .lines()
            .rev()
            .find_map(parse_energy)
            .ok_or_else(|| HtcError::Collaborator {
                name: "observable".to_string(),
                dir: dir.to_path_buf(),
                reason: format!("no ionic step energy found in {}", Self::FILE_NAME),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_energy_line() {
        let line = "   1 F= -.84780990E+02 E0= -.84775142E+02  d E =-.847810E+02  mag=     3.2666";
        assert_eq!(parse_energy(line), Some(-0.84775142E+02));
        assert_eq!(parse_energy("   1 F= -.1E+01 E0=-.2E+01  d E =-.1E+01"), Some(-2.0));
        assert_eq!(
            parse_energy("DAV:   1     0.1E+03    0.1E+03   -0.3E+03  5312   0.1E+03"),
            None
        );
    }

    #[test]
    fn last_ionic_step_is_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("OSZICAR"),
            "DAV:   1    -0.10E+02\n   1 F= -.10E+02 E0= -.1000E+02  d E =-.1E+02\nDAV:   1    -0.11E+02\n   2 F= -.11E+02 E0= -.1100E+02  d E =-.1E+01\nDAV:   1    -0.11E+02\n",
        )
        .unwrap();
        let energy = OszicarEnergy::default().read_observable(dir.path()).unwrap();
        assert_eq!(energy, -11.0);
    }

    #[test]
    fn missing_energy_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("OSZICAR"), "DAV:   1    -0.10E+02\n").unwrap();
        assert!(OszicarEnergy::default().read_observable(dir.path()).is_err());
        let empty = tempfile::tempdir().unwrap();
        assert!(OszicarEnergy.read_observable(empty.path()).is_err());
    }
}
