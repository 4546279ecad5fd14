use std::path::Path;

use tracing::warn;

use crate::error::{IoContext, Result};

/// Tags controlling ionic relaxation, dropped for the single-point follow-up.
pub const RELAXATION_TAGS: [&str; 5] = ["IBRION", "NSW", "ISIF", "EDIFFG", "POTIM"];

/// VASP INCAR as ordered `TAG = value` pairs. Comments are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Incar {
    params: Vec<(String, String)>,
}

impl Incar {
    pub fn parse(content: &str) -> Self {
        let mut params = vec![];
        for line in content.lines() {
            let line = match line.find(&['#', '!'][..]) {
                Some(index) => &line[..index],
                None => line,
            };
            // several tag = value pairs may share a line, separated by ";"
            for pair in line.split(';') {
                let Some((tag, value)) = pair.split_once('=') else {
                    continue;
                };
                let tag = tag.trim().to_uppercase();
                if tag.is_empty() {
                    continue;
                }
                params.push((tag, value.trim().to_string()));
            }
        }
        Self { params }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).at_path(path)?;
        // INCAR files in the wild may carry non UTF-8 comments
        Ok(Self::parse(&String::from_utf8_lossy(&bytes)))
    }

    /// Last value of `tag`, VASP keeps the last occurrence.
    pub fn get(&self, tag: &str) -> Option<&str> {
        let tag = tag.to_uppercase();
        self.params
            .iter()
            .rev()
            .find(|(name, _)| *name == tag)
            .map(|(_, value)| value.as_str())
    }

    fn get_int(&self, tag: &str) -> Option<i64> {
        let value = self.get(tag)?;
        match value.split_whitespace().next()?.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(tag, value, "INCAR value is not an integer");
                None
            }
        }
    }

    /// Ionic relaxation with one of the optimizers (`IBRION` 1, 2 or 3) over
    /// at least one ionic step.
    pub fn is_relaxation_enabled(&self) -> bool {
        let nsw = self.get_int("NSW").unwrap_or(0);
        let ibrion = self.get_int("IBRION").unwrap_or(-1);
        nsw > 0 && matches!(ibrion, 1..=3)
    }

    pub fn strip_relaxation_options(&self) -> Self {
        Self {
            params: self
                .params
                .iter()
                .filter(|(tag, _)| !RELAXATION_TAGS.contains(&tag.as_str()))
                .cloned()
                .collect(),
        }
    }

    pub fn render(&self) -> String {
        let width = self
            .params
            .iter()
            .map(|(tag, _)| tag.len())
            .max()
            .unwrap_or_default();
        self.params
            .iter()
            .map(|(tag, value)| format!("{:width$} = {}\n", tag, value, width = width))
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render()).at_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELAX: &str = "SYSTEM = Si bulk
ENCUT = 520 # plane wave cutoff
ibrion = 2 ; nsw = 100
ISIF = 3
EDIFFG = -0.01
! a whole comment line
ISMEAR = 0
";

    #[test]
    fn parse_tags_and_comments() {
        let incar = Incar::parse(RELAX);
        assert_eq!(incar.get("ENCUT"), Some("520"));
        assert_eq!(incar.get("nsw"), Some("100"));
        assert_eq!(incar.get("IBRION"), Some("2"));
        assert_eq!(incar.get("LREAL"), None);
    }

    #[test]
    fn relaxation_detection() {
        assert!(Incar::parse(RELAX).is_relaxation_enabled());
        assert!(!Incar::parse("IBRION = -1\nNSW = 100\n").is_relaxation_enabled());
        assert!(!Incar::parse("IBRION = 2\nNSW = 0\n").is_relaxation_enabled());
        assert!(!Incar::parse("ENCUT = 520\n").is_relaxation_enabled());
        assert!(!Incar::parse("IBRION = 0\nNSW = 500\n").is_relaxation_enabled());
    }

    #[test]
    fn stripping_keeps_other_tags_in_order() {
        let stripped = Incar::parse(RELAX).strip_relaxation_options();
        assert!(!stripped.is_relaxation_enabled());
        assert_eq!(
            stripped.render(),
            "SYSTEM = Si bulk\nENCUT  = 520\nISMEAR = 0\n"
        );
    }

    #[test]
    fn later_value_wins() {
        let incar = Incar::parse("NSW = 10\nNSW = 0\nIBRION = 2\n");
        assert!(!incar.is_relaxation_enabled());
    }
}
