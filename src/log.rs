use std::{
    fmt::Display,
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Local;
use tracing_subscriber::EnvFilter;

use crate::error::{IoContext, Result};

/// Install the global tracing subscriber. `RUST_LOG` wins over `fallback_level`.
pub fn init_tracing(fallback_level: &str) {
    let fallback_level = match fallback_level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Append-only, human readable history of what the pipeline did to one
/// structure. The file is only created on the first entry.
#[derive(Debug, Clone)]
pub struct StructureLog {
    path: PathBuf,
}

impl StructureLog {
    pub const FILE_NAME: &'static str = "log.txt";

    pub fn new(structure_dir: &Path) -> Self {
        Self {
            path: structure_dir.join(Self::FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, step: &str, message: impl Display) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .at_path(&self.path)?;
        writeln!(
            file,
            "[{}] [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            step,
            message
        )
        .at_path(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_appended_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = StructureLog::new(dir.path());
        assert!(!log.path().exists());
        log.append("step_1", "created").unwrap();
        log.append("step_1", "ready").unwrap();
        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[step_1] created"));
        assert!(lines[1].ends_with("[step_1] ready"));
    }
}
