use std::path::Path;

use tracing::debug;

use crate::error::{IoContext, Result};

/// After staging, the contents of `from` are written into `to` inside the
/// destination directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameRule {
    pub from: String,
    pub to: String,
}

impl RenameRule {
    pub fn contcar_to_poscar() -> Self {
        Self {
            from: "CONTCAR".to_string(),
            to: "POSCAR".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagingReport {
    pub copied: Vec<String>,
    pub moved: Vec<String>,
    /// Requested names absent from the source directory, in request order.
    pub missing: Vec<String>,
    pub renamed: Option<RenameRule>,
}

impl StagingReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Copy and move files from `src_dir` into `dst_dir`.
///
/// Files absent from `src_dir` do not fail the call, they are reported in
/// [`StagingReport::missing`]. Existing destination files are overwritten.
pub fn stage<C, M>(
    src_dir: &Path,
    dst_dir: &Path,
    copy_list: &[C],
    move_list: &[M],
    rename_rule: Option<&RenameRule>,
) -> Result<StagingReport>
where
    C: AsRef<str>,
    M: AsRef<str>,
{
    std::fs::create_dir_all(dst_dir).at_path(dst_dir)?;
    let mut report = StagingReport::default();
    for name in copy_list.iter().map(AsRef::as_ref) {
        let source = src_dir.join(name);
        if source.is_file() {
            let destination = dst_dir.join(name);
            std::fs::copy(&source, &destination).at_path(&destination)?;
            debug!(file = name, from = ?src_dir, to = ?dst_dir, "copied");
            report.copied.push(name.to_string());
        } else {
            report.missing.push(name.to_string());
        }
    }
    for name in move_list.iter().map(AsRef::as_ref) {
        let source = src_dir.join(name);
        if source.is_file() {
            let destination = dst_dir.join(name);
            // copy then delete, the two directories may sit on different mounts
            std::fs::copy(&source, &destination).at_path(&destination)?;
            std::fs::remove_file(&source).at_path(&source)?;
            debug!(file = name, from = ?src_dir, to = ?dst_dir, "moved");
            report.moved.push(name.to_string());
        } else {
            report.missing.push(name.to_string());
        }
    }
    if let Some(rule) = rename_rule {
        let source = dst_dir.join(&rule.from);
        if source.is_file() {
            let destination = dst_dir.join(&rule.to);
            std::fs::copy(&source, &destination).at_path(&destination)?;
            report.renamed = Some(rule.clone());
        }
    }
    Ok(report)
}
