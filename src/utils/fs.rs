use std::path::Path;

use markers::Marker;

use crate::error::{IoContext, Result};

/// Copy the regular files of `source` into `target`, skipping markers and any
/// name rejected by `keep`. Sub-directories are not descended into.
pub fn copy_plain_files<F>(source: &Path, target: &Path, keep: F) -> Result<Vec<String>>
where
    F: Fn(&str) -> bool,
{
    std::fs::create_dir_all(target).at_path(target)?;
    let mut copied = vec![];
    for item in std::fs::read_dir(source).at_path(source)? {
        let item = item.at_path(source)?;
        let path = item.path();
        let name = item.file_name().to_string_lossy().to_string();
        if !path.is_file() || Marker::from_file_name(&name).is_some() || !keep(&name) {
            continue;
        }
        let destination = target.join(&name);
        std::fs::copy(&path, &destination).at_path(&destination)?;
        copied.push(name);
    }
    copied.sort();
    Ok(copied)
}

/// Remove the listed files from `dir`, returning the names actually removed.
pub fn remove_files<S: AsRef<str>>(dir: &Path, names: &[S]) -> Result<Vec<String>> {
    let mut removed = vec![];
    for name in names {
        let path = dir.join(name.as_ref());
        if path.is_file() {
            std::fs::remove_file(&path).at_path(&path)?;
            removed.push(name.as_ref().to_string());
        }
    }
    Ok(removed)
}

/// Copy an auxiliary file into `dir` under its own file name.
pub fn copy_into(file: &Path, dir: &Path) -> Result<Option<String>> {
    let Some(name) = file.file_name() else {
        return Ok(None);
    };
    let destination = dir.join(name);
    std::fs::copy(file, &destination).at_path(file)?;
    Ok(Some(name.to_string_lossy().to_string()))
}
