use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

/// Lists CSV files under `dir`, sorted by path.
///
/// Files whose lowercase name ends with one of `ignore_suffixes` are skipped.
/// A missing directory yields an empty list.
pub fn list_csv_in_dir(
    dir: &Path,
    ignore_suffixes: &[String],
    recursive: bool,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    let suffixes: Vec<String> = ignore_suffixes.iter().map(|s| s.to_lowercase()).collect();
    collect_into(dir, &suffixes, recursive, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_into(
    dir: &Path,
    suffixes: &[String],
    recursive: bool,
    files: &mut Vec<PathBuf>,
) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("Listing directory {dir:?}"))? {
        let entry = entry.with_context(|| format!("Listing directory {dir:?}"))?;
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                collect_into(&path, suffixes, recursive, files)?;
            }
            continue;
        }
        if !path.is_file() || !has_csv_extension(&path) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if suffixes.iter().any(|suffix| name.ends_with(suffix.as_str())) {
            continue;
        }
        files.push(path);
    }
    Ok(())
}

fn has_csv_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}
