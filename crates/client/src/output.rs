//! Collision-free output naming.

use std::path::{Path, PathBuf};

/// Resolves a path under `dir` that does not collide with an existing file.
///
/// `report.bin` becomes `report (1).bin`, `report (2).bin`, … so
/// re-downloading never overwrites an earlier result.
pub fn unique_output_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, extension) = split_name(name);
    let mut index = 1u32;
    loop {
        let numbered = match extension {
            Some(ext) => format!("{stem} ({index}).{ext}"),
            None => format!("{stem} ({index})"),
        };
        let candidate = dir.join(numbered);
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}

/// Splits on the final dot, keeping dotfiles like `.config` whole.
fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}
