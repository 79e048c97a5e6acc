use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{aggregate::output_file_name, Result};

/// Group name used for merged unit-mode output.
pub const MERGED_GROUP: &str = "Б1";

#[derive(Clone, Debug)]
pub struct MergeOutcome {
    pub file: PathBuf,
    pub lines: usize,
}

/// Non-empty, trimmed lines of a text file. Invalid UTF-8 is replaced, not rejected.
pub fn read_non_empty_lines(path: &Path) -> Result<Vec<String>> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Concatenate the lines of `inputs` in order into `"Б1 (<day>).txt"` inside `out_dir`.
pub fn merge_txt_files(inputs: &[PathBuf], day: i64, out_dir: &Path) -> Result<MergeOutcome> {
    let mut lines: Vec<String> = Vec::new();
    for p in inputs {
        lines.extend(read_non_empty_lines(p)?);
    }

    let file = out_dir.join(output_file_name(MERGED_GROUP, day));
    fs::write(&file, lines.join("\n"))?;
    Ok(MergeOutcome {
        file,
        lines: lines.len(),
    })
}
