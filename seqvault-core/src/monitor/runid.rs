use std::path::Path;

use walkdir::WalkDir;

use crate::error::{Result, VaultError};

/// File suffixes that mark qualifying instrument data output.
const DATA_SUFFIXES: &[&str] = &[".fast5", ".pod5", ".fastq", ".fastq.gz"];

pub fn is_data_file(name: &str) -> bool {
    DATA_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Extract the run key from a data file name: the first underscore-delimited
/// token of the stem that is exactly eight lowercase hex characters, e.g.
/// `6007177c` in `FAK12345_6007177c_123_0.fast5`.
pub fn parse_key(name: &str) -> Option<String> {
    let stem = name.split('.').next()?;
    stem.split('_')
        .find(|t| t.len() == 8 && t.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)))
        .map(str::to_string)
}

/// Identify a run from the first qualifying data file under `dir`. The key
/// lives in the file's name, not the folder's: instruments get restarted and
/// folders renamed, but data files carry the identifier they were written
/// with.
pub fn identify(dir: &Path) -> Result<String> {
    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !is_data_file(&name) {
            continue;
        }
        if let Some(key) = parse_key(&name) {
            return Ok(key);
        }
    }
    Err(VaultError::InvalidRunIdentifier(dir.to_path_buf()))
}
