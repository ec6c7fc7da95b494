//! Input file enumeration.
//!
//! Lists the parse-output files directly inside a predictions directory.
//! Order is byte-wise on the file name, independent of locale, so two runs
//! over the same directory submit work in the same order on any machine.

use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Returns the names of regular files in `dir` ending with `suffix`, sorted
/// byte-wise.
///
/// Subdirectories (including the output subdirectory) are not descended
/// into. An empty result is not an error; the caller decides what an empty
/// run means.
///
/// # Errors
///
/// Returns the underlying `walkdir::Error` if `dir` cannot be read.
pub fn enumerate(dir: &Path, suffix: &str) -> Result<Vec<String>, walkdir::Error> {
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()));

    let mut names = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            warn!(path = %entry.path().display(), "Skipping file with non-UTF-8 name");
            continue;
        };
        if name.ends_with(suffix) {
            names.push(name.to_string());
        }
    }

    debug!(dir = %dir.display(), suffix, count = names.len(), "Enumerated input files");
    Ok(names)
}
