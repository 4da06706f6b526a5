//! Loading raw records from export files on disk.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use satlog_normalize::{records_from_csv, records_from_json};
use serde_json::Value;
use tracing::{debug, info};

/// Expands each argument as a glob pattern. An argument that matches nothing
/// is kept as a literal path so a missing file surfaces as a read error.
pub fn expand(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let mut matched = false;
        for entry in glob::glob(pattern).with_context(|| format!("invalid pattern {pattern}"))? {
            paths.push(entry.with_context(|| format!("failed to read a match of {pattern}"))?);
            matched = true;
        }
        if !matched {
            paths.push(PathBuf::from(pattern));
        }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

/// Decodes one export. `.csv` files are read as CSV with a header row;
/// everything else is read as JSON.
pub fn read_records(path: &Path) -> Result<Vec<Value>> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    let records = if is_csv {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        records_from_csv(file)
    } else {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        records_from_json(&content)
    }
    .with_context(|| format!("failed to decode {}", path.display()))?;

    debug!(path = %path.display(), records = records.len(), "export decoded");
    Ok(records)
}

/// Reads every file matched by `patterns` into one batch, in path order.
pub fn load_batch(patterns: &[String]) -> Result<Vec<Value>> {
    let paths = expand(patterns)?;
    if paths.is_empty() {
        bail!("no input files given");
    }

    let mut records = Vec::new();
    for path in &paths {
        records.extend(read_records(path)?);
    }
    info!(files = paths.len(), records = records.len(), "import batch loaded");
    Ok(records)
}
