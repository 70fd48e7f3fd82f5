//! Exclusion artifact loading: a file or a directory of mounted config documents.
//!
//! Accepted document shapes, chosen by the first non-blank character:
//! - `{`  → `{"excluded": ["pattern", ...]}`
//! - `[`  → `["pattern", ...]`
//! - else → plain text, one pattern per line, `#` starts a comment
//!
//! A missing path yields an empty pattern list. A document that opens like JSON
//! but does not parse is a configuration error.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{EraserError, Result};
use crate::exclusion::matcher::ExclusionMatcher;

/// JSON shape of one exclusion config document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExclusionList {
    #[serde(default)]
    pub excluded: Vec<String>,
}

/// Patterns gathered from the artifact, with provenance for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedExclusions {
    pub patterns: Vec<String>,
    pub sources: Vec<PathBuf>,
    /// The configured path did not exist.
    pub missing: bool,
}

impl LoadedExclusions {
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Compile the loaded patterns plus any inline extras.
    pub fn compile(&self, extra: &[String]) -> Result<ExclusionMatcher> {
        let all: Vec<&str> = self
            .patterns
            .iter()
            .chain(extra.iter())
            .map(String::as_str)
            .collect();
        ExclusionMatcher::compile(&all)
    }
}

/// Load exclusion patterns from `path` (file or directory).
pub fn load_exclusions(path: &Path) -> Result<LoadedExclusions> {
    let metadata = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Ok(LoadedExclusions {
                missing: true,
                ..LoadedExclusions::default()
            });
        }
        Err(source) => return Err(EraserError::io(path, source)),
    };

    let mut loaded = LoadedExclusions::default();
    if metadata.is_dir() {
        for file in document_files(path)? {
            let patterns = read_document(&file)?;
            loaded.patterns.extend(patterns);
            loaded.sources.push(file);
        }
    } else {
        loaded.patterns = read_document(path)?;
        loaded.sources.push(path.to_path_buf());
    }
    Ok(loaded)
}

/// Regular files directly under `dir`, sorted, skipping dot-entries
/// (config-map mounts keep `..data` bookkeeping links there).
fn document_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|source| EraserError::io(dir, source))?;
    let mut files = Vec::new();
    for entry_result in entries {
        let Ok(entry) = entry_result else {
            continue;
        };
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        // fs::metadata follows the symlinks config-map mounts use.
        if fs::metadata(&path).is_ok_and(|m| m.is_file()) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_document(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path).map_err(|source| EraserError::io(path, source))?;
    parse_document(&raw).map_err(|details| EraserError::ConfigParse {
        context: "exclusion artifact",
        details: format!("{}: {details}", path.display()),
    })
}

/// Parse one document body into patterns.
pub fn parse_document(raw: &str) -> std::result::Result<Vec<String>, String> {
    let trimmed = raw.trim();
    let patterns = match trimmed.chars().next() {
        None => Vec::new(),
        Some('{') => {
            let list: ExclusionList =
                serde_json::from_str(trimmed).map_err(|e| e.to_string())?;
            list.excluded
        }
        Some('[') => serde_json::from_str::<Vec<String>>(trimmed).map_err(|e| e.to_string())?,
        Some(_) => trimmed
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default().trim())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
    };
    Ok(patterns
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect())
}
