//! Reading the docs directory into path descriptors.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::{DOC_FILE_EXTENSION, DOCUMENTATION_FOLDER_NAME};
use crate::error::{GatekeeperError, Result};
use crate::types::PathInfo;

/// Compute the table path for a path relative to the docs directory.
///
/// Segments are joined with `-`, the `.md` suffix is stripped, everything is
/// lower-cased and characters outside `[a-z0-9-]` are replaced with the
/// delimiter.
pub fn calculate_table_path(relative: &Path) -> String {
    let mut parts: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect();
    if let Some(last) = parts.last_mut()
        && let Some(stripped) = strip_doc_extension(last)
    {
        *last = stripped;
    }
    let joined = parts.join("-").to_lowercase();
    joined
        .chars()
        .map(|character| match character {
            'a'..='z' | '0'..='9' | '-' => character,
            _ => '-',
        })
        .collect()
}

/// Compute the table path for an external URL.
///
/// The URL is flattened into slug segments so external rows share the
/// join-key space with local items.
pub fn external_table_path(url: &str) -> String {
    let flattened = url
        .to_lowercase()
        .replace("//", "/")
        .replace(['.', '?', '#'], "/");
    let cleaned: String = flattened
        .chars()
        .filter(|character| matches!(character, 'a'..='z' | '0'..='9' | '-' | '/'))
        .collect();
    cleaned
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn strip_doc_extension(name: &str) -> Option<String> {
    let lowered = name.to_lowercase();
    lowered
        .strip_suffix(&format!(".{DOC_FILE_EXTENSION}"))
        .map(|_| name[..name.len() - DOC_FILE_EXTENSION.len() - 1].to_string())
}

/// Depth of a path relative to the docs directory, direct children are 1.
fn calculate_level(relative: &Path) -> usize {
    relative.components().count()
}

/// Title priority: first `# ` heading, first non-empty line, then the file or
/// directory name with `-`/`_` as spaces and each word capitalised.
fn calculate_navlink_title(path: &Path) -> Result<String> {
    if path.is_file() {
        let content = fs::read_to_string(path).map_err(|error| {
            GatekeeperError::Input(format!("failed to read {}: {error}", path.display()))
        })?;
        if let Some(heading) = content
            .lines()
            .find_map(|line| line.strip_prefix("# ").map(str::trim))
            .filter(|heading| !heading.is_empty())
        {
            return Ok(heading.to_string());
        }
        if let Some(first) = content.lines().find(|line| !line.trim().is_empty()) {
            return Ok(first.trim().to_string());
        }
    }

    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(word_case(&stem.replace(['-', '_'], " ")))
}

pub(crate) fn word_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut characters = word.chars();
            match characters.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &characters.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Enumerate all directories and documentation files in the docs directory.
///
/// The returned descriptors are in lexicographic path order; the position
/// doubles as the alphabetical rank. Table-path collisions are rejected.
pub fn read(docs_path: &Path) -> Result<Vec<PathInfo>> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(docs_path).min_depth(1) {
        let entry = entry.map_err(|error| {
            GatekeeperError::Input(format!("failed to walk {}: {error}", docs_path.display()))
        })?;
        let path = entry.path();
        if entry.file_type().is_dir() {
            paths.push(path.to_path_buf());
            continue;
        }
        let is_doc_file = path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case(DOC_FILE_EXTENSION));
        let is_index = path
            .file_stem()
            .is_some_and(|stem| stem.eq_ignore_ascii_case("index"));
        if is_doc_file && !is_index {
            paths.push(path.to_path_buf());
        }
    }
    paths.sort();

    let mut seen: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut path_infos = Vec::with_capacity(paths.len());
    for (alphabetical_rank, path) in paths.iter().enumerate() {
        let relative = path.strip_prefix(docs_path).map_err(|error| {
            GatekeeperError::Input(format!(
                "failed to relativize {} against {}: {error}",
                path.display(),
                docs_path.display()
            ))
        })?;
        let table_path = calculate_table_path(relative);
        if let Some(existing) = seen.insert(table_path.clone(), path.clone()) {
            return Err(GatekeeperError::Input(format!(
                "table path collision: {} and {} both map to {table_path}",
                existing.display(),
                path.display()
            )));
        }
        path_infos.push(PathInfo {
            local_path: path.clone(),
            level: calculate_level(relative),
            table_path,
            navlink_title: calculate_navlink_title(path)?,
            alphabetical_rank,
            navlink_hidden: false,
        });
    }
    Ok(path_infos)
}

pub fn has_docs_directory(base_path: &Path) -> bool {
    base_path.join(DOCUMENTATION_FOLDER_NAME).is_dir()
}
