//! Rebuilding a local docs tree from the server navigation table.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::DOCUMENTATION_INDEX_FILENAME;
use crate::discourse::DiscourseApi;
use crate::error::{GatekeeperError, Result};
use crate::filesystem::calculate_table_path;
use crate::types::{ActionReport, ActionResult, TableRow};

pub const EMPTY_DIR_REASON: &str = "<created due to empty directory>";
pub const GITKEEP_FILENAME: &str = ".gitkeep";

/// A file the migration will write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileMeta {
    /// Keeps an empty directory alive in git.
    Gitkeep { path: PathBuf, row: TableRow },
    /// A topic to download.
    Document {
        path: PathBuf,
        link: String,
        row: TableRow,
    },
    /// The body of the index topic.
    Index { path: PathBuf, content: String },
}

fn validate_row_levels(rows: &[TableRow]) -> Result<()> {
    let mut level = 0usize;
    let mut previous: Option<&TableRow> = None;
    for row in rows {
        if row.level == 0 {
            return Err(GatekeeperError::Migration(format!(
                "invalid level {} in row {:?}",
                row.level, row.path
            )));
        }
        if row.level > level {
            let difference = row.level - level;
            if difference > 1 {
                return Err(GatekeeperError::Migration(format!(
                    "level difference of {difference} encountered in row {:?}",
                    row.path
                )));
            }
            if let Some(previous) = previous
                && previous.navlink.link.is_some()
            {
                return Err(GatekeeperError::Migration(format!(
                    "invalid parent row for {:?}",
                    row.path
                )));
            }
        }
        level = row.level;
        previous = Some(row);
    }
    Ok(())
}

/// Reverse the table-path function: strip the directory prefix to recover the
/// name of a row inside the current directory.
fn name_within_directory(current_directory: &Path, table_path: &str) -> String {
    let prefix = format!("{}-", calculate_table_path(current_directory));
    table_path
        .strip_prefix(&prefix)
        .unwrap_or(table_path)
        .to_string()
}

fn extract_docs(rows: &[TableRow]) -> Result<Vec<FileMeta>> {
    validate_row_levels(rows)?;

    let mut output = Vec::new();
    let mut level = 0usize;
    let mut last_dir_has_file = true;
    let mut last_dir_row: Option<&TableRow> = None;
    let mut cwd = PathBuf::new();

    for row in rows {
        if row.level <= level {
            if !last_dir_has_file
                && let Some(dir_row) = last_dir_row
            {
                output.push(FileMeta::Gitkeep {
                    path: cwd.join(GITKEEP_FILENAME),
                    row: dir_row.clone(),
                });
            }
            while row.level <= level {
                level -= 1;
                cwd.pop();
            }
        }

        match &row.navlink.link {
            None => {
                last_dir_has_file = false;
                last_dir_row = Some(row);
                cwd.push(name_within_directory(&cwd, &row.path));
                level = row.level;
            }
            Some(link) => {
                last_dir_has_file = true;
                let file_name = name_within_directory(&cwd, &row.path);
                output.push(FileMeta::Document {
                    path: cwd.join(format!("{file_name}.md")),
                    link: link.clone(),
                    row: row.clone(),
                });
            }
        }
    }
    if !last_dir_has_file
        && let Some(dir_row) = last_dir_row
    {
        output.push(FileMeta::Gitkeep {
            path: cwd.join(GITKEEP_FILENAME),
            row: dir_row.clone(),
        });
    }
    Ok(output)
}

/// Compute the full file plan: the index body first, then every table row.
pub fn get_docs_metadata(rows: &[TableRow], index_content: &str) -> Result<Vec<FileMeta>> {
    let mut output = vec![FileMeta::Index {
        path: PathBuf::from(DOCUMENTATION_INDEX_FILENAME),
        content: index_content.to_string(),
    }];
    output.extend(extract_docs(rows)?);
    Ok(output)
}

/// Write the planned files under the docs directory.
///
/// Failures are reported per file; the remaining files are still written.
pub fn run(
    metas: &[FileMeta],
    discourse: &dyn DiscourseApi,
    docs_path: &Path,
) -> Vec<ActionReport> {
    metas
        .iter()
        .map(|meta| {
            let report = run_one(meta, discourse, docs_path);
            tracing::info!(?report.result, location = ?report.location, "migration report");
            report
        })
        .collect()
}

fn run_one(meta: &FileMeta, discourse: &dyn DiscourseApi, docs_path: &Path) -> ActionReport {
    match meta {
        FileMeta::Gitkeep { path, row } => {
            let full_path = docs_path.join(path);
            match write_file(&full_path, "") {
                Ok(()) => ActionReport {
                    table_row: Some(row.clone()),
                    location: Some(full_path.display().to_string()),
                    result: ActionResult::Success,
                    reason: Some(EMPTY_DIR_REASON.to_string()),
                },
                Err(error) => fail_report(Some(row), error),
            }
        }
        FileMeta::Document { path, link, row } => {
            let content = match discourse.retrieve_topic(link) {
                Ok(content) => content,
                Err(error) => return fail_report(Some(row), error.to_string()),
            };
            let full_path = docs_path.join(path);
            match write_file(&full_path, &content) {
                Ok(()) => ActionReport {
                    table_row: Some(row.clone()),
                    location: Some(full_path.display().to_string()),
                    result: ActionResult::Success,
                    reason: None,
                },
                Err(error) => fail_report(Some(row), error),
            }
        }
        FileMeta::Index { path, content } => {
            let full_path = docs_path.join(path);
            match write_file(&full_path, content) {
                Ok(()) => ActionReport {
                    table_row: None,
                    location: Some(full_path.display().to_string()),
                    result: ActionResult::Success,
                    reason: None,
                },
                Err(error) => fail_report(None, error),
            }
        }
    }
}

fn fail_report(row: Option<&TableRow>, reason: String) -> ActionReport {
    ActionReport {
        table_row: row.cloned(),
        location: None,
        result: ActionResult::Fail,
        reason: Some(reason),
    }
}

fn write_file(path: &Path, content: &str) -> std::result::Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|error| format!("failed to create {}: {error}", parent.display()))?;
    }
    fs::write(path, content).map_err(|error| format!("failed to write {}: {error}", path.display()))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::discourse::testing::MockDiscourse;
    use crate::types::Navlink;

    fn page_row(level: usize, path: &str, link: &str) -> TableRow {
        TableRow {
            level,
            path: path.to_string(),
            navlink: Navlink {
                title: path.to_string(),
                link: Some(link.to_string()),
                hidden: false,
            },
        }
    }

    fn group_row(level: usize, path: &str) -> TableRow {
        TableRow {
            level,
            path: path.to_string(),
            navlink: Navlink {
                title: path.to_string(),
                link: None,
                hidden: false,
            },
        }
    }

    #[test]
    fn level_jumps_and_non_group_parents_are_rejected() {
        let jump = vec![group_row(1, "guide"), page_row(3, "guide-a-b", "/t/1")];
        assert!(extract_docs(&jump).is_err());

        let bad_parent = vec![page_row(1, "intro", "/t/1"), page_row(2, "intro-more", "/t/2")];
        assert!(extract_docs(&bad_parent).is_err());

        let zero = vec![TableRow {
            level: 0,
            path: "zero".to_string(),
            navlink: Navlink {
                title: "Zero".to_string(),
                link: None,
                hidden: false,
            },
        }];
        assert!(extract_docs(&zero).is_err());
    }

    #[test]
    fn file_plan_reverses_table_paths_into_directories() {
        let rows = vec![
            group_row(1, "guide"),
            page_row(2, "guide-intro", "/t/intro/2"),
            group_row(2, "guide-deep"),
            page_row(3, "guide-deep-why", "/t/why/3"),
            page_row(1, "top", "/t/top/4"),
        ];
        let metas = get_docs_metadata(&rows, "index body").unwrap();

        let paths: Vec<String> = metas
            .iter()
            .map(|meta| match meta {
                FileMeta::Gitkeep { path, .. }
                | FileMeta::Document { path, .. }
                | FileMeta::Index { path, .. } => path.display().to_string(),
            })
            .collect();
        assert_eq!(
            paths,
            vec!["index.md", "guide/intro.md", "guide/deep/why.md", "top.md"]
        );
    }

    #[test]
    fn empty_directories_get_a_gitkeep() {
        let rows = vec![
            group_row(1, "empty"),
            page_row(1, "after", "/t/after/5"),
            group_row(1, "trailing-empty"),
        ];
        let metas = get_docs_metadata(&rows, "").unwrap();
        let gitkeeps: Vec<String> = metas
            .iter()
            .filter_map(|meta| match meta {
                FileMeta::Gitkeep { path, .. } => Some(path.display().to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(gitkeeps, vec!["empty/.gitkeep", "trailing-empty/.gitkeep"]);
    }

    #[test]
    fn run_writes_topics_and_index_to_disk() {
        let temp = tempdir().expect("tempdir");
        let docs = temp.path().join("docs");
        let discourse = MockDiscourse::new()
            .with_topic("https://discourse.example.com/t/intro/2", "# Intro\nbody\n");
        let rows = vec![group_row(1, "guide"), page_row(2, "guide-intro", "/t/intro/2")];
        let metas = get_docs_metadata(&rows, "index body\n").unwrap();

        let reports = run(&metas, &discourse, &docs);
        assert!(reports
            .iter()
            .all(|report| report.result == ActionResult::Success));
        assert_eq!(
            fs::read_to_string(docs.join("index.md")).unwrap(),
            "index body\n"
        );
        assert_eq!(
            fs::read_to_string(docs.join("guide/intro.md")).unwrap(),
            "# Intro\nbody\n"
        );
    }

    #[test]
    fn missing_topics_fail_without_stopping_the_migration() {
        let temp = tempdir().expect("tempdir");
        let docs = temp.path().join("docs");
        let discourse = MockDiscourse::new()
            .with_topic("https://discourse.example.com/t/second/3", "# Second\n");
        let rows = vec![
            page_row(1, "first", "/t/gone/2"),
            page_row(1, "second", "/t/second/3"),
        ];
        let metas = get_docs_metadata(&rows, "").unwrap();

        let reports = run(&metas, &discourse, &docs);
        let results: Vec<ActionResult> = reports.iter().map(|report| report.result).collect();
        assert_eq!(
            results,
            vec![
                ActionResult::Success,
                ActionResult::Fail,
                ActionResult::Success
            ]
        );
        assert!(!docs.join("first.md").exists());
        assert!(docs.join("second.md").exists());
    }
}
