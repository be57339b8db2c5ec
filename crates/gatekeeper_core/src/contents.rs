//! Parsing the user-authored `# Contents` section of `index.md`.
//!
//! The contents index customizes the order of the navigation table and may
//! introduce external references. Items wrapped in an HTML comment are
//! published but hidden from the rendered navigation.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::{DOC_FILE_EXTENSION, DOCUMENTATION_INDEX_FILENAME, NAVIGATION_HEADING};
use crate::discourse::DiscourseApi;
use crate::error::{GatekeeperError, Result};
use crate::filesystem::word_case;
use crate::metadata::Metadata;
use crate::types::{Index, IndexContentsListItem, IndexFile, Page};

pub const CONTENTS_HEADER: &str = "# contents";

static ITEM_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<indent> *)(?:\d+\.|[a-zA-Z]+\.|\*|-)\s*\[(?P<title>.*)\]\((?P<value>.*)\)\s*$")
        .expect("invalid contents item regex")
});
static HIDDEN_ITEM_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^<!-- (?P<indent> *)(?:\d+\.|[a-zA-Z]+\.|\*|-)\s*\[(?P<title>.*)\]\((?P<value>.*)\) -->$",
    )
    .expect("invalid hidden contents item regex")
});
static COMMENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ *<!-- .+? -->$").expect("invalid comment regex"));

/// Retrieve the local index file and, when the metadata links one, the index
/// topic on the server.
pub fn get_index(
    metadata: &Metadata,
    docs_path: &Path,
    discourse: &dyn DiscourseApi,
) -> Result<Index> {
    let server = match &metadata.docs {
        Some(url) => {
            let content = discourse.retrieve_topic(url).map_err(|error| {
                GatekeeperError::Server(format!("index page retrieval failed: {error}"))
            })?;
            Some(Page {
                url: url.clone(),
                content,
            })
        }
        None => None,
    };

    let index_file = docs_path.join(DOCUMENTATION_INDEX_FILENAME);
    let local_content = if index_file.is_file() {
        Some(fs::read_to_string(&index_file).map_err(|error| {
            GatekeeperError::Input(format!("failed to read {}: {error}", index_file.display()))
        })?)
    } else {
        None
    };

    Ok(Index {
        server,
        local: IndexFile {
            title: format!(
                "{} Documentation Overview",
                word_case(&metadata.name.replace('-', " "))
            ),
            content: local_content,
        },
        name: metadata.name.clone(),
    })
}

/// Extract the index file body from a server page: everything above the
/// navigation heading.
pub fn contents_from_page(page: &str) -> String {
    let heading = format!("# {}", NAVIGATION_HEADING.to_lowercase());
    page.lines()
        .take_while(|line| line.trim().to_lowercase() != heading)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum IndexSection {
    Contents,
    ExContents,
}

fn iter_index_lines<'a>(content: &'a str, section: IndexSection) -> Vec<&'a str> {
    let mut contents_encountered = false;
    let mut drop_lines = section == IndexSection::Contents;
    let mut output = Vec::new();
    for line in content.lines() {
        if !contents_encountered && line.to_lowercase() == CONTENTS_HEADER {
            contents_encountered = true;
            drop_lines = section == IndexSection::ExContents;
        } else if line.starts_with('#') {
            drop_lines = section == IndexSection::Contents;
        }
        if !drop_lines {
            output.push(line);
        }
    }
    output
}

/// The contents of the index file that are uploaded to the server: everything
/// except the contents section, which is superseded by the navigation table.
pub fn get_content_for_server(index_file: &IndexFile) -> String {
    match &index_file.content {
        Some(content) => iter_index_lines(content, IndexSection::ExContents).join("\n"),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedListItem {
    whitespace_count: usize,
    reference_title: String,
    reference_value: String,
    rank: usize,
    hidden: bool,
    comment: bool,
}

fn parse_item_from_line(line: &str, rank: usize) -> Result<ParsedListItem> {
    let (captures, hidden) = match ITEM_PATTERN.captures(line) {
        Some(captures) => (Some(captures), false),
        None => (HIDDEN_ITEM_PATTERN.captures(line), true),
    };

    let Some(captures) = captures else {
        if COMMENT_PATTERN.is_match(line) {
            return Ok(ParsedListItem {
                whitespace_count: line.len() - line.trim_start().len(),
                reference_title: String::new(),
                reference_value: String::new(),
                rank,
                hidden: false,
                comment: true,
            });
        }
        return Err(GatekeeperError::Input(format!(
            "an item in the contents of the index file at {DOCUMENTATION_INDEX_FILENAME} is \
             invalid, line: {line:?}"
        )));
    };

    let whitespace_count = captures
        .name("indent")
        .map(|indent| indent.as_str().len())
        .unwrap_or_default();
    if !hidden && whitespace_count != 0 && rank == 0 {
        return Err(GatekeeperError::Input(format!(
            "an item in the contents of the index file at {DOCUMENTATION_INDEX_FILENAME} is \
             invalid, line: {line:?}, expecting the first item not to have leading whitespace"
        )));
    }

    Ok(ParsedListItem {
        whitespace_count,
        reference_title: captures["title"].to_string(),
        reference_value: captures["value"].to_string(),
        rank,
        hidden,
        comment: false,
    })
}

fn parsed_items(index_file: &IndexFile) -> Result<Vec<ParsedListItem>> {
    let Some(content) = &index_file.content else {
        return Ok(Vec::new());
    };
    iter_index_lines(content, IndexSection::Contents)
        .iter()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(rank, line)| parse_item_from_line(line, rank))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemReferenceType {
    External,
    Dir,
    File,
    Unknown,
}

fn classify_item_reference(reference: &str, docs_path: &Path) -> ItemReferenceType {
    if reference.to_lowercase().starts_with("http") {
        return ItemReferenceType::External;
    }
    let reference_path = docs_path.join(reference);
    if reference_path.is_dir() {
        return ItemReferenceType::Dir;
    }
    if reference_path.is_file() {
        return ItemReferenceType::File;
    }
    ItemReferenceType::Unknown
}

fn check_contents_item(
    item: &ParsedListItem,
    reference_type: ItemReferenceType,
    max_whitespace: usize,
    aggregate_dir: &Path,
) -> Result<()> {
    if item.whitespace_count > max_whitespace {
        return Err(GatekeeperError::Input(format!(
            "an item has more whitespace and is not following a reference to a directory, \
             item: {item:?}, expected whitespace count: {max_whitespace}"
        )));
    }

    if item.hidden && reference_type == ItemReferenceType::Dir {
        return Err(GatekeeperError::Input(format!(
            "a hidden item references a directory, item: {item:?}"
        )));
    }

    if matches!(reference_type, ItemReferenceType::Dir | ItemReferenceType::File) {
        let item_relative = Path::new(&item.reference_value);
        let within_parent = item_relative.strip_prefix(aggregate_dir).map_err(|_| {
            GatekeeperError::Input(format!(
                "a nested item references a path that is not within the directory of its \
                 parent, item: {item:?}, expected parent path: {}",
                aggregate_dir.display()
            ))
        })?;
        if within_parent.components().count() != 1 {
            return Err(GatekeeperError::Input(format!(
                "a nested item references a path that is not immediately within the directory \
                 of its parent, item: {item:?}, expected parent path: {}",
                aggregate_dir.display()
            )));
        }
        if reference_type == ItemReferenceType::File
            && !item_relative
                .extension()
                .is_some_and(|extension| extension.eq_ignore_ascii_case(DOC_FILE_EXTENSION))
        {
            return Err(GatekeeperError::Input(format!(
                "an item in the contents list is not of the expected file type, item: {item:?}, \
                 expected extension: .{DOC_FILE_EXTENSION}"
            )));
        }
    }

    Ok(())
}

fn calculate_contents_hierarchy(
    items: Vec<ParsedListItem>,
    docs_path: &Path,
) -> Result<Vec<IndexContentsListItem>> {
    let mut output = Vec::new();
    let mut parents: Vec<ParsedListItem> = Vec::new();
    let mut whitespace_per_level: Vec<usize> = vec![0];
    let mut hierarchy = 0usize;
    let mut aggregate_dir = PathBuf::new();

    let mut iterator = items
        .into_iter()
        .filter(|item| !item.comment)
        .peekable();
    while let Some(item) = iterator.next() {
        // Dedent closes directories until the indent matches a parent level.
        while hierarchy > 0 && item.whitespace_count < whitespace_per_level[hierarchy] {
            hierarchy -= 1;
            let parent = parents.pop().ok_or_else(|| {
                GatekeeperError::Input(format!(
                    "inconsistent nesting in the contents index, item: {item:?}"
                ))
            })?;
            aggregate_dir = Path::new(&parent.reference_value)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();
        }

        let reference_type = classify_item_reference(&item.reference_value, docs_path);
        check_contents_item(
            &item,
            reference_type,
            whitespace_per_level[hierarchy],
            &aggregate_dir,
        )?;
        if reference_type == ItemReferenceType::Unknown {
            return Err(GatekeeperError::Input(format!(
                "an item is not a file, directory or external HTTP resource, item: {item:?}"
            )));
        }

        output.push(IndexContentsListItem {
            hierarchy: hierarchy + 1,
            reference_title: item.reference_title.clone(),
            reference_value: item.reference_value.clone(),
            rank: item.rank,
            hidden: item.hidden,
        });

        if reference_type == ItemReferenceType::Dir
            && iterator
                .peek()
                .is_some_and(|next| next.whitespace_count > whitespace_per_level[hierarchy])
        {
            let next_whitespace = iterator
                .peek()
                .map(|next| next.whitespace_count)
                .unwrap_or_default();
            hierarchy += 1;
            aggregate_dir = PathBuf::from(&item.reference_value);
            if whitespace_per_level.len() == hierarchy {
                whitespace_per_level.push(next_whitespace);
            }
            parents.push(item);
        }
    }

    Ok(output)
}

/// Parse the contents list items out of the index file.
pub fn get_contents(
    index_file: &IndexFile,
    docs_path: &Path,
) -> Result<Vec<IndexContentsListItem>> {
    let parsed = parsed_items(index_file)?;
    let items = calculate_contents_hierarchy(parsed, docs_path)?;

    let mut seen = BTreeSet::new();
    for item in &items {
        if !seen.insert(item.table_path()) {
            return Err(GatekeeperError::Input(format!(
                "duplicate path in the contents index: {}",
                item.reference_value
            )));
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn index_file(content: &str) -> IndexFile {
        IndexFile {
            title: "Charm Documentation Overview".to_string(),
            content: Some(content.to_string()),
        }
    }

    fn docs_with(paths: &[&str]) -> (tempfile::TempDir, PathBuf) {
        let temp = tempdir().expect("tempdir");
        let docs = temp.path().join("docs");
        fs::create_dir_all(&docs).expect("create docs");
        for path in paths {
            let full = docs.join(path);
            if path.ends_with(".md") {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent).expect("create parent");
                }
                fs::write(&full, "# Title\n").expect("write file");
            } else {
                fs::create_dir_all(&full).expect("create dir");
            }
        }
        (temp, docs)
    }

    #[test]
    fn contents_from_page_stops_at_navigation_heading() {
        let body = contents_from_page("Intro\nmore\n# Navigation\n| level | path | navlink |\n");
        assert_eq!(body, "Intro\nmore");
    }

    #[test]
    fn content_for_server_drops_the_contents_section() {
        let file = index_file("Intro\n\n# Contents\n- [A](a.md)\n\n# Other\nkept\n");
        assert_eq!(get_content_for_server(&file), "Intro\n\n# Other\nkept");
    }

    #[test]
    fn get_contents_parses_flat_items() {
        let (_temp, docs) = docs_with(&["a.md", "b.md"]);
        let file = index_file("# Contents\n- [First](a.md)\n- [Second](b.md)\n");
        let items = get_contents(&file, &docs).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].reference_title, "First");
        assert_eq!(items[0].hierarchy, 1);
        assert_eq!(items[0].rank, 0);
        assert_eq!(items[1].rank, 1);
    }

    #[test]
    fn get_contents_accepts_alternate_leaders() {
        let (_temp, docs) = docs_with(&["a.md", "b.md", "c.md", "d.md"]);
        let file = index_file(
            "# Contents\n1. [A](a.md)\n2. [B](b.md)\n* [C](c.md)\nab. [D](d.md)\n",
        );
        let items = get_contents(&file, &docs).unwrap();
        assert_eq!(items.len(), 4);
    }

    #[test]
    fn get_contents_computes_nested_hierarchy() {
        let (_temp, docs) = docs_with(&["guide", "guide/intro.md", "guide/deep", "guide/deep/why.md", "other.md"]);
        let file = index_file(
            "# Contents\n\
             - [Guide](guide)\n\
               - [Intro](guide/intro.md)\n\
               - [Deep](guide/deep)\n\
                 - [Why](guide/deep/why.md)\n\
             - [Other](other.md)\n",
        );
        let items = get_contents(&file, &docs).unwrap();
        let hierarchy: Vec<usize> = items.iter().map(|item| item.hierarchy).collect();
        assert_eq!(hierarchy, vec![1, 2, 2, 3, 1]);
    }

    #[test]
    fn get_contents_classifies_external_references() {
        let (_temp, docs) = docs_with(&[]);
        let file = index_file("# Contents\n- [Spec](https://example.com/spec)\n");
        let items = get_contents(&file, &docs).unwrap();
        assert!(items[0].is_external());
    }

    #[test]
    fn get_contents_parses_hidden_items() {
        let (_temp, docs) = docs_with(&["internal.md"]);
        let file = index_file("# Contents\n<!-- - [Internal](internal.md) -->\n");
        let items = get_contents(&file, &docs).unwrap();
        assert!(items[0].hidden);
    }

    #[test]
    fn get_contents_skips_non_item_comments() {
        let (_temp, docs) = docs_with(&["a.md"]);
        let file = index_file("# Contents\n<!-- vale off -->\n- [A](a.md)\n");
        let items = get_contents(&file, &docs).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].reference_title, "A");
    }

    #[test]
    fn get_contents_rejects_hidden_directories() {
        let (_temp, docs) = docs_with(&["guide"]);
        let file = index_file("# Contents\n<!-- - [Guide](guide) -->\n");
        let error = get_contents(&file, &docs).unwrap_err();
        assert!(error.to_string().contains("hidden"));
    }

    #[test]
    fn get_contents_rejects_malformed_items() {
        let (_temp, docs) = docs_with(&["a.md"]);
        for content in [
            "# Contents\n-\n",
            "# Contents\n- [title]\n",
            "# Contents\n- [title] (a.md)\n",
            "# Contents\n- [title](a.md)trailing\n",
            "# Contents\nmalformed\n",
        ] {
            let file = index_file(content);
            assert!(get_contents(&file, &docs).is_err(), "accepted: {content:?}");
        }
    }

    #[test]
    fn get_contents_rejects_leading_whitespace_on_first_item() {
        let (_temp, docs) = docs_with(&["a.md"]);
        let file = index_file("# Contents\n  - [A](a.md)\n");
        assert!(get_contents(&file, &docs).is_err());
    }

    #[test]
    fn get_contents_rejects_unknown_references() {
        let (_temp, docs) = docs_with(&[]);
        let file = index_file("# Contents\n- [Missing](missing.md)\n");
        let error = get_contents(&file, &docs).unwrap_err();
        assert!(error.to_string().contains("not a file, directory or external"));
    }

    #[test]
    fn get_contents_rejects_nesting_outside_the_parent_directory() {
        let (_temp, docs) = docs_with(&["guide", "guide/intro.md", "elsewhere.md"]);
        let file = index_file(
            "# Contents\n- [Guide](guide)\n  - [Elsewhere](elsewhere.md)\n",
        );
        let error = get_contents(&file, &docs).unwrap_err();
        assert!(error.to_string().contains("parent"));
    }

    #[test]
    fn get_contents_rejects_wrong_file_extension() {
        let (_temp, docs) = docs_with(&[]);
        let docs_file = docs.join("notes.txt");
        fs::write(&docs_file, "text\n").expect("write file");
        let file = index_file("# Contents\n- [Notes](notes.txt)\n");
        let error = get_contents(&file, &docs).unwrap_err();
        assert!(error.to_string().contains("expected extension"));
    }

    #[test]
    fn get_contents_rejects_duplicate_paths() {
        let (_temp, docs) = docs_with(&["a.md"]);
        let file = index_file("# Contents\n- [One](a.md)\n- [Two](a.md)\n");
        let error = get_contents(&file, &docs).unwrap_err();
        assert!(error.to_string().contains("duplicate"));
    }

    #[test]
    fn get_contents_is_empty_without_a_contents_section() {
        let (_temp, docs) = docs_with(&[]);
        let file = index_file("Just an intro.\n");
        assert!(get_contents(&file, &docs).unwrap().is_empty());
        let missing = IndexFile {
            title: "T".to_string(),
            content: None,
        };
        assert!(get_contents(&missing, &docs).unwrap().is_empty());
    }
}
