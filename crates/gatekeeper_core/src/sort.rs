//! Fusing the docs tree with the contents index into one ordered stream.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{GatekeeperError, Result};
use crate::types::{IndexContentsListItem, PathInfo};

/// One entry of the ordered item stream handed to the planner: a local file
/// or directory, or an external reference from the contents index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemInfo {
    Path(PathInfo),
    External(IndexContentsListItem),
}

impl ItemInfo {
    pub fn table_path(&self) -> String {
        match self {
            ItemInfo::Path(info) => info.table_path.clone(),
            ItemInfo::External(item) => item.table_path(),
        }
    }

    pub fn level(&self) -> usize {
        match self {
            ItemInfo::Path(info) => info.level,
            ItemInfo::External(item) => item.hierarchy,
        }
    }
}

/// Order path infos by the contents index first, appending anything the index
/// does not mention in alphabetical order under its closest listed ancestor.
///
/// Items listed in the index get their navlink title and hidden flag from the
/// index entry. Navigation grouping is positional, so the unlisted children
/// of a directory must be emitted while the directory is still the nearest
/// open group; they cannot simply trail the whole listing.
pub fn using_contents_index(
    path_infos: Vec<PathInfo>,
    index_contents: Vec<IndexContentsListItem>,
    docs_path: &Path,
) -> Result<Vec<ItemInfo>> {
    let mut alpha_sorted = path_infos;
    alpha_sorted.sort_by_key(|info| info.alphabetical_rank);
    let mut items = index_contents;
    items.sort_by_key(|item| item.rank);

    let index_by_local_path: HashMap<PathBuf, usize> = alpha_sorted
        .iter()
        .enumerate()
        .map(|(index, info)| (info.local_path.clone(), index))
        .collect();
    let mut yielded = vec![false; alpha_sorted.len()];
    let mut output = Vec::with_capacity(alpha_sorted.len() + items.len());
    let mut open_dirs: Vec<PathBuf> = Vec::new();

    for item in &items {
        while open_dirs.len() >= item.hierarchy {
            let dir = open_dirs.pop().unwrap_or_default();
            flush_directory(&dir, &alpha_sorted, &mut yielded, &mut output);
        }

        if item.is_external() {
            output.push(ItemInfo::External(item.clone()));
            continue;
        }

        let local_path = docs_path.join(&item.reference_value);
        let index = *index_by_local_path.get(&local_path).ok_or_else(|| {
            GatekeeperError::Input(format!(
                "the contents index references an item not in the docs directory: {}",
                item.reference_value
            ))
        })?;
        let mut info = alpha_sorted[index].clone();
        info.navlink_title = item.reference_title.clone();
        info.navlink_hidden = item.hidden;
        yielded[index] = true;
        let is_dir = info.local_path.is_dir();
        output.push(ItemInfo::Path(info));
        if is_dir {
            open_dirs.push(local_path);
        }
    }

    while let Some(dir) = open_dirs.pop() {
        flush_directory(&dir, &alpha_sorted, &mut yielded, &mut output);
    }
    for (index, info) in alpha_sorted.iter().enumerate() {
        if !yielded[index] {
            output.push(ItemInfo::Path(info.clone()));
        }
    }
    Ok(output)
}

/// Emit the not-yet-listed descendants of a directory in alphabetical order.
fn flush_directory(
    dir: &Path,
    alpha_sorted: &[PathInfo],
    yielded: &mut [bool],
    output: &mut Vec<ItemInfo>,
) {
    for (index, info) in alpha_sorted.iter().enumerate() {
        if !yielded[index] && info.local_path.starts_with(dir) && info.local_path != dir {
            yielded[index] = true;
            output.push(ItemInfo::Path(info.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn build_docs(paths: &[&str]) -> (tempfile::TempDir, PathBuf, Vec<PathInfo>) {
        let temp = tempdir().expect("tempdir");
        let docs = temp.path().join("docs");
        fs::create_dir_all(&docs).expect("create docs");
        for path in paths {
            let full = docs.join(path);
            if path.ends_with(".md") {
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent).expect("create parent");
                }
                fs::write(&full, format!("# {path}\n")).expect("write file");
            } else {
                fs::create_dir_all(&full).expect("create dir");
            }
        }
        let path_infos = crate::filesystem::read(&docs).expect("read docs");
        (temp, docs, path_infos)
    }

    fn item(
        hierarchy: usize,
        title: &str,
        value: &str,
        rank: usize,
        hidden: bool,
    ) -> IndexContentsListItem {
        IndexContentsListItem {
            hierarchy,
            reference_title: title.to_string(),
            reference_value: value.to_string(),
            rank,
            hidden,
        }
    }

    fn table_paths(output: &[ItemInfo]) -> Vec<String> {
        output.iter().map(ItemInfo::table_path).collect()
    }

    #[test]
    fn no_contents_index_yields_alphabetical_order() {
        let (_temp, docs, path_infos) = build_docs(&["b.md", "a.md", "guide", "guide/one.md"]);
        let output = using_contents_index(path_infos, Vec::new(), &docs).unwrap();
        assert_eq!(table_paths(&output), vec!["a", "b", "guide", "guide-one"]);
    }

    #[test]
    fn listed_items_come_first_in_listing_order() {
        let (_temp, docs, path_infos) = build_docs(&["a.md", "b.md", "c.md"]);
        let items = vec![item(1, "Charlie", "c.md", 0, false), item(1, "Alpha", "a.md", 1, false)];
        let output = using_contents_index(path_infos, items, &docs).unwrap();
        assert_eq!(table_paths(&output), vec!["c", "a", "b"]);
        let ItemInfo::Path(first) = &output[0] else {
            panic!("expected a path item");
        };
        assert_eq!(first.navlink_title, "Charlie");
    }

    #[test]
    fn unlisted_children_stay_under_their_directory() {
        let (_temp, docs, path_infos) = build_docs(&[
            "guide",
            "guide/listed.md",
            "guide/unlisted.md",
            "zz.md",
        ]);
        let items = vec![
            item(1, "Guide", "guide", 0, false),
            item(2, "Listed", "guide/listed.md", 1, false),
            item(1, "Last", "zz.md", 2, false),
        ];
        let output = using_contents_index(path_infos, items, &docs).unwrap();
        assert_eq!(
            table_paths(&output),
            vec!["guide", "guide-listed", "guide-unlisted", "zz"]
        );
    }

    #[test]
    fn external_items_keep_their_listed_position() {
        let (_temp, docs, path_infos) = build_docs(&["a.md"]);
        let items = vec![
            item(1, "Spec", "https://example.com/spec", 0, false),
            item(1, "Alpha", "a.md", 1, false),
        ];
        let output = using_contents_index(path_infos, items, &docs).unwrap();
        assert!(matches!(output[0], ItemInfo::External(_)));
        assert_eq!(output.len(), 2);
    }

    #[test]
    fn hidden_flag_is_carried_onto_the_path_info() {
        let (_temp, docs, path_infos) = build_docs(&["internal.md"]);
        let items = vec![item(1, "Internal", "internal.md", 0, true)];
        let output = using_contents_index(path_infos, items, &docs).unwrap();
        let ItemInfo::Path(info) = &output[0] else {
            panic!("expected a path item");
        };
        assert!(info.navlink_hidden);
    }

    #[test]
    fn reference_to_item_outside_the_tree_is_an_error() {
        let (_temp, docs, path_infos) = build_docs(&["a.md"]);
        let items = vec![item(1, "Gone", "gone.md", 0, false)];
        let error = using_contents_index(path_infos, items, &docs).unwrap_err();
        assert!(error.to_string().contains("not in the docs directory"));
    }

    #[test]
    fn levels_keep_parents_before_children() {
        let (_temp, docs, path_infos) =
            build_docs(&["guide", "guide/one.md", "guide/two.md", "intro.md"]);
        let items = vec![item(1, "Intro", "intro.md", 0, false)];
        let output = using_contents_index(path_infos, items, &docs).unwrap();
        assert_eq!(
            table_paths(&output),
            vec!["intro", "guide", "guide-one", "guide-two"]
        );
        for window in output.windows(2) {
            if window[1].level() == window[0].level() + 1 {
                assert!(window[1]
                    .table_path()
                    .starts_with(&format!("{}-", window[0].table_path())));
            }
        }
    }
}
