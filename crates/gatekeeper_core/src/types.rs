use std::path::PathBuf;

use serde::Serialize;

use crate::filesystem;

/// Information about one file or directory in the docs directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    pub local_path: PathBuf,
    /// Depth from the docs directory, direct children are level 1.
    pub level: usize,
    /// Stable identifier derived from the relative path, the join key against
    /// navigation table rows.
    pub table_path: String,
    pub navlink_title: String,
    pub alphabetical_rank: usize,
    pub navlink_hidden: bool,
}

/// The navlink cell of a navigation table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Navlink {
    pub title: String,
    /// `None` for groups.
    pub link: Option<String>,
    pub hidden: bool,
}

/// One parsed row of the navigation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRow {
    pub level: usize,
    pub path: String,
    pub navlink: Navlink,
}

impl TableRow {
    pub fn is_group(&self) -> bool {
        self.navlink.link.is_none()
    }

    /// Whether the row links off-site rather than to a topic on `host`.
    pub fn is_external(&self, host: &str) -> bool {
        let Some(link) = &self.navlink.link else {
            return false;
        };
        let lower = link.to_ascii_lowercase();
        if !lower.starts_with("http") {
            return false;
        }
        let without_scheme = lower
            .strip_prefix("https://")
            .or_else(|| lower.strip_prefix("http://"))
            .unwrap_or(&lower);
        !without_scheme.starts_with(&host.to_ascii_lowercase())
    }

    /// Render the row as a navigation table line.
    ///
    /// Internal links are relativized so the table stays valid if the server
    /// is moved to a new hostname. Hidden rows wrap the navlink in a details
    /// marker which Discourse collapses.
    pub fn to_markdown(&self, host: &str) -> String {
        let link = if self.is_external(host) {
            self.navlink.link.clone().unwrap_or_default()
        } else {
            self.navlink
                .link
                .as_deref()
                .map(relative_link)
                .unwrap_or_default()
        };
        let navlink = if self.navlink.hidden {
            format!("[details={}]({})[/details]", self.navlink.title, link)
        } else {
            format!("[{}]({})", self.navlink.title, link)
        };
        format!("| {} | {} | {} |", self.level, self.path, navlink)
    }
}

/// Strip the scheme and host from a link, keeping the path.
fn relative_link(link: &str) -> String {
    if let Some(scheme_end) = link.find("://") {
        let after_scheme = &link[scheme_end + 3..];
        match after_scheme.find('/') {
            Some(path_start) => after_scheme[path_start..].to_string(),
            None => String::new(),
        }
    } else {
        link.to_string()
    }
}

/// One entry of the user-authored contents index in `index.md`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexContentsListItem {
    /// Depth in the bullet list, 1-based.
    pub hierarchy: usize,
    pub reference_title: String,
    pub reference_value: String,
    /// Position in the flattened list.
    pub rank: usize,
    pub hidden: bool,
}

impl IndexContentsListItem {
    pub fn is_external(&self) -> bool {
        self.reference_value.to_ascii_lowercase().starts_with("http")
    }

    pub fn table_path(&self) -> String {
        if self.is_external() {
            filesystem::external_table_path(&self.reference_value)
        } else {
            filesystem::calculate_table_path(std::path::Path::new(&self.reference_value))
        }
    }
}

/// The three snapshots of a page driving the three-way merge.
///
/// `base` is absent when the docs content has never been tagged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChange {
    pub base: Option<String>,
    pub server: String,
    pub local: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavlinkChange {
    pub old: Navlink,
    pub new: Navlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexContentChange {
    pub old: String,
    pub new: String,
}

/// Everything the executor may be asked to do for a single navigation entry.
///
/// Groups and external references carry no content, only titles and, for
/// external references, the off-site URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    CreateGroup {
        level: usize,
        path: String,
        navlink_title: String,
        navlink_hidden: bool,
    },
    CreatePage {
        level: usize,
        path: String,
        navlink_title: String,
        navlink_hidden: bool,
        content: String,
    },
    CreateExternalRef {
        level: usize,
        path: String,
        navlink_title: String,
        navlink_hidden: bool,
        navlink_value: String,
    },
    NoopGroup {
        level: usize,
        path: String,
        navlink: Navlink,
    },
    NoopPage {
        level: usize,
        path: String,
        navlink: Navlink,
        content: String,
    },
    NoopExternalRef {
        level: usize,
        path: String,
        navlink: Navlink,
    },
    UpdateGroup {
        level: usize,
        path: String,
        navlink_change: NavlinkChange,
    },
    UpdatePage {
        level: usize,
        path: String,
        navlink_change: NavlinkChange,
        content_change: ContentChange,
    },
    UpdateExternalRef {
        level: usize,
        path: String,
        navlink_change: NavlinkChange,
    },
    DeleteGroup {
        level: usize,
        path: String,
        navlink: Navlink,
    },
    DeletePage {
        level: usize,
        path: String,
        navlink: Navlink,
        content: String,
    },
    DeleteExternalRef {
        level: usize,
        path: String,
        navlink: Navlink,
    },
}

impl Action {
    pub fn level(&self) -> usize {
        match self {
            Action::CreateGroup { level, .. }
            | Action::CreatePage { level, .. }
            | Action::CreateExternalRef { level, .. }
            | Action::NoopGroup { level, .. }
            | Action::NoopPage { level, .. }
            | Action::NoopExternalRef { level, .. }
            | Action::UpdateGroup { level, .. }
            | Action::UpdatePage { level, .. }
            | Action::UpdateExternalRef { level, .. }
            | Action::DeleteGroup { level, .. }
            | Action::DeletePage { level, .. }
            | Action::DeleteExternalRef { level, .. } => *level,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Action::CreateGroup { path, .. }
            | Action::CreatePage { path, .. }
            | Action::CreateExternalRef { path, .. }
            | Action::NoopGroup { path, .. }
            | Action::NoopPage { path, .. }
            | Action::NoopExternalRef { path, .. }
            | Action::UpdateGroup { path, .. }
            | Action::UpdatePage { path, .. }
            | Action::UpdateExternalRef { path, .. }
            | Action::DeleteGroup { path, .. }
            | Action::DeletePage { path, .. }
            | Action::DeleteExternalRef { path, .. } => path,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            Action::NoopGroup { .. } | Action::NoopPage { .. } | Action::NoopExternalRef { .. }
        )
    }

    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            Action::DeleteGroup { .. }
                | Action::DeletePage { .. }
                | Action::DeleteExternalRef { .. }
        )
    }
}

/// Action for the top-level index topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexAction {
    Create {
        title: String,
        content: String,
    },
    Noop {
        content: String,
        url: String,
    },
    Update {
        content_change: IndexContentChange,
        url: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionResult {
    Success,
    Skip,
    Fail,
}

impl std::fmt::Display for ActionResult {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ActionResult::Success => "success",
            ActionResult::Skip => "skip",
            ActionResult::Fail => "fail",
        };
        write!(formatter, "{text}")
    }
}

/// Post-execution report for one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReport {
    /// The resulting navigation table entry, `None` for deletes and the index.
    pub table_row: Option<TableRow>,
    /// Topic URL in reconcile mode, file path in migration mode.
    pub location: Option<String>,
    pub result: ActionResult,
    pub reason: Option<String>,
}

/// A topic retrieved from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub url: String,
    pub content: String,
}

/// The local index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFile {
    pub title: String,
    pub content: Option<String>,
}

/// The index topic on the server paired with the local index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub server: Option<Page>,
    pub local: IndexFile,
    pub name: String,
}

/// A failed pre-execution check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    pub path: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Closed,
    Updated,
    None,
}

impl std::fmt::Display for PullRequestAction {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            PullRequestAction::Opened => "opened",
            PullRequestAction::Closed => "closed",
            PullRequestAction::Updated => "updated",
            PullRequestAction::None => "none",
        };
        write!(formatter, "{text}")
    }
}
