//! Calculating the actions required to match the server to the local docs.
//!
//! Local items and navigation rows are paired by table path. The pairing
//! preserves the sorted item order; rows only present on the server become
//! deletes, emitted after everything else with deeper levels first so a group
//! is never removed before its members.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::config::DOCUMENTATION_TAG;
use crate::contents;
use crate::discourse::DiscourseApi;
use crate::error::{GatekeeperError, Result};
use crate::navigation;
use crate::repository::RepositoryClient;
use crate::sort::ItemInfo;
use crate::types::{
    Action, ContentChange, Index, IndexAction, IndexContentChange, IndexContentsListItem, Navlink,
    NavlinkChange, PathInfo, TableRow,
};

/// Reconcile the sorted item stream against the server navigation rows.
pub fn run(
    items: &[ItemInfo],
    table_rows: &[TableRow],
    discourse: &dyn DiscourseApi,
    repository: &dyn RepositoryClient,
    base_path: &Path,
) -> Result<Vec<Action>> {
    let mut row_lookup: HashMap<&str, &TableRow> = HashMap::new();
    for row in table_rows {
        row_lookup.insert(row.path.as_str(), row);
    }

    let mut item_paths: HashSet<String> = HashSet::new();
    let mut actions = Vec::new();
    for item in items {
        let table_path = item.table_path();
        if !item_paths.insert(table_path.clone()) {
            return Err(GatekeeperError::Input(format!(
                "duplicate table path across local items: {table_path}"
            )));
        }
        match row_lookup.get(table_path.as_str()) {
            None => actions.push(local_only(item, base_path)?),
            Some(row) => {
                actions.extend(local_and_server(item, *row, discourse, repository, base_path)?)
            }
        }
    }

    let mut server_only_rows: Vec<&TableRow> = table_rows
        .iter()
        .filter(|row| !item_paths.contains(&row.path))
        .collect();
    server_only_rows.sort_by(|left, right| {
        right
            .level
            .cmp(&left.level)
            .then_with(|| left.path.cmp(&right.path))
    });
    for row in server_only_rows {
        actions.push(server_only(row, discourse)?);
    }

    Ok(actions)
}

fn local_only(item: &ItemInfo, base_path: &Path) -> Result<Action> {
    match item {
        ItemInfo::External(external) => Ok(create_external_ref(external)),
        ItemInfo::Path(info) if info.local_path.is_file() => Ok(Action::CreatePage {
            level: info.level,
            path: info.table_path.clone(),
            navlink_title: info.navlink_title.clone(),
            navlink_hidden: info.navlink_hidden,
            content: read_local(info, base_path)?,
        }),
        ItemInfo::Path(info) => Ok(Action::CreateGroup {
            level: info.level,
            path: info.table_path.clone(),
            navlink_title: info.navlink_title.clone(),
            navlink_hidden: info.navlink_hidden,
        }),
    }
}

fn local_and_server(
    item: &ItemInfo,
    row: &TableRow,
    discourse: &dyn DiscourseApi,
    repository: &dyn RepositoryClient,
    base_path: &Path,
) -> Result<Vec<Action>> {
    validate_pairing(item, row)?;
    match item {
        ItemInfo::Path(info) if info.local_path.is_dir() => {
            directory_against_row(info, row, discourse)
        }
        ItemInfo::Path(info) => file_against_row(info, row, discourse, repository, base_path),
        ItemInfo::External(external) => external_ref_against_row(external, row, discourse),
    }
}

fn validate_pairing(item: &ItemInfo, row: &TableRow) -> Result<()> {
    if item.level() != row.level {
        return Err(GatekeeperError::Reconciliation(format!(
            "internal error, level mismatch, item: {:?} at level {}, row: {:?} at level {}",
            item.table_path(),
            item.level(),
            row.path,
            row.level
        )));
    }
    if item.table_path() != row.path {
        return Err(GatekeeperError::Reconciliation(format!(
            "internal error, table path mismatch, item: {:?}, row: {:?}",
            item.table_path(),
            row.path
        )));
    }
    Ok(())
}

fn directory_against_row(
    info: &PathInfo,
    row: &TableRow,
    discourse: &dyn DiscourseApi,
) -> Result<Vec<Action>> {
    if row.is_group() {
        if row.navlink.title == info.navlink_title {
            return Ok(vec![Action::NoopGroup {
                level: info.level,
                path: info.table_path.clone(),
                navlink: row.navlink.clone(),
            }]);
        }
        return Ok(vec![Action::UpdateGroup {
            level: info.level,
            path: info.table_path.clone(),
            navlink_change: NavlinkChange {
                old: row.navlink.clone(),
                new: Navlink {
                    title: info.navlink_title.clone(),
                    link: None,
                    hidden: false,
                },
            },
        }]);
    }

    let create_group = Action::CreateGroup {
        level: info.level,
        path: info.table_path.clone(),
        navlink_title: info.navlink_title.clone(),
        navlink_hidden: info.navlink_hidden,
    };
    if row.is_external(discourse.host()) {
        // The stale external row disappears when the table is regenerated.
        return Ok(vec![create_group]);
    }

    // A page where a group is needed: the topic must go first so its content
    // is not orphaned behind a link-less row.
    Ok(vec![
        Action::DeletePage {
            level: info.level,
            path: info.table_path.clone(),
            navlink: row.navlink.clone(),
            content: server_content(row, discourse)?,
        },
        create_group,
    ])
}

fn file_against_row(
    info: &PathInfo,
    row: &TableRow,
    discourse: &dyn DiscourseApi,
    repository: &dyn RepositoryClient,
    base_path: &Path,
) -> Result<Vec<Action>> {
    if row.is_group() || row.is_external(discourse.host()) {
        return Ok(vec![Action::CreatePage {
            level: info.level,
            path: info.table_path.clone(),
            navlink_title: info.navlink_title.clone(),
            navlink_hidden: info.navlink_hidden,
            content: read_local(info, base_path)?,
        }]);
    }

    let local_content = read_local(info, base_path)?.trim().to_string();
    let server = server_content(row, discourse)?;

    if server == local_content
        && row.navlink.title == info.navlink_title
        && row.navlink.hidden == info.navlink_hidden
    {
        return Ok(vec![Action::NoopPage {
            level: info.level,
            path: info.table_path.clone(),
            navlink: row.navlink.clone(),
            content: local_content,
        }]);
    }

    let base = base_content(info, repository, base_path)?;
    Ok(vec![Action::UpdatePage {
        level: info.level,
        path: info.table_path.clone(),
        navlink_change: NavlinkChange {
            old: row.navlink.clone(),
            new: Navlink {
                title: info.navlink_title.clone(),
                link: row.navlink.link.clone(),
                hidden: info.navlink_hidden,
            },
        },
        content_change: ContentChange {
            base,
            server,
            local: local_content,
        },
    }])
}

fn external_ref_against_row(
    external: &IndexContentsListItem,
    row: &TableRow,
    discourse: &dyn DiscourseApi,
) -> Result<Vec<Action>> {
    if row.is_group() {
        return Ok(vec![create_external_ref(external)]);
    }

    if row.is_external(discourse.host()) {
        if row.navlink.title == external.reference_title
            && row.navlink.link.as_deref() == Some(external.reference_value.as_str())
        {
            return Ok(vec![Action::NoopExternalRef {
                level: external.hierarchy,
                path: external.table_path(),
                navlink: row.navlink.clone(),
            }]);
        }
        return Ok(vec![Action::UpdateExternalRef {
            level: external.hierarchy,
            path: external.table_path(),
            navlink_change: NavlinkChange {
                old: row.navlink.clone(),
                new: Navlink {
                    title: external.reference_title.clone(),
                    link: Some(external.reference_value.clone()),
                    hidden: external.hidden,
                },
            },
        }]);
    }

    Ok(vec![
        Action::DeletePage {
            level: external.hierarchy,
            path: external.table_path(),
            navlink: row.navlink.clone(),
            content: server_content(row, discourse)?,
        },
        create_external_ref(external),
    ])
}

fn server_only(row: &TableRow, discourse: &dyn DiscourseApi) -> Result<Action> {
    if row.is_group() {
        return Ok(Action::DeleteGroup {
            level: row.level,
            path: row.path.clone(),
            navlink: row.navlink.clone(),
        });
    }
    if row.is_external(discourse.host()) {
        return Ok(Action::DeleteExternalRef {
            level: row.level,
            path: row.path.clone(),
            navlink: row.navlink.clone(),
        });
    }
    Ok(Action::DeletePage {
        level: row.level,
        path: row.path.clone(),
        navlink: row.navlink.clone(),
        content: server_content(row, discourse)?,
    })
}

fn create_external_ref(external: &IndexContentsListItem) -> Action {
    Action::CreateExternalRef {
        level: external.hierarchy,
        path: external.table_path(),
        navlink_title: external.reference_title.clone(),
        navlink_hidden: external.hidden,
        navlink_value: external.reference_value.clone(),
    }
}

fn read_local(info: &PathInfo, base_path: &Path) -> Result<String> {
    fs::read_to_string(&info.local_path).map_err(|error| {
        GatekeeperError::Input(format!(
            "failed to read {} (relative to {}): {error}",
            info.local_path.display(),
            base_path.display()
        ))
    })
}

fn server_content(row: &TableRow, discourse: &dyn DiscourseApi) -> Result<String> {
    let link = row.navlink.link.as_deref().ok_or_else(|| {
        GatekeeperError::Reconciliation(format!(
            "internal error, expecting link on table row, row: {:?}",
            row.path
        ))
    })?;
    discourse
        .retrieve_topic(link)
        .map(|content| content.trim().to_string())
        .map_err(|error| {
            GatekeeperError::Server(format!(
                "failed to retrieve contents of page, url: {link}: {error}"
            ))
        })
}

fn base_content(
    info: &PathInfo,
    repository: &dyn RepositoryClient,
    base_path: &Path,
) -> Result<Option<String>> {
    let relative = info
        .local_path
        .strip_prefix(base_path)
        .map_err(|_| {
            GatekeeperError::Reconciliation(format!(
                "internal error, {} is not inside {}",
                info.local_path.display(),
                base_path.display()
            ))
        })?
        .to_string_lossy()
        .replace('\\', "/");
    match repository.get_file_content_from_tag(&relative, DOCUMENTATION_TAG) {
        Ok(content) => Ok(Some(content.trim().to_string())),
        Err(GatekeeperError::RepositoryFileNotFound(_)) => Ok(None),
        Err(GatekeeperError::RepositoryTagNotFound(_)) => Err(GatekeeperError::Reconciliation(
            format!(
                "tag {DOCUMENTATION_TAG} is not defined on the repository, tag the commit with \
                 content matching discourse with {DOCUMENTATION_TAG:?}"
            ),
        )),
        Err(error) => Err(GatekeeperError::Reconciliation(format!(
            "unable to retrieve content for {relative} at tag {DOCUMENTATION_TAG}: {error}"
        ))),
    }
}

/// Decide what to do with the index topic once the per-page actions are known.
pub fn index_page(index: &Index, table_rows: &[TableRow], discourse: &dyn DiscourseApi) -> IndexAction {
    let navigation_markdown = navigation::render(table_rows, discourse.host());
    let body = contents::get_content_for_server(&index.local);
    let local_content = format!("{}\n\n{}", body.trim(), navigation_markdown)
        .trim()
        .to_string();

    match &index.server {
        None => IndexAction::Create {
            title: index.local.title.clone(),
            content: local_content,
        },
        Some(server) => {
            let server_content = server.content.trim().to_string();
            if local_content != server_content {
                IndexAction::Update {
                    content_change: IndexContentChange {
                        old: server_content,
                        new: local_content,
                    },
                    url: server.url.clone(),
                }
            } else {
                IndexAction::Noop {
                    content: local_content,
                    url: server.url.clone(),
                }
            }
        }
    }
}

/// Whether the run would change nothing: every page action is a noop and the
/// index content already matches the server.
pub fn is_same_content(actions: &[Action], index_action: &IndexAction) -> bool {
    actions.iter().all(Action::is_noop) && matches!(index_action, IndexAction::Noop { .. })
}
