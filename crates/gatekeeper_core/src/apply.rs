//! Executing a planned action stream against the server.
//!
//! Per-action failures become FAIL reports and the run continues; the
//! orchestrator aggregates them afterwards. Deletes run after every create
//! and update of the same run so the navigation table never references a
//! topic that is already gone.

use crate::content;
use crate::discourse::DiscourseApi;
use crate::error::Result;
use crate::reconcile;
use crate::types::{
    Action, ActionReport, ActionResult, Index, IndexAction, Navlink, TableRow,
};

pub const DRY_RUN_NAVLINK_LINK: &str = "<not created due to dry run mode>";
pub const FAIL_NAVLINK_LINK: &str = "<not created due to error>";
pub const DRY_RUN_REASON: &str = "dry run";
pub const NOT_DELETE_REASON: &str = "delete_topics is false";

/// Execute all actions, then reconcile and execute the index action.
///
/// Returns the per-action reports (index report last) and the realized index
/// action.
pub fn run_all(
    actions: &[Action],
    index: &Index,
    discourse: &dyn DiscourseApi,
    dry_run: bool,
    delete_topics: bool,
) -> Result<(Vec<ActionReport>, IndexAction)> {
    let mut reports = Vec::with_capacity(actions.len() + 1);
    for action in actions.iter().filter(|action| !action.is_delete()) {
        reports.push(run_one(action, index, discourse, dry_run, delete_topics));
    }
    for action in actions.iter().filter(|action| action.is_delete()) {
        reports.push(run_one(action, index, discourse, dry_run, delete_topics));
    }

    let table_rows: Vec<TableRow> = reports
        .iter()
        .filter_map(|report| report.table_row.clone())
        .collect();
    let index_action = reconcile::index_page(index, &table_rows, discourse);
    let index_report = run_index(&index_action, discourse, dry_run);
    reports.push(index_report);
    Ok((reports, index_action))
}

fn run_one(
    action: &Action,
    index: &Index,
    discourse: &dyn DiscourseApi,
    dry_run: bool,
    delete_topics: bool,
) -> ActionReport {
    tracing::info!(?dry_run, path = action.path(), "executing action");
    let report = match action {
        Action::CreateGroup {
            level,
            path,
            navlink_title,
            navlink_hidden,
        } => create_group(*level, path, navlink_title, *navlink_hidden, dry_run),
        Action::CreatePage {
            level,
            path,
            navlink_title,
            navlink_hidden,
            content,
        } => create_page(
            *level,
            path,
            navlink_title,
            *navlink_hidden,
            content,
            &index.name,
            discourse,
            dry_run,
        ),
        Action::CreateExternalRef {
            level,
            path,
            navlink_title,
            navlink_hidden,
            navlink_value,
        } => create_external_ref(*level, path, navlink_title, *navlink_hidden, navlink_value, dry_run),
        Action::NoopGroup {
            level,
            path,
            navlink,
        }
        | Action::NoopPage {
            level,
            path,
            navlink,
            ..
        }
        | Action::NoopExternalRef {
            level,
            path,
            navlink,
        } => noop(*level, path, navlink, discourse),
        Action::UpdateGroup {
            level,
            path,
            navlink_change,
        }
        | Action::UpdateExternalRef {
            level,
            path,
            navlink_change,
        } => update_without_content(*level, path, &navlink_change.new, discourse, dry_run),
        Action::UpdatePage {
            level,
            path,
            navlink_change,
            content_change,
        } => update_page(
            *level,
            path,
            &navlink_change.new,
            content_change,
            discourse,
            dry_run,
        ),
        Action::DeleteGroup { navlink, .. } | Action::DeleteExternalRef { navlink, .. } => {
            delete_without_topic(navlink, discourse, dry_run)
        }
        Action::DeletePage { navlink, .. } => {
            delete_page(navlink, discourse, dry_run, delete_topics)
        }
    };
    tracing::info!(?report.result, location = ?report.location, "action report");
    report
}

fn table_row(level: usize, path: &str, navlink: Navlink) -> TableRow {
    TableRow {
        level,
        path: path.to_string(),
        navlink,
    }
}

fn create_group(
    level: usize,
    path: &str,
    navlink_title: &str,
    navlink_hidden: bool,
    dry_run: bool,
) -> ActionReport {
    let row = table_row(
        level,
        path,
        Navlink {
            title: navlink_title.to_string(),
            link: None,
            hidden: navlink_hidden,
        },
    );
    ActionReport {
        table_row: Some(row),
        location: None,
        result: if dry_run {
            ActionResult::Skip
        } else {
            ActionResult::Success
        },
        reason: dry_run.then(|| DRY_RUN_REASON.to_string()),
    }
}

fn create_page(
    level: usize,
    path: &str,
    navlink_title: &str,
    navlink_hidden: bool,
    content: &str,
    name: &str,
    discourse: &dyn DiscourseApi,
    dry_run: bool,
) -> ActionReport {
    if dry_run {
        let row = table_row(
            level,
            path,
            Navlink {
                title: navlink_title.to_string(),
                link: Some(DRY_RUN_NAVLINK_LINK.to_string()),
                hidden: navlink_hidden,
            },
        );
        return ActionReport {
            table_row: Some(row),
            location: Some(DRY_RUN_NAVLINK_LINK.to_string()),
            result: ActionResult::Skip,
            reason: Some(DRY_RUN_REASON.to_string()),
        };
    }

    match discourse.create_topic(&format!("{name} docs: {navlink_title}"), content) {
        Ok(url) => ActionReport {
            table_row: Some(table_row(
                level,
                path,
                Navlink {
                    title: navlink_title.to_string(),
                    link: Some(url.clone()),
                    hidden: navlink_hidden,
                },
            )),
            location: Some(url),
            result: ActionResult::Success,
            reason: None,
        },
        Err(error) => ActionReport {
            table_row: Some(table_row(
                level,
                path,
                Navlink {
                    title: navlink_title.to_string(),
                    link: Some(FAIL_NAVLINK_LINK.to_string()),
                    hidden: navlink_hidden,
                },
            )),
            location: None,
            result: ActionResult::Fail,
            reason: Some(error.to_string()),
        },
    }
}

fn create_external_ref(
    level: usize,
    path: &str,
    navlink_title: &str,
    navlink_hidden: bool,
    navlink_value: &str,
    dry_run: bool,
) -> ActionReport {
    let row = table_row(
        level,
        path,
        Navlink {
            title: navlink_title.to_string(),
            link: Some(navlink_value.to_string()),
            hidden: navlink_hidden,
        },
    );
    ActionReport {
        table_row: Some(row),
        location: Some(navlink_value.to_string()),
        result: if dry_run {
            ActionResult::Skip
        } else {
            ActionResult::Success
        },
        reason: dry_run.then(|| DRY_RUN_REASON.to_string()),
    }
}

fn noop(level: usize, path: &str, navlink: &Navlink, discourse: &dyn DiscourseApi) -> ActionReport {
    ActionReport {
        table_row: Some(table_row(level, path, navlink.clone())),
        location: navlink.link.as_deref().map(|link| discourse.absolute_url(link)),
        result: ActionResult::Success,
        reason: None,
    }
}

fn update_without_content(
    level: usize,
    path: &str,
    new_navlink: &Navlink,
    discourse: &dyn DiscourseApi,
    dry_run: bool,
) -> ActionReport {
    // Group and external reference changes are realized when the navigation
    // table is re-rendered; there is no topic to touch.
    ActionReport {
        table_row: Some(table_row(level, path, new_navlink.clone())),
        location: new_navlink
            .link
            .as_deref()
            .map(|link| discourse.absolute_url(link)),
        result: if dry_run {
            ActionResult::Skip
        } else {
            ActionResult::Success
        },
        reason: dry_run.then(|| DRY_RUN_REASON.to_string()),
    }
}

fn update_page(
    level: usize,
    path: &str,
    new_navlink: &Navlink,
    content_change: &crate::types::ContentChange,
    discourse: &dyn DiscourseApi,
    dry_run: bool,
) -> ActionReport {
    let row = table_row(level, path, new_navlink.clone());
    let location = new_navlink
        .link
        .as_deref()
        .map(|link| discourse.absolute_url(link));
    if dry_run {
        return ActionReport {
            table_row: Some(row),
            location,
            result: ActionResult::Skip,
            reason: Some(DRY_RUN_REASON.to_string()),
        };
    }

    if content_change.server == content_change.local {
        return ActionReport {
            table_row: Some(row),
            location,
            result: ActionResult::Success,
            reason: None,
        };
    }

    let Some(base) = content_change.base.as_deref() else {
        return ActionReport {
            table_row: Some(row),
            location: None,
            result: ActionResult::Fail,
            reason: Some(
                "no tagged base content to merge from and the server and local contents differ"
                    .to_string(),
            ),
        };
    };

    let merged = match content::merge(base, &content_change.server, &content_change.local) {
        Ok(merged) => merged,
        Err(error) => {
            return ActionReport {
                table_row: Some(row),
                location: None,
                result: ActionResult::Fail,
                reason: Some(error.to_string()),
            };
        }
    };

    if merged == content_change.server {
        // The server already carries everything local has.
        return ActionReport {
            table_row: Some(row),
            location,
            result: ActionResult::Success,
            reason: None,
        };
    }

    let Some(link) = new_navlink.link.as_deref() else {
        return ActionReport {
            table_row: Some(row),
            location: None,
            result: ActionResult::Fail,
            reason: Some("internal error, page update without a link".to_string()),
        };
    };
    match discourse.update_topic(link, &merged) {
        Ok(()) => ActionReport {
            table_row: Some(row),
            location,
            result: ActionResult::Success,
            reason: None,
        },
        Err(error) => ActionReport {
            table_row: Some(row),
            location: None,
            result: ActionResult::Fail,
            reason: Some(error.to_string()),
        },
    }
}

fn delete_without_topic(
    navlink: &Navlink,
    discourse: &dyn DiscourseApi,
    dry_run: bool,
) -> ActionReport {
    // Removing the row from the regenerated table is the whole delete.
    ActionReport {
        table_row: None,
        location: navlink.link.as_deref().map(|link| discourse.absolute_url(link)),
        result: if dry_run {
            ActionResult::Skip
        } else {
            ActionResult::Success
        },
        reason: dry_run.then(|| DRY_RUN_REASON.to_string()),
    }
}

fn delete_page(
    navlink: &Navlink,
    discourse: &dyn DiscourseApi,
    dry_run: bool,
    delete_topics: bool,
) -> ActionReport {
    let location = navlink.link.as_deref().map(|link| discourse.absolute_url(link));
    if dry_run {
        return ActionReport {
            table_row: None,
            location,
            result: ActionResult::Skip,
            reason: Some(DRY_RUN_REASON.to_string()),
        };
    }
    if !delete_topics {
        return ActionReport {
            table_row: None,
            location,
            result: ActionResult::Skip,
            reason: Some(NOT_DELETE_REASON.to_string()),
        };
    }
    let Some(link) = navlink.link.as_deref() else {
        return ActionReport {
            table_row: None,
            location: None,
            result: ActionResult::Fail,
            reason: Some("internal error, page delete without a link".to_string()),
        };
    };
    match discourse.delete_topic(link) {
        Ok(()) => ActionReport {
            table_row: None,
            location,
            result: ActionResult::Success,
            reason: None,
        },
        Err(error) => ActionReport {
            table_row: None,
            location: None,
            result: ActionResult::Fail,
            reason: Some(error.to_string()),
        },
    }
}

fn run_index(action: &IndexAction, discourse: &dyn DiscourseApi, dry_run: bool) -> ActionReport {
    if dry_run {
        let location = match action {
            IndexAction::Create { .. } => DRY_RUN_NAVLINK_LINK.to_string(),
            IndexAction::Noop { url, .. } | IndexAction::Update { url, .. } => url.clone(),
        };
        return ActionReport {
            table_row: None,
            location: Some(location),
            result: ActionResult::Skip,
            reason: Some(DRY_RUN_REASON.to_string()),
        };
    }

    match action {
        IndexAction::Create { title, content } => match discourse.create_topic(title, content) {
            Ok(url) => ActionReport {
                table_row: None,
                location: Some(url),
                result: ActionResult::Success,
                reason: None,
            },
            Err(error) => ActionReport {
                table_row: None,
                location: None,
                result: ActionResult::Fail,
                reason: Some(error.to_string()),
            },
        },
        IndexAction::Noop { url, .. } => ActionReport {
            table_row: None,
            location: Some(url.clone()),
            result: ActionResult::Success,
            reason: None,
        },
        IndexAction::Update {
            content_change,
            url,
        } => match discourse.update_topic(url, &content_change.new) {
            Ok(()) => ActionReport {
                table_row: None,
                location: Some(url.clone()),
                result: ActionResult::Success,
                reason: None,
            },
            Err(error) => ActionReport {
                table_row: None,
                location: None,
                result: ActionResult::Fail,
                reason: Some(error.to_string()),
            },
        },
    }
}
