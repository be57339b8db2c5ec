//! Top-level workflows: reconcile the docs with the server or migrate the
//! server content into a pull request.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::apply;
use crate::check::{self, LinkProbe};
use crate::config::{
    DOCUMENTATION_FOLDER_NAME, DOCUMENTATION_TAG, MIGRATION_BRANCH, UserInputs,
};
use crate::contents;
use crate::discourse::DiscourseApi;
use crate::error::{GatekeeperError, Result};
use crate::filesystem;
use crate::metadata;
use crate::migrate;
use crate::navigation;
use crate::reconcile;
use crate::repository::{ACTIONS_COMMIT_MESSAGE, BranchScope, RepositoryClient};
use crate::sort;
use crate::types::{ActionResult, PullRequestAction};

pub const GETTING_STARTED: &str =
    "nothing to do: add a docs directory to publish documentation, or link an existing index \
     topic in the metadata to migrate it into the repository";

/// The JSON output surface of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutputs {
    pub index_url: String,
    pub topics: BTreeMap<String, ActionResult>,
    pub pr_link: String,
    pub pr_action: PullRequestAction,
}

/// Outcome of a run: the outputs stay observable even when the run failed.
#[derive(Debug)]
pub struct RunResult {
    pub outputs: RunOutputs,
    /// One-line failure reason when any action failed or a check problem was
    /// found.
    pub failure: Option<String>,
}

/// Select and execute the workflow for the current repository state.
pub fn run(
    inputs: &UserInputs,
    discourse: &dyn DiscourseApi,
    repository: &dyn RepositoryClient,
    probe: &dyn LinkProbe,
) -> Result<RunResult> {
    inputs.validate()?;
    let metadata = metadata::get(&inputs.charm_dir)?;

    if filesystem::has_docs_directory(&inputs.charm_dir) {
        return run_reconcile(inputs, &metadata, discourse, repository, probe);
    }
    if metadata.docs.is_some() {
        return run_migrate(inputs, &metadata, discourse, repository);
    }
    Err(GatekeeperError::Input(GETTING_STARTED.to_string()))
}

fn run_reconcile(
    inputs: &UserInputs,
    metadata: &metadata::Metadata,
    discourse: &dyn DiscourseApi,
    repository: &dyn RepositoryClient,
    probe: &dyn LinkProbe,
) -> Result<RunResult> {
    if let Some(index_url) = &metadata.docs {
        if !discourse.check_topic_read_permission(index_url)? {
            return Err(GatekeeperError::Server(format!(
                "the credentials cannot read the index topic: {index_url}"
            )));
        }
        if !discourse.check_topic_write_permission(index_url)? {
            return Err(GatekeeperError::PagePermission(format!(
                "the credentials cannot write the index topic: {index_url}"
            )));
        }
    }

    let docs_path = inputs.charm_dir.join(DOCUMENTATION_FOLDER_NAME);
    let index = contents::get_index(metadata, &docs_path, discourse)?;
    let path_infos = filesystem::read(&docs_path)?;
    let index_contents = contents::get_contents(&index.local, &docs_path)?;
    let items = sort::using_contents_index(path_infos, index_contents, &docs_path)?;

    let server_content = index
        .server
        .as_ref()
        .map(|page| page.content.as_str())
        .unwrap_or_default();
    let table_rows = navigation::from_page(server_content)?;

    let actions = reconcile::run(&items, &table_rows, discourse, repository, &inputs.charm_dir)?;
    let problems = check::get_problems(&actions, inputs, repository, probe)?;
    for problem in &problems {
        tracing::error!(path = %problem.path, description = %problem.description, "check problem");
    }

    let (reports, index_action) = apply::run_all(
        &actions,
        &index,
        discourse,
        inputs.dry_run,
        inputs.delete_topics,
    )?;

    let index_url = reports
        .last()
        .and_then(|report| report.location.clone())
        .unwrap_or_default();
    let topics: BTreeMap<String, ActionResult> = reports
        .iter()
        .filter_map(|report| {
            let location = report.location.as_deref()?;
            if location.starts_with('<') {
                return None;
            }
            Some((location.to_string(), report.result))
        })
        .collect();

    let any_failed = reports
        .iter()
        .any(|report| report.result == ActionResult::Fail);
    let changed = !reconcile::is_same_content(&actions, &index_action);

    if !inputs.dry_run && !any_failed && problems.is_empty() && changed {
        if repository.is_commit_in_branch(&inputs.commit_sha, &inputs.base_branch)? {
            move_base_tag(inputs, repository)?;
            tracing::info!(
                tag = DOCUMENTATION_TAG,
                commit = %inputs.commit_sha,
                "moved the base content tag"
            );
        } else {
            tracing::info!(
                commit = %inputs.commit_sha,
                branch = %inputs.base_branch,
                "commit is not on the base branch, leaving the base content tag in place"
            );
        }
    }

    let failure = if any_failed {
        Some("at least one action failed, see the report dump for details".to_string())
    } else if !problems.is_empty() {
        Some(format!(
            "{} pre-execution problem(s) found, see the log for details",
            problems.len()
        ))
    } else {
        None
    };

    if failure.is_some() {
        for report in &reports {
            tracing::info!(report = ?report, "action report dump");
        }
    }

    Ok(RunResult {
        outputs: RunOutputs {
            index_url,
            topics,
            pr_link: String::new(),
            pr_action: PullRequestAction::None,
        },
        failure,
    })
}

/// Move the base-content tag to the commit under reconciliation.
///
/// Refused when the commit is not on the configured base branch.
pub fn move_base_tag(inputs: &UserInputs, repository: &dyn RepositoryClient) -> Result<()> {
    if !repository.is_commit_in_branch(&inputs.commit_sha, &inputs.base_branch)? {
        return Err(GatekeeperError::TaggingNotAllowed(format!(
            "commit {} is not on branch {}",
            inputs.commit_sha, inputs.base_branch
        )));
    }
    repository.tag_commit(DOCUMENTATION_TAG, &inputs.commit_sha)
}

fn run_migrate(
    inputs: &UserInputs,
    metadata: &metadata::Metadata,
    discourse: &dyn DiscourseApi,
    repository: &dyn RepositoryClient,
) -> Result<RunResult> {
    let index_url = metadata.docs.clone().unwrap_or_default();
    let server_content = discourse.retrieve_topic(&index_url).map_err(|error| {
        GatekeeperError::Server(format!("index page retrieval failed: {error}"))
    })?;
    let table_rows = navigation::from_page(&server_content)?;
    let index_body = contents::contents_from_page(&server_content);
    let metas = migrate::get_docs_metadata(&table_rows, &index_body)?;

    let scope = BranchScope::create(repository, MIGRATION_BRANCH, &inputs.base_branch)?;
    let docs_path = repository.base_path().join(DOCUMENTATION_FOLDER_NAME);
    let reports = migrate::run(&metas, discourse, &docs_path);

    let topics: BTreeMap<String, ActionResult> = reports
        .iter()
        .filter_map(|report| {
            report
                .location
                .as_ref()
                .map(|location| (location.clone(), report.result))
        })
        .collect();

    if reports
        .iter()
        .any(|report| report.result == ActionResult::Fail)
    {
        for report in &reports {
            tracing::info!(report = ?report, "migration report dump");
        }
        return Err(GatekeeperError::Migration(
            "at least one file could not be migrated, see the report dump for details".to_string(),
        ));
    }

    let summary = repository.get_summary()?;
    let (pr_link, pr_action) = if summary.is_empty() {
        tracing::info!("no changes to the repository, not opening a pull request");
        (String::new(), PullRequestAction::None)
    } else {
        tracing::info!(%summary, "pushing migrated docs");
        repository.update_branch(ACTIONS_COMMIT_MESSAGE)?;
        match repository.get_pull_request(MIGRATION_BRANCH)? {
            Some(existing) => {
                repository.update_pull_request(MIGRATION_BRANCH)?;
                (existing, PullRequestAction::Updated)
            }
            None => {
                let created = repository.create_pull_request(MIGRATION_BRANCH, &inputs.base_branch)?;
                (created, PullRequestAction::Opened)
            }
        }
    };
    drop(scope);

    Ok(RunResult {
        outputs: RunOutputs {
            index_url,
            topics,
            pr_link,
            pr_action,
        },
        failure: None,
    })
}
