//! Pre-execution validation of a planned action stream.

use std::time::Duration;

use reqwest::blocking::Client;

use crate::config::{DISCOURSE_AHEAD_TAG, UserInputs};
use crate::content;
use crate::error::Result;
use crate::repository::RepositoryClient;
use crate::types::{Action, Problem};

/// Liveness probe for external references.
pub trait LinkProbe {
    /// Whether a HEAD request for the URL returns 2xx after redirects.
    fn is_reachable(&self, url: &str) -> bool;
}

pub struct HeadProbe {
    http: Client,
}

impl HeadProbe {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|error| {
                crate::error::GatekeeperError::Input(format!(
                    "failed to build HTTP client: {error}"
                ))
            })?;
        Ok(Self { http })
    }
}

impl LinkProbe for HeadProbe {
    fn is_reachable(&self, url: &str) -> bool {
        self.http
            .head(url)
            .send()
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }
}

/// Run all checks over the planned actions.
pub fn get_problems(
    actions: &[Action],
    inputs: &UserInputs,
    repository: &dyn RepositoryClient,
    probe: &dyn LinkProbe,
) -> Result<Vec<Problem>> {
    let mut problems = conflicts(actions);
    problems.extend(server_ahead(actions, inputs, repository)?);
    problems.extend(external_references(actions, probe));
    Ok(problems)
}

/// A problem for every update whose three-way merge conflicts.
pub fn conflicts(actions: &[Action]) -> Vec<Problem> {
    actions
        .iter()
        .filter_map(|action| {
            let Action::UpdatePage {
                path,
                content_change,
                ..
            } = action
            else {
                return None;
            };
            content::conflicts(
                content_change.base.as_deref(),
                &content_change.server,
                &content_change.local,
            )
            .map(|description| Problem {
                path: path.clone(),
                description,
            })
        })
        .collect()
}

/// Pages where the server moved past the tagged base while this run also
/// wants to change something else: the run would publish local content that
/// never saw the server edits.
fn server_ahead(
    actions: &[Action],
    inputs: &UserInputs,
    repository: &dyn RepositoryClient,
) -> Result<Vec<Problem>> {
    let ahead_tag_on_commit = repository
        .tag_exists(DISCOURSE_AHEAD_TAG)?
        .is_some_and(|sha| sha == inputs.commit_sha);
    if ahead_tag_on_commit {
        tracing::warn!(
            tag = DISCOURSE_AHEAD_TAG,
            "the ahead-ok tag is deprecated, set ignore_server_ahead instead"
        );
    }
    if inputs.ignore_server_ahead && ahead_tag_on_commit {
        return Ok(Vec::new());
    }

    let non_noop_page_paths: Vec<&str> = actions
        .iter()
        .filter(|action| !action.is_noop())
        .filter(|action| {
            matches!(
                action,
                Action::CreatePage { .. } | Action::UpdatePage { .. } | Action::DeletePage { .. }
            )
        })
        .map(Action::path)
        .collect();

    Ok(actions
        .iter()
        .filter_map(|action| {
            let Action::UpdatePage {
                path,
                content_change,
                ..
            } = action
            else {
                return None;
            };
            let base = content_change.base.as_deref()?;
            if base == content_change.server {
                return None;
            }
            let other_changes = non_noop_page_paths
                .iter()
                .any(|other_path| *other_path != path.as_str());
            if !other_changes {
                return None;
            }
            Some(Problem {
                path: path.clone(),
                description: format!(
                    "the server content has changed since the tagged base and this run \
                     modifies other pages; push the server edits to the repository or rerun \
                     after moving the base tag, diff: {}",
                    content::diff(base, &content_change.server)
                ),
            })
        })
        .collect())
}

/// A problem for every planned external reference whose URL is not live.
fn external_references(actions: &[Action], probe: &dyn LinkProbe) -> Vec<Problem> {
    actions
        .iter()
        .filter_map(|action| {
            let (path, url) = match action {
                Action::CreateExternalRef {
                    path,
                    navlink_value,
                    ..
                } => (path, navlink_value.as_str()),
                Action::UpdateExternalRef {
                    path,
                    navlink_change,
                    ..
                } => (path, navlink_change.new.link.as_deref().unwrap_or_default()),
                _ => return None,
            };
            if probe.is_reachable(url) {
                return None;
            }
            Some(Problem {
                path: path.clone(),
                description: format!("external reference is not reachable: {url}"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use tempfile::tempdir;

    use super::*;
    use crate::repository::testing::MockRepository;
    use crate::types::{ContentChange, Navlink, NavlinkChange};

    struct StaticProbe {
        reachable: BTreeSet<String>,
    }

    impl StaticProbe {
        fn with(urls: &[&str]) -> Self {
            Self {
                reachable: urls.iter().map(ToString::to_string).collect(),
            }
        }
    }

    impl LinkProbe for StaticProbe {
        fn is_reachable(&self, url: &str) -> bool {
            self.reachable.contains(url)
        }
    }

    fn inputs() -> UserInputs {
        UserInputs {
            discourse_host: "discourse.example.com".to_string(),
            discourse_api_username: "bot".to_string(),
            discourse_api_key: "key".to_string(),
            discourse_category_id: 5,
            github_token: None,
            base_branch: "main".to_string(),
            commit_sha: "commit-sha".to_string(),
            charm_dir: std::path::PathBuf::from("."),
            dry_run: false,
            delete_topics: false,
            ignore_server_ahead: false,
        }
    }

    fn update_page(path: &str, base: Option<&str>, server: &str, local: &str) -> Action {
        let navlink = Navlink {
            title: "Title".to_string(),
            link: Some(format!("/t/{path}/1")),
            hidden: false,
        };
        Action::UpdatePage {
            level: 1,
            path: path.to_string(),
            navlink_change: NavlinkChange {
                old: navlink.clone(),
                new: navlink,
            },
            content_change: ContentChange {
                base: base.map(ToString::to_string),
                server: server.to_string(),
                local: local.to_string(),
            },
        }
    }

    #[test]
    fn clean_three_way_merges_produce_no_conflict_problem() {
        let actions = vec![update_page(
            "guide",
            Some("A\nB\nC\n"),
            "A\nB2\nC\n",
            "A\nB\nC2\n",
        )];
        assert!(conflicts(&actions).is_empty());
    }

    #[test]
    fn overlapping_changes_produce_a_conflict_problem() {
        let actions = vec![update_page("guide", Some("A\n"), "B\n", "C\n")];
        let problems = conflicts(&actions);
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].path, "guide");
        assert!(problems[0].description.contains("- B"));
        assert!(problems[0].description.contains("+ C"));
    }

    #[test]
    fn missing_base_with_differing_content_is_a_conflict_problem() {
        let actions = vec![update_page("guide", None, "server\n", "local\n")];
        let problems = conflicts(&actions);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].description.contains("no tagged base content"));
    }

    #[test]
    fn server_ahead_needs_another_page_change() {
        let temp = tempdir().expect("tempdir");
        let repository = MockRepository::new(temp.path());
        let probe = StaticProbe::with(&[]);

        // Server moved ahead but nothing else changes: informational only.
        let alone = vec![update_page("guide", Some("base\n"), "server\n", "base\n")];
        assert!(get_problems(&alone, &inputs(), &repository, &probe)
            .unwrap()
            .is_empty());

        // A second page changes in the same run: flagged.
        let with_other = vec![
            update_page("guide", Some("base\n"), "server\n", "base\n"),
            Action::CreatePage {
                level: 1,
                path: "new".to_string(),
                navlink_title: "New".to_string(),
                navlink_hidden: false,
                content: "content".to_string(),
            },
        ];
        let problems = get_problems(&with_other, &inputs(), &repository, &probe).unwrap();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].description.contains("server content has changed"));
    }

    #[test]
    fn server_ahead_is_suppressed_by_flag_and_tag_together() {
        let temp = tempdir().expect("tempdir");
        let actions = vec![
            update_page("guide", Some("base\n"), "server\n", "base\n"),
            Action::CreatePage {
                level: 1,
                path: "new".to_string(),
                navlink_title: "New".to_string(),
                navlink_hidden: false,
                content: "content".to_string(),
            },
        ];
        let probe = StaticProbe::with(&[]);

        let tagged = MockRepository::new(temp.path()).with_tag(DISCOURSE_AHEAD_TAG, "commit-sha");
        let mut flagged = inputs();
        flagged.ignore_server_ahead = true;
        assert!(get_problems(&actions, &flagged, &tagged, &probe)
            .unwrap()
            .is_empty());

        // The tag alone is no longer honored.
        let tagged = MockRepository::new(temp.path()).with_tag(DISCOURSE_AHEAD_TAG, "commit-sha");
        assert_eq!(
            get_problems(&actions, &inputs(), &tagged, &probe)
                .unwrap()
                .len(),
            1
        );

        // The flag alone does nothing without the tag on the commit.
        let untagged = MockRepository::new(temp.path());
        assert_eq!(
            get_problems(&actions, &flagged, &untagged, &probe)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn unreachable_external_references_are_problems() {
        let temp = tempdir().expect("tempdir");
        let repository = MockRepository::new(temp.path());
        let probe = StaticProbe::with(&["https://example.com/live"]);
        let actions = vec![
            Action::CreateExternalRef {
                level: 1,
                path: "https-example-com-live".to_string(),
                navlink_title: "Live".to_string(),
                navlink_hidden: false,
                navlink_value: "https://example.com/live".to_string(),
            },
            Action::CreateExternalRef {
                level: 1,
                path: "https-example-com-404".to_string(),
                navlink_title: "Spec".to_string(),
                navlink_hidden: false,
                navlink_value: "https://example.com/404".to_string(),
            },
        ];
        let problems = get_problems(&actions, &inputs(), &repository, &probe).unwrap();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].description.contains("https://example.com/404"));
    }
}
