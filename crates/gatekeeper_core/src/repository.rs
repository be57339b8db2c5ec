//! Git and host-API operations the workflows depend on.
//!
//! Git runs through the `git` CLI against the checked-out repository; pull
//! requests go through the GitHub REST API.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{GatekeeperError, Result};

pub const ORIGIN_NAME: &str = "origin";
pub const ACTIONS_USER_NAME: &str = "discourse-gatekeeper-docs-bot";
pub const ACTIONS_USER_EMAIL: &str = "discourse-gatekeeper-bot@users.noreply.github.com";
pub const ACTIONS_PULL_REQUEST_TITLE: &str = "[discourse-gatekeeper] Migrate charm docs";
pub const ACTIONS_PULL_REQUEST_BODY: &str =
    "This pull request was autogenerated by discourse-gatekeeper to migrate \
     existing documentation from the server to the repository.";
pub const ACTIONS_COMMIT_MESSAGE: &str = "migrate docs from server";
pub const TAG_MESSAGE: &str =
    "tag created by discourse-gatekeeper to mark the content synced with discourse";

static GITHUB_HTTPS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:.*@)?github\.com/(?P<slug>.+?/.+?)(?:\.git)?/?$")
        .expect("invalid github https regex")
});
static GITHUB_SSH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^git@github\.com:(?P<slug>.+?/.+?)(?:\.git)?$").expect("invalid github ssh regex")
});

/// Summary of the working-tree changes relative to HEAD.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub new: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

impl std::fmt::Display for DiffSummary {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "new: {}, modified: {}, removed: {}",
            self.new.len(),
            self.modified.len(),
            self.removed.len()
        )
    }
}

/// The git and host operations used by reconcile and migrate.
pub trait RepositoryClient {
    fn base_path(&self) -> &Path;
    fn current_branch(&self) -> Result<String>;
    fn current_commit(&self) -> Result<String>;
    fn is_dirty(&self) -> Result<bool>;
    /// Whether the commit is reachable from the tip of the branch.
    fn is_commit_in_branch(&self, commit_sha: &str, branch: &str) -> Result<bool>;
    /// Create (or reset) a branch at `base` and switch to it.
    fn create_branch(&self, branch_name: &str, base: &str) -> Result<()>;
    fn switch(&self, branch_name: &str) -> Result<()>;
    /// Stage everything, commit as the gatekeeper bot and force-push.
    fn update_branch(&self, commit_message: &str) -> Result<()>;
    fn get_summary(&self) -> Result<DiffSummary>;
    /// The commit a tag points at, or `None` when the tag does not exist.
    fn tag_exists(&self, tag_name: &str) -> Result<Option<String>>;
    fn tag_commit(&self, tag_name: &str, commit_sha: &str) -> Result<()>;
    /// The content of a file at a tag.
    ///
    /// Distinguishes a missing tag (`RepositoryTagNotFound`) from a file that
    /// does not exist at the tag (`RepositoryFileNotFound`); the planner
    /// treats only the latter as an untagged page.
    fn get_file_content_from_tag(&self, path: &str, tag_name: &str) -> Result<String>;
    /// URL of the open pull request for a branch, if any.
    fn get_pull_request(&self, branch_name: &str) -> Result<Option<String>>;
    fn create_pull_request(&self, branch_name: &str, base: &str) -> Result<String>;
    fn update_pull_request(&self, branch_name: &str) -> Result<()>;
}

/// Switches to a branch and restores the original branch when dropped, so a
/// failure inside the scope cannot leave the checkout on the wrong branch.
pub struct BranchScope<'a> {
    repository: &'a dyn RepositoryClient,
    original_branch: String,
}

impl<'a> BranchScope<'a> {
    /// Capture the current branch, then create `branch_name` at `base` and
    /// switch to it.
    pub fn create(
        repository: &'a dyn RepositoryClient,
        branch_name: &str,
        base: &str,
    ) -> Result<Self> {
        let original_branch = repository.current_branch()?;
        repository.create_branch(branch_name, base)?;
        Ok(Self {
            repository,
            original_branch,
        })
    }
}

impl Drop for BranchScope<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.repository.switch(&self.original_branch) {
            tracing::warn!(
                branch = %self.original_branch,
                %error,
                "failed to restore the original branch"
            );
        }
    }
}

pub struct GitCommandClient {
    base_path: PathBuf,
    github_token: Option<String>,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    number: u64,
    html_url: String,
}

impl GitCommandClient {
    pub fn new(base_path: &Path, github_token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|error| {
                GatekeeperError::RepositoryClient(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self {
            base_path: base_path.to_path_buf(),
            github_token,
            http,
        })
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.base_path)
            .args(args)
            .output()
            .map_err(|error| {
                GatekeeperError::RepositoryClient(format!("failed to run git: {error}"))
            })?;
        if !output.status.success() {
            return Err(GatekeeperError::RepositoryClient(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn git_status(&self, args: &[&str]) -> Result<bool> {
        let status = Command::new("git")
            .arg("-C")
            .arg(&self.base_path)
            .args(args)
            .output()
            .map_err(|error| {
                GatekeeperError::RepositoryClient(format!("failed to run git: {error}"))
            })?;
        Ok(status.status.success())
    }

    fn repository_slug(&self) -> Result<String> {
        let remote_url = self.git(&["remote", "get-url", ORIGIN_NAME])?;
        parse_repository_slug(remote_url.trim())
    }

    fn github_request(
        &self,
        build: impl FnOnce(&Client, &str) -> reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::Response> {
        let token = self.github_token.as_deref().ok_or_else(|| {
            GatekeeperError::RepositoryClient(
                "a GitHub token is required for pull request operations".to_string(),
            )
        })?;
        let slug = self.repository_slug()?;
        let base = format!("https://api.github.com/repos/{slug}");
        build(&self.http, &base)
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", ACTIONS_USER_NAME)
            .send()
            .map_err(|error| {
                GatekeeperError::RepositoryClient(format!("failed to call GitHub: {error}"))
            })
    }

    fn find_pull_request(&self, branch_name: &str) -> Result<Option<PullRequestResponse>> {
        let slug = self.repository_slug()?;
        let owner = slug.split('/').next().unwrap_or_default().to_string();
        let head = format!("{owner}:{branch_name}");
        let response = self.github_request(|http, base| {
            http.get(format!("{base}/pulls"))
                .query(&[("state", "open"), ("head", head.as_str())])
        })?;
        if !response.status().is_success() {
            return Err(GatekeeperError::RepositoryClient(format!(
                "failed to list pull requests, status: {}",
                response.status()
            )));
        }
        let pull_requests: Vec<PullRequestResponse> = response.json().map_err(|error| {
            GatekeeperError::RepositoryClient(format!(
                "failed to decode pull request list: {error}"
            ))
        })?;
        Ok(pull_requests.into_iter().next())
    }
}

impl RepositoryClient for GitCommandClient {
    fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn current_branch(&self) -> Result<String> {
        Ok(self.git(&["rev-parse", "--abbrev-ref", "HEAD"])?.trim().to_string())
    }

    fn current_commit(&self) -> Result<String> {
        Ok(self.git(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    fn is_dirty(&self) -> Result<bool> {
        Ok(!self.git(&["status", "--porcelain"])?.trim().is_empty())
    }

    fn is_commit_in_branch(&self, commit_sha: &str, branch: &str) -> Result<bool> {
        if self.git_status(&["merge-base", "--is-ancestor", commit_sha, branch])? {
            return Ok(true);
        }
        self.git_status(&[
            "merge-base",
            "--is-ancestor",
            commit_sha,
            &format!("{ORIGIN_NAME}/{branch}"),
        ])
    }

    fn create_branch(&self, branch_name: &str, base: &str) -> Result<()> {
        self.git(&["checkout", "-B", branch_name, base]).map(|_| ())
    }

    fn switch(&self, branch_name: &str) -> Result<()> {
        self.git(&["checkout", branch_name]).map(|_| ())
    }

    fn update_branch(&self, commit_message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        let staged_changes = !self.git_status(&["diff", "--cached", "--quiet"])?;
        if staged_changes {
            self.git(&[
                "-c",
                &format!("user.name={ACTIONS_USER_NAME}"),
                "-c",
                &format!("user.email={ACTIONS_USER_EMAIL}"),
                "commit",
                "-m",
                commit_message,
            ])?;
        }
        self.git(&["push", "--force", "-u", ORIGIN_NAME, "HEAD"])
            .map(|_| ())
    }

    fn get_summary(&self) -> Result<DiffSummary> {
        let porcelain = self.git(&["status", "--porcelain"])?;
        Ok(parse_status_porcelain(&porcelain))
    }

    fn tag_exists(&self, tag_name: &str) -> Result<Option<String>> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.base_path)
            .args(["rev-list", "-n", "1", tag_name])
            .output()
            .map_err(|error| {
                GatekeeperError::RepositoryClient(format!("failed to run git: {error}"))
            })?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ))
    }

    fn tag_commit(&self, tag_name: &str, commit_sha: &str) -> Result<()> {
        self.git(&["tag", "--force", "-a", tag_name, commit_sha, "-m", TAG_MESSAGE])?;
        self.git(&["push", "--force", ORIGIN_NAME, tag_name]).map(|_| ())
    }

    fn get_file_content_from_tag(&self, path: &str, tag_name: &str) -> Result<String> {
        if self.tag_exists(tag_name)?.is_none() {
            return Err(GatekeeperError::RepositoryTagNotFound(tag_name.to_string()));
        }
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.base_path)
            .args(["show", &format!("{tag_name}:{path}")])
            .output()
            .map_err(|error| {
                GatekeeperError::RepositoryClient(format!("failed to run git: {error}"))
            })?;
        if !output.status.success() {
            return Err(GatekeeperError::RepositoryFileNotFound(format!(
                "{path} at {tag_name}"
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn get_pull_request(&self, branch_name: &str) -> Result<Option<String>> {
        Ok(self
            .find_pull_request(branch_name)?
            .map(|pull_request| pull_request.html_url))
    }

    fn create_pull_request(&self, branch_name: &str, base: &str) -> Result<String> {
        let payload = json!({
            "title": ACTIONS_PULL_REQUEST_TITLE,
            "body": ACTIONS_PULL_REQUEST_BODY,
            "head": branch_name,
            "base": base,
        });
        let response =
            self.github_request(|http, api_base| http.post(format!("{api_base}/pulls")).json(&payload))?;
        if !response.status().is_success() {
            return Err(GatekeeperError::RepositoryClient(format!(
                "failed to create pull request, status: {}",
                response.status()
            )));
        }
        let created: PullRequestResponse = response.json().map_err(|error| {
            GatekeeperError::RepositoryClient(format!("failed to decode pull request: {error}"))
        })?;
        Ok(created.html_url)
    }

    fn update_pull_request(&self, branch_name: &str) -> Result<()> {
        let Some(pull_request) = self.find_pull_request(branch_name)? else {
            return Err(GatekeeperError::RepositoryClient(format!(
                "no open pull request for branch {branch_name}"
            )));
        };
        let payload = json!({
            "title": ACTIONS_PULL_REQUEST_TITLE,
            "body": ACTIONS_PULL_REQUEST_BODY,
        });
        let response = self.github_request(|http, api_base| {
            http.patch(format!("{api_base}/pulls/{}", pull_request.number))
                .json(&payload)
        })?;
        if !response.status().is_success() {
            return Err(GatekeeperError::RepositoryClient(format!(
                "failed to update pull request, status: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Extract the `owner/repository` slug from a GitHub remote URL.
pub fn parse_repository_slug(remote_url: &str) -> Result<String> {
    GITHUB_HTTPS_PATTERN
        .captures(remote_url)
        .or_else(|| GITHUB_SSH_PATTERN.captures(remote_url))
        .map(|captures| captures["slug"].to_string())
        .ok_or_else(|| {
            GatekeeperError::RepositoryClient(format!(
                "remote is not a GitHub repository: {remote_url}"
            ))
        })
}

fn parse_status_porcelain(porcelain: &str) -> DiffSummary {
    let mut summary = DiffSummary::default();
    for line in porcelain.lines() {
        if line.len() < 4 {
            continue;
        }
        let (state, path) = line.split_at(3);
        let path = path.trim().to_string();
        match state.trim() {
            "??" | "A" => summary.new.push(path),
            "D" => summary.removed.push(path),
            _ => summary.modified.push(path),
        }
    }
    summary
}
