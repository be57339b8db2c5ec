use std::env;
use std::path::PathBuf;

use crate::error::{GatekeeperError, Result};

pub const DEFAULT_BRANCH: &str = "main";

/// Tag marking the commit whose docs content matches Discourse. The tagged
/// content is the base side of every three-way merge.
pub const DOCUMENTATION_TAG: &str = "discourse-gatekeeper/base-content";

/// Legacy tag suppressing server-ahead warnings. Read-only and only honored
/// when `ignore_server_ahead` is set.
pub const DISCOURSE_AHEAD_TAG: &str = "discourse-gatekeeper/discourse-ahead-ok";

pub const BRANCH_PREFIX: &str = "discourse-gatekeeper";
pub const MIGRATION_BRANCH: &str = "discourse-gatekeeper/migrate";

pub const DOCUMENTATION_FOLDER_NAME: &str = "docs";
pub const DOCUMENTATION_INDEX_FILENAME: &str = "index.md";
pub const DOC_FILE_EXTENSION: &str = "md";

pub const NAVIGATION_HEADING: &str = "Navigation";

/// The recognized configuration for a single run.
#[derive(Debug, Clone)]
pub struct UserInputs {
    pub discourse_host: String,
    pub discourse_api_username: String,
    pub discourse_api_key: String,
    pub discourse_category_id: u64,
    pub github_token: Option<String>,
    pub base_branch: String,
    pub commit_sha: String,
    pub charm_dir: PathBuf,
    pub dry_run: bool,
    pub delete_topics: bool,
    pub ignore_server_ahead: bool,
}

impl UserInputs {
    /// Check option constraints that clap cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.discourse_host.trim().is_empty() {
            return Err(GatekeeperError::Input(
                "discourse_host must not be empty".to_string(),
            ));
        }
        if self.discourse_host.contains("://") {
            return Err(GatekeeperError::Input(format!(
                "discourse_host must not include a protocol, got: {}",
                self.discourse_host
            )));
        }
        if self.commit_sha.trim().is_empty() {
            return Err(GatekeeperError::Input(
                "commit_sha must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn env_value(name: &str, default: &str) -> String {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default.to_string(),
    }
}

pub fn env_value_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> UserInputs {
        UserInputs {
            discourse_host: "discourse.example.com".to_string(),
            discourse_api_username: "bot".to_string(),
            discourse_api_key: "key".to_string(),
            discourse_category_id: 5,
            github_token: None,
            base_branch: DEFAULT_BRANCH.to_string(),
            commit_sha: "abc123".to_string(),
            charm_dir: PathBuf::from("."),
            dry_run: false,
            delete_topics: false,
            ignore_server_ahead: false,
        }
    }

    #[test]
    fn validate_accepts_bare_hostname() {
        assert!(inputs().validate().is_ok());
    }

    #[test]
    fn validate_accepts_hostname_with_port() {
        let mut inputs = inputs();
        inputs.discourse_host = "discourse.example.com:8080".to_string();
        assert!(inputs.validate().is_ok());
    }

    #[test]
    fn validate_rejects_protocol_prefix() {
        let mut inputs = inputs();
        inputs.discourse_host = "https://discourse.example.com".to_string();
        let error = inputs.validate().unwrap_err();
        assert!(error.to_string().contains("protocol"));
    }

    #[test]
    fn validate_rejects_empty_commit() {
        let mut inputs = inputs();
        inputs.commit_sha = String::new();
        assert!(inputs.validate().is_err());
    }

    #[test]
    fn env_value_returns_default_when_unset() {
        assert_eq!(env_value("GATEKEEPER_TEST_UNSET_VALUE", "fallback"), "fallback");
    }

    #[test]
    fn env_value_bool_returns_default_when_unset() {
        assert!(!env_value_bool("GATEKEEPER_TEST_UNSET_FLAG", false));
        assert!(env_value_bool("GATEKEEPER_TEST_UNSET_FLAG", true));
    }
}
