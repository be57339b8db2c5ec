use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use gatekeeper_core::check::HeadProbe;
use gatekeeper_core::config::{self, DEFAULT_BRANCH, UserInputs};
use gatekeeper_core::discourse::DiscourseClient;
use gatekeeper_core::repository::{GitCommandClient, RepositoryClient};
use tracing_subscriber::EnvFilter;

/// Synchronize a markdown docs tree with a Discourse documentation portal.
///
/// Every option falls back to the environment variable of the same name in
/// upper case, matching how the release pipeline provides its inputs.
#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version)]
struct Cli {
    #[arg(long, value_name = "HOST", help = "Discourse hostname, protocol must be absent")]
    discourse_host: Option<String>,
    #[arg(long, value_name = "USERNAME")]
    discourse_api_username: Option<String>,
    #[arg(long, value_name = "KEY")]
    discourse_api_key: Option<String>,
    #[arg(long, value_name = "ID", help = "Category for created topics")]
    discourse_category_id: Option<u64>,
    #[arg(long, value_name = "TOKEN", help = "Token for pull request operations")]
    github_token: Option<String>,
    #[arg(long, value_name = "BRANCH", help = "Default branch name")]
    base_branch: Option<String>,
    #[arg(long, value_name = "SHA", help = "Commit under reconciliation")]
    commit_sha: Option<String>,
    #[arg(long, value_name = "PATH", help = "Directory containing the metadata and docs/")]
    charm_dir: Option<PathBuf>,
    #[arg(long, help = "Log actions without mutating anything")]
    dry_run: bool,
    #[arg(long, help = "Allow deleting topics that are no longer needed")]
    delete_topics: bool,
    #[arg(long, help = "Suppress server-ahead problems when the ahead-ok tag is present")]
    ignore_server_ahead: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match execute() {
        Ok(code) => code,
        Err(error) => {
            eprintln!("gatekeeper failed: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute() -> Result<ExitCode> {
    let cli = Cli::parse();
    let (inputs, repository) = resolve_inputs(cli)?;

    let discourse = DiscourseClient::new(
        &inputs.discourse_host,
        &inputs.discourse_api_username,
        &inputs.discourse_api_key,
        inputs.discourse_category_id,
    )
    .context("failed to build the Discourse client")?;
    let probe = HeadProbe::new().context("failed to build the link probe")?;

    let result =
        gatekeeper_core::run(&inputs, &discourse, &repository, &probe).context("run failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&result.outputs).context("failed to encode outputs")?
    );
    if let Some(reason) = result.failure {
        eprintln!("gatekeeper failed: {reason}");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn resolve_inputs(cli: Cli) -> Result<(UserInputs, GitCommandClient)> {
    let discourse_host = cli
        .discourse_host
        .unwrap_or_else(|| config::env_value("DISCOURSE_HOST", ""));
    let discourse_api_username = cli
        .discourse_api_username
        .unwrap_or_else(|| config::env_value("DISCOURSE_API_USERNAME", ""));
    let discourse_api_key = cli
        .discourse_api_key
        .unwrap_or_else(|| config::env_value("DISCOURSE_API_KEY", ""));
    let discourse_category_id = match cli.discourse_category_id {
        Some(id) => id,
        None => {
            let raw = config::env_value("DISCOURSE_CATEGORY_ID", "");
            if raw.is_empty() {
                bail!("discourse_category_id is required");
            }
            raw.parse()
                .with_context(|| format!("invalid DISCOURSE_CATEGORY_ID: {raw}"))?
        }
    };
    let github_token = cli
        .github_token
        .or_else(|| Some(config::env_value("GITHUB_TOKEN", "")).filter(|token| !token.is_empty()));
    let base_branch = cli
        .base_branch
        .unwrap_or_else(|| config::env_value("BASE_BRANCH", DEFAULT_BRANCH));
    let charm_dir = cli
        .charm_dir
        .unwrap_or_else(|| PathBuf::from(config::env_value("CHARM_DIR", ".")));

    let repository = GitCommandClient::new(&charm_dir, github_token.clone())
        .context("failed to build the repository client")?;
    let commit_sha = match cli.commit_sha {
        Some(sha) => sha,
        None => {
            let from_env = config::env_value("COMMIT_SHA", "");
            if from_env.is_empty() {
                repository
                    .current_commit()
                    .context("failed to resolve the current commit")?
            } else {
                from_env
            }
        }
    };

    let inputs = UserInputs {
        discourse_host,
        discourse_api_username,
        discourse_api_key,
        discourse_category_id,
        github_token,
        base_branch,
        commit_sha,
        charm_dir,
        dry_run: cli.dry_run || config::env_value_bool("DRY_RUN", false),
        delete_topics: cli.delete_topics || config::env_value_bool("DELETE_TOPICS", false),
        ignore_server_ahead: cli.ignore_server_ahead
            || config::env_value_bool("IGNORE_SERVER_AHEAD", false),
    };
    Ok((inputs, repository))
}
