use thiserror::Error;

pub type Result<T, E = GatekeeperError> = std::result::Result<T, E>;

/// Every failure the workflows can surface.
///
/// The executor converts per-action errors into FAIL reports and keeps going;
/// everything else propagates to the orchestrator.
#[derive(Debug, Error)]
pub enum GatekeeperError {
    /// Malformed user input: metadata files, the contents index, bad options.
    #[error("input error: {0}")]
    Input(String),

    /// A three-way merge produced conflicts.
    #[error("content conflict: {0}")]
    Content(String),

    /// The documentation server refused or failed a request.
    #[error("server error: {0}")]
    Server(String),

    /// A raw Discourse API failure, wrapped into `Server` at the workflow seams.
    #[error("discourse error: {0}")]
    Discourse(String),

    /// The credentials lack write access on an existing topic.
    #[error("page permission error: {0}")]
    PagePermission(String),

    /// The navigation markdown on the index topic violates the grammar.
    #[error("navigation table parse error: {0}")]
    NavigationTableParse(String),

    /// The planner hit an inconsistency between local items and server rows.
    #[error("reconciliation error: {0}")]
    Reconciliation(String),

    /// Migration produced at least one failed report.
    #[error("migration error: {0}")]
    Migration(String),

    /// A git or host API operation failed.
    #[error("repository client error: {0}")]
    RepositoryClient(String),

    /// The requested tag does not exist in the repository.
    #[error("repository tag not found: {0}")]
    RepositoryTagNotFound(String),

    /// The requested file does not exist at the given tag.
    #[error("repository file not found: {0}")]
    RepositoryFileNotFound(String),

    /// A tag move was requested from a commit that is not on the base branch.
    #[error("tagging not allowed: {0}")]
    TaggingNotAllowed(String),
}
