//! Error classes shared across the core crate.
//!
//! Every stage returns its own error type; the binary is the only place that
//! turns one of these into an exit code.

use std::path::PathBuf;
use thiserror::Error;

/// A rule could not be read from, or written to, one of its serialized forms.
#[derive(Debug, Error)]
pub enum RulesTransformerError {
    #[error("Missing key in YAML file: '{0}'")]
    MissingKey(String),

    #[error("{0}")]
    Validation(String),

    #[error("Row missing key: {0}")]
    RowMissingKey(String),

    #[error("Row has extra key: {0}")]
    RowExtraKey(String),

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A failure from the trestle authoring collaborator or the SSP index.
#[derive(Debug, Error)]
pub enum AuthoredObjectError {
    #[error("Root path {0} does not exist")]
    MissingRoot(PathBuf),

    #[error("Provided root directory {0} is not a valid Trestle root directory")]
    InvalidRoot(PathBuf),

    #[error("SSP {0} entry is missing profile or component data")]
    IncompleteIndexEntry(String),

    #[error("SSP {0} does not exists in the index")]
    MissingIndexEntry(String),

    #[error("Trestle {action} failed for {model}: {details}")]
    Trestle {
        action: String,
        model: String,
        details: String,
    },

    #[error("{0}")]
    Other(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A failure while running one pipeline stage.
///
/// `InvalidSource` and `InvalidWorkspace` are argument-class failures: the
/// caller passed something unusable and nothing was attempted.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Invalid source {source_str}: Source {source_str} must be of the form <repo_url>@<ref>")]
    InvalidSource { source_str: String },

    #[error("Target workspace {0} is not a valid trestle project root")]
    InvalidWorkspace(PathBuf),

    #[error("Markdown directory {0} does not exist")]
    MissingMarkdownDir(PathBuf),

    #[error("No rules found for component definition {0}")]
    NoRules(String),

    #[error("{file}: {source}")]
    Rule {
        file: String,
        #[source]
        source: RulesTransformerError,
    },

    #[error("Assemble task failed for model {model}: {source}")]
    Assemble {
        model: PathBuf,
        #[source]
        source: AuthoredObjectError,
    },

    #[error("Regenerate task failed for model {model}: {source}")]
    Regenerate {
        model: PathBuf,
        #[source]
        source: AuthoredObjectError,
    },

    #[error("Git error occurred while fetching content from {source_str}: {details}")]
    Fetch { source_str: String, details: String },

    #[error("Trestle error occurred while syncing content from {source_str}: {details}")]
    Sync { source_str: String, details: String },

    #[error("Model {model} from {dir} is not valid: {details}")]
    InvalidModel {
        model: String,
        dir: PathBuf,
        details: String,
    },

    #[error("Failed to transform rules for {compdef}: {details}")]
    Transform { compdef: String, details: String },

    #[error("{0}")]
    Authored(#[from] AuthoredObjectError),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl TaskError {
    /// Errors caused by bad input rather than by the work itself.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            TaskError::InvalidSource { .. } | TaskError::InvalidWorkspace(_)
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TaskError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Git and pipeline failures raised by the bot runner.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Bot pre-tasks failed: {0}")]
    PreTask(#[source] TaskError),

    #[error("Git push to {branch} failed: {details}")]
    Push { branch: String, details: String },

    #[error("Git pull request to {target} failed: {source}")]
    PullRequest {
        target: String,
        #[source]
        source: GitProviderError,
    },

    #[error("Check only mode is enabled and diff detected. Manual intervention on {0} is required.")]
    CheckOnly(String),

    #[error("No git remote configured for repository at {0}")]
    NoRemote(PathBuf),

    #[error("Git operation '{operation}' failed: {source}")]
    Git {
        operation: String,
        #[source]
        source: git2::Error,
    },

    #[error("Git {operation} failed: {details}")]
    GitCommand { operation: String, details: String },

    #[error("Failed to launch git {operation}: {source}")]
    Spawn {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn git_error(operation: &str) -> impl FnOnce(git2::Error) -> RepoError + '_ {
    move |source| RepoError::Git {
        operation: operation.to_string(),
        source,
    }
}

/// Git hosting API failures.
#[derive(Debug, Error)]
pub enum GitProviderError {
    #[error("{0} is an invalid GitHub repo URL")]
    InvalidGitHubUrl(String),

    #[error("{0} is an invalid repo URL")]
    InvalidUrl(String),

    #[error("Set CI_SERVER_PROTOCOL and CI SERVER HOST environment variables")]
    MissingCiServer,

    #[error("Unsupported git provider type {0}, expected github or gitlab")]
    UnsupportedProvider(String),

    #[error("GitHub provider does not support custom server URLs")]
    CustomGitHubServer,

    #[error("Invalid server URL {url}: {details}")]
    InvalidServerUrl { url: String, details: String },

    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} returned {status}: {body}")]
    Api {
        url: String,
        status: u16,
        body: String,
    },
}
