//! # Error Handling
//!
//! This module defines the centralized error type for `layerstack`. Every
//! fallible operation in the library returns [`Result<T>`], and every failure
//! is one variant of [`Error`].
//!
//! Variants fall into four families, reported by [`Error::kind`]:
//!
//! - **Config**: malformed or inconsistent specification input (bad schema,
//!   include cycles, missing required environment variables).
//! - **Repo**: version-control failures (unreachable remotes, missing refs,
//!   dirty worktrees, patch conflicts).
//! - **ExternalTool**: a required executable is missing or exits non-zero.
//! - **Io**: plain filesystem failures.
//!
//! A failing pipeline step is wrapped in [`Error::Step`], which keeps the
//! kind of the underlying cause while adding the step and repository names.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Coarse error taxonomy used for reporting and exit behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Repo,
    ExternalTool,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Config => "configuration error",
            ErrorKind::Repo => "repository error",
            ErrorKind::ExternalTool => "external tool error",
            ErrorKind::Io => "I/O error",
        };
        f.write_str(name)
    }
}

/// Main error type for layerstack operations
#[derive(Error, Debug)]
pub enum Error {
    /// A specification document could not be parsed.
    #[error("Configuration parsing error in {}: {message}{}", path.display(), hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    ConfigParse {
        path: PathBuf,
        message: String,
        /// Optional hint for how to fix the document
        hint: Option<String>,
    },

    /// A document parsed but violates the schema.
    #[error("Schema error in {}: {message}", path.display())]
    Schema { path: PathBuf, message: String },

    /// An include chain leads back to a document already on the stack.
    #[error("Include cycle detected: {cycle}")]
    IncludeCycle { cycle: String },

    /// The root document does not exist.
    #[error("Configuration file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    /// An include target does not exist.
    #[error("Included document not found: {} (included from {})", path.display(), from.display())]
    IncludeNotFound { path: PathBuf, from: PathBuf },

    /// A required environment variable is neither set nor defaulted.
    #[error("Required environment variable '{name}' is not set and has no default")]
    MissingEnv { name: String },

    /// A `${NAME}` placeholder references nothing in the `env` section.
    #[error("Unresolved placeholder '${{{name}}}' in {field}")]
    UnresolvedPlaceholder { name: String, field: String },

    /// Two layers disagree on the shape of a value.
    #[error("Conflicting override types at '{key}': {message}")]
    MergeConflict { key: String, message: String },

    /// A git invocation failed.
    #[error("Git command failed for {repo}: {command} - {stderr}")]
    GitCommand {
        repo: String,
        command: String,
        stderr: String,
    },

    /// A refspec does not name anything in the repository.
    #[error("Reference '{refspec}' not found in repository {repo}")]
    RefNotFound { repo: String, refspec: String },

    /// The worktree has local modifications that a checkout would destroy.
    #[error("Repository {repo} has local modifications at {}{}", path.display(), hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    DirtyWorktree {
        repo: String,
        path: PathBuf,
        hint: Option<String>,
    },

    /// A patch did not apply; the repository was reset to its base commit.
    #[error("Patch '{patch}' does not apply to {repo}: {message}")]
    PatchConflict {
        repo: String,
        patch: String,
        message: String,
    },

    /// An operation needed the resolved commit of a repository that was never resolved.
    #[error("Repository {repo} has not been resolved to a commit")]
    Unresolved { repo: String },

    /// A repository referenced by name is not declared.
    #[error("Unknown repository '{name}'")]
    UnknownRepo { name: String },

    /// The tolerant cross-repository command step collected failures.
    #[error("Command failed in {} of {} repositories: {}", failures.len(), total, failures.iter().map(|(r, e)| format!("{}: {}", r, e)).collect::<Vec<_>>().join("; "))]
    RepoCommands {
        total: usize,
        failures: Vec<(String, String)>,
    },

    /// A required external executable is missing or failed.
    #[error("External tool error: {tool} - {message}")]
    ExternalTool { tool: String, message: String },

    /// Two plugins were registered under the same command name.
    #[error("Plugin '{name}' is already registered")]
    DuplicatePlugin { name: String },

    /// A pipeline step failed.
    #[error("Step '{step}' failed{}: {source}", repo.as_ref().map(|r| format!(" for repository {}", r)).unwrap_or_default())]
    Step {
        step: String,
        repo: Option<String>,
        #[source]
        source: Box<Error>,
    },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML error, wrapped from `serde_yaml::Error`.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression failed to compile.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// An error indicating that a mutex or other lock has been poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },
}

impl Error {
    /// Classify this error into the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigParse { .. }
            | Error::Schema { .. }
            | Error::IncludeCycle { .. }
            | Error::ConfigNotFound { .. }
            | Error::IncludeNotFound { .. }
            | Error::MissingEnv { .. }
            | Error::UnresolvedPlaceholder { .. }
            | Error::MergeConflict { .. }
            | Error::UnknownRepo { .. }
            | Error::DuplicatePlugin { .. }
            | Error::UrlParse(_)
            | Error::Regex(_)
            | Error::Yaml(_) => ErrorKind::Config,
            Error::GitCommand { .. }
            | Error::RefNotFound { .. }
            | Error::DirtyWorktree { .. }
            | Error::PatchConflict { .. }
            | Error::Unresolved { .. }
            | Error::RepoCommands { .. } => ErrorKind::Repo,
            Error::ExternalTool { .. } => ErrorKind::ExternalTool,
            Error::Step { source, .. } => source.kind(),
            Error::Io(_) | Error::Json(_) | Error::LockPoisoned { .. } => ErrorKind::Io,
        }
    }

    /// Wrap this error as the failure of a pipeline step.
    pub fn in_step(self, step: &str, repo: Option<&str>) -> Error {
        Error::Step {
            step: step.to_string(),
            repo: repo.map(str::to_string),
            source: Box::new(self),
        }
    }

    /// Name of the failing step, if this is a step failure.
    pub fn step(&self) -> Option<&str> {
        match self {
            Error::Step { step, .. } => Some(step),
            _ => None,
        }
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
