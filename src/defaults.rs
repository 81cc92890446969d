//! Default values for layerstack settings.
//!
//! This module provides centralized default values and environment variable
//! names used across commands, ensuring consistency and avoiding duplication.

use std::path::{Path, PathBuf};

/// Working directory holding repository checkouts.
pub const ENV_WORK_DIR: &str = "LAYERSTACK_WORK_DIR";
/// Build directory.
pub const ENV_BUILD_DIR: &str = "LAYERSTACK_BUILD_DIR";
/// Reference cache directory; enables mirror-backed cloning.
pub const ENV_REPO_REF_DIR: &str = "LAYERSTACK_REPO_REF_DIR";
/// Concurrency limit for per-repository operations.
pub const ENV_JOBS: &str = "LAYERSTACK_JOBS";
/// Upstream proxy consumed by the squid layer.
pub const ENV_HTTP_PROXY: &str = "http_proxy";

/// Variables passed from the invoking environment into build commands.
pub const PASSTHROUGH_ENV: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "TERM",
    "SHELL",
    "SSH_AUTH_SOCK",
    "http_proxy",
    "https_proxy",
    "ftp_proxy",
    "no_proxy",
    "GIT_PROXY_COMMAND",
    "NO_PROXY",
];

/// Upper bound on the default number of parallel repository jobs.
pub const MAX_DEFAULT_JOBS: usize = 8;

/// Build directory name below the work directory.
pub const BUILD_DIR_NAME: &str = "build";

/// Default BitBake task.
pub const DEFAULT_TASK: &str = "build";

/// Default build target.
pub const DEFAULT_TARGET: &str = "core-image-minimal";

/// Default work directory: the current directory, or `.` if it cannot be read.
pub fn default_work_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

pub fn default_build_dir(work_dir: &Path) -> PathBuf {
    work_dir.join(BUILD_DIR_NAME)
}

/// Default concurrency: available parallelism, capped at [`MAX_DEFAULT_JOBS`].
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_JOBS)
}

/// Home directory used for the squid and git helpers, falling back to `/tmp`.
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(std::env::temp_dir)
}
