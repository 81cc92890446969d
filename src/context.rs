//! # Run Context
//!
//! [`RunContext`] is the state of one invocation: the merged configuration,
//! the environment handed to build commands, the repository set, the squid
//! handle and the teardown registry. The top-level caller constructs it and
//! passes it explicitly to every pipeline step.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error};

use crate::defaults;
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::pipeline::squid::SquidInstance;
use crate::pipeline::Command;
use crate::repository::{repos_from_config, GitOperations, Repo, SystemGit};
use crate::resolver::MergedConfig;

/// Runtime settings of an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Directory below which repositories are checked out.
    pub work_dir: PathBuf,
    pub build_dir: PathBuf,
    /// Reference cache for mirror-backed cloning.
    pub repo_ref_dir: Option<PathBuf>,
    /// Upper bound on parallel repository operations.
    pub jobs: usize,
    /// Discard local modifications during checkout.
    pub force_checkout: bool,
    /// Regenerate the lock document instead of applying it.
    pub update: bool,
}

impl Settings {
    pub fn new(work_dir: PathBuf) -> Self {
        Settings {
            build_dir: defaults::default_build_dir(&work_dir),
            work_dir,
            repo_ref_dir: None,
            jobs: defaults::default_jobs(),
            force_checkout: false,
            update: false,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::new(defaults::default_work_dir())
    }
}

/// State shared by the steps of one invocation.
pub struct RunContext {
    pub settings: Settings,
    pub config: MergedConfig,
    /// Environment handed to build and repository commands.
    pub environ: BTreeMap<String, String>,
    /// Snapshot of the invoking process environment.
    pub process_env: Environment,
    /// Repositories of `config`, in key order.
    pub repos: Vec<Repo>,
    /// The running squid proxy, if one was started.
    pub squid: Option<SquidInstance>,
    pub git: Arc<dyn GitOperations>,
    teardown: Vec<Box<dyn Command>>,
}

impl RunContext {
    /// Build a context using the system `git`.
    pub fn new(settings: Settings, config: MergedConfig, process_env: Environment) -> Self {
        Self::with_git(settings, config, process_env, Arc::new(SystemGit))
    }

    pub fn with_git(
        settings: Settings,
        config: MergedConfig,
        process_env: Environment,
        git: Arc<dyn GitOperations>,
    ) -> Self {
        let repos = repos_from_config(&config.spec, &settings.work_dir, config.root_dir());
        RunContext {
            settings,
            config,
            environ: BTreeMap::new(),
            process_env,
            repos,
            squid: None,
            git,
            teardown: Vec::new(),
        }
    }

    pub fn build_dir(&self) -> &Path {
        &self.settings.build_dir
    }

    pub fn work_dir(&self) -> &Path {
        &self.settings.work_dir
    }

    pub fn repo(&self, name: &str) -> Result<&Repo> {
        self.repos
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::UnknownRepo {
                name: name.to_string(),
            })
    }

    /// Register a step that must run when the invocation ends, whether it
    /// succeeds or not.
    pub fn register_teardown(&mut self, step: Box<dyn Command>) {
        debug!("Registered teardown step {}", step.name());
        self.teardown.push(step);
    }

    pub fn pending_teardown(&self) -> Vec<&str> {
        self.teardown.iter().map(|s| s.name()).collect()
    }

    /// Run registered teardown steps, most recent first. Every step runs even
    /// if an earlier one fails; the first failure is returned.
    pub fn teardown(&mut self) -> Result<()> {
        let steps = std::mem::take(&mut self.teardown);
        let mut first_error = None;
        for step in steps.into_iter().rev() {
            debug!("Tearing down {}", step.name());
            if let Err(e) = step.execute(self) {
                error!("Teardown step {} failed: {}", step.name(), e);
                first_error.get_or_insert(e.in_step(step.name(), None));
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        if !self.teardown.is_empty() {
            let _ = self.teardown();
        }
    }
}
