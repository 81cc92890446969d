//! # Command Pipeline
//!
//! A [`Macro`] is an ordered list of named [`Command`]s run against one
//! [`RunContext`].
//!
//! - Steps run strictly one after another.
//! - A step named in the skip set is omitted entirely: it is not executed and
//!   not logged as executed.
//! - The first failing step aborts the rest. The error names the step and,
//!   for per-repository steps, the repository.
//! - Registered teardown steps run when the macro ends, on failure as well as
//!   on success.
//!
//! Per-repository steps fan out over the repository set with a bounded rayon
//! pool (see [`for_each_repo`]). The step returns only after every repository
//! has finished.

pub mod squid;
pub mod steps;

use std::collections::BTreeSet;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::repository::Repo;

/// Names of steps to omit for one invocation.
pub type SkipSet = BTreeSet<String>;

/// A named, idempotent unit of pipeline work.
pub trait Command: Send + Sync {
    fn name(&self) -> &str;
    fn execute(&self, ctx: &mut RunContext) -> Result<()>;
}

/// An ordered sequence of steps.
pub struct Macro {
    steps: Vec<Box<dyn Command>>,
}

impl Default for Macro {
    fn default() -> Self {
        Self::new()
    }
}

impl Macro {
    pub fn new() -> Self {
        Macro { steps: Vec::new() }
    }

    /// The standard setup sequence: directories, environment, checkout and
    /// patches.
    pub fn setup() -> Self {
        Macro::new()
            .with_step(steps::SetupDir)
            .with_step(steps::SetupEnviron)
            .with_step(steps::ReposCheckout)
            .with_step(steps::ReposApplyPatches)
    }

    pub fn with_step(mut self, step: impl Command + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn push(&mut self, step: Box<dyn Command>) {
        self.steps.push(step);
    }

    /// Insert `step` right after the step called `after`, or at the end.
    pub fn insert_after(&mut self, after: &str, step: Box<dyn Command>) {
        let pos = self
            .steps
            .iter()
            .position(|s| s.name() == after)
            .map_or(self.steps.len(), |p| p + 1);
        self.steps.insert(pos, step);
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step not in `skip`, in order, stopping at the first failure.
    pub fn run(&self, ctx: &mut RunContext, skip: &SkipSet) -> Result<()> {
        for name in skip {
            if !self.steps.iter().any(|s| s.name() == name) {
                debug!("Skip entry '{}' matches no step", name);
            }
        }

        let result = self.run_steps(ctx, skip);
        let teardown = ctx.teardown();
        match (result, teardown) {
            (Err(e), Err(t)) => {
                warn!("{}", t);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), t) => t,
        }
    }

    fn run_steps(&self, ctx: &mut RunContext, skip: &SkipSet) -> Result<()> {
        for step in &self.steps {
            if skip.contains(step.name()) {
                debug!("skipping {}", step.name());
                continue;
            }
            info!("executing {}", step.name());
            step.execute(ctx).map_err(|e| match e {
                Error::Step { .. } => e,
                other => other.in_step(step.name(), None),
            })?;
        }
        Ok(())
    }
}

/// Run `op` for every repository on a pool of at most `ctx.settings.jobs`
/// threads. Results come back in repository order.
pub fn for_each_repo<R, F>(ctx: &mut RunContext, op: F) -> Result<Vec<(String, Result<R>)>>
where
    R: Send,
    F: Fn(&mut Repo) -> Result<R> + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.settings.jobs.max(1))
        .build()
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

    Ok(pool.install(|| {
        ctx.repos
            .par_iter_mut()
            .map(|repo| {
                let result = op(repo);
                (repo.name.clone(), result)
            })
            .collect()
    }))
}

/// Fail-fast reduction of per-repository results: the first failure in
/// repository order becomes the step's error.
pub fn first_failure<R>(step: &str, results: Vec<(String, Result<R>)>) -> Result<Vec<R>> {
    results
        .into_iter()
        .map(|(name, result)| result.map_err(|e| e.in_step(step, Some(&name))))
        .collect()
}
