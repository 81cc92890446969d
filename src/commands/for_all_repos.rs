//! # For-All-Repos Command Implementation
//!
//! Checks out every repository, then runs a shell command in each of them.
//! The command runs everywhere even if it fails in some repositories; the
//! failures are reported together at the end.

use anyhow::Result;
use clap::Args;

use layerstack::env::EnvMode;
use layerstack::pipeline::steps::ForAllRepos;
use layerstack::plugin::{ArgsPlugin, Plugin};

use super::{prepare, RuntimeArgs};

/// Run a shell command in every repository
#[derive(Args, Debug)]
pub struct ForAllReposArgs {
    /// Specification documents separated by ':'.
    #[arg(value_name = "CONFIG")]
    pub config: String,

    /// Command to run with `sh -c`.
    ///
    /// LAYERSTACK_REPO_NAME, LAYERSTACK_REPO_URL, LAYERSTACK_REPO_REFSPEC,
    /// LAYERSTACK_REPO_COMMIT and LAYERSTACK_REPO_PATH describe the current
    /// repository.
    #[arg(value_name = "COMMAND")]
    pub command: String,

    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

pub fn execute(args: ForAllReposArgs) -> Result<()> {
    let mut ctx = prepare(&args.config, &args.runtime, EnvMode::Resolve)?;
    args.runtime
        .setup_macro()
        .with_step(ForAllRepos::new(args.command))
        .run(&mut ctx, &args.runtime.skip_set())?;
    Ok(())
}

pub fn plugin() -> Box<dyn Plugin> {
    Box::new(ArgsPlugin::new(
        "for-all-repos",
        "Run a shell command in every repository",
        execute,
    ))
}
