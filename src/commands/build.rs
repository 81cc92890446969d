//! # Build Command Implementation
//!
//! Runs the full pipeline: setup, build configuration and the build itself.

use anyhow::Result;
use clap::Args;

use layerstack::env::EnvMode;
use layerstack::pipeline::steps::{RunBuild, WriteBuildConfig};
use layerstack::plugin::{ArgsPlugin, Plugin};

use super::{prepare, ConfigArgs, RuntimeArgs};

/// Check out all repositories and build
#[derive(Args, Debug)]
pub struct BuildArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub runtime: RuntimeArgs,

    /// Task to run, overriding the configuration's `task`.
    #[arg(short = 'c', long, value_name = "TASK")]
    pub task: Option<String>,

    /// Target to build, overriding the configuration's `target`. Can be given
    /// multiple times.
    #[arg(long, value_name = "TARGET")]
    pub target: Vec<String>,
}

pub fn execute(args: BuildArgs) -> Result<()> {
    let mut ctx = prepare(&args.config.config, &args.runtime, EnvMode::Resolve)?;
    if let Some(task) = args.task {
        ctx.config.spec.task = Some(task);
    }
    if !args.target.is_empty() {
        ctx.config.spec.target = Some(args.target);
    }

    args.runtime
        .setup_macro()
        .with_step(WriteBuildConfig)
        .with_step(RunBuild::default())
        .run(&mut ctx, &args.runtime.skip_set())?;
    Ok(())
}

pub fn plugin() -> Box<dyn Plugin> {
    Box::new(ArgsPlugin::new(
        "build",
        "Check out all repositories and build",
        execute,
    ))
}
