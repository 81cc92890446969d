//! # Checkout Command Implementation
//!
//! Resolves the configuration, checks out and patches every repository and
//! writes the build configuration files, without building.

use anyhow::Result;
use clap::Args;

use layerstack::env::EnvMode;
use layerstack::pipeline::steps::WriteBuildConfig;
use layerstack::plugin::{ArgsPlugin, Plugin};

use super::{prepare, ConfigArgs, RuntimeArgs};

/// Check out all repositories and write the build configuration
#[derive(Args, Debug)]
pub struct CheckoutArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

pub fn execute(args: CheckoutArgs) -> Result<()> {
    let mut ctx = prepare(&args.config.config, &args.runtime, EnvMode::Resolve)?;
    args.runtime
        .setup_macro()
        .with_step(WriteBuildConfig)
        .run(&mut ctx, &args.runtime.skip_set())?;
    Ok(())
}

pub fn plugin() -> Box<dyn Plugin> {
    Box::new(ArgsPlugin::new(
        "checkout",
        "Check out all repositories and write the build configuration",
        execute,
    ))
}
