//! # Lock Command Implementation
//!
//! Pins every floating repository to the commit its refspec currently
//! resolves to and writes the lock file next to the root document. An
//! existing lock file is kept as is unless `--update` is given.

use anyhow::Result;
use clap::Args;
use log::info;

use layerstack::env::EnvMode;
use layerstack::pipeline::steps::WriteLock;
use layerstack::pipeline::Macro;
use layerstack::plugin::{ArgsPlugin, Plugin};

use super::{prepare, ConfigArgs, RuntimeArgs};

/// Create or update the lock file
#[derive(Args, Debug)]
pub struct LockArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

pub fn execute(args: LockArgs) -> Result<()> {
    let mut ctx = prepare(&args.config.config, &args.runtime, EnvMode::Resolve)?;
    Macro::new()
        .with_step(WriteLock)
        .run(&mut ctx, &args.runtime.skip_set())?;
    info!("Lock file: {}", ctx.config.lock_path().display());
    Ok(())
}

pub fn plugin() -> Box<dyn Plugin> {
    Box::new(ArgsPlugin::new("lock", "Create or update the lock file", execute))
}
