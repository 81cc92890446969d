//! # layerstack CLI
//!
//! This is the binary entry point for the `layerstack` command-line tool.
//!
//! Its primary responsibilities are:
//! - Building the argument parser from the registered command plugins.
//! - Initialising logging and color output from the global flags.
//! - Dispatching to the selected command and reporting its error, if any.
//!
//! The engine lives in the `layerstack` library crate; the binary is a thin
//! wrapper around it.

mod cli;
mod commands;

use anyhow::Result;

fn main() -> Result<()> {
    cli::run()
}
