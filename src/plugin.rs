//! # Plugin Registry
//!
//! Every subcommand of the command-line tool is a [`Plugin`]: it describes its
//! arguments on a `clap::Command` and runs from the parsed matches. The binary
//! only knows the [`PluginRegistry`]; it builds the argument parser from the
//! registered plugins and dispatches to the one the user selected.
//!
//! [`ArgsPlugin`] adapts a `#[derive(clap::Args)]` struct and an `execute`
//! function into a plugin, so most commands never implement the trait by hand.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use clap::{ArgMatches, Args, FromArgMatches};

use crate::error::{Error, Result};

/// A subcommand of the command-line tool.
pub trait Plugin: Send + Sync {
    /// Subcommand name.
    fn name(&self) -> &str;
    /// One-line help shown in the command list.
    fn help(&self) -> &str;
    /// Add this plugin's arguments to `cmd`.
    fn setup_parser(&self, cmd: clap::Command) -> clap::Command;
    fn run(&self, matches: &ArgMatches) -> anyhow::Result<()>;
}

/// A plugin backed by a clap `Args` struct.
pub struct ArgsPlugin<A> {
    name: &'static str,
    help: &'static str,
    execute: fn(A) -> anyhow::Result<()>,
    _args: PhantomData<fn() -> A>,
}

impl<A> ArgsPlugin<A> {
    pub fn new(name: &'static str, help: &'static str, execute: fn(A) -> anyhow::Result<()>) -> Self {
        ArgsPlugin {
            name,
            help,
            execute,
            _args: PhantomData,
        }
    }
}

impl<A: Args + FromArgMatches> Plugin for ArgsPlugin<A> {
    fn name(&self) -> &str {
        self.name
    }

    fn help(&self) -> &str {
        self.help
    }

    fn setup_parser(&self, cmd: clap::Command) -> clap::Command {
        A::augment_args(cmd)
    }

    fn run(&self, matches: &ArgMatches) -> anyhow::Result<()> {
        let args = A::from_arg_matches(matches)?;
        (self.execute)(args)
    }
}

/// Plugins keyed by subcommand name.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Box<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Box<dyn Plugin>) -> Result<()> {
        let name = plugin.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(Error::DuplicatePlugin { name });
        }
        self.plugins.insert(name, plugin);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Plugin> {
        self.plugins.get(name).map(|p| p.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }

    /// Add one subcommand per registered plugin to `root`.
    pub fn command(&self, root: clap::Command) -> clap::Command {
        self.plugins.values().fold(root, |root, plugin| {
            let sub = clap::Command::new(plugin.name().to_string()).about(plugin.help().to_string());
            root.subcommand(plugin.setup_parser(sub))
        })
    }

    /// Run the plugin selected in `matches`.
    pub fn dispatch(&self, matches: &ArgMatches) -> anyhow::Result<()> {
        let Some((name, sub)) = matches.subcommand() else {
            anyhow::bail!("no command given; available: {}", self.names().join(", "));
        };
        let plugin = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("unknown command '{}'", name))?;
        plugin.run(sub)
    }
}
