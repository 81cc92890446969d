//! # CLI Command Implementations
//!
//! Each subcommand lives in its own file with an `Args` struct derived using
//! `clap`, an `execute` function and a `plugin()` constructor that registers
//! it with the [`PluginRegistry`].
//!
//! The arguments shared by every command that resolves a configuration are
//! in [`ConfigArgs`] and [`RuntimeArgs`]; [`prepare`] turns them into a
//! [`RunContext`].

pub mod build;
pub mod checkout;
pub mod diff;
pub mod dump;
pub mod for_all_repos;
pub mod lock;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use layerstack::config::{Overrides, RepoOverride};
use layerstack::context::{RunContext, Settings};
use layerstack::defaults;
use layerstack::env::{EnvMode, Environment};
use layerstack::lock::LockPolicy;
use layerstack::pipeline::squid::SetupSquid;
use layerstack::pipeline::{Macro, SkipSet};
use layerstack::plugin::PluginRegistry;
use layerstack::repository::SystemGit;
use layerstack::resolver::{CheckoutLocator, ResolveOptions, Resolver};

/// Every built-in command.
pub fn registry() -> Result<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    for plugin in [
        build::plugin(),
        checkout::plugin(),
        diff::plugin(),
        dump::plugin(),
        for_all_repos::plugin(),
        lock::plugin(),
    ] {
        registry.register(plugin)?;
    }
    Ok(registry)
}

/// The specification to operate on.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Specification documents separated by ':'.
    ///
    /// The first is the root document; the others are merged on top of it
    /// as if the root included them.
    #[arg(value_name = "CONFIG", env = "LAYERSTACK_CONFIG", default_value = "kas.yml")]
    pub config: String,
}

fn parse_pin(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((repo, refspec)) if !repo.is_empty() && !refspec.is_empty() => {
            Ok((repo.to_string(), refspec.to_string()))
        }
        _ => Err(format!("expected REPO=REFSPEC, got '{}'", s)),
    }
}

/// Settings of one invocation.
#[derive(Args, Debug, Clone, Default)]
pub struct RuntimeArgs {
    /// Skip the named pipeline step. Can be given multiple times.
    #[arg(long, value_name = "STEP")]
    pub skip: Vec<String>,

    /// Regenerate the lock file instead of applying it.
    #[arg(long)]
    pub update: bool,

    /// Directory below which repositories are checked out.
    ///
    /// Defaults to the current directory.
    #[arg(long, value_name = "DIR", env = defaults::ENV_WORK_DIR)]
    pub work_dir: Option<PathBuf>,

    /// Build directory. Defaults to `<work-dir>/build`.
    #[arg(long, value_name = "DIR", env = defaults::ENV_BUILD_DIR)]
    pub build_dir: Option<PathBuf>,

    /// Reference cache of repository mirrors used to speed up clones.
    #[arg(long, value_name = "DIR", env = defaults::ENV_REPO_REF_DIR)]
    pub ref_dir: Option<PathBuf>,

    /// Maximum number of repositories processed in parallel.
    #[arg(short, long, value_name = "N", env = defaults::ENV_JOBS)]
    pub jobs: Option<usize>,

    /// Discard local modifications in repositories during checkout.
    #[arg(long)]
    pub force_checkout: bool,

    /// Pin a repository to a refspec, taking precedence over every document.
    #[arg(long = "pin", value_name = "REPO=REFSPEC", value_parser = parse_pin)]
    pub pins: Vec<(String, String)>,

    /// Run builds behind a local squid caching proxy.
    #[arg(long)]
    pub squid: bool,

    /// Rate limit for Debian snapshot downloads through squid, in kB/s.
    #[arg(long, value_name = "KB", default_value_t = 0)]
    pub squid_snapshot_rate: u64,
}

impl RuntimeArgs {
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::new(
            self.work_dir
                .clone()
                .unwrap_or_else(defaults::default_work_dir),
        );
        if let Some(build_dir) = &self.build_dir {
            settings.build_dir = build_dir.clone();
        }
        settings.repo_ref_dir = self.ref_dir.clone();
        if let Some(jobs) = self.jobs {
            settings.jobs = jobs.max(1);
        }
        settings.force_checkout = self.force_checkout;
        settings.update = self.update;
        settings
    }

    pub fn skip_set(&self) -> SkipSet {
        self.skip.iter().cloned().collect()
    }

    pub fn overrides(&self) -> Overrides {
        Overrides {
            repos: self
                .pins
                .iter()
                .map(|(repo, refspec)| {
                    (
                        repo.clone(),
                        RepoOverride {
                            refspec: Some(refspec.clone()),
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn lock_policy(&self) -> LockPolicy {
        if self.update {
            LockPolicy::Update
        } else {
            LockPolicy::Apply
        }
    }

    /// The standard setup sequence, with squid when requested.
    pub fn setup_macro(&self) -> Macro {
        let mut setup = Macro::setup();
        if self.squid {
            setup.insert_after(
                "setup_environ",
                Box::new(SetupSquid {
                    snapshot_rate_kb: self.squid_snapshot_rate,
                    ..Default::default()
                }),
            );
        }
        setup
    }
}

/// Resolve the configuration named by `config` and build the run context.
pub fn prepare(config: &str, runtime: &RuntimeArgs, env: EnvMode) -> Result<RunContext> {
    let mut documents = config
        .split(':')
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);
    let root = documents
        .next()
        .ok_or_else(|| anyhow::anyhow!("no configuration file given"))?;

    let settings = runtime.settings();
    let process_env = Environment::from_process();
    let git = SystemGit;
    let locator = CheckoutLocator {
        git: &git,
        ref_dir: settings.repo_ref_dir.as_deref(),
        force: settings.force_checkout,
    };
    let options = ResolveOptions {
        extra_documents: documents.collect(),
        overrides: runtime.overrides(),
        lock: runtime.lock_policy(),
        env,
    };

    let merged = Resolver::new(settings.work_dir.clone(), &process_env, &locator)
        .resolve(&root, &options)
        .with_context(|| format!("Failed to resolve {}", root.display()))?;
    Ok(RunContext::new(settings, merged, process_env))
}
