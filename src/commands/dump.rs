//! # Dump Command Implementation
//!
//! Prints the merged configuration with all includes flattened away, or the
//! lock document that would pin it.
//!
//! - `--resolve-refs` replaces every floating refspec with the commit it
//!   currently resolves to.
//! - `--resolve-env` resolves the `env` section against the process
//!   environment. Without it, defaults and placeholders are printed as
//!   declared.
//! - `--lock` prints the lock document instead of the configuration.
//!
//! This command never checks repositories out except to read documents
//! included from them.

use anyhow::Result;
use clap::{Args, ValueEnum};

use layerstack::config::{Document, RepoDecl};
use layerstack::context::RunContext;
use layerstack::env::EnvMode;
use layerstack::lock;
use layerstack::pipeline::{first_failure, for_each_repo};
use layerstack::plugin::{ArgsPlugin, Plugin};

use super::{prepare, ConfigArgs, RuntimeArgs};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpFormat {
    #[default]
    Yaml,
    Json,
}

/// Print the merged configuration
#[derive(Args, Debug)]
pub struct DumpArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(flatten)]
    pub runtime: RuntimeArgs,

    /// Output format.
    #[arg(long, value_enum, default_value_t = DumpFormat::Yaml)]
    pub format: DumpFormat,

    /// Replace floating refspecs with the commits they resolve to.
    #[arg(long)]
    pub resolve_refs: bool,

    /// Resolve the env section from the process environment.
    #[arg(long)]
    pub resolve_env: bool,

    /// Print the lock document instead of the configuration.
    #[arg(long)]
    pub lock: bool,
}

fn resolve_refs(ctx: &mut RunContext) -> Result<()> {
    let git = ctx.git.clone();
    let results = for_each_repo(ctx, |repo| {
        if repo.is_local() || !repo.is_floating() {
            return Ok(());
        }
        repo.resolve(git.as_ref()).map(|_| ())
    })?;
    first_failure("resolve_refs", results)?;
    Ok(())
}

/// Copy of the merged document with every resolved commit written into its
/// repository's refspec.
fn with_resolved_refs(ctx: &RunContext) -> Document {
    let mut spec = ctx.config.spec.clone();
    for repo in ctx.repos.iter().filter(|r| !r.is_local()) {
        if let Some(commit) = &repo.commit {
            let decl = spec
                .repos
                .entry(repo.name.clone())
                .or_insert_with(|| Some(RepoDecl::default()))
                .get_or_insert_with(RepoDecl::default);
            decl.refspec = Some(commit.clone());
        }
    }
    spec
}

fn render<T: serde::Serialize>(value: &T, format: DumpFormat) -> Result<String> {
    Ok(match format {
        DumpFormat::Yaml => serde_yaml::to_string(value)?,
        DumpFormat::Json => serde_json::to_string_pretty(value)? + "\n",
    })
}

pub fn execute(args: DumpArgs) -> Result<()> {
    let env = if args.resolve_env {
        EnvMode::Resolve
    } else {
        EnvMode::Passthrough
    };
    let mut ctx = prepare(&args.config.config, &args.runtime, env)?;

    if args.resolve_refs || args.lock {
        resolve_refs(&mut ctx)?;
    }

    let output = if args.lock {
        render(&lock::generate(&ctx.config, &ctx.repos)?, args.format)?
    } else if args.resolve_refs {
        render(&with_resolved_refs(&ctx), args.format)?
    } else {
        render(&ctx.config.spec, args.format)?
    };
    print!("{}", output);
    Ok(())
}

pub fn plugin() -> Box<dyn Plugin> {
    Box::new(ArgsPlugin::new(
        "dump",
        "Print the merged configuration",
        execute,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerstack::config::parse;
    use layerstack::context::Settings;
    use layerstack::env::Environment;
    use layerstack::resolver::MergedConfig;
    use std::path::{Path, PathBuf};

    const C1: &str = "1111111111111111111111111111111111111111";

    #[test]
    fn test_with_resolved_refs_rewrites_remote_repos_only() {
        let spec = parse(
            "header: {version: 1}\nrepos:\n  remote: {url: a, refspec: main}\n  here:\n",
            Path::new("kas.yml"),
        )
        .unwrap();
        let mut ctx = RunContext::new(
            Settings::new(PathBuf::from("/work")),
            MergedConfig::new(spec, PathBuf::from("/cfg/kas.yml")),
            Environment::default(),
        );
        for repo in &mut ctx.repos {
            repo.commit = Some(C1.to_string());
        }

        let spec = with_resolved_refs(&ctx);
        assert_eq!(
            spec.repos["remote"].as_ref().unwrap().refspec.as_deref(),
            Some(C1)
        );
        assert!(spec.repos["here"].is_none());
    }

    #[test]
    fn test_render_json() {
        let spec = parse("header: {version: 1}\nmachine: m\n", Path::new("kas.yml")).unwrap();
        let json = render(&spec, DumpFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["machine"], "m");
        assert_eq!(value["header"]["version"], 1);
    }
}
