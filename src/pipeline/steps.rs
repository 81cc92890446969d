//! Built-in pipeline steps.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command as Process;

use log::{error, info};
use serde_yaml::Value;

use super::{first_failure, for_each_repo, Command};
use crate::context::RunContext;
use crate::defaults::{self, PASSTHROUGH_ENV};
use crate::error::{Error, Result};
use crate::lock;
use crate::repository::Repo;

/// Create the work and build directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupDir;

impl Command for SetupDir {
    fn name(&self) -> &str {
        "setup_dir"
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        fs::create_dir_all(ctx.work_dir())?;
        fs::create_dir_all(ctx.build_dir())?;
        Ok(())
    }
}

/// Build the environment for build and repository commands.
///
/// Selected variables are passed through from the invoking process, then the
/// resolved `env` section is added. Entries set by earlier steps are kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupEnviron;

impl Command for SetupEnviron {
    fn name(&self) -> &str {
        "setup_environ"
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        let mut environ: BTreeMap<String, String> = PASSTHROUGH_ENV
            .iter()
            .filter_map(|name| {
                ctx.process_env
                    .get(name)
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        environ
            .entry("HOME".to_string())
            .or_insert_with(|| defaults::home_dir().display().to_string());

        for (name, value) in &ctx.config.spec.env {
            if let Some(value) = value {
                environ.insert(name.clone(), value.clone());
            }
        }
        environ.insert(
            "BUILDDIR".to_string(),
            ctx.build_dir().display().to_string(),
        );

        for (name, value) in environ {
            ctx.environ.entry(name).or_insert(value);
        }
        Ok(())
    }
}

/// Check out every repository, in parallel.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReposCheckout;

impl Command for ReposCheckout {
    fn name(&self) -> &str {
        "repos_checkout"
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        let git = ctx.git.clone();
        let ref_dir = ctx.settings.repo_ref_dir.clone();
        let force = ctx.settings.force_checkout;

        let results = for_each_repo(ctx, |repo| {
            repo.checkout(git.as_ref(), ref_dir.as_deref(), force)
        })?;
        first_failure(self.name(), results).map(|_| ())
    }
}

/// Apply every repository's patches on top of its checkout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReposApplyPatches;

impl Command for ReposApplyPatches {
    fn name(&self) -> &str {
        "repos_apply_patches"
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        let mut plans: BTreeMap<String, Vec<(String, PathBuf)>> = BTreeMap::new();
        for repo in &ctx.repos {
            let files = repo
                .patch_files(&ctx.repos)
                .map_err(|e| e.in_step(self.name(), Some(&repo.name)))?;
            plans.insert(repo.name.clone(), files);
        }

        let git = ctx.git.clone();
        let results = for_each_repo(ctx, |repo| {
            let files = plans.get(&repo.name).map(Vec::as_slice).unwrap_or_default();
            repo.apply_patches(git.as_ref(), files)
        })?;
        first_failure(self.name(), results).map(|_| ())
    }
}

/// Write `conf/bblayers.conf` and `conf/local.conf` into the build directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteBuildConfig;

/// String entries of an opaque header section, in key order.
fn header_entries(section: Option<&Value>) -> Vec<String> {
    let Some(Value::Mapping(map)) = section else {
        return Vec::new();
    };
    let mut entries: Vec<(String, String)> = map
        .iter()
        .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.as_str()?.to_string())))
        .collect();
    entries.sort();
    entries.into_iter().map(|(_, v)| v).collect()
}

fn layer_paths(repos: &[Repo]) -> Vec<String> {
    let mut layers: Vec<String> = repos
        .iter()
        .flat_map(|repo| {
            repo.layers.iter().map(move |layer| {
                if layer == "." {
                    repo.path.display().to_string()
                } else {
                    repo.path.join(layer).display().to_string()
                }
            })
        })
        .collect();
    layers.sort();
    layers.dedup();
    layers
}

impl WriteBuildConfig {
    pub fn bblayers_conf(ctx: &RunContext) -> String {
        let mut out = String::new();
        for entry in header_entries(ctx.config.spec.sections.get("bblayers_conf_header")) {
            out.push_str(&entry);
            if !entry.ends_with('\n') {
                out.push('\n');
            }
        }
        out.push_str("BBLAYERS ?= \" \\\n    ");
        out.push_str(&layer_paths(&ctx.repos).join(" \\\n    "));
        out.push_str("\"\n");
        out.push_str("BBPATH ?= \"${TOPDIR}\"\n");
        out.push_str("BBFILES ??= \"\"\n");
        out
    }

    pub fn local_conf(ctx: &RunContext) -> String {
        let spec = &ctx.config.spec;
        let mut out = String::new();
        for entry in header_entries(spec.sections.get("local_conf_header")) {
            out.push_str(&entry);
            if !entry.ends_with('\n') {
                out.push('\n');
            }
        }
        if let Some(machine) = &spec.machine {
            out.push_str(&format!("MACHINE ??= \"{}\"\n", machine));
        }
        if let Some(distro) = &spec.distro {
            out.push_str(&format!("DISTRO ??= \"{}\"\n", distro));
        }
        out
    }
}

impl Command for WriteBuildConfig {
    fn name(&self) -> &str {
        "write_build_config"
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        let conf = conf_dir(ctx.build_dir());
        fs::create_dir_all(&conf)?;
        fs::write(conf.join("bblayers.conf"), Self::bblayers_conf(ctx))?;
        fs::write(conf.join("local.conf"), Self::local_conf(ctx))?;
        info!("Wrote build configuration to {}", conf.display());
        Ok(())
    }
}

/// Write the lock document beside the root document.
///
/// An applied lock is authoritative and left untouched unless the invocation
/// asked for an update.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteLock;

impl Command for WriteLock {
    fn name(&self) -> &str {
        "write_lock"
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        if ctx.config.locked && !ctx.settings.update {
            info!(
                "Lock file {} applied, not regenerating",
                ctx.config.lock_path().display()
            );
            return Ok(());
        }

        let git = ctx.git.clone();
        let results = for_each_repo(ctx, |repo| {
            if repo.is_local() || !repo.is_floating() {
                return Ok(());
            }
            repo.resolve(git.as_ref()).map(|_| ())
        })?;
        first_failure(self.name(), results)?;

        let lock = lock::generate(&ctx.config, &ctx.repos)?;
        lock::write(&ctx.config.lock_path(), &lock)?;
        Ok(())
    }
}

/// Invoke BitBake in the build directory.
#[derive(Debug, Clone)]
pub struct RunBuild {
    pub program: String,
}

impl Default for RunBuild {
    fn default() -> Self {
        RunBuild {
            program: "bitbake".to_string(),
        }
    }
}

impl RunBuild {
    /// Arguments passed to the build tool: `-c <task> <targets...>`.
    pub fn arguments(ctx: &RunContext) -> Vec<String> {
        let spec = &ctx.config.spec;
        let task = spec.task.as_deref().unwrap_or(defaults::DEFAULT_TASK);
        let mut args = vec!["-c".to_string(), task.to_string()];
        match &spec.target {
            Some(targets) if !targets.is_empty() => args.extend(targets.iter().cloned()),
            _ => args.push(defaults::DEFAULT_TARGET.to_string()),
        }
        args
    }
}

impl Command for RunBuild {
    fn name(&self) -> &str {
        "run_build"
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        let args = Self::arguments(ctx);
        info!("{} {}", self.program, args.join(" "));

        let status = Process::new(&self.program)
            .args(&args)
            .current_dir(ctx.build_dir())
            .env_clear()
            .envs(&ctx.environ)
            .status()
            .map_err(|e| Error::ExternalTool {
                tool: self.program.clone(),
                message: e.to_string(),
            })?;
        if !status.success() {
            return Err(Error::ExternalTool {
                tool: self.program.clone(),
                message: format!("exited with {}", status),
            });
        }
        Ok(())
    }
}

/// Outcome of running one command in every repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoCommandReport {
    pub successes: Vec<String>,
    /// Repository name and error message.
    pub failures: Vec<(String, String)>,
}

impl RepoCommandReport {
    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn into_result(self) -> Result<()> {
        if self.failures.is_empty() {
            return Ok(());
        }
        Err(Error::RepoCommands {
            total: self.total(),
            failures: self.failures,
        })
    }
}

/// Run a shell command in every repository.
///
/// Unlike the other per-repository steps this one is tolerant: a failure in
/// one repository does not stop the command from running in the others. All
/// failures are reported together when the step ends.
#[derive(Debug, Clone)]
pub struct ForAllRepos {
    pub command: String,
}

fn run_in_repo(repo: &Repo, command: &str, environ: &BTreeMap<String, String>) -> Result<()> {
    let status = Process::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(&repo.path)
        .env_clear()
        .envs(environ)
        .env("LAYERSTACK_REPO_NAME", &repo.name)
        .env("LAYERSTACK_REPO_URL", repo.url.as_deref().unwrap_or_default())
        .env(
            "LAYERSTACK_REPO_REFSPEC",
            repo.refspec.as_deref().unwrap_or_default(),
        )
        .env(
            "LAYERSTACK_REPO_COMMIT",
            repo.commit.as_deref().unwrap_or_default(),
        )
        .env("LAYERSTACK_REPO_PATH", &repo.path)
        .status()?;
    if !status.success() {
        return Err(Error::ExternalTool {
            tool: "sh".to_string(),
            message: format!("'{}' exited with {}", command, status),
        });
    }
    Ok(())
}

impl ForAllRepos {
    pub fn new(command: impl Into<String>) -> Self {
        ForAllRepos {
            command: command.into(),
        }
    }

    /// Run the command everywhere and collect the outcome per repository.
    pub fn run(&self, ctx: &mut RunContext) -> Result<RepoCommandReport> {
        let environ = ctx.environ.clone();
        let command = self.command.as_str();
        let results = for_each_repo(ctx, |repo| run_in_repo(repo, command, &environ))?;

        let mut report = RepoCommandReport::default();
        for (name, result) in results {
            match result {
                Ok(()) => report.successes.push(name),
                Err(e) => {
                    error!("[{}] {}", name, e);
                    report.failures.push((name, e.to_string()));
                }
            }
        }
        Ok(report)
    }
}

impl Command for ForAllRepos {
    fn name(&self) -> &str {
        "for_all_repos"
    }

    fn execute(&self, ctx: &mut RunContext) -> Result<()> {
        self.run(ctx)?.into_result()
    }
}

/// Conf directory of a build directory.
pub fn conf_dir(build_dir: &Path) -> PathBuf {
    build_dir.join("conf")
}
