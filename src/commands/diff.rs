//! # Diff Command Implementation
//!
//! Compares two configurations. Each is resolved and checked out on its own,
//! then the merged documents are compared key by key and, for every
//! repository whose pinning changed, the commits between the two revisions
//! are listed.
//!
//! Output is a unified-diff-like text report or, with `--json`, the raw
//! report.

use anyhow::Result;
use clap::{ArgMatches, Args, FromArgMatches};
use serde_yaml::Value;

use layerstack::diff::{diff_configs, DiffReport};
use layerstack::env::EnvMode;
use layerstack::output::OutputConfig;
use layerstack::plugin::Plugin;

use super::{prepare, RuntimeArgs};

/// Compare two configurations
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// The first configuration.
    #[arg(value_name = "CONFIG1")]
    pub config1: String,

    /// The second configuration.
    #[arg(value_name = "CONFIG2")]
    pub config2: String,

    #[command(flatten)]
    pub runtime: RuntimeArgs,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,

    /// One line per commit.
    #[arg(long)]
    pub oneline: bool,

    /// Disable colored output.
    #[arg(long)]
    pub no_color: bool,

    /// Only list commits of repositories whose revision changed.
    #[arg(long, conflicts_with = "content_only")]
    pub commit_only: bool,

    /// Only list configuration differences.
    #[arg(long)]
    pub content_only: bool,
}

/// What the text report includes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextOptions {
    pub oneline: bool,
    pub commit_only: bool,
    pub content_only: bool,
}

fn value_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn write_value(
    out: &mut String,
    style: &dyn Fn(&str) -> String,
    prefix: char,
    key: &str,
    value: Option<&Value>,
) {
    let text = value_text(value);
    if text.contains('\n') {
        out.push_str(&format!("{}\n", style(&format!("{}    {}:", prefix, key))));
        for line in text.lines() {
            out.push_str(&format!("{}\n", style(&format!("{}        {}", prefix, line))));
        }
    } else {
        out.push_str(&format!("{}\n", style(&format!("{}    {}: {}", prefix, key, text))));
    }
}

/// Render `report` as text.
pub fn render_text(
    old: &str,
    new: &str,
    report: &DiffReport,
    options: TextOptions,
    output: OutputConfig,
) -> String {
    let mut sections = Vec::new();

    if !options.commit_only && !report.values_changed.is_empty() {
        let mut section = format!("{}\n", output.header("@@ config changed @@"));
        for (key, change) in &report.values_changed {
            write_value(&mut section, &|s: &str| output.old(s), '-', key, change.old_value.as_ref());
            write_value(&mut section, &|s: &str| output.new_value(s), '+', key, change.new_value.as_ref());
        }
        sections.push(section);
    }

    if !options.content_only {
        for (repo, commits) in &report.commits {
            let mut section = format!("{}\n", output.header(format!("@@ {} commits diff @@", repo)));
            for commit in commits {
                if options.oneline {
                    let short = commit.commit.get(..7).unwrap_or(&commit.commit);
                    let subject = commit.message.lines().next().unwrap_or_default();
                    section.push_str(&format!("{}\n", output.commit(format!("{} {}", short, subject))));
                } else {
                    section.push_str(&format!(
                        "{} {} {}\n",
                        output.commit(format!("{}:", commit.commit)),
                        commit.author,
                        commit.date
                    ));
                    for line in commit.message.lines() {
                        if line.is_empty() {
                            section.push('\n');
                        } else {
                            section.push_str(&format!("    {}\n", line));
                        }
                    }
                }
            }
            sections.push(section);
        }
    }

    let mut out = format!("layerstack diff {} {}\n--- {}\n+++ {}\n", old, new, old, new);
    out.push_str(&sections.join("---\n"));
    out
}

/// Run the diff. `color_flag` is the value of the global `--color` flag.
pub fn execute(args: DiffArgs, color_flag: &str) -> Result<()> {
    let mut skip = args.runtime.skip_set();
    skip.insert("setup_environ".to_string());
    skip.insert("repos_apply_patches".to_string());

    let mut old = prepare(&args.config1, &args.runtime, EnvMode::Resolve)?;
    args.runtime.setup_macro().run(&mut old, &skip)?;

    skip.insert("setup_dir".to_string());
    let mut new = prepare(&args.config2, &args.runtime, EnvMode::Resolve)?;
    args.runtime.setup_macro().run(&mut new, &skip)?;

    let report = diff_configs(&old.config, &old.repos, &new.config, &new.repos, new.git.as_ref())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let output = if args.no_color {
        OutputConfig::without_color()
    } else {
        OutputConfig::from_env_and_flag(color_flag)
    };
    let options = TextOptions {
        oneline: args.oneline,
        commit_only: args.commit_only,
        content_only: args.content_only,
    };
    print!(
        "{}",
        render_text(&args.config1, &args.config2, &report, options, output)
    );
    Ok(())
}

/// The diff command reads the global `--color` flag besides its own arguments,
/// so it implements [`Plugin`] directly.
struct DiffPlugin;

impl Plugin for DiffPlugin {
    fn name(&self) -> &str {
        "diff"
    }

    fn help(&self) -> &str {
        "Compare two configurations"
    }

    fn setup_parser(&self, cmd: clap::Command) -> clap::Command {
        DiffArgs::augment_args(cmd)
    }

    fn run(&self, matches: &ArgMatches) -> Result<()> {
        let args = DiffArgs::from_arg_matches(matches)?;
        let color = matches
            .try_get_one::<String>("color")
            .ok()
            .flatten()
            .map(String::as_str)
            .unwrap_or("auto");
        execute(args, color)
    }
}

pub fn plugin() -> Box<dyn Plugin> {
    Box::new(DiffPlugin)
}
