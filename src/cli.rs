//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{crate_version, Arg, ArgMatches, Command};

use crate::commands;

fn root_command() -> Command {
    Command::new("layerstack")
        .version(crate_version!())
        .about("Assemble reproducible multi-repository source trees for embedded Linux builds")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("color")
                .long("color")
                .global(true)
                .value_name("WHEN")
                .value_parser(["always", "never", "auto"])
                .default_value("auto")
                .help("Colorize output (always, never, auto)"),
        )
        .arg(
            Arg::new("log_level")
                .long("log-level")
                .global(true)
                .value_name("LEVEL")
                .default_value("info")
                .help("Set log level (error, warn, info, debug, trace)"),
        )
}

fn init_logging(matches: &ArgMatches) {
    let level = matches
        .get_one::<String>("log_level")
        .map(String::as_str)
        .unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn init_color(matches: &ArgMatches) {
    match matches.get_one::<String>("color").map(String::as_str) {
        Some("always") => console::set_colors_enabled(true),
        Some("never") => console::set_colors_enabled(false),
        _ => {}
    }
}

/// Parse the command line and run the selected command.
pub fn run() -> Result<()> {
    let registry = commands::registry()?;
    let matches = registry.command(root_command()).get_matches();

    init_logging(&matches);
    init_color(&matches);

    registry.dispatch(&matches)
}
