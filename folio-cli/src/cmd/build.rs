use anyhow::Result;
use clap::{Arg, ArgMatches, Command, builder::PossibleValuesParser};
use std::path::Path;
use tracing::info;
use folio_core::build_site;
use crate::config::FolioConfig;

/// Args shared by every command that runs the build pipeline.
/// Defaults live in `BuildConfig` so config files and env vars can apply.
pub fn add_build_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("data")
                .short('d')
                .long("data")
                .value_name("DIR")
                .help("Directory containing header.json, about.json, ... [default: ./json_data]"),
        )
        .arg(
            Arg::new("templates")
                .short('t')
                .long("templates")
                .value_name("DIR")
                .help("Template directory [default: ./templates]"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory for the rendered site [default: ./build]"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file [default: ./folio.toml]"),
        )
        .arg(
            Arg::new("on-malformed")
                .long("on-malformed")
                .value_name("POLICY")
                .value_parser(PossibleValuesParser::new(["fail", "use-default"]))
                .help("What to do when a data file is not valid JSON [default: fail]"),
        )
}

pub fn make_subcommand() -> Command {
    add_build_args(Command::new("build"))
        .about("Render the site once from data files and templates")
}

pub fn execute(args: &ArgMatches) -> Result<()> {
    let config = FolioConfig::load(args)?;
    let build_config = config.build_config();

    let output_dir = Path::new(&build_config.output);

    let written = build_site(
        &config.site,
        Path::new(&build_config.data),
        Path::new(&build_config.templates),
        output_dir,
    )?;

    info!("Site built successfully in {} ({} files)", output_dir.display(), written.len());

    Ok(())
}
