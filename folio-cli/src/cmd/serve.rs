use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, error, info};
use folio_core::build_site;
use folio_dev_server::{PreviewConfig, PreviewServer, inject_livereload_into_file};
use crate::cmd::build::add_build_args;
use crate::config::FolioConfig;

pub fn make_subcommand() -> Command {
    add_build_args(Command::new("serve"))
        .about("Serve the site with live reload, rebuilding on changes")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16))
                .help("Port to serve on [default: 3000]"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Host to bind to [default: 127.0.0.1]"),
        )
        .arg(
            Arg::new("open")
                .long("open")
                .help("Open browser automatically")
                .action(clap::ArgAction::SetTrue),
        )
}

pub async fn execute(args: &ArgMatches) -> Result<()> {
    let config = FolioConfig::load(args)?;
    let build_config = config.build_config();

    // A broken first build is fatal; later ones are only logged.
    rebuild(&config)?;

    let server = PreviewServer::new(PreviewConfig {
        host: build_config.host.clone(),
        port: build_config.port,
        root: PathBuf::from(&build_config.output),
        open: build_config.open,
        ignore: vec![".git".to_string(), ".tmp".to_string()],
    });
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Preview server error: {e:#}");
        }
    });

    let watcher_config = config.clone();
    let watcher_args = args.clone();
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watch_sources(watcher_config, watcher_args).await {
            error!("Source watcher error: {e:#}");
        }
    });

    let _ = tokio::try_join!(server_handle, watcher_handle)?;

    Ok(())
}

/// Run the whole pipeline from scratch and add the reload client to pages.
fn rebuild(config: &FolioConfig) -> Result<()> {
    let build_config = config.build_config();

    let written = build_site(
        &config.site,
        Path::new(&build_config.data),
        Path::new(&build_config.templates),
        Path::new(&build_config.output),
    )?;

    for path in &written {
        inject_livereload_into_file(path, &build_config.host, build_config.port)?;
    }

    Ok(())
}

/// Re-read configuration (the config file may be what changed), then rebuild.
fn rebuild_from_args(args: &ArgMatches) -> Result<()> {
    let config = FolioConfig::load(args).context("Failed to reload configuration")?;
    rebuild(&config)
}

// Watched paths come from the startup configuration; each rebuild reloads it.
async fn watch_sources(config: FolioConfig, args: ArgMatches) -> Result<()> {
    let build_config = config.build_config();
    let data_dir = PathBuf::from(&build_config.data);
    let templates_dir = PathBuf::from(&build_config.templates);
    let config_file = PathBuf::from(&build_config.config);

    let (tx, mut rx) = tokio::sync::mpsc::channel(100);

    let mut debouncer = new_debouncer(
        Duration::from_millis(500),
        move |res: DebounceEventResult| {
            if let Ok(events) = res {
                for event in events {
                    let _ = tx.blocking_send(event.path);
                }
            }
        },
    )?;

    // Data files are only read one level deep
    debouncer
        .watcher()
        .watch(&data_dir, RecursiveMode::NonRecursive)?;
    info!("Watching data directory: {}", data_dir.display());

    debouncer
        .watcher()
        .watch(&templates_dir, RecursiveMode::Recursive)?;
    info!("Watching template directory: {}", templates_dir.display());

    if config_file.exists() {
        debouncer
            .watcher()
            .watch(&config_file, RecursiveMode::NonRecursive)?;
        info!("Watching config file: {}", config_file.display());
    }

    let sources = [
        canonical(&data_dir),
        canonical(&templates_dir),
        canonical(&config_file),
    ];

    while let Some(path) = rx.recv().await {
        let path = canonical(&path);
        if !sources.iter().any(|source| path.starts_with(source)) {
            debug!("Skipping non-source change: {}", path.display());
            continue;
        }

        info!("Source changed: {}", path.display());
        match rebuild_from_args(&args) {
            Ok(()) => info!("Site rebuilt successfully"),
            Err(e) => error!("Build error: {e:#}"),
        }
    }

    Ok(())
}

// Deleted files can't be canonicalized, so resolve their parent instead.
fn canonical(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => canonical(parent).join(name),
        _ => path.to_path_buf(),
    }
}
