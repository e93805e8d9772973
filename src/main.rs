use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

mod cli;

use cli::Cli;
use cli::commands::{Commands, SessionCommands};
use cli::view::{self, ViewContext};
use clutch::config::Config;
use clutch::daemon::{DaemonAddress, DaemonController};
use clutch::domain::{AddTorrent, Selection, TorrentId};
use clutch::ipc::MessageController;

fn setup_logging(config: &Config) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clutch")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("clutch.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the config file
    let default_level = config.log_level.as_deref().unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn ids_of(ids: &[i64]) -> Vec<TorrentId> {
    ids.iter().copied().map(TorrentId::from).collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{} {}", "Daemon:".yellow(), config.daemon.address);
    }

    let daemon = DaemonController::new(config.daemon.address.clone(), config.controller_options())
        .with_retry(config.retry_policy())
        .with_connect_timeout(config.connect_timeout());

    let controller = daemon
        .connect()
        .await
        .context(format!("Failed to connect to {}", config.daemon.address))?;

    if cli.is_verbose() {
        match (controller.daemon_label(), controller.negotiated_version()) {
            (Some(label), Some(version)) => println!("{} {} (protocol {})", "Connected:".yellow(), label, version),
            _ => println!("{} no version handshake", "Connected:".yellow()),
        }
    }

    let result = match &cli.command {
        // Default: list everything
        None => handle_list_command(&controller, ViewContext::default(), false).await,
        Some(command @ Commands::List { json, .. }) => handle_list_command(&controller, command.view(), *json).await,
        Some(Commands::Ping) => handle_ping_command(&controller).await,
        Some(Commands::Info { ids, json }) => handle_info_command(&controller, ids, *json).await,
        Some(Commands::Start { ids }) => handle_start_command(&controller, ids).await,
        Some(Commands::Stop { ids }) => handle_stop_command(&controller, ids).await,
        Some(Commands::Remove { ids, all }) => handle_remove_command(&controller, ids, *all).await,
        Some(Commands::Add {
            path,
            dir,
            paused,
            by_path,
        }) => handle_add_command(&controller, path, dir.as_deref(), *paused, *by_path).await,
        Some(Commands::Session { command }) => handle_session_command(&controller, command).await,
    };

    daemon.disconnect().await;
    result
}

async fn handle_ping_command(controller: &MessageController) -> Result<()> {
    let elapsed = controller.ping().await.context("Ping failed")?;
    println!("{} {}ms", "Pong:".green(), elapsed.as_millis());
    Ok(())
}

async fn handle_list_command(controller: &MessageController, ctx: ViewContext, json: bool) -> Result<()> {
    info!("Listing torrents: {:?}", ctx);
    let torrents = controller
        .get_torrents(&Selection::All)
        .await
        .context("Failed to list torrents")?;
    let shown = ctx.apply(torrents);

    if json {
        return print_json(&shown);
    }
    if shown.is_empty() {
        println!("{}", "No torrents".dimmed());
        return Ok(());
    }
    println!("{}", view::render_table(&shown));
    Ok(())
}

async fn handle_info_command(controller: &MessageController, ids: &[i64], json: bool) -> Result<()> {
    info!("Getting info for torrents: {:?}", ids);
    let torrents = controller
        .get_torrents(&Selection::Ids(ids_of(ids)))
        .await
        .context("Failed to get torrent info")?;

    if json {
        return print_json(&torrents);
    }
    for (n, torrent) in torrents.iter().enumerate() {
        if n > 0 {
            println!();
        }
        println!("{}", view::render_details(torrent));
    }
    Ok(())
}

async fn handle_start_command(controller: &MessageController, ids: &[i64]) -> Result<()> {
    info!("Starting torrents: {:?}", ids);
    let selection = Selection::Ids(ids_of(ids));
    controller
        .start_torrents(&selection)
        .await
        .context("Failed to start torrents")?;
    println!("{} {}", "Started:".green(), describe(&selection));
    Ok(())
}

async fn handle_stop_command(controller: &MessageController, ids: &[i64]) -> Result<()> {
    info!("Stopping torrents: {:?}", ids);
    let selection = Selection::Ids(ids_of(ids));
    controller
        .stop_torrents(&selection)
        .await
        .context("Failed to stop torrents")?;
    println!("{} {}", "Stopped:".yellow(), describe(&selection));
    Ok(())
}

async fn handle_remove_command(controller: &MessageController, ids: &[i64], all: bool) -> Result<()> {
    if all {
        info!("Removing all torrents");
        let removed = controller
            .remove_all_torrents()
            .await
            .context("Failed to remove torrents")?;
        println!("{} {} torrent(s)", "Removed:".red(), removed.len());
        return Ok(());
    }

    info!("Removing torrents: {:?}", ids);
    let ids = ids_of(ids);
    controller
        .remove_torrents(&ids)
        .await
        .context("Failed to remove torrents")?;
    println!("{} {}", "Removed:".red(), describe(&Selection::Ids(ids)));
    Ok(())
}

async fn handle_add_command(
    controller: &MessageController,
    path: &Path,
    dir: Option<&str>,
    paused: bool,
    by_path: bool,
) -> Result<()> {
    info!("Adding torrent {} (by path: {})", path.display(), by_path);
    let mut request = if by_path {
        let absolute = fs::canonicalize(path).context(format!("Failed to resolve {}", path.display()))?;
        AddTorrent::path(absolute)
    } else {
        let bytes = fs::read(path).context(format!("Failed to read {}", path.display()))?;
        AddTorrent::metainfo(bytes)
    };
    if let Some(dir) = dir {
        request = request.with_download_dir(dir);
    }
    if paused {
        request = request.with_autostart(false);
    }

    let id = controller.add_torrent(&request).await.context("Failed to add torrent")?;
    println!("{} {} as #{}", "Added:".green(), path.display(), id);
    Ok(())
}

async fn handle_session_command(controller: &MessageController, command: &SessionCommands) -> Result<()> {
    match command {
        SessionCommands::Get { json } => {
            let settings = controller.session_get().await.context("Failed to read session")?;
            if *json {
                return print_json(&settings);
            }
            println!("{}", view::render_session(&settings));
        }
        SessionCommands::Set { .. } => {
            let settings = command.settings().unwrap_or_default();
            info!("Updating session: {:?}", settings);
            controller
                .session_set(&settings)
                .await
                .context("Failed to update session")?;
            println!("{}", "Session updated".green());
        }
    }
    Ok(())
}

fn describe(selection: &Selection) -> String {
    match selection {
        Selection::Ids(ids) if !ids.is_empty() => ids.iter().map(|id| format!("#{}", id)).collect::<Vec<_>>().join(", "),
        _ => "all torrents".to_string(),
    }
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(address) = &cli.address {
        let address = DaemonAddress::parse(address).context("Invalid --address")?;
        config = config.with_address(address);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.ipc.request_timeout_ms = timeout_ms;
    }
    config.validate()?;

    // Setup logging once the level is known
    setup_logging(&config).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    runtime
        .block_on(run_application(&cli, &config))
        .context("Application failed")?;

    Ok(())
}
