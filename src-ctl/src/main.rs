mod shortcut;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};
use zbus::Connection;

use text_extractor::config::SettingsStore;
use text_extractor::dbus::{TextExtractorProxy, BUS_NAME};

#[derive(Parser)]
#[command(name = "text-extractor-ctl", version, about = "Control the text-extractor daemon")]
struct Cli {
    /// Config file to use instead of the XDG default.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Select a region and copy its text to the clipboard.
    Extract,
    /// Cancel the capture in progress.
    Cancel,
    /// Show daemon state.
    Status,
    /// Print the effective configuration.
    Config {
        /// Write a default config file if none exists.
        #[arg(long)]
        init: bool,
    },
    /// Register a GNOME keyboard shortcut that runs `extract`.
    InstallShortcut {
        /// Accelerator, e.g. "<Super><Shift>t". Defaults to the configured one.
        #[arg(long)]
        binding: Option<String>,
    },
}

fn settings_store(config: Option<PathBuf>) -> Result<SettingsStore> {
    match config {
        Some(path) => Ok(SettingsStore::new(path)),
        None => SettingsStore::default_location(),
    }
}

async fn proxy(conn: &Connection) -> Result<TextExtractorProxy<'_>> {
    TextExtractorProxy::new(conn)
        .await
        .with_context(|| format!("Failed to reach {BUS_NAME}; is text-extractor running?"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries command output; logs go to stderr.
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Extract => {
            let conn = Connection::session().await?;
            let reply = proxy(&conn).await?.extract().await?;
            println!("{reply}");
        }
        Command::Cancel => {
            let conn = Connection::session().await?;
            if proxy(&conn).await?.cancel().await? {
                println!("Cancelled");
            } else {
                println!("Nothing to cancel");
            }
        }
        Command::Status => {
            let conn = Connection::session().await?;
            let proxy = proxy(&conn).await?;
            println!("version: {}", proxy.version().await?);
            println!("busy:    {}", proxy.busy().await?);
            println!("state:   {}", proxy.state().await?);
        }
        Command::Config { init } => {
            let store = settings_store(cli.config)?;
            if init && !store.path().exists() {
                store.save(&Default::default())?;
                tracing::info!("wrote default config to {}", store.path().display());
            }
            let settings = store.load();
            println!("# {}", store.path().display());
            print!(
                "{}",
                toml::to_string_pretty(&settings).context("Failed to serialize settings")?
            );
        }
        Command::InstallShortcut { binding } => {
            let binding = match binding {
                Some(binding) => binding,
                None => settings_store(cli.config)?.load().ui.shortcut,
            };
            shortcut::install(&binding, "text-extractor-ctl extract").await?;
            println!("Shortcut {binding} now runs `text-extractor-ctl extract`");
        }
    }
    Ok(())
}
