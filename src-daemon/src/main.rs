use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

use text_extractor::config::SettingsStore;

#[derive(Parser)]
#[command(name = "text-extractor", version, about = "Screen region OCR to clipboard daemon")]
struct Args {
    /// Config file to use instead of the XDG default.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = match args.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::default_location()?,
    };

    tracing::info!("text-extractor v{} starting", env!("CARGO_PKG_VERSION"));
    text_extractor::run(settings).await
}
