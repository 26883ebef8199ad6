pub mod app;
pub mod capture;
pub mod config;
pub mod dbus;
pub mod desktop;
pub mod ocr;
pub mod orchestrator;

use anyhow::Result;
use tracing::info;

use app::Daemon;
use config::SettingsStore;

/// Run the daemon until SIGINT or SIGTERM.
pub async fn run(settings: SettingsStore) -> Result<()> {
    let mut daemon = Daemon::new(settings);
    daemon.start().await?;

    let stopped = shutdown_signal().await;
    info!("shutting down");
    daemon.stop().await;
    stopped
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}
