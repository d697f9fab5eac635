//! Shutdown signal handling.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancel `cancel` on the first shutdown signal (SIGINT, SIGTERM, SIGHUP or
/// SIGQUIT; Ctrl-C elsewhere).
pub fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(signal) => {
                info!("Shutdown signal received [signal={signal}]");
                cancel.cancel();
            }
            Err(err) => error!("Failed to listen for shutdown signals: {err}"),
        }
    });
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut quit = signal(SignalKind::quit())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|()| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
        _ = hangup.recv() => Ok("SIGHUP"),
        _ = quit.recv() => Ok("SIGQUIT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
}
