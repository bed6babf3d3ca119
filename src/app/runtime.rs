use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` on SIGINT (Ctrl+C) or, on Unix, SIGTERM. The handlers
/// live for the rest of the process.
pub fn cancel_on_signal(token: CancellationToken) {
    // Handle SIGTERM (systemd stop) - Unix only
    #[cfg(unix)]
    {
        let sigterm_token = token.clone();
        tokio::spawn(async move {
            let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    warn!("Failed to register SIGTERM handler: {}", e);
                    return;
                }
            };
            if let Some(()) = sigterm.recv().await {
                info!("Received SIGTERM signal");
                sigterm_token.cancel();
            }
        });
    }

    // Handle SIGINT (Ctrl+C) - Cross-platform
    tokio::spawn(async move {
        if let Ok(()) = signal::ctrl_c().await {
            info!("Received SIGINT signal (Ctrl+C)");
            token.cancel();
        }
    });
}
