//! Signal handling for graceful shutdown.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Wait for SIGINT, SIGTERM or SIGQUIT and return the signal's name.
#[cfg(unix)]
pub async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to set up SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to set up SIGTERM handler");
    let mut sigquit = signal(SignalKind::quit()).expect("Failed to set up SIGQUIT handler");

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    info!(message = "Signal received.", signal = name);
    name
}

/// Wait for Ctrl-C.
#[cfg(not(unix))]
pub async fn shutdown_signal() -> &'static str {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to set up Ctrl-C handler");
    info!(message = "Signal received.", signal = "CTRL_C");
    "CTRL_C"
}

/// Cancel `shutdown` on the first shutdown signal.
pub fn spawn_shutdown_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_cancellation_reaches_every_source_clone() {
        let shutdown = CancellationToken::new();
        let sources: Vec<_> = (0..3).map(|_| shutdown.clone()).collect();
        assert!(sources.iter().all(|s| !s.is_cancelled()));

        shutdown.cancel();
        assert!(sources.iter().all(CancellationToken::is_cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_poll_wait() {
        let shutdown = CancellationToken::new();
        let waiter = shutdown.clone();

        let handle = tokio::spawn(async move {
            waiter
                .run_until_cancelled(tokio::time::sleep(Duration::from_secs(3600)))
                .await
        });
        shutdown.cancel();

        assert_eq!(handle.await.unwrap(), None);
    }
}
