//! Process signal handling.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancel `token` on the first SIGTERM or SIGINT.
///
/// Handlers are registered before this returns, so a failure to install them
/// surfaces at startup.
#[cfg(unix)]
pub fn cancel_on_signal(token: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        let name = tokio::select! {
            _ = terminate.recv() => "SIGTERM",
            _ = interrupt.recv() => "SIGINT",
            _ = token.cancelled() => return,
        };
        info!(signal = name, "Received shutdown signal");
        token.cancel();
    }))
}

/// Cancel `token` on Ctrl-C.
#[cfg(not(unix))]
pub fn cancel_on_signal(token: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!(signal = "ctrl-c", "Received shutdown signal");
                    token.cancel();
                }
            }
            _ = token.cancelled() => {}
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_ends_when_token_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let listener = cancel_on_signal(token.clone()).unwrap();
        token.cancel();
        listener.await.unwrap();
    }
}
