//! Sources of manual "run now" requests.

use std::io::{BufRead, IsTerminal};

use reelwatch_core::{FireResult, TriggerHandle};

/// Each line read from an interactive stdin fires a trigger.
///
/// Runs on a plain thread: a blocking stdin read cannot be cancelled and
/// would otherwise hold up runtime shutdown.
pub fn spawn_stdin_listener(handle: TriggerHandle) {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        tracing::info!("stdin is not a terminal, keyboard trigger disabled");
        return;
    }

    let spawned = std::thread::Builder::new()
        .name("stdin-trigger".into())
        .spawn(move || {
            for line in stdin.lock().lines() {
                if line.is_err() {
                    break;
                }
                if fire(&handle, "keyboard") == FireResult::Closed {
                    break;
                }
            }
        });
    match spawned {
        Ok(_) => tracing::info!("Press Enter to run now"),
        Err(e) => tracing::warn!(error = %e, "Failed to start keyboard listener"),
    }
}

/// `SIGUSR1` fires a trigger.
#[cfg(unix)]
pub fn spawn_signal_listener(handle: TriggerHandle) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut stream = match signal(SignalKind::user_defined1()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGUSR1 handler");
            return;
        }
    };
    tokio::spawn(async move {
        while stream.recv().await.is_some() {
            if fire(&handle, "SIGUSR1") == FireResult::Closed {
                break;
            }
        }
    });
}

#[cfg(not(unix))]
pub fn spawn_signal_listener(_handle: TriggerHandle) {}

fn fire(handle: &TriggerHandle, source: &str) -> FireResult {
    let result = handle.fire();
    match result {
        FireResult::Queued => tracing::info!(%source, "Manual execution triggered"),
        FireResult::Coalesced => {
            tracing::info!(%source, "Manual run already pending, request merged")
        }
        FireResult::Closed => {}
    }
    result
}
