//! Cancellation as a capability passed into the `Run` rather than a
//! stdin-coupled global listener thread — stdin is just one adapter
//! among possible others.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::info;

/// Anything that can eventually decide the user wants to cancel the run.
/// `watch` resolves exactly once, the first time cancellation is
/// requested; it is safe to call it from a single task that lives for the
/// life of the Run.
#[async_trait]
pub trait CancellationSource: Send + Sync {
    async fn watch(&self, notify: &Notify);
}

/// Production adapter: a literal `cancel` line (case-insensitive, trimmed)
/// read from stdin triggers cancellation. EOF on stdin exits the listener
/// silently and cancellation becomes unreachable for the rest of the
/// run — this is not an error.
pub struct StdinCancellationSource;

#[async_trait]
impl CancellationSource for StdinCancellationSource {
    async fn watch(&self, notify: &Notify) {
        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().eq_ignore_ascii_case("cancel") {
                        info!("cancel requested via stdin");
                        notify.notify_one();
                        return;
                    }
                }
                Ok(None) | Err(_) => {
                    // stdin closed or errored: cancellation becomes
                    // unreachable through this adapter, run continues.
                    return;
                }
            }
        }
    }
}

/// A `CancellationSource` a test can trigger programmatically instead of
/// going through stdin.
#[derive(Clone, Default)]
pub struct ManualCancellationSource {
    armed: std::sync::Arc<tokio::sync::Mutex<bool>>,
}

impl ManualCancellationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn trigger(&self) {
        *self.armed.lock().await = true;
    }
}

#[async_trait]
impl CancellationSource for ManualCancellationSource {
    async fn watch(&self, notify: &Notify) {
        loop {
            if *self.armed.lock().await {
                notify.notify_one();
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

/// A `CancellationSource` that never fires — the default for runs with no
/// interactive cancellation adapter wired up.
#[derive(Clone, Default)]
pub struct NeverCancel;

#[async_trait]
impl CancellationSource for NeverCancel {
    async fn watch(&self, _notify: &Notify) {
        std::future::pending::<()>().await;
    }
}
