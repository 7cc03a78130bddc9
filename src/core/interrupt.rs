//! Process-wide Ctrl-C latch
//!
//! The signal listener is installed once and records the first Ctrl-C in a
//! `watch` channel. Waiters that subscribe after the signal see it
//! immediately, so a Ctrl-C that lands between two guarded stages is not lost.

use std::sync::{Once, OnceLock};
use tokio::sync::watch;
use tracing::{debug, warn};

/// A one-way flag that stays set once triggered
#[derive(Debug)]
pub struct InterruptLatch {
    flag: watch::Sender<bool>,
}

impl Default for InterruptLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptLatch {
    pub fn new() -> Self {
        Self {
            flag: watch::channel(false).0,
        }
    }

    /// Latch shared with the Ctrl-C listener
    pub fn global() -> &'static InterruptLatch {
        static LATCH: OnceLock<InterruptLatch> = OnceLock::new();
        LATCH.get_or_init(InterruptLatch::new)
    }

    pub fn trigger(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once the latch has been triggered, immediately if it already was
    pub async fn triggered(&self) {
        let mut receiver = self.flag.subscribe();
        // The sender lives as long as `self`, so the wait only ends on a trigger
        let _ = receiver.wait_for(|set| *set).await;
    }
}

/// Start listening for Ctrl-C; later calls are no-ops
///
/// Must be called from within a tokio runtime.
pub fn install_interrupt_handler() {
    static INSTALLED: Once = Once::new();
    INSTALLED.call_once(|| {
        tokio::spawn(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("interrupt received");
                    InterruptLatch::global().trigger();
                }
                Err(e) => debug!(error = %e, "Ctrl-C handler unavailable"),
            }
        });
    });
}

/// Resolves once Ctrl-C has been received at any point since the handler was installed
pub async fn interrupted() {
    install_interrupt_handler();
    InterruptLatch::global().triggered().await;
}
