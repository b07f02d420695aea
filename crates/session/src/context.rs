//! Process-wide stop signal and health flag.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Process health, reported as the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Health {
    Ok = 0,
    Error = 1,
}

/// Explicit context passed to every role instead of process globals.
///
/// Health only ever moves from `Ok` to `Error`.
#[derive(Debug)]
pub struct ProcessContext {
    health: AtomicU8,
    stop: CancellationToken,
    failed: CancellationToken,
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessContext {
    pub fn new() -> Self {
        Self {
            health: AtomicU8::new(Health::Ok as u8),
            stop: CancellationToken::new(),
            failed: CancellationToken::new(),
        }
    }

    pub fn health(&self) -> Health {
        match self.health.load(Ordering::Acquire) {
            0 => Health::Ok,
            _ => Health::Error,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health() == Health::Ok
    }

    /// Flips health to error. Idempotent.
    pub fn mark_failed(&self, reason: &str) {
        let previous = self.health.swap(Health::Error as u8, Ordering::AcqRel);
        if previous == Health::Ok as u8 {
            error!(reason, "process health set to error");
        }
        self.failed.cancel();
    }

    pub fn exit_code(&self) -> i32 {
        self.health() as i32
    }

    /// The process-wide stop signal.
    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    /// A token cancelled together with the process stop signal.
    pub fn child_token(&self) -> CancellationToken {
        self.stop.child_token()
    }

    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            info!("stop requested");
        }
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves once a stop was requested or health turned to error.
    pub async fn stopped_or_failed(&self) {
        tokio::select! {
            _ = self.stop.cancelled() => {}
            _ = self.failed.cancelled() => {}
        }
    }
}
