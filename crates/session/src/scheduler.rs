//! Uploader-side challenge cycle scheduler.
//!
//! One cancellable task per session runs the cycle, sleeps for the fixed
//! interval, and runs it again, until a proof comes back invalid or the
//! process stops. A cycle that fails for any other reason (farmer
//! unreachable, channel refused) is logged and retried at the next
//! interval.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use storjdemo_channel::ChannelClient;
use storjdemo_heartbeat::{Proof, ProofScheme};
use storjdemo_protocol::ChallengeStep;
use storjdemo_protocol::messages::{ChallengeRequest, ProofResponse, ProofVerdict};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::ProcessContext;
use crate::error::SessionError;
use crate::uploader::UploaderSession;

/// Result of one challenge cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleVerdict {
    /// The farmer proved it still holds the file.
    Valid,
    /// The farmer answered with a proof that does not verify.
    Invalid,
    /// The cycle could not complete; retried after the interval.
    Failed(String),
}

pub type CycleFuture<'a> = Pin<Box<dyn Future<Output = CycleVerdict> + Send + 'a>>;

/// Runs one challenge cycle for a session.
pub trait CycleRunner: Send + Sync + 'static {
    fn run_cycle<'a>(&'a self, session: &'a UploaderSession) -> CycleFuture<'a>;
}

// ---------------------------------------------------------------------------
// Channel-backed runner
// ---------------------------------------------------------------------------

/// Challenges the farmer over a fresh challenge channel per cycle.
pub struct ChannelCycleRunner {
    scheme: Arc<dyn ProofScheme>,
}

impl ChannelCycleRunner {
    pub fn new(scheme: Arc<dyn ProofScheme>) -> Self {
        Self { scheme }
    }

    async fn challenge(&self, session: &UploaderSession) -> Result<bool, SessionError> {
        let (Some(peer), Some(state)) = (session.peer_location(), session.cycle_state()) else {
            return Err(SessionError::NotReady(session.id().to_string()));
        };

        let mut channel = ChannelClient::<ChallengeStep>::open(peer, session.id()).await?;

        let challenge = self.scheme.gen_challenge(state)?;
        let response: ProofResponse = channel
            .request(
                ChallengeStep::SendProof,
                &ChallengeRequest {
                    challenge: challenge.0.clone(),
                },
            )
            .await?
            .ok_or(SessionError::UnexpectedClose("send_proof"))?;

        let valid = self.scheme.verify(state, &challenge, &Proof(response.proof));

        if let Err(e) = channel
            .request::<_, serde_json::Value>(ChallengeStep::ReceiveResult, &ProofVerdict { valid })
            .await
        {
            warn!(session = %session.id(), "verdict not delivered: {e}");
        }
        channel.close().await;
        Ok(valid)
    }
}

impl CycleRunner for ChannelCycleRunner {
    fn run_cycle<'a>(&'a self, session: &'a UploaderSession) -> CycleFuture<'a> {
        Box::pin(async move {
            match self.challenge(session).await {
                Ok(true) => CycleVerdict::Valid,
                Ok(false) => CycleVerdict::Invalid,
                Err(e) => CycleVerdict::Failed(e.to_string()),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Keeps at most one repeating challenge task per session.
pub struct ChallengeScheduler {
    runner: Arc<dyn CycleRunner>,
    interval: Duration,
    ctx: Arc<ProcessContext>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ChallengeScheduler {
    pub fn new(runner: Arc<dyn CycleRunner>, interval: Duration, ctx: Arc<ProcessContext>) -> Arc<Self> {
        Arc::new(Self {
            runner,
            interval,
            ctx,
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Starts the cycle for `session` after `initial_delay`.
    ///
    /// Returns `false` without starting anything if the session has not
    /// completed its handoff, has failed, or already has a running cycle.
    pub fn start(&self, session: Arc<UploaderSession>, initial_delay: Duration) -> bool {
        if !session.is_ready() {
            warn!(session = %session.id(), "not starting challenges for a session that is not ready");
            return false;
        }

        let Ok(mut tasks) = self.tasks.lock() else {
            return false;
        };
        if tasks.get(session.id()).is_some_and(|h| !h.is_finished()) {
            debug!(session = %session.id(), "challenge cycle already running");
            return false;
        }

        let id = session.id().to_string();
        info!(session = %id, delay = ?initial_delay, interval = ?self.interval, "starting challenge cycle");
        let handle = tokio::spawn(cycle_loop(
            Arc::clone(&self.runner),
            session,
            initial_delay,
            self.interval,
            Arc::clone(&self.ctx),
        ));
        tasks.insert(id, handle);
        true
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.tasks
            .lock()
            .map(|tasks| tasks.get(session_id).is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Cancels the cycle of one session. Returns `false` if none was running.
    pub fn stop(&self, session_id: &str) -> bool {
        let handle = self
            .tasks
            .lock()
            .ok()
            .and_then(|mut tasks| tasks.remove(session_id));
        match handle {
            Some(h) => {
                let was_running = !h.is_finished();
                h.abort();
                was_running
            }
            None => false,
        }
    }

    /// Number of sessions with a live cycle.
    pub fn running(&self) -> usize {
        self.tasks
            .lock()
            .map(|tasks| tasks.values().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }
}

async fn cycle_loop(
    runner: Arc<dyn CycleRunner>,
    session: Arc<UploaderSession>,
    initial_delay: Duration,
    interval: Duration,
    ctx: Arc<ProcessContext>,
) {
    let cancel = ctx.stop_token().clone();
    let mut delay = initial_delay;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        if session.is_failed() {
            break;
        }

        let verdict = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            verdict = runner.run_cycle(&session) => verdict,
        };

        match verdict {
            CycleVerdict::Valid => {
                let n = session.record_valid_cycle();
                info!(session = %session.id(), cycle = n, "proof verified");
            }
            CycleVerdict::Invalid => {
                session.mark_failed();
                ctx.mark_failed(&format!("farmer failed proof for session {}", session.id()));
                break;
            }
            CycleVerdict::Failed(reason) => {
                warn!(session = %session.id(), "challenge cycle failed, retrying: {reason}");
            }
        }
        delay = interval;
    }

    debug!(session = %session.id(), "challenge cycle ended");
}
