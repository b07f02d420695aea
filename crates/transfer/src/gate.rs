use std::path::PathBuf;
use std::time::Duration;

use storjdemo_protocol::ContentId;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{TransferError, content_path, verify_file};

/// Aggregate result of the two expected arrivals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Pending,
    /// Both files arrived and hash to their declared identities.
    Succeeded,
    /// At least one file failed its hash check or its transfer.
    Corrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum GateState {
    Pending,
    OneArrived(ContentId),
    Succeeded,
    Corrupted,
    /// An arrived file could not be read back for hashing.
    Aborted(String),
}

impl GateState {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Corrupted | Self::Aborted(_))
    }

    fn outcome(&self) -> TransferOutcome {
        match self {
            Self::Pending | Self::OneArrived(_) | Self::Aborted(_) => TransferOutcome::Pending,
            Self::Succeeded => TransferOutcome::Succeeded,
            Self::Corrupted => TransferOutcome::Corrupted,
        }
    }
}

/// What the arrival check concluded about one file.
#[derive(Debug)]
enum Arrival {
    Verified(ContentId),
    Corrupted,
    Unreadable(String),
}

/// Next state for an arrival, or `None` when the arrival changes nothing.
///
/// Terminal states absorb every arrival. A repeated arrival of the identity
/// already counted does not advance the gate.
fn transition(state: &GateState, arrival: &Arrival, single_file: bool) -> Option<GateState> {
    if state.is_terminal() {
        return None;
    }
    match (state, arrival) {
        (_, Arrival::Corrupted) => Some(GateState::Corrupted),
        (_, Arrival::Unreadable(reason)) => Some(GateState::Aborted(reason.clone())),
        (GateState::Pending, Arrival::Verified(_)) if single_file => Some(GateState::Succeeded),
        (GateState::Pending, Arrival::Verified(id)) => Some(GateState::OneArrived(*id)),
        (GateState::OneArrived(first), Arrival::Verified(id)) if first != id => {
            Some(GateState::Succeeded)
        }
        _ => None,
    }
}

/// Collapses the arrival of a data file and its tag file into one outcome.
///
/// Arrivals may complete in either order and from any thread. Every state
/// change goes through one synchronized update on a `watch` channel, which
/// also wakes the tasks parked in [`await_outcome`](Self::await_outcome).
#[derive(Debug)]
pub struct FileTransferGate {
    file: ContentId,
    tag: ContentId,
    dir: PathBuf,
    state: watch::Sender<GateState>,
}

impl FileTransferGate {
    /// Creates a pending gate expecting `file` and `tag` under `dir`.
    pub fn new(file: ContentId, tag: ContentId, dir: PathBuf) -> Self {
        let (state, _) = watch::channel(GateState::Pending);
        Self {
            file,
            tag,
            dir,
            state,
        }
    }

    pub fn file_id(&self) -> ContentId {
        self.file
    }

    pub fn tag_id(&self) -> ContentId {
        self.tag
    }

    /// Current outcome snapshot.
    pub fn outcome(&self) -> TransferOutcome {
        self.state.borrow().outcome()
    }

    fn expects(&self, id: &ContentId) -> bool {
        *id == self.file || *id == self.tag
    }

    /// Records the completion of one transfer.
    ///
    /// `error` is the transport's failure report, if any. Otherwise the
    /// arrived file is read from the gate's directory and checked against
    /// `id`. Returns the outcome after the arrival was applied.
    pub fn on_arrival(&self, id: ContentId, error: Option<&str>) -> TransferOutcome {
        if !self.expects(&id) {
            warn!(%id, "arrival for an identity this gate does not expect");
            return self.outcome();
        }
        if self.state.borrow().is_terminal() {
            debug!(%id, "arrival after terminal outcome ignored");
            return self.outcome();
        }

        let arrival = match error {
            Some(err) => {
                error!(%id, error = %err, "download failed");
                Arrival::Corrupted
            }
            None => match verify_file(&id, &content_path(&self.dir, &id)) {
                Ok(true) => {
                    info!(%id, "downloaded file verified");
                    Arrival::Verified(id)
                }
                Ok(false) => {
                    error!(%id, "downloaded file is corrupted");
                    Arrival::Corrupted
                }
                Err(e) => {
                    error!(%id, error = %e, "downloaded file could not be read");
                    Arrival::Unreadable(format!("{id}: {e}"))
                }
            },
        };

        let single_file = self.file == self.tag;
        self.state
            .send_if_modified(|state| match transition(state, &arrival, single_file) {
                Some(next) => {
                    *state = next;
                    true
                }
                None => false,
            });
        self.outcome()
    }

    /// Waits until the outcome is terminal.
    ///
    /// Returns [`TransferOutcome::Pending`] if `timeout` elapses first, and
    /// an error if the gate was aborted by an unreadable file or `cancel`
    /// fired.
    pub async fn await_outcome(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, TransferError> {
        let mut rx = self.state.subscribe();
        let wait = async move {
            rx.wait_for(GateState::is_terminal)
                .await
                .map(|state| state.clone())
        };

        let result = match timeout {
            Some(limit) => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                result = tokio::time::timeout(limit, wait) => match result {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(file = %self.file, tag = %self.tag, "timed out waiting for transfers");
                        return Ok(TransferOutcome::Pending);
                    }
                },
            },
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                result = wait => result,
            },
        };

        match result {
            Ok(GateState::Aborted(reason)) => Err(TransferError::Aborted(reason)),
            Ok(state) => Ok(state.outcome()),
            Err(_) => Err(TransferError::Aborted("gate dropped".into())),
        }
    }
}
