//! Uploader role: hands a file off to a farmer, then schedules challenges.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use storjdemo_channel::ChannelClient;
use storjdemo_heartbeat::{CycleState, Encoded, ProofScheme, PublicParams};
use storjdemo_protocol::messages::{
    HandoffRequest, HandoffResult, PeerLocation, RegisterFiles, ReportDownloaded,
    TransportEndpoint,
};
use storjdemo_protocol::{ContentId, HandoffStep};
use storjdemo_transfer::{content_path, digest_bytes};
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::context::ProcessContext;
use crate::error::SessionError;
use crate::new_session_id;
use crate::scheduler::{ChallengeScheduler, ChannelCycleRunner};
use crate::sender::FileSender;

/// Uploader-side state of one handoff and its challenge cycle.
#[derive(Debug)]
pub struct UploaderSession {
    id: String,
    file_path: PathBuf,
    peer_location: OnceLock<String>,
    identities: OnceLock<(ContentId, ContentId)>,
    tag_path: OnceLock<PathBuf>,
    public: OnceLock<PublicParams>,
    state: OnceLock<CycleState>,
    handed_off: AtomicBool,
    failed: AtomicBool,
    valid_cycles: AtomicU64,
}

impl UploaderSession {
    pub(crate) fn new(id: String, file_path: PathBuf) -> Self {
        Self {
            id,
            file_path,
            peer_location: OnceLock::new(),
            identities: OnceLock::new(),
            tag_path: OnceLock::new(),
            public: OnceLock::new(),
            state: OnceLock::new(),
            handed_off: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            valid_cycles: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Channel address of the farmer, learned in the first handoff step.
    pub fn peer_location(&self) -> Option<&str> {
        self.peer_location.get().map(String::as_str)
    }

    pub fn file_id(&self) -> Option<ContentId> {
        self.identities.get().map(|(file, _)| *file)
    }

    pub fn tag_id(&self) -> Option<ContentId> {
        self.identities.get().map(|(_, tag)| *tag)
    }

    pub fn tag_path(&self) -> Option<&Path> {
        self.tag_path.get().map(PathBuf::as_path)
    }

    pub fn public_params(&self) -> Option<&PublicParams> {
        self.public.get()
    }

    /// Secret verification state; never leaves the uploader.
    pub fn cycle_state(&self) -> Option<&CycleState> {
        self.state.get()
    }

    /// `true` once the farmer accepted the handoff and no proof failed.
    pub fn is_ready(&self) -> bool {
        self.handed_off.load(Ordering::Acquire) && !self.is_failed()
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// Number of proofs that verified so far.
    pub fn valid_cycles(&self) -> u64 {
        self.valid_cycles.load(Ordering::Relaxed)
    }

    pub(crate) fn record_valid_cycle(&self) -> u64 {
        self.valid_cycles.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn mark_handed_off(&self) {
        self.handed_off.store(true, Ordering::Release);
    }

    fn store_encoding(
        &self,
        file: ContentId,
        tag: ContentId,
        tag_path: PathBuf,
        encoded: Encoded,
    ) -> Result<(), SessionError> {
        self.identities
            .set((file, tag))
            .map_err(|_| SessionError::IdentitiesAlreadySet(self.id.clone()))?;
        let _ = self.tag_path.set(tag_path);
        let _ = self.public.set(encoded.public);
        let _ = self.state.set(encoded.state);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Uploader
// ---------------------------------------------------------------------------

pub struct Uploader {
    config: SessionConfig,
    ctx: Arc<ProcessContext>,
    scheme: Arc<dyn ProofScheme>,
    sender: Arc<dyn FileSender>,
    scheduler: Arc<ChallengeScheduler>,
    sessions: RwLock<HashMap<String, Arc<UploaderSession>>>,
}

impl Uploader {
    /// Builds an uploader that challenges farmers over the challenge channel.
    pub fn new(
        config: SessionConfig,
        ctx: Arc<ProcessContext>,
        scheme: Arc<dyn ProofScheme>,
        sender: Arc<dyn FileSender>,
    ) -> Self {
        let runner = Arc::new(ChannelCycleRunner::new(Arc::clone(&scheme)));
        let scheduler =
            ChallengeScheduler::new(runner, config.challenge_interval, Arc::clone(&ctx));
        Self::with_scheduler(config, ctx, scheme, sender, scheduler)
    }

    pub fn with_scheduler(
        config: SessionConfig,
        ctx: Arc<ProcessContext>,
        scheme: Arc<dyn ProofScheme>,
        sender: Arc<dyn FileSender>,
        scheduler: Arc<ChallengeScheduler>,
    ) -> Self {
        Self {
            config,
            ctx,
            scheme,
            sender,
            scheduler,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn scheduler(&self) -> &Arc<ChallengeScheduler> {
        &self.scheduler
    }

    pub fn session(&self, id: &str) -> Option<Arc<UploaderSession>> {
        self.sessions.read().ok()?.get(id).cloned()
    }

    /// Hands `file` off to the farmer whose channel server listens on
    /// `farmer`, and starts challenging it once the farmer accepts.
    ///
    /// A rejected handoff fails the session with
    /// [`SessionError::HandoffRejected`]; process health is left untouched.
    pub async fn hand_off(
        &self,
        farmer: &str,
        file: &Path,
    ) -> Result<Arc<UploaderSession>, SessionError> {
        let session = Arc::new(UploaderSession::new(new_session_id(), file.to_path_buf()));
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(session.id.clone(), Arc::clone(&session));
        }
        info!(session = %session.id, %farmer, file = %file.display(), "starting handoff");

        match self.run_handoff(&session, farmer).await {
            Ok(true) => {
                session.mark_handed_off();
                info!(session = %session.id, "handoff accepted");
                self.scheduler
                    .start(Arc::clone(&session), self.config.initial_delay);
                Ok(session)
            }
            Ok(false) => {
                session.mark_failed();
                warn!(session = %session.id, "handoff rejected by farmer");
                Err(SessionError::HandoffRejected(session.id.clone()))
            }
            Err(e) => {
                session.mark_failed();
                warn!(session = %session.id, "handoff failed: {e}");
                Err(e)
            }
        }
    }

    async fn run_handoff(
        &self,
        session: &UploaderSession,
        farmer: &str,
    ) -> Result<bool, SessionError> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let mut channel = ChannelClient::<HandoffStep>::open(farmer, session.id.as_str()).await?;

        let location: PeerLocation = channel
            .request(HandoffStep::Request, &HandoffRequest {})
            .await?
            .ok_or(SessionError::UnexpectedClose("request"))?;
        let _ = session.peer_location.set(location.peer_location);

        let data = tokio::fs::read(&session.file_path).await?;
        let scheme = Arc::clone(&self.scheme);
        let (file_id, encoded) = tokio::task::spawn_blocking(move || {
            let id = digest_bytes(&data);
            scheme.encode(&data).map(|encoded| (id, encoded))
        })
        .await??;

        let tag_id = digest_bytes(&encoded.tag);
        let tag_path = content_path(&self.config.work_dir, &tag_id);
        let staging = self
            .config
            .work_dir
            .join(format!("{}.{}.tmp", tag_id.to_hex(), session.id));
        tokio::fs::write(&staging, &encoded.tag).await?;
        tokio::fs::rename(&staging, &tag_path).await?;
        let public = encoded.public.0.clone();
        session.store_encoding(file_id, tag_id, tag_path.clone(), encoded)?;

        let endpoint: TransportEndpoint = channel
            .request(
                HandoffStep::AcceptFiles,
                &RegisterFiles {
                    file_identity_hex: file_id,
                    tag_identity_hex: tag_id,
                },
            )
            .await?
            .ok_or(SessionError::UnexpectedClose("accept_files"))?;

        let files = [(tag_path, tag_id), (session.file_path.clone(), file_id)];
        self.sender
            .send(&endpoint.address(), &files, self.ctx.stop_token())
            .await?;
        info!(session = %session.id, endpoint = %endpoint.address(), "file and tag sent");

        let result: HandoffResult = channel
            .request(
                HandoffStep::ReportDownloaded,
                &ReportDownloaded {
                    public_proof_params: public,
                },
            )
            .await?
            .ok_or(SessionError::UnexpectedClose("report_downloaded"))?;
        channel.close().await;

        Ok(result.is_success())
    }
}
