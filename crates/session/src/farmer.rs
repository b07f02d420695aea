//! Farmer role: receives handoffs and answers challenges.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use storjdemo_channel::{
    ChannelError, ChannelRegistry, ChannelServer, StepFuture, StepHandler, reply_payload,
};
use storjdemo_data_channel::{Registration, TransportServer};
use storjdemo_heartbeat::{Challenge, ProofScheme, PublicParams};
use storjdemo_protocol::messages::{
    ChallengeRequest, HandoffResult, PeerLocation, ProofResponse, ProofVerdict, RegisterFiles,
    ReportDownloaded, TransportEndpoint,
};
use storjdemo_protocol::{ChallengeStep, ContentId, Frame, HandoffStep};
use storjdemo_transfer::{FileTransferGate, TransferError, TransferOutcome, content_path};
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::context::ProcessContext;
use crate::error::SessionError;

/// What a farmer keeps after a successful handoff to answer challenges.
#[derive(Debug, Clone)]
pub struct CycleMaterial {
    pub public: PublicParams,
    pub tag_path: PathBuf,
    pub file_path: PathBuf,
}

/// Farmer-side state of one handoff and its later challenges.
#[derive(Debug)]
pub struct FarmerSession {
    id: String,
    identities: OnceLock<(ContentId, ContentId)>,
    gate: OnceLock<Arc<FileTransferGate>>,
    material: OnceLock<CycleMaterial>,
    failed: AtomicBool,
    proofs: AtomicU64,
}

impl FarmerSession {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            identities: OnceLock::new(),
            gate: OnceLock::new(),
            material: OnceLock::new(),
            failed: AtomicBool::new(false),
            proofs: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file_id(&self) -> Option<ContentId> {
        self.identities.get().map(|(file, _)| *file)
    }

    pub fn tag_id(&self) -> Option<ContentId> {
        self.identities.get().map(|(_, tag)| *tag)
    }

    /// Outcome of the file transfer; `Pending` before step 2.
    pub fn transfer_outcome(&self) -> TransferOutcome {
        self.gate
            .get()
            .map_or(TransferOutcome::Pending, |g| g.outcome())
    }

    pub fn material(&self) -> Option<&CycleMaterial> {
        self.material.get()
    }

    /// `true` once the handoff succeeded and no proof was judged invalid.
    pub fn is_ready(&self) -> bool {
        self.material.get().is_some() && !self.is_failed()
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// Number of proofs produced for this session.
    pub fn proofs_served(&self) -> u64 {
        self.proofs.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Farmer
// ---------------------------------------------------------------------------

/// The farmer: session table plus the collaborators its steps use.
pub struct Farmer {
    config: SessionConfig,
    ctx: Arc<ProcessContext>,
    scheme: Arc<dyn ProofScheme>,
    transport: Arc<TransportServer>,
    peer_location: String,
    sessions: RwLock<HashMap<String, Arc<FarmerSession>>>,
}

impl Farmer {
    /// `peer_location` is the channel address handed to uploaders in the
    /// first handoff step.
    pub fn new(
        config: SessionConfig,
        ctx: Arc<ProcessContext>,
        scheme: Arc<dyn ProofScheme>,
        transport: Arc<TransportServer>,
        peer_location: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            ctx,
            scheme,
            transport,
            peer_location,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn peer_location(&self) -> &str {
        &self.peer_location
    }

    pub fn session(&self, id: &str) -> Option<Arc<FarmerSession>> {
        self.sessions.read().ok()?.get(id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Registers the handoff and challenge responders.
    pub fn register(self: &Arc<Self>, registry: &ChannelRegistry) {
        let farmer = Arc::clone(self);
        registry.register_handler(move |session: &str| farmer.open_handoff(session));

        let farmer = Arc::clone(self);
        registry.register_handler(move |session: &str| farmer.open_challenge(session));
    }

    fn open_handoff(self: &Arc<Self>, session_id: &str) -> Result<HandoffResponder, String> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| "session table poisoned".to_string())?;
        if sessions.contains_key(session_id) {
            return Err(format!("session {session_id} was already handed off"));
        }

        let session = Arc::new(FarmerSession::new(session_id));
        sessions.insert(session_id.to_string(), Arc::clone(&session));
        info!(session = %session_id, "handoff session created");

        Ok(HandoffResponder {
            farmer: Arc::clone(self),
            session,
            registered: Vec::new(),
        })
    }

    fn open_challenge(self: &Arc<Self>, session_id: &str) -> Result<ChallengeResponder, String> {
        let session = self
            .session(session_id)
            .ok_or_else(|| format!("unknown session {session_id}"))?;
        if session.is_failed() {
            return Err(format!("session {session_id} has failed"));
        }
        if !session.is_ready() {
            return Err(format!("session {session_id} has not completed its handoff"));
        }

        Ok(ChallengeResponder {
            farmer: Arc::clone(self),
            session,
        })
    }
}

// ---------------------------------------------------------------------------
// Handoff responder
// ---------------------------------------------------------------------------

struct HandoffResponder {
    farmer: Arc<Farmer>,
    session: Arc<FarmerSession>,
    /// This channel's transport registrations, until step 3 releases them.
    registered: Vec<(ContentId, Registration)>,
}

impl HandoffResponder {
    fn release(&mut self) {
        for (id, registration) in self.registered.drain(..) {
            self.farmer.transport.unregister(&id, registration);
        }
    }

    fn accept_files(&mut self, frame: &Frame) -> Result<TransportEndpoint, ChannelError> {
        let req: RegisterFiles = frame.require_payload()?;
        let (file, tag) = (req.file_identity_hex, req.tag_identity_hex);

        self.session
            .identities
            .set((file, tag))
            .map_err(|_| ChannelError::Step(format!("session {} already has identities", self.session.id)))?;

        let gate = Arc::new(FileTransferGate::new(
            file,
            tag,
            self.farmer.config.download_dir.clone(),
        ));
        let _ = self.session.gate.set(Arc::clone(&gate));

        let ids = if file == tag { vec![file] } else { vec![tag, file] };
        for id in ids {
            let gate = Arc::clone(&gate);
            let registration = self.farmer.transport.register(
                id,
                Arc::new(move |id| {
                    gate.on_arrival(id, None);
                }),
            );
            self.registered.push((id, registration));
        }
        info!(session = %self.session.id, %file, %tag, "expecting file and tag");

        Ok(TransportEndpoint {
            transport_ip: self.farmer.config.advertise_host.clone(),
            transport_port: self.farmer.transport.port(),
        })
    }

    async fn report_downloaded(&mut self, frame: &Frame) -> Result<HandoffResult, ChannelError> {
        let req: ReportDownloaded = frame.require_payload()?;
        let gate = self
            .session
            .gate
            .get()
            .cloned()
            .ok_or_else(|| ChannelError::Step("no transfer in progress".into()))?;

        let outcome = gate
            .await_outcome(
                Some(self.farmer.config.transfer_timeout),
                self.farmer.ctx.stop_token(),
            )
            .await;
        self.release();

        match outcome {
            Ok(TransferOutcome::Succeeded) => {
                let dir = &self.farmer.config.download_dir;
                let material = CycleMaterial {
                    public: PublicParams(req.public_proof_params),
                    tag_path: content_path(dir, &gate.tag_id()),
                    file_path: content_path(dir, &gate.file_id()),
                };
                let _ = self.session.material.set(material);
                info!(session = %self.session.id, "handoff complete, file stored");
                Ok(HandoffResult::accepted())
            }
            Ok(outcome) => {
                self.session.mark_failed();
                warn!(session = %self.session.id, ?outcome, "handoff rejected");
                Ok(HandoffResult::rejected())
            }
            Err(TransferError::Cancelled) => Err(ChannelError::Cancelled),
            Err(e) => {
                self.session.mark_failed();
                error!(session = %self.session.id, "handoff aborted: {e}");
                Err(ChannelError::Step(e.to_string()))
            }
        }
    }
}

impl StepHandler for HandoffResponder {
    type Step = HandoffStep;

    fn handle<'a>(&'a mut self, step: HandoffStep, frame: &'a Frame) -> StepFuture<'a> {
        Box::pin(async move {
            match step {
                HandoffStep::Request => reply_payload(&PeerLocation {
                    peer_location: self.farmer.peer_location.clone(),
                }),
                HandoffStep::AcceptFiles => {
                    let endpoint = self.accept_files(frame)?;
                    reply_payload(&endpoint)
                }
                HandoffStep::ReportDownloaded => {
                    let result = self.report_downloaded(frame).await?;
                    reply_payload(&result)
                }
            }
        })
    }
}

impl Drop for HandoffResponder {
    fn drop(&mut self) {
        if self.session.material().is_none() && !self.session.is_failed() {
            debug!(session = %self.session.id, "handoff channel dropped before completion");
            self.session.mark_failed();
        }
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Challenge responder
// ---------------------------------------------------------------------------

struct ChallengeResponder {
    farmer: Arc<Farmer>,
    session: Arc<FarmerSession>,
}

impl ChallengeResponder {
    async fn send_proof(&self, frame: &Frame) -> Result<ProofResponse, ChannelError> {
        let req: ChallengeRequest = frame.require_payload()?;
        let material = self
            .session
            .material()
            .cloned()
            .ok_or_else(|| ChannelError::Step("session has no stored file".into()))?;

        let file = tokio::fs::read(&material.file_path).await?;
        let tag = tokio::fs::read(&material.tag_path).await?;

        let scheme = Arc::clone(&self.farmer.scheme);
        let challenge = Challenge(req.challenge);
        let proof = tokio::task::spawn_blocking(move || {
            scheme.prove(&material.public, &file, &challenge, &tag)
        })
        .await
        .map_err(|e| ChannelError::Step(e.to_string()))?
        .map_err(|e| ChannelError::Step(e.to_string()))?;

        self.session.proofs.fetch_add(1, Ordering::Relaxed);
        debug!(session = %self.session.id, "proof produced");
        Ok(ProofResponse { proof: proof.0 })
    }

    fn receive_result(&self, frame: &Frame) -> Result<(), ChannelError> {
        let verdict: ProofVerdict = frame.require_payload()?;
        if verdict.valid {
            debug!(session = %self.session.id, "proof accepted by uploader");
        } else {
            self.session.mark_failed();
            self.farmer
                .ctx
                .mark_failed(&format!("uploader rejected proof for session {}", self.session.id));
        }
        Ok(())
    }
}

impl StepHandler for ChallengeResponder {
    type Step = ChallengeStep;

    fn handle<'a>(&'a mut self, step: ChallengeStep, frame: &'a Frame) -> StepFuture<'a> {
        Box::pin(async move {
            match step {
                ChallengeStep::SendProof => {
                    let proof = self.send_proof(frame).await?;
                    reply_payload(&proof)
                }
                ChallengeStep::ReceiveResult => {
                    self.receive_result(frame)?;
                    Ok(None)
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A running farmer: channel server and transport bound and serving.
pub struct FarmerNode {
    farmer: Arc<Farmer>,
    channel: Arc<ChannelServer>,
    transport: Arc<TransportServer>,
}

impl FarmerNode {
    /// Binds the channel server on `listen` and the transport on the same
    /// interface at `transport_port`, registers the responders, and starts
    /// serving until the process stops.
    pub async fn start(
        listen: SocketAddr,
        transport_port: u16,
        config: SessionConfig,
        ctx: Arc<ProcessContext>,
        scheme: Arc<dyn ProofScheme>,
    ) -> Result<Self, SessionError> {
        tokio::fs::create_dir_all(&config.download_dir).await?;

        let transport = TransportServer::bind(
            SocketAddr::new(listen.ip(), transport_port),
            config.download_dir.clone(),
            ctx.child_token(),
        )
        .await?;

        let registry = Arc::new(ChannelRegistry::new());
        let channel = ChannelServer::bind(listen, Arc::clone(&registry), ctx.child_token()).await?;

        let peer_location = format!("{}:{}", config.advertise_host, channel.local_addr().port());
        let farmer = Farmer::new(config, ctx, scheme, Arc::clone(&transport), peer_location);
        farmer.register(&registry);

        tokio::spawn({
            let transport = Arc::clone(&transport);
            async move {
                if let Err(e) = transport.run().await {
                    error!("transport server stopped: {e}");
                }
            }
        });
        tokio::spawn({
            let channel = Arc::clone(&channel);
            async move {
                if let Err(e) = channel.run().await {
                    error!("channel server stopped: {e}");
                }
            }
        });

        info!(
            channel = %channel.local_addr(),
            transport = %transport.local_addr(),
            "farmer ready"
        );
        Ok(Self {
            farmer,
            channel,
            transport,
        })
    }

    pub fn farmer(&self) -> &Arc<Farmer> {
        &self.farmer
    }

    pub fn channel_addr(&self) -> SocketAddr {
        self.channel.local_addr()
    }

    pub fn transport_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storjdemo_heartbeat::MerkleScheme;
    use storjdemo_protocol::ChannelKind;
    use tokio_util::sync::CancellationToken;

    async fn farmer(dir: &std::path::Path) -> (Arc<Farmer>, ChannelRegistry, Arc<ProcessContext>) {
        let ctx = Arc::new(ProcessContext::new());
        let transport = TransportServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            dir.to_path_buf(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        let config = SessionConfig {
            download_dir: dir.to_path_buf(),
            ..SessionConfig::default()
        };
        let farmer = Farmer::new(
            config,
            Arc::clone(&ctx),
            Arc::new(MerkleScheme::default()),
            transport,
            "127.0.0.1:1".into(),
        );
        let registry = ChannelRegistry::new();
        farmer.register(&registry);
        (farmer, registry, ctx)
    }

    #[tokio::test]
    async fn duplicate_handoff_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (farmer, registry, _) = farmer(dir.path()).await;

        assert!(registry.open(ChannelKind::Handoff, "s1").is_ok());
        assert_eq!(farmer.session_count(), 1);

        let err = registry.open(ChannelKind::Handoff, "s1").err().unwrap();
        assert_eq!(err.code(), 403);
    }

    #[tokio::test]
    async fn challenge_needs_completed_handoff() {
        let dir = tempfile::tempdir().unwrap();
        let (_farmer, registry, _) = farmer(dir.path()).await;

        let err = registry.open(ChannelKind::Challenge, "nobody").err().unwrap();
        assert_eq!(err.code(), 403);

        let _handoff = registry.open(ChannelKind::Handoff, "s1").ok().unwrap();
        let err = registry.open(ChannelKind::Challenge, "s1").err().unwrap();
        assert!(err.to_string().contains("not completed"));
    }

    #[tokio::test]
    async fn handoff_step_one_reports_peer_location() {
        let dir = tempfile::tempdir().unwrap();
        let (_farmer, registry, _) = farmer(dir.path()).await;

        let mut responder = registry.open(ChannelKind::Handoff, "s1").ok().unwrap();
        let req = Frame::request("s1", HandoffStep::Request, &serde_json::json!({})).unwrap();
        let reply = responder.respond(&req).await.unwrap().unwrap();
        let loc: PeerLocation = reply.require_payload().unwrap();
        assert_eq!(loc.peer_location, "127.0.0.1:1");
    }

    #[tokio::test]
    async fn accept_files_registers_identities_until_channel_drops() {
        let dir = tempfile::tempdir().unwrap();
        let (farmer, registry, _) = farmer(dir.path()).await;
        let file = storjdemo_transfer::digest_bytes(b"file");
        let tag = storjdemo_transfer::digest_bytes(b"tag");

        let mut responder = registry.open(ChannelKind::Handoff, "s1").ok().unwrap();
        let step1 = Frame::request("s1", HandoffStep::Request, &serde_json::json!({})).unwrap();
        responder.respond(&step1).await.unwrap();

        let step2 = Frame::request(
            "s1",
            HandoffStep::AcceptFiles,
            &RegisterFiles {
                file_identity_hex: file,
                tag_identity_hex: tag,
            },
        )
        .unwrap();
        let reply = responder.respond(&step2).await.unwrap().unwrap();
        let endpoint: TransportEndpoint = reply.require_payload().unwrap();
        assert_eq!(endpoint.transport_ip, "127.0.0.1");
        assert_eq!(endpoint.transport_port, farmer.transport.port());
        assert!(farmer.transport.is_registered(&file));
        assert!(farmer.transport.is_registered(&tag));

        let session = farmer.session("s1").unwrap();
        assert_eq!(session.file_id(), Some(file));
        assert_eq!(session.transfer_outcome(), TransferOutcome::Pending);

        drop(responder);
        assert!(!farmer.transport.is_registered(&file));
        assert!(!farmer.transport.is_registered(&tag));
        assert!(session.is_failed());
    }

    #[tokio::test]
    async fn handoff_closed_before_files_fails_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let (farmer, registry, ctx) = farmer(dir.path()).await;

        let mut responder = registry.open(ChannelKind::Handoff, "s1").ok().unwrap();
        let step1 = Frame::request("s1", HandoffStep::Request, &serde_json::json!({})).unwrap();
        responder.respond(&step1).await.unwrap();
        drop(responder);

        let session = farmer.session("s1").unwrap();
        assert!(session.is_failed());
        assert_eq!(session.file_id(), None);
        let err = registry.open(ChannelKind::Challenge, "s1").err().unwrap();
        assert!(err.to_string().contains("has failed"));
        assert!(ctx.is_healthy());
    }

    #[tokio::test]
    async fn sessions_expecting_the_same_files_keep_their_own_registrations() {
        let dir = tempfile::tempdir().unwrap();
        let (farmer, registry, _) = farmer(dir.path()).await;
        let file = storjdemo_transfer::digest_bytes(b"file");
        let tag = storjdemo_transfer::digest_bytes(b"tag");

        let mut responders = Vec::new();
        for id in ["s1", "s2"] {
            let mut responder = registry.open(ChannelKind::Handoff, id).ok().unwrap();
            let step1 = Frame::request(id, HandoffStep::Request, &serde_json::json!({})).unwrap();
            responder.respond(&step1).await.unwrap();
            let step2 = Frame::request(
                id,
                HandoffStep::AcceptFiles,
                &RegisterFiles {
                    file_identity_hex: file,
                    tag_identity_hex: tag,
                },
            )
            .unwrap();
            responder.respond(&step2).await.unwrap().unwrap();
            responders.push(responder);
        }

        // s1 goes away; s2 still expects both files.
        responders.remove(0);
        assert!(farmer.session("s1").unwrap().is_failed());
        assert!(!farmer.session("s2").unwrap().is_failed());
        assert!(farmer.transport.is_registered(&file));
        assert!(farmer.transport.is_registered(&tag));

        responders.clear();
        assert!(!farmer.transport.is_registered(&file));
        assert!(!farmer.transport.is_registered(&tag));
    }

    #[tokio::test]
    async fn invalid_verdict_fails_session_and_health() {
        let dir = tempfile::tempdir().unwrap();
        let (farmer, registry, ctx) = farmer(dir.path()).await;

        // Give s1 stored material without running a transfer.
        let _handoff = registry.open(ChannelKind::Handoff, "s1").ok().unwrap();
        let session = farmer.session("s1").unwrap();
        session
            .material
            .set(CycleMaterial {
                public: PublicParams(serde_json::json!({})),
                tag_path: dir.path().join("tag"),
                file_path: dir.path().join("file"),
            })
            .unwrap();
        assert!(session.is_ready());

        let responder = ChallengeResponder {
            farmer: Arc::clone(&farmer),
            session: Arc::clone(&session),
        };
        let verdict =
            Frame::request("s1", ChallengeStep::ReceiveResult, &ProofVerdict { valid: false })
                .unwrap();
        responder.receive_result(&verdict).unwrap();

        assert!(session.is_failed());
        assert!(!ctx.is_healthy());
        assert!(registry.open(ChannelKind::Challenge, "s1").is_err());
    }
}
