fn main() {
    println!("Run `cargo test -p e2e` to execute the end-to-end scenarios.");
}

#[cfg(test)]
mod support {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use storjdemo_data_channel::TransportClient;
    use storjdemo_heartbeat::{
        Challenge, CycleState, Encoded, MerkleScheme, Proof, ProofScheme, PublicParams,
        SchemeError,
    };
    use storjdemo_protocol::ContentId;
    use storjdemo_session::{
        FarmerNode, FileSender, ProcessContext, SendFuture, SessionConfig, SessionError,
    };
    use tokio_util::sync::CancellationToken;

    pub fn config(root: &Path, interval: Duration) -> SessionConfig {
        SessionConfig {
            download_dir: root.join("download"),
            work_dir: root.join("upload"),
            challenge_interval: interval,
            initial_delay: Duration::ZERO,
            transfer_timeout: Duration::from_secs(10),
            ..SessionConfig::default()
        }
    }

    pub async fn start_farmer(root: &Path) -> (FarmerNode, Arc<ProcessContext>) {
        let ctx = Arc::new(ProcessContext::new());
        let node = FarmerNode::start(
            "127.0.0.1:0".parse().unwrap(),
            0,
            config(root, Duration::from_secs(30)),
            Arc::clone(&ctx),
            Arc::new(MerkleScheme::default()),
        )
        .await
        .unwrap();
        (node, ctx)
    }

    /// Writes `len` bytes of deterministic content to `root/name`.
    pub fn write_input(root: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
        let content: Vec<u8> = (0..len).map(|i| (i * 31 % 253) as u8).collect();
        let path = root.join(name);
        std::fs::write(&path, &content).unwrap();
        (path, content)
    }

    /// Polls `cond` every 10 ms until it holds or `limit` passes.
    pub async fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond()
    }

    /// Delivers the last file of every batch with one byte flipped, under
    /// its original identity.
    pub struct TamperingSender {
        pub scratch: PathBuf,
    }

    impl FileSender for TamperingSender {
        fn send<'a>(
            &'a self,
            endpoint: &'a str,
            files: &'a [(PathBuf, ContentId)],
            cancel: &'a CancellationToken,
        ) -> SendFuture<'a> {
            Box::pin(async move {
                let mut batch = files.to_vec();
                if let Some((path, id)) = batch.pop() {
                    let mut bytes = tokio::fs::read(&path).await?;
                    if let Some(b) = bytes.first_mut() {
                        *b ^= 0xff;
                    }
                    let tampered = self.scratch.join("tampered");
                    tokio::fs::write(&tampered, &bytes).await?;
                    batch.push((tampered, id));
                }
                TransportClient::send_files(endpoint, &batch, cancel)
                    .await
                    .map_err(SessionError::from)?;
                Ok(())
            })
        }
    }

    /// Merkle scheme whose `fail_at`-th verification rejects the proof.
    pub struct FailingVerifier {
        inner: MerkleScheme,
        verifications: AtomicUsize,
        fail_at: usize,
    }

    impl FailingVerifier {
        pub fn new(fail_at: usize) -> Arc<Self> {
            Arc::new(Self {
                inner: MerkleScheme::default(),
                verifications: AtomicUsize::new(0),
                fail_at,
            })
        }

        pub fn verifications(&self) -> usize {
            self.verifications.load(Ordering::SeqCst)
        }
    }

    impl ProofScheme for FailingVerifier {
        fn encode(&self, file: &[u8]) -> Result<Encoded, SchemeError> {
            self.inner.encode(file)
        }

        fn gen_challenge(&self, state: &CycleState) -> Result<Challenge, SchemeError> {
            self.inner.gen_challenge(state)
        }

        fn prove(
            &self,
            public: &PublicParams,
            file: &[u8],
            challenge: &Challenge,
            tag: &[u8],
        ) -> Result<Proof, SchemeError> {
            self.inner.prove(public, file, challenge, tag)
        }

        fn verify(&self, state: &CycleState, challenge: &Challenge, proof: &Proof) -> bool {
            let n = self.verifications.fetch_add(1, Ordering::SeqCst) + 1;
            n != self.fail_at && self.inner.verify(state, challenge, proof)
        }
    }
}

#[cfg(test)]
mod scenarios {
    use std::sync::Arc;
    use std::time::Duration;

    use storjdemo_heartbeat::MerkleScheme;
    use storjdemo_session::{ProcessContext, SessionError, TcpFileSender, Uploader};
    use storjdemo_transfer::{TransferOutcome, digest_file};

    use crate::support::*;

    #[tokio::test]
    async fn handoff_of_10kb_file_preserves_identity_and_health() {
        let dir = tempfile::tempdir().unwrap();
        let (farmer, farmer_ctx) = start_farmer(dir.path()).await;
        let (file, _) = write_input(dir.path(), "input.bin", 10 * 1024);

        let ctx = Arc::new(ProcessContext::new());
        let uploader = Uploader::new(
            config(dir.path(), Duration::from_millis(50)),
            Arc::clone(&ctx),
            Arc::new(MerkleScheme::default()),
            Arc::new(TcpFileSender),
        );
        let session = uploader
            .hand_off(&farmer.channel_addr().to_string(), &file)
            .await
            .unwrap();

        let stored = farmer.farmer().session(session.id()).unwrap();
        assert_eq!(stored.transfer_outcome(), TransferOutcome::Succeeded);
        let material = stored.material().unwrap();
        let declared = session.file_id().unwrap();
        assert_eq!(digest_file(&material.file_path).unwrap(), declared);
        assert_eq!(stored.file_id(), Some(declared));

        assert!(eventually(Duration::from_secs(10), || session.valid_cycles() >= 3).await);
        assert!(stored.proofs_served() >= 3);

        assert_eq!(ctx.exit_code(), 0);
        assert_eq!(farmer_ctx.exit_code(), 0);
        ctx.stop();
        farmer_ctx.stop();
    }

    #[tokio::test]
    async fn tampered_transfer_is_rejected_and_never_challenged() {
        let dir = tempfile::tempdir().unwrap();
        let (farmer, farmer_ctx) = start_farmer(dir.path()).await;
        let (file, _) = write_input(dir.path(), "input.bin", 10 * 1024);

        let ctx = Arc::new(ProcessContext::new());
        let uploader = Uploader::new(
            config(dir.path(), Duration::from_millis(20)),
            Arc::clone(&ctx),
            Arc::new(MerkleScheme::default()),
            Arc::new(TamperingSender {
                scratch: dir.path().to_path_buf(),
            }),
        );
        let err = uploader
            .hand_off(&farmer.channel_addr().to_string(), &file)
            .await
            .unwrap_err();
        let SessionError::HandoffRejected(id) = err else {
            panic!("expected a rejected handoff, got {err}");
        };

        let stored = farmer.farmer().session(&id).unwrap();
        assert_eq!(stored.transfer_outcome(), TransferOutcome::Corrupted);
        assert!(stored.is_failed());
        assert!(uploader.session(&id).unwrap().is_failed());
        assert_eq!(uploader.scheduler().running(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(stored.proofs_served(), 0);
        assert!(ctx.is_healthy());
        assert!(farmer_ctx.is_healthy());
        farmer_ctx.stop();
    }

    #[tokio::test]
    async fn eleventh_invalid_proof_halts_the_uploader_only() {
        let dir = tempfile::tempdir().unwrap();
        let (farmer, farmer_ctx) = start_farmer(dir.path()).await;
        let (file, _) = write_input(dir.path(), "input.bin", 10 * 1024);

        let scheme = FailingVerifier::new(11);
        let ctx = Arc::new(ProcessContext::new());
        let uploader = Uploader::new(
            config(dir.path(), Duration::from_millis(20)),
            Arc::clone(&ctx),
            scheme.clone(),
            Arc::new(TcpFileSender),
        );
        let session = uploader
            .hand_off(&farmer.channel_addr().to_string(), &file)
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(30), ctx.stopped_or_failed())
            .await
            .unwrap();
        assert_eq!(ctx.exit_code(), 1);
        assert!(session.is_failed());
        assert_eq!(session.valid_cycles(), 10);
        assert!(
            eventually(Duration::from_secs(5), || !uploader
                .scheduler()
                .is_running(session.id()))
            .await
        );

        // No further challenges after the halt.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(scheme.verifications(), 11);

        // The farmer saw the verdict but nobody asked it to stop.
        let stored = farmer.farmer().session(session.id()).unwrap();
        assert_eq!(stored.proofs_served(), 11);
        assert!(stored.is_failed());
        assert!(!farmer_ctx.is_stopped());
        farmer_ctx.stop();
    }

    fn challenging_uploader(root: &std::path::Path) -> (Uploader, Arc<ProcessContext>) {
        let ctx = Arc::new(ProcessContext::new());
        let uploader = Uploader::new(
            config(root, Duration::from_millis(30)),
            Arc::clone(&ctx),
            Arc::new(MerkleScheme::default()),
            Arc::new(TcpFileSender),
        );
        (uploader, ctx)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_handoffs_of_the_same_file_both_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let (farmer, farmer_ctx) = start_farmer(dir.path()).await;
        let (file, _) = write_input(dir.path(), "input.bin", 300 * 1024);
        let addr = farmer.channel_addr().to_string();

        let (a, a_ctx) = challenging_uploader(dir.path());
        let (b, b_ctx) = challenging_uploader(dir.path());
        let (sa, sb) = tokio::join!(a.hand_off(&addr, &file), b.hand_off(&addr, &file));
        let (sa, sb) = (sa.unwrap(), sb.unwrap());
        assert_ne!(sa.id(), sb.id());
        assert_eq!(sa.file_id(), sb.file_id());

        for session in [&sa, &sb] {
            let stored = farmer.farmer().session(session.id()).unwrap();
            assert_eq!(stored.transfer_outcome(), TransferOutcome::Succeeded);
            assert!(stored.is_ready());
        }

        assert!(
            eventually(Duration::from_secs(10), || sa.valid_cycles() >= 2
                && sb.valid_cycles() >= 2)
            .await
        );
        assert!(a_ctx.is_healthy() && b_ctx.is_healthy() && farmer_ctx.is_healthy());
        a_ctx.stop();
        b_ctx.stop();
        farmer_ctx.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_uploaders_get_their_own_proofs() {
        let dir = tempfile::tempdir().unwrap();
        let (farmer, farmer_ctx) = start_farmer(dir.path()).await;
        let (first, _) = write_input(dir.path(), "first.bin", 10 * 1024);
        let (second, _) = write_input(dir.path(), "second.bin", 24 * 1024 + 7);
        let addr = farmer.channel_addr().to_string();

        let (a, a_ctx) = challenging_uploader(&dir.path().join("a"));
        let (b, b_ctx) = challenging_uploader(&dir.path().join("b"));
        let (sa, sb) = tokio::join!(a.hand_off(&addr, &first), b.hand_off(&addr, &second));
        let (sa, sb) = (sa.unwrap(), sb.unwrap());
        assert_ne!(sa.file_id(), sb.file_id());

        let stored_a = farmer.farmer().session(sa.id()).unwrap();
        let stored_b = farmer.farmer().session(sb.id()).unwrap();
        assert_eq!(stored_a.transfer_outcome(), TransferOutcome::Succeeded);
        assert_eq!(stored_b.transfer_outcome(), TransferOutcome::Succeeded);
        assert_eq!(stored_a.file_id(), sa.file_id());
        assert_eq!(stored_b.file_id(), sb.file_id());
        assert_eq!(
            digest_file(&stored_b.material().unwrap().file_path).unwrap(),
            sb.file_id().unwrap()
        );

        assert!(
            eventually(Duration::from_secs(10), || sa.valid_cycles() >= 3
                && sb.valid_cycles() >= 3)
            .await
        );
        // Each farmer session answered its own uploader's challenges.
        assert!(stored_a.proofs_served() >= sa.valid_cycles().min(3));
        assert!(stored_b.proofs_served() >= sb.valid_cycles().min(3));

        // Stopping one uploader leaves the other's cycle running.
        a_ctx.stop();
        let served_b = stored_b.proofs_served();
        assert!(
            eventually(Duration::from_secs(10), || stored_b.proofs_served() > served_b + 2)
                .await
        );
        assert!(!stored_b.is_failed());
        assert!(b_ctx.is_healthy() && farmer_ctx.is_healthy());
        b_ctx.stop();
        farmer_ctx.stop();
    }
}

#[cfg(test)]
mod wire {
    use std::fs;
    use std::path::PathBuf;

    use storjdemo_protocol::messages::{HandoffResult, ProofVerdict, RegisterFiles};
    use storjdemo_protocol::{ChallengeStep, ChannelKind, Frame, HandoffStep, StepKind};

    fn load_fixture(name: &str) -> String {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    fn parse(name: &str) -> Frame {
        serde_json::from_str(&load_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    #[test]
    fn accept_files_request() {
        let frame = parse("handoff_accept_files.json");
        assert_eq!(frame.channel, ChannelKind::Handoff);
        assert_eq!(
            HandoffStep::from_name(&frame.step),
            Some(HandoffStep::AcceptFiles)
        );
        let req: RegisterFiles = frame.require_payload().unwrap();
        assert_eq!(
            req.file_identity_hex.to_hex(),
            "9F86D081884C7D659A2FEAA0C55AD015A3BF4F1B2B0B822CD15D6C15B0F00A08"
        );

        // Re-encoding keeps the field names and the upper-hex identities.
        let reencoded = serde_json::to_value(&frame).unwrap();
        let original: serde_json::Value =
            serde_json::from_str(&load_fixture("handoff_accept_files.json")).unwrap();
        assert_eq!(reencoded, original);
    }

    #[test]
    fn rejected_handoff_result() {
        let frame = parse("handoff_result_rejected.json");
        let result: HandoffResult = frame.require_payload().unwrap();
        assert!(!result.is_success());
        assert_eq!(result, HandoffResult::rejected());
    }

    #[test]
    fn invalid_verdict() {
        let frame = parse("challenge_receive_result.json");
        assert_eq!(frame.channel, ChannelKind::Challenge);
        assert_eq!(
            ChallengeStep::from_name(&frame.step),
            Some(ChallengeStep::ReceiveResult)
        );
        let verdict: ProofVerdict = frame.require_payload().unwrap();
        assert!(!verdict.valid);
    }

    #[test]
    fn error_frame_for_unknown_channel() {
        let frame = parse("error_unknown_channel.json");
        assert_eq!(frame.channel, ChannelKind::Unknown);
        assert!(frame.payload.is_none());
        let err = frame.error.unwrap();
        assert_eq!(err.code, 404);
    }
}
