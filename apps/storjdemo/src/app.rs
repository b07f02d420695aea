//! Wires a role to the process context and waits for it to finish.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use storjdemo_heartbeat::{MerkleScheme, ProofScheme};
use storjdemo_session::{FarmerNode, ProcessContext, TcpFileSender, Uploader};

use crate::config::NodeConfig;

fn scheme(config: &NodeConfig) -> anyhow::Result<Arc<dyn ProofScheme>> {
    Ok(Arc::new(MerkleScheme::new(config.chunk_size)?))
}

/// Runs a farmer until Ctrl-C or a failed proof. Returns the exit code.
pub async fn run_farmer(listen: SocketAddr, config: NodeConfig) -> anyhow::Result<i32> {
    let ctx = Arc::new(ProcessContext::new());
    let node = FarmerNode::start(
        listen,
        config.transport_port,
        config.session(),
        Arc::clone(&ctx),
        scheme(&config)?,
    )
    .await?;
    tracing::info!(
        channel = %node.channel_addr(),
        transport = %node.transport_addr(),
        "farmer listening"
    );

    wait(&ctx).await;
    Ok(ctx.exit_code())
}

/// Hands `file` off to `farmer` and keeps challenging it until Ctrl-C or a
/// failed proof. Returns the exit code.
pub async fn run_uploader(farmer: &str, file: &Path, config: NodeConfig) -> anyhow::Result<i32> {
    let ctx = Arc::new(ProcessContext::new());
    let uploader = Uploader::new(
        config.session(),
        Arc::clone(&ctx),
        scheme(&config)?,
        Arc::new(TcpFileSender),
    );

    let session = uploader.hand_off(farmer, file).await?;
    tracing::info!(session = %session.id(), "handoff complete, challenging farmer");

    wait(&ctx).await;
    tracing::info!(
        session = %session.id(),
        valid_cycles = session.valid_cycles(),
        "uploader stopping"
    );
    Ok(ctx.exit_code())
}

async fn wait(ctx: &ProcessContext) {
    tokio::select! {
        _ = ctx.stopped_or_failed() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
    }
    ctx.stop();
}
