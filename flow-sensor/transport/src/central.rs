use anyhow::{Context, Result};
use flow_sensor_core::FlowUpdate;
use futures::prelude::*;
use tokio::{io::AsyncWrite, net::TcpStream, sync::mpsc};
use tokio_util::codec::{FramedWrite, LinesCodec};
use tracing::{debug, info, instrument};

/// Connects to the central service at `addr` and forwards every flow update received on
/// `updates`.
///
/// Returns an error if the central service can't be reached or the connection fails. Returns
/// `Ok` once all update senders have been dropped.
#[instrument(skip(updates))]
pub async fn forward(addr: String, updates: mpsc::Receiver<FlowUpdate>) -> Result<()> {
    let socket = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    info!("Connected to central service");
    forward_to(socket, updates).await
}

/// Writes each flow update to `io` as a line of JSON.
pub async fn forward_to<W>(io: W, mut updates: mpsc::Receiver<FlowUpdate>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut lines = FramedWrite::new(io, LinesCodec::new());
    while let Some(update) = updates.recv().await {
        let line = serde_json::to_string(&update).context("failed to encode flow update")?;
        lines
            .send(line)
            .await
            .context("failed to send flow update")?;
        debug!(flows = update.flows.len(), "Forwarded flow update");
    }
    Ok(())
}
