use anyhow::Result;
use chrono::Utc;
use flow_sensor_core::ConnectionBatch;
use flow_sensor_manager::{HostLedger, HostRegistry, Metrics, Superseded};
use futures::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncRead, net::TcpListener};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, info_span, instrument, warn, Instrument};

/// Bounds the size of a single message, and so of a single batch.
const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// A message sent by a node collector.
///
/// A session starts with a `register` message naming the collector's host, which is followed by
/// any number of `connections` batches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorMessage {
    Register { hostname: String },
    Connections(ConnectionBatch),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("collector sent connections before registering")]
    NotRegistered,

    #[error("collector is already registered")]
    AlreadyRegistered,

    #[error("invalid message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to read message: {0}")]
    Read(#[from] LinesCodecError),

    #[error(transparent)]
    Superseded(#[from] Superseded),
}

/// Accepts collector sessions on `listener` until `drain` is signaled.
#[instrument(skip_all, fields(addr = ?listener.local_addr().ok()))]
pub async fn serve(
    listener: TcpListener,
    registry: HostRegistry,
    metrics: Metrics,
    drain: drain::Watch,
) -> Result<()> {
    info!("Collector server listening");
    let shutdown = drain.clone().signaled();
    tokio::pin!(shutdown);

    loop {
        let (socket, client) = tokio::select! {
            res = listener.accept() => match res {
                Ok(accepted) => accepted,
                Err(error) => {
                    warn!(%error, "Failed to accept collector connection");
                    continue;
                }
            },
            _ = &mut shutdown => {
                debug!("Shutting down");
                return Ok(());
            }
        };

        let session = Session::new(registry.clone(), metrics.clone());
        tokio::spawn(
            session
                .run(socket, drain.clone())
                .instrument(info_span!("session", %client)),
        );
    }
}

/// A single collector's connection.
#[derive(Debug)]
pub(crate) struct Session {
    registry: HostRegistry,
    metrics: Metrics,
}

// === impl Session ===

impl Session {
    pub(crate) fn new(registry: HostRegistry, metrics: Metrics) -> Self {
        Self { registry, metrics }
    }

    /// Reads messages from `io` until the collector disconnects, the session fails, or `drain` is
    /// signaled.
    pub(crate) async fn run<S>(self, io: S, drain: drain::Watch)
    where
        S: AsyncRead + Unpin,
    {
        let mut lines = FramedRead::new(io, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let shutdown = drain.signaled();
        tokio::pin!(shutdown);

        let hostname = tokio::select! {
            res = next_message(&mut lines) => match res {
                Ok(Some(CollectorMessage::Register { hostname })) => hostname,
                Ok(Some(CollectorMessage::Connections(_))) => {
                    warn!(error = %ProtocolError::NotRegistered, "Closing session");
                    return;
                }
                Ok(None) => return,
                Err(error) => {
                    warn!(%error, "Closing session");
                    return;
                }
            },
            _ = &mut shutdown => return,
        };

        let (ledger, sequence) = self.registry.register_collector(&hostname);
        info!(%hostname, sequence, "Collector registered");

        let res = tokio::select! {
            res = self.process(&ledger, sequence, &mut lines) => res,
            _ = &mut shutdown => Ok(()),
        };
        match res {
            Ok(()) => debug!(%hostname, sequence, "Collector disconnected"),
            Err(ProtocolError::Superseded(error)) => {
                // A newer session owns the ledger; leave it to that session to unregister.
                self.metrics.inc_superseded();
                info!(%error, "Closing superseded session");
                return;
            }
            Err(error) => warn!(%hostname, sequence, %error, "Closing session"),
        }
        self.registry.unregister_collector(&hostname, sequence);
    }

    async fn process<S>(
        &self,
        ledger: &HostLedger,
        sequence: u64,
        lines: &mut FramedRead<S, LinesCodec>,
    ) -> Result<(), ProtocolError>
    where
        S: AsyncRead + Unpin,
    {
        while let Some(msg) = next_message(lines).await? {
            match msg {
                CollectorMessage::Connections(batch) => {
                    ledger.process(&batch, Utc::now(), sequence)?;
                }
                CollectorMessage::Register { .. } => return Err(ProtocolError::AlreadyRegistered),
            }
        }
        Ok(())
    }
}

/// Reads the next non-empty message, or `None` once the collector has disconnected.
async fn next_message<S>(
    lines: &mut FramedRead<S, LinesCodec>,
) -> Result<Option<CollectorMessage>, ProtocolError>
where
    S: AsyncRead + Unpin,
{
    while let Some(line) = lines.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        return Ok(Some(serde_json::from_str(&line)?));
    }
    Ok(None)
}
