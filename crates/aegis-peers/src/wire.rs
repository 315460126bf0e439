//! Summary exchange over TCP.
//!
//! One request, one reply, each a single line of JSON:
//!
//! ```text
//! → {"type":"summary_request"}
//! ← {"type":"summary","peer_id":"b3b3/…","ledger_height":12,"chain_tip":"…","timestamp":…}
//! ```

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::record::PeerSummary;
use crate::sync::SummaryClient;

/// Longest line accepted from a peer.
const MAX_LINE_BYTES: u64 = 16 * 1024;

/// Messages on the summary wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    SummaryRequest,
    Summary(PeerSummary),
    Error { reason: String },
}

impl WireMessage {
    fn to_line(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Supplies this node's own summary to peers that ask.
pub trait SummaryProvider: Send + Sync + 'static {
    fn local_summary(&self) -> PeerSummary;
}

impl<F> SummaryProvider for F
where
    F: Fn() -> PeerSummary + Send + Sync + 'static,
{
    fn local_summary(&self) -> PeerSummary {
        self()
    }
}

/// [`SummaryClient`] over a fresh TCP connection per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpSummaryClient;

impl TcpSummaryClient {
    async fn fetch(address: String) -> Result<PeerSummary> {
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|e| Error::Unreachable {
                address: address.clone(),
                reason: e.to_string(),
            })?;
        let (reader, mut writer) = stream.into_split();

        writer.write_all(&WireMessage::SummaryRequest.to_line()?).await?;

        let mut reader = BufReader::new(reader.take(MAX_LINE_BYTES));
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(Error::Protocol(format!("{} closed without a reply", address)));
        }

        match serde_json::from_str::<WireMessage>(line.trim_end())? {
            WireMessage::Summary(summary) => Ok(summary),
            WireMessage::Error { reason } => Err(Error::Protocol(format!("{} refused: {}", address, reason))),
            WireMessage::SummaryRequest => Err(Error::Protocol(format!("{} echoed a request", address))),
        }
    }
}

impl SummaryClient for TcpSummaryClient {
    fn fetch_summary(&self, address: &str) -> impl Future<Output = Result<PeerSummary>> + Send {
        Self::fetch(address.to_string())
    }
}

/// Answer summary requests on `listener` until shutdown.
pub async fn serve_summaries<P: SummaryProvider>(
    listener: TcpListener,
    provider: Arc<P>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("Summary endpoint listening on {}", addr);
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let provider = Arc::clone(&provider);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, provider).await {
                            warn!("Summary connection error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => error!("Accept error: {}", e),
            },
            _ = shutdown.changed() => break,
        }
    }
    debug!("Summary endpoint stopped");
}

async fn handle_connection<P: SummaryProvider>(stream: TcpStream, provider: Arc<P>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader.take(MAX_LINE_BYTES));
    let mut line = String::new();

    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }

    let reply = match serde_json::from_str::<WireMessage>(line.trim_end()) {
        Ok(WireMessage::SummaryRequest) => WireMessage::Summary(provider.local_summary()),
        Ok(other) => WireMessage::Error {
            reason: format!("unexpected message: {:?}", other),
        },
        Err(e) => WireMessage::Error {
            reason: format!("malformed request: {}", e),
        },
    };

    writer.write_all(&reply.to_line()?).await?;
    writer.flush().await?;
    Ok(())
}
