//! Unix socket server for local admin commands.
//!
//! One JSON command per line in, one JSON response per line out:
//!
//! ```text
//! {"cmd":"register","value":{"doc":"v1"}}
//! {"status":"ok","data":{"id":"0190…","value":{"doc":"v1"},…}}
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aegis_ledger::generate_anchor_id;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::node::NodeContext;

/// Admin command sent over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Health check
    Ping,
    Metrics,
    Governor,
    Pressure,
    /// All peers, stale included
    Peers,
    /// Register an anchor; a fresh id is generated when none is given
    Register {
        anchor_id: Option<String>,
        value: Value,
        #[serde(default)]
        metadata: BTreeMap<String, Value>,
    },
    Lookup { anchor_id: String },
    Verify { anchor_id: String, claim: Value },
    Recover { anchor_id: String },
    VerifyChain,
}

/// Response from admin command.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdminResponse {
    Ok { data: Value },
    Error { error: String },
    Pong,
}

impl AdminResponse {
    fn data<T: Serialize>(value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(data) => AdminResponse::Ok { data },
            Err(e) => AdminResponse::Error { error: e.to_string() },
        }
    }

    fn from_result<T: Serialize, E: std::fmt::Display>(result: std::result::Result<T, E>) -> Self {
        match result {
            Ok(v) => Self::data(v),
            Err(e) => AdminResponse::Error { error: e.to_string() },
        }
    }

    fn disabled(subsystem: &str) -> Self {
        AdminResponse::Error {
            error: format!("{} is disabled", subsystem),
        }
    }
}

/// Admin socket server.
pub struct AdminSocket {
    context: Arc<NodeContext>,
    listener: UnixListener,
    socket_path: PathBuf,
}

impl AdminSocket {
    /// Bind the socket, replacing a stale socket file if present.
    pub fn bind(context: Arc<NodeContext>, socket_path: &Path) -> Result<Self> {
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)?;
        info!("Admin socket listening on {}", socket_path.display());
        Ok(Self {
            context,
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let context = Arc::clone(&self.context);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, context).await {
                                error!("Admin connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept admin connection: {}", e),
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!("Admin socket stopped");
    }
}

async fn handle_connection(stream: UnixStream, context: Arc<NodeContext>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<AdminCommand>(&line) {
            Ok(cmd) => execute_command(cmd, &context).await,
            Err(e) => AdminResponse::Error {
                error: format!("Invalid command: {}", e),
            },
        };

        let response_json = serde_json::to_string(&response)? + "\n";
        writer.write_all(response_json.as_bytes()).await?;
        line.clear();
    }

    Ok(())
}

pub async fn execute_command(cmd: AdminCommand, context: &NodeContext) -> AdminResponse {
    let ledger = context.ledger();
    match cmd {
        AdminCommand::Ping => AdminResponse::Pong,

        AdminCommand::Metrics => {
            AdminResponse::data(context.refresh_metrics().await)
        }

        AdminCommand::Governor => match context.governor_state().await {
            Some(state) => AdminResponse::data(state),
            None => AdminResponse::disabled("governor"),
        },

        AdminCommand::Pressure => match context.pressure_state() {
            Some(state) => AdminResponse::data(state),
            None => AdminResponse::disabled("backpressure"),
        },

        AdminCommand::Peers => {
            AdminResponse::data(context.all_peers().await)
        }

        AdminCommand::Register {
            anchor_id,
            value,
            metadata,
        } => {
            let anchor_id = anchor_id.unwrap_or_else(generate_anchor_id);
            let result = ledger.register(&anchor_id, value, metadata);
            if let Err(e) = &result {
                warn!(anchor_id = %anchor_id, "Admin register failed: {}", e);
            }
            AdminResponse::from_result(result.map(|r| r.record().clone()))
        }

        AdminCommand::Lookup { anchor_id } => AdminResponse::from_result(ledger.lookup(&anchor_id)),

        AdminCommand::Verify { anchor_id, claim } => AdminResponse::from_result(ledger.verify(&anchor_id, &claim)),

        AdminCommand::Recover { anchor_id } => AdminResponse::from_result(ledger.recover(&anchor_id)),

        AdminCommand::VerifyChain => AdminResponse::from_result(context.audit_chain()),
    }
}
