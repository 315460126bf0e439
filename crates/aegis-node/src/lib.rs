//! Aegis Node - wiring for the federated governance plane.
//!
//! Builds a [`NodeContext`] from [`NodeConfig`] and runs the control loops
//! around it:
//!
//! - **Federation**: summary endpoint plus the peer synchronizer
//! - **Governor**: generativity and the trust gate, fed by [`NodeTelemetry`]
//! - **Backpressure**: admission control for expensive work
//! - **Ledger audit**: periodic chain verification feeding the RIS
//! - **Admin Socket**: Unix socket for local anchor and status commands
//!
//! # Example
//!
//! ```no_run
//! use aegis_node::{Node, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = Node::start(NodeConfig::from_env()?).await?;
//!     node.run_until_ctrl_c().await?;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod config;
pub mod error;
pub mod metrics;
pub mod node;
pub mod telemetry;

pub use admin::{execute_command, AdminCommand, AdminResponse, AdminSocket};
pub use config::{FeatureToggles, NodeConfig, ResonanceConfig};
pub use error::{Error, Result};
pub use metrics::{MetricsSnapshot, NodeMetrics};
pub use node::{Node, NodeContext};
pub use telemetry::{LoadGauge, NodeTelemetry};
