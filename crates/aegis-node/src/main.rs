//! Aegis node binary.

use aegis_node::{Node, NodeConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aegis_node=info,aegis=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Aegis node");

    let config = NodeConfig::from_env()?;
    let node = Node::start(config).await?;
    node.run_until_ctrl_c().await?;

    Ok(())
}
