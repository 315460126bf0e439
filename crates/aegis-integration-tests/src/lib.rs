//! Shared fixtures for the cross-crate scenarios under `tests/`.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use aegis_node::NodeConfig;
use aegis_peers::SyncConfig;

/// Loopback node with every loop ticking in milliseconds.
pub fn fast_config() -> NodeConfig {
    let mut config = NodeConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        audit_interval: Duration::from_millis(20),
        metrics_interval: Duration::from_millis(20),
        sync: SyncConfig {
            interval: Duration::from_millis(20),
            timeout: Duration::from_millis(500),
            backoff_base: Duration::from_millis(10),
            backoff_ceiling: Duration::from_millis(40),
            jitter: 0.1,
            max_consecutive_failures: 2,
            expiry_interval: Duration::from_millis(50),
            ..SyncConfig::default()
        },
        ..NodeConfig::default()
    };
    config.resonance.capacity = 16;
    config.resonance.min_samples = 2;
    config.resonance.sample_interval = Duration::from_millis(20);
    config.governor.tick_interval = Duration::from_millis(10);
    config.backpressure.tick_interval = Duration::from_millis(10);
    config
}

/// Poll `check` every 10ms until it holds or `within` elapses.
pub async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
