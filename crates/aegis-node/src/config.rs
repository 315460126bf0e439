//! Node configuration.
//!
//! Values come from, in increasing priority: built-in defaults, an optional
//! JSON file named by `AEGIS_CONFIG`, and individual `AEGIS_*` variables.
//! Durations in variables are milliseconds.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use aegis_backpressure::BackpressureConfig;
use aegis_governor::GovernorConfig;
use aegis_ledger::LedgerBackend;
use aegis_peers::SyncConfig;
use aegis_resonance::{LatencyMode, MemoryResonanceWindow, DEFAULT_MIN_SAMPLES, DEFAULT_WINDOW_CAPACITY};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Turns each subsystem on or off. A disabled subsystem is replaced by its
/// no-op counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    /// Peer sync and the summary endpoint.
    pub federation: bool,
    pub governor: bool,
    pub backpressure: bool,
    /// Periodic chain verification.
    pub ledger_audit: bool,
    /// Memory resonance sampling. Off reports neutral stability.
    pub resonance: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            federation: true,
            governor: true,
            backpressure: true,
            ledger_audit: true,
            resonance: true,
        }
    }
}

/// Memory resonance window settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResonanceConfig {
    pub capacity: usize,
    /// Below this many samples stability reports the neutral default.
    pub min_samples: usize,
    pub sample_interval: Duration,
}

impl Default for ResonanceConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_WINDOW_CAPACITY,
            min_samples: DEFAULT_MIN_SAMPLES,
            sample_interval: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Summary endpoint for peers.
    pub listen_addr: SocketAddr,
    pub bootstrap_peers: Vec<String>,
    /// Local admin socket. None disables it.
    pub admin_socket: Option<PathBuf>,
    pub ledger: LedgerBackend,
    pub sign_entries: bool,
    pub latency_mode: LatencyMode,
    pub audit_interval: Duration,
    pub metrics_interval: Duration,
    pub resonance: ResonanceConfig,
    pub sync: SyncConfig,
    pub governor: GovernorConfig,
    pub backpressure: BackpressureConfig,
    pub features: FeatureToggles,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 7400)),
            bootstrap_peers: Vec::new(),
            admin_socket: None,
            ledger: LedgerBackend::Memory,
            sign_entries: true,
            latency_mode: LatencyMode::Disabled,
            audit_interval: Duration::from_secs(60),
            metrics_interval: Duration::from_secs(5),
            resonance: ResonanceConfig::default(),
            sync: SyncConfig::default(),
            governor: GovernorConfig::default(),
            backpressure: BackpressureConfig::default(),
            features: FeatureToggles::default(),
        }
    }
}

impl NodeConfig {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let mut config = match env.string("AEGIS_CONFIG") {
            Some(path) => {
                let data = std::fs::read(&path)
                    .map_err(|e| Error::Config(format!("cannot read AEGIS_CONFIG {}: {}", path, e)))?;
                serde_json::from_slice(&data)?
            }
            None => NodeConfig::default(),
        };

        set(&mut config.listen_addr, env.parse("AEGIS_LISTEN_ADDR")?);
        if let Some(peers) = env.string("AEGIS_BOOTSTRAP_PEERS") {
            config.bootstrap_peers = peers
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }
        if let Some(path) = env.string("AEGIS_ADMIN_SOCKET") {
            config.admin_socket = (!path.is_empty()).then(|| PathBuf::from(path));
        }

        if let Some(backend) = env.string("AEGIS_LEDGER_BACKEND") {
            config.ledger = match backend.as_str() {
                "memory" => LedgerBackend::Memory,
                "rocksdb" => LedgerBackend::RocksDb {
                    path: PathBuf::from(env.string("AEGIS_DATA_DIR").unwrap_or_else(|| "./aegis-data".to_string())),
                },
                other => {
                    return Err(Error::Config(format!(
                        "AEGIS_LEDGER_BACKEND must be memory or rocksdb, got {}",
                        other
                    )))
                }
            };
        }
        set(&mut config.sign_entries, env.flag("AEGIS_SIGN_ENTRIES")?);
        if let Some(mode) = env.string("AEGIS_LATENCY_MODE") {
            config.latency_mode = match mode.as_str() {
                "disabled" => LatencyMode::Disabled,
                "measured" => LatencyMode::Measured,
                other => {
                    return Err(Error::Config(format!(
                        "AEGIS_LATENCY_MODE must be disabled or measured, got {}",
                        other
                    )))
                }
            };
        }
        set(&mut config.audit_interval, env.millis("AEGIS_AUDIT_INTERVAL_MS")?);
        set(&mut config.metrics_interval, env.millis("AEGIS_METRICS_INTERVAL_MS")?);

        let r = &mut config.resonance;
        set(&mut r.capacity, env.parse("AEGIS_WINDOW_CAPACITY")?);
        set(&mut r.min_samples, env.parse("AEGIS_WINDOW_MIN_SAMPLES")?);
        set(&mut r.sample_interval, env.millis("AEGIS_SAMPLE_INTERVAL_MS")?);

        let s = &mut config.sync;
        set(&mut s.interval, env.millis("AEGIS_SYNC_INTERVAL_MS")?);
        set(&mut s.timeout, env.millis("AEGIS_SYNC_TIMEOUT_MS")?);
        set(&mut s.backoff_base, env.millis("AEGIS_BACKOFF_BASE_MS")?);
        set(&mut s.backoff_ceiling, env.millis("AEGIS_BACKOFF_CEILING_MS")?);
        set(&mut s.jitter, env.parse("AEGIS_JITTER")?);
        set(&mut s.quality_alpha, env.parse("AEGIS_QUALITY_ALPHA")?);
        set(&mut s.max_consecutive_failures, env.parse("AEGIS_MAX_FAILURES")?);
        set(&mut s.silence_period, env.millis("AEGIS_SILENCE_MS")?);

        let g = &mut config.governor;
        set(&mut g.tick_interval, env.millis("AEGIS_GOVERNOR_TICK_MS")?);
        set(&mut g.kappa, env.parse("AEGIS_KAPPA")?);
        set(&mut g.target, env.parse("AEGIS_TARGET_G0")?);
        set(&mut g.eta_min, env.parse("AEGIS_ETA_MIN")?);
        set(&mut g.eta_max, env.parse("AEGIS_ETA_MAX")?);
        set(&mut g.gate_threshold, env.parse("AEGIS_GATE_THRESHOLD")?);

        let b = &mut config.backpressure;
        set(&mut b.tick_interval, env.millis("AEGIS_BACKPRESSURE_TICK_MS")?);
        set(&mut b.soft_threshold, env.parse("AEGIS_SOFT_THRESHOLD")?);
        set(&mut b.hard_threshold, env.parse("AEGIS_HARD_THRESHOLD")?);
        set(&mut b.hard_ticks, env.parse("AEGIS_HARD_TICKS")?);
        set(&mut b.cooldown, env.millis("AEGIS_COOLDOWN_MS")?);
        set(&mut b.probe_budget, env.parse("AEGIS_PROBE_BUDGET")?);
        set(&mut b.probe_successes, env.parse("AEGIS_PROBE_SUCCESSES")?);
        set(&mut b.probe_window, env.millis("AEGIS_PROBE_WINDOW_MS")?);

        let f = &mut config.features;
        set(&mut f.federation, env.flag("AEGIS_ENABLE_FEDERATION")?);
        set(&mut f.governor, env.flag("AEGIS_ENABLE_GOVERNOR")?);
        set(&mut f.backpressure, env.flag("AEGIS_ENABLE_BACKPRESSURE")?);
        set(&mut f.ledger_audit, env.flag("AEGIS_ENABLE_AUDIT")?);
        set(&mut f.resonance, env.flag("AEGIS_ENABLE_RESONANCE")?);

        Ok(config)
    }

    /// Reject unusable values before anything starts.
    pub fn validate(&self) -> Result<()> {
        self.sync.validate()?;
        self.governor.validate()?;
        self.backpressure.validate()?;
        MemoryResonanceWindow::new(self.resonance.capacity, self.resonance.min_samples)?;

        for (name, interval) in [
            ("audit_interval", self.audit_interval),
            ("metrics_interval", self.metrics_interval),
            ("resonance.sample_interval", self.resonance.sample_interval),
        ] {
            if interval.is_zero() {
                return Err(Error::Config(format!("{} must be positive", name)));
            }
        }
        if let Some(peer) = self.bootstrap_peers.iter().find(|p| !p.contains(':')) {
            return Err(Error::Config(format!("bootstrap peer {} is not host:port", peer)));
        }
        Ok(())
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|v| {
                v.parse::<T>()
                    .map_err(|e| Error::Config(format!("invalid {} ({}): {}", key, v, e)))
            })
            .transpose()
    }

    fn millis(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.parse::<u64>(key)?.map(Duration::from_millis))
    }

    fn flag(&self, key: &str) -> Result<Option<bool>> {
        self.string(key)
            .map(|v| match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(Error::Config(format!("invalid {} ({}): expected a boolean", key, v))),
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = NodeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, NodeConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn env_overrides_apply() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("AEGIS_LISTEN_ADDR", "127.0.0.1:9100"),
            ("AEGIS_BOOTSTRAP_PEERS", "10.0.0.1:7400, 10.0.0.2:7400,"),
            ("AEGIS_KAPPA", "0.25"),
            ("AEGIS_HARD_TICKS", "7"),
            ("AEGIS_COOLDOWN_MS", "1500"),
            ("AEGIS_ENABLE_BACKPRESSURE", "off"),
            ("AEGIS_ENABLE_RESONANCE", "false"),
            ("AEGIS_LATENCY_MODE", "measured"),
            ("AEGIS_LEDGER_BACKEND", "rocksdb"),
            ("AEGIS_DATA_DIR", "/var/lib/aegis"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.bootstrap_peers, vec!["10.0.0.1:7400", "10.0.0.2:7400"]);
        assert_eq!(config.governor.kappa, 0.25);
        assert_eq!(config.backpressure.hard_ticks, 7);
        assert_eq!(config.backpressure.cooldown, Duration::from_millis(1500));
        assert!(!config.features.backpressure);
        assert!(!config.features.resonance);
        assert!(config.features.ledger_audit);
        assert_eq!(config.latency_mode, LatencyMode::Measured);
        assert_eq!(
            config.ledger,
            LedgerBackend::RocksDb {
                path: PathBuf::from("/var/lib/aegis")
            }
        );
    }

    #[test]
    fn malformed_values_fail_fast() {
        assert!(matches!(
            NodeConfig::from_lookup(lookup(&[("AEGIS_KAPPA", "fast")])),
            Err(Error::Config(_))
        ));
        assert!(NodeConfig::from_lookup(lookup(&[("AEGIS_ENABLE_GOVERNOR", "maybe")])).is_err());
        assert!(NodeConfig::from_lookup(lookup(&[("AEGIS_LEDGER_BACKEND", "sqlite")])).is_err());
    }

    #[test]
    fn validate_rejects_bad_subsystem_config() {
        let mut config = NodeConfig::default();
        config.governor.local_weight = 0.9;
        assert!(matches!(config.validate(), Err(Error::Governor(_))));

        let mut config = NodeConfig::default();
        config.resonance.capacity = 0;
        assert!(matches!(config.validate(), Err(Error::Resonance(_))));

        let mut config = NodeConfig::default();
        config.audit_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn config_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aegis.json");
        std::fs::write(&path, r#"{"sign_entries": false, "governor": {"kappa": 0.1}}"#).unwrap();

        let config = NodeConfig::from_lookup(lookup(&[
            ("AEGIS_CONFIG", path.to_str().unwrap()),
            ("AEGIS_KAPPA", "0.2"),
        ]))
        .unwrap();
        assert!(!config.sign_entries);
        assert_eq!(config.governor.kappa, 0.2);
        assert_eq!(config.governor.target, GovernorConfig::default().target);
    }
}
