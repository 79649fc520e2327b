//! Configuration parsing and validation.
//!
//! Tessera configuration is loaded from TOML files. Sections mirror the
//! deployment surfaces: client defaults, scanner lifecycle, tablet
//! server admission control, and fault-injection hooks (off in
//! production builds, used by behavior tests).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Client-side defaults (timeouts, heartbeats).
    #[serde(default)]
    pub client: ClientConfig,

    /// Server-side scanner lifecycle.
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Tablet server admission control.
    #[serde(default)]
    pub tablet_server: TabletServerConfig,

    /// Latency-injection test hooks. All default to off.
    #[serde(default)]
    pub fault_injection: FaultInjectionConfig,
}

/// Client-side defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Default timeout for data-path RPCs in milliseconds.
    #[serde(default = "default_rpc_timeout_ms")]
    pub default_rpc_timeout_ms: u64,

    /// Default timeout for admin operations in milliseconds.
    #[serde(default = "default_admin_operation_timeout_ms")]
    pub default_admin_operation_timeout_ms: u64,

    /// Tablet-server to master heartbeat cadence in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_rpc_timeout_ms: default_rpc_timeout_ms(),
            default_admin_operation_timeout_ms: default_admin_operation_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl ClientConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.default_rpc_timeout_ms)
    }

    pub fn admin_operation_timeout(&self) -> Duration {
        Duration::from_millis(self.default_admin_operation_timeout_ms)
    }
}

/// Server-side scanner lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Scanner expiry in milliseconds without a keep-alive.
    #[serde(default = "default_scanner_ttl_ms")]
    pub scanner_ttl_ms: u64,

    /// Scanner sweeper period in microseconds.
    #[serde(default = "default_scanner_gc_check_interval_us")]
    pub scanner_gc_check_interval_us: u64,

    /// Per-RPC batch cap in bytes.
    #[serde(default = "default_scanner_max_batch_size_bytes")]
    pub scanner_max_batch_size_bytes: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scanner_ttl_ms: default_scanner_ttl_ms(),
            scanner_gc_check_interval_us: default_scanner_gc_check_interval_us(),
            scanner_max_batch_size_bytes: default_scanner_max_batch_size_bytes(),
        }
    }
}

impl ScannerConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.scanner_ttl_ms)
    }

    pub fn gc_check_interval(&self) -> Duration {
        Duration::from_micros(self.scanner_gc_check_interval_us)
    }
}

/// Tablet server admission control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabletServerConfig {
    /// Backpressure threshold for the service queue.
    #[serde(default = "default_svc_queue_length")]
    pub tablet_server_svc_queue_length: usize,

    /// Admission control for DDL: tablets created per server per table.
    #[serde(default = "default_max_create_tablets_per_ts")]
    pub max_create_tablets_per_ts: usize,
}

impl Default for TabletServerConfig {
    fn default() -> Self {
        Self {
            tablet_server_svc_queue_length: default_svc_queue_length(),
            max_create_tablets_per_ts: default_max_create_tablets_per_ts(),
        }
    }
}

/// Latency-injection hooks for tests. Zero disables a hook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultInjectionConfig {
    /// Delay injected into master tablet-location lookups.
    #[serde(default)]
    pub master_inject_latency_on_tablet_lookups_ms: u64,

    /// Delay injected into log appends.
    #[serde(default)]
    pub log_inject_latency_ms: u64,

    /// Delay injected into each scanner batch.
    #[serde(default)]
    pub scanner_inject_latency_on_each_batch_ms: u64,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.scanner.scanner_ttl_ms > 0,
            "scanner_ttl_ms must be positive"
        );
        anyhow::ensure!(
            self.client.default_rpc_timeout_ms > 0,
            "default_rpc_timeout_ms must be positive"
        );
        anyhow::ensure!(
            self.tablet_server.tablet_server_svc_queue_length > 0,
            "tablet_server_svc_queue_length must be positive"
        );
        Ok(())
    }
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

fn default_admin_operation_timeout_ms() -> u64 {
    60_000
}

fn default_heartbeat_interval_ms() -> u64 {
    1_000
}

fn default_scanner_ttl_ms() -> u64 {
    60_000
}

fn default_scanner_gc_check_interval_us() -> u64 {
    5_000_000
}

fn default_scanner_max_batch_size_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_svc_queue_length() -> usize {
    50
}

fn default_max_create_tablets_per_ts() -> usize {
    50
}
