use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::Time;
use tokio::fs;

pub const CONFIG_ENV: &str = "UPTIME_KERNEL_CONFIG";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub hosts: BTreeMap<String, HostConf>,
    pub probe: ProbeConf,
    pub rollup: RollupConf,
    pub storage: StorageConf,
    pub http: HttpConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HostConf {
    pub address: String,
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    #[default]
    Ping,
    Tcp,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProbeConf {
    pub interval_secs: u64,
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub method: ProbeMethod,
    pub tcp_port: u16, // used when the address carries no port
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RollupConf {
    pub enabled: bool,
    pub run_at: String, // "HH:MM", UTC
    pub manual_trigger: bool,
    pub catch_up_on_start: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConf {
    pub data_dir: PathBuf,
    pub sample_retention_days: i64,
    pub retention_sweep_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

impl Default for ProbeConf {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            concurrency: 50,
            timeout_ms: 1000,
            method: ProbeMethod::Ping,
            tcp_port: 80,
        }
    }
}

impl Default for RollupConf {
    fn default() -> Self {
        Self {
            enabled: true,
            run_at: "00:05".into(),
            manual_trigger: true,
            catch_up_on_start: true,
        }
    }
}

impl Default for StorageConf {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            sample_retention_days: 30,
            retention_sweep_secs: 3600,
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

impl RollupConf {
    pub fn run_at_time(&self) -> Time {
        Time::parse(&self.run_at, format_description!("[hour]:[minute]")).unwrap_or_else(|e| {
            tracing::warn!(run_at = %self.run_at, error = %e, "invalid rollup.run_at, using 00:05");
            Time::from_hms(0, 5, 0).unwrap_or(Time::MIDNIGHT)
        })
    }
}

impl KernelConfig {
    /// Clamps values that would stall or disable the scheduler.
    pub fn sanitized(mut self) -> Self {
        if self.probe.concurrency == 0 {
            tracing::warn!("probe.concurrency must be >= 1, using 1");
            self.probe.concurrency = 1;
        }
        if self.probe.interval_secs == 0 {
            tracing::warn!("probe.interval_secs must be >= 1, using 1");
            self.probe.interval_secs = 1;
        }
        if self.probe.timeout_ms == 0 {
            tracing::warn!("probe.timeout_ms must be >= 1, using 1000");
            self.probe.timeout_ms = 1000;
        }
        if self.storage.sample_retention_days < 1 {
            tracing::warn!("storage.sample_retention_days must be >= 1, using 30");
            self.storage.sample_retention_days = 30;
        }
        if self.storage.retention_sweep_secs == 0 {
            self.storage.retention_sweep_secs = 3600;
        }
        self
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str::<KernelConfig>(txt).map(KernelConfig::sanitized)
}

/// Reads `kernel.yaml` (or `$UPTIME_KERNEL_CONFIG`). The kernel always boots:
/// a missing or broken file falls back to defaults.
pub async fn load_config() -> KernelConfig {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "kernel.yaml".into());
    if !Path::new(&path).exists() {
        tracing::warn!(%path, "no config file, using defaults");
        return KernelConfig::default();
    }
    let txt = fs::read_to_string(&path).await.unwrap_or_default();
    parse_config(&txt).unwrap_or_else(|e| {
        tracing::error!(%path, error = %e, "invalid config, using defaults");
        KernelConfig::default()
    })
}
