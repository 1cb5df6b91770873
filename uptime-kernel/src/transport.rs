//! Probe transport boundary.
//!
//! The kernel consumes `alive` + optional latency and nothing else. The two
//! adapters below exist so the binary can run against a real network; the
//! scheduler normalizes every `Err` and every timeout to "offline" itself.

use futures::future::BoxFuture;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::Command;

use crate::config::{ProbeConf, ProbeMethod};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReply {
    pub alive: bool,
    pub latency_ms: Option<f64>,
}

impl ProbeReply {
    pub fn up(latency_ms: f64) -> Self {
        Self { alive: true, latency_ms: Some(latency_ms) }
    }

    pub fn down() -> Self {
        Self { alive: false, latency_ms: None }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("probe timed out")]
    Timeout,
    #[error("probe io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("probe failed: {0}")]
    Other(String),
}

pub trait ProbeTransport: Send + Sync {
    fn probe<'a>(&'a self, address: &'a str, timeout: Duration) -> BoxFuture<'a, Result<ProbeReply, TransportError>>;
}

/// One ICMP echo through the system `ping` binary.
pub struct SystemPing;

impl ProbeTransport for SystemPing {
    fn probe<'a>(&'a self, address: &'a str, timeout: Duration) -> BoxFuture<'a, Result<ProbeReply, TransportError>> {
        Box::pin(async move {
            let wait_secs = timeout.as_secs().max(1);
            let output = Command::new("ping")
                .arg("-c")
                .arg("1")
                .arg("-W")
                .arg(wait_secs.to_string())
                .arg(address)
                .kill_on_drop(true)
                .output()
                .await?;
            if !output.status.success() {
                return Ok(ProbeReply::down());
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(ProbeReply { alive: true, latency_ms: parse_ping_latency(&stdout) })
        })
    }
}

/// TCP connect probe. A refused connection still proves the host answered.
pub struct TcpConnect {
    pub default_port: u16,
}

impl ProbeTransport for TcpConnect {
    fn probe<'a>(&'a self, address: &'a str, timeout: Duration) -> BoxFuture<'a, Result<ProbeReply, TransportError>> {
        Box::pin(async move {
            let target = with_port(address, self.default_port);
            let started = Instant::now();
            match tokio::time::timeout(timeout, TcpStream::connect(&target)).await {
                Ok(Ok(_stream)) => Ok(ProbeReply::up(elapsed_ms(started))),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    Ok(ProbeReply::up(elapsed_ms(started)))
                }
                Ok(Err(e)) => Err(TransportError::Io(e)),
                Err(_) => Err(TransportError::Timeout),
            }
        })
    }
}

pub fn transport_for(conf: &ProbeConf) -> Box<dyn ProbeTransport> {
    match conf.method {
        ProbeMethod::Ping => Box::new(SystemPing),
        ProbeMethod::Tcp => Box::new(TcpConnect { default_port: conf.tcp_port }),
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn parse_ping_latency(stdout: &str) -> Option<f64> {
    let idx = stdout.find("time=")?;
    let digits: String = stdout[idx + 5..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().ok()
}

fn with_port(address: &str, default_port: u16) -> String {
    if address.parse::<SocketAddr>().is_ok() {
        return address.to_string();
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return SocketAddr::new(ip, default_port).to_string();
    }
    match address.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => address.to_string(),
        _ => format!("{address}:{default_port}"),
    }
}
