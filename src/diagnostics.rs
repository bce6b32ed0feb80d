//! Infrastructure diagnostics — DNS, latency, resource, and I/O probes
//!
//! Diagnostics never mutate application state and never raise: every probe
//! returns a structured, JSON-serializable report with a status field.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::net::TcpStream;
use tracing::debug;

const LATENCY_SAMPLES: usize = 5;
const SCRATCH_PAYLOAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct DnsProbe {
    pub hostname: String,
    pub status: String,
    pub latency_ms: Option<f64>,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyProbe {
    pub endpoint: String,
    pub samples: usize,
    pub failures: usize,
    pub min_ms: Option<f64>,
    pub avg_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceReport {
    pub cpu_count: usize,
    pub memory_total_bytes: u64,
    pub memory_available_bytes: u64,
    pub disk_available_bytes: u64,
    /// cgroup v2 memory limit when bounded
    pub cgroup_memory_limit_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageProbe {
    pub path: String,
    pub status: String,
    pub write_ms: Option<f64>,
    pub read_ms: Option<f64>,
    pub delete_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsReport {
    pub generated_at: String,
    pub dns: Vec<DnsProbe>,
    pub latency: Vec<LatencyProbe>,
    pub resources: ResourceReport,
    pub storage: StorageProbe,
}

/// Resolve a hostname, recording latency and the resolved addresses
pub async fn dns_probe(hostname: &str, timeout: Duration) -> DnsProbe {
    let started = Instant::now();
    let lookup = tokio::time::timeout(timeout, tokio::net::lookup_host((hostname, 0))).await;
    match lookup {
        Ok(Ok(addresses)) => {
            let addresses: Vec<String> = addresses.map(|a| a.ip().to_string()).collect();
            DnsProbe {
                hostname: hostname.to_string(),
                status: "ok".to_string(),
                latency_ms: Some(started.elapsed().as_secs_f64() * 1000.0),
                addresses,
            }
        }
        Ok(Err(e)) => DnsProbe {
            hostname: hostname.to_string(),
            status: format!("failed: {e}"),
            latency_ms: None,
            addresses: Vec::new(),
        },
        Err(_) => DnsProbe {
            hostname: hostname.to_string(),
            status: "failed: timeout".to_string(),
            latency_ms: None,
            addresses: Vec::new(),
        },
    }
}

/// TCP round-trip to `host:port`, five samples
pub async fn latency_probe(endpoint: &str, timeout: Duration) -> LatencyProbe {
    let mut samples = Vec::new();
    let mut failures = 0usize;
    for _ in 0..LATENCY_SAMPLES {
        let started = Instant::now();
        match tokio::time::timeout(timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(_stream)) => samples.push(started.elapsed().as_secs_f64() * 1000.0),
            _ => failures += 1,
        }
    }

    let (min_ms, avg_ms, max_ms) = if samples.is_empty() {
        (None, None, None)
    } else {
        let min = samples.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let avg = samples.iter().sum::<f64>() / samples.len() as f64;
        (Some(min), Some(avg), Some(max))
    };

    LatencyProbe {
        endpoint: endpoint.to_string(),
        samples: LATENCY_SAMPLES,
        failures,
        min_ms,
        avg_ms,
        max_ms,
    }
}

fn cgroup_memory_limit() -> Option<u64> {
    let raw = std::fs::read_to_string("/sys/fs/cgroup/memory.max").ok()?;
    raw.trim().parse().ok()
}

/// Host resource counters
pub fn resource_probe() -> ResourceReport {
    let mut system = sysinfo::System::new_all();
    system.refresh_all();
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let disk_available_bytes = disks.iter().map(|d| d.available_space()).sum();

    ResourceReport {
        cpu_count: system.cpus().len(),
        memory_total_bytes: system.total_memory(),
        memory_available_bytes: system.available_memory(),
        disk_available_bytes,
        cgroup_memory_limit_bytes: cgroup_memory_limit(),
    }
}

/// Write + read + delete round trip characterizing local I/O
pub fn storage_probe(scratch_dir: &Path) -> StorageProbe {
    let path: PathBuf = scratch_dir.join(format!("depictio-probe-{}", uuid::Uuid::new_v4()));
    let payload = vec![0u8; SCRATCH_PAYLOAD_BYTES];

    let write_started = Instant::now();
    if let Err(e) = std::fs::write(&path, &payload) {
        return StorageProbe {
            path: scratch_dir.display().to_string(),
            status: format!("failed: {e}"),
            write_ms: None,
            read_ms: None,
            delete_ms: None,
        };
    }
    let write_ms = write_started.elapsed().as_secs_f64() * 1000.0;

    let read_started = Instant::now();
    let read_ms = match std::fs::read(&path) {
        Ok(_) => Some(read_started.elapsed().as_secs_f64() * 1000.0),
        Err(_) => None,
    };

    let delete_started = Instant::now();
    let delete_ms = match std::fs::remove_file(&path) {
        Ok(()) => Some(delete_started.elapsed().as_secs_f64() * 1000.0),
        Err(_) => None,
    };

    StorageProbe {
        path: scratch_dir.display().to_string(),
        status: if read_ms.is_some() && delete_ms.is_some() {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        write_ms: Some(write_ms),
        read_ms,
        delete_ms,
    }
}

/// Run the full probe suite against the configured internal endpoints.
///
/// `endpoints` are `host:port` pairs; their host parts are also resolved
/// individually.
pub async fn run_all(
    endpoints: &[String],
    scratch_dir: &Path,
    timeout: Duration,
) -> DiagnosticsReport {
    let mut dns = Vec::new();
    let mut latency = Vec::new();
    for endpoint in endpoints {
        let host = endpoint.split(':').next().unwrap_or(endpoint);
        dns.push(dns_probe(host, timeout).await);
        latency.push(latency_probe(endpoint, timeout).await);
    }
    debug!(endpoints = endpoints.len(), "Network probes complete");

    DiagnosticsReport {
        generated_at: Utc::now().to_rfc3339(),
        dns,
        latency,
        resources: resource_probe(),
        storage: storage_probe(scratch_dir),
    }
}
