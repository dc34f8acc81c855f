use crate::table::DeviceTable;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub devices_tracked: u32,
    pub memory_usage_mb: f32,
    pub stream_status: String,
    pub stream_reconnects: u64,
    pub ingest: IngestCounters,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq)]
pub struct IngestCounters {
    pub accepted: u64,
    pub parse_errors: u64,
    pub unknown_devices: u64,
    pub ack_failures: u64,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    stream_reconnects: Arc<AtomicU64>,
    stream_status: Arc<Mutex<String>>,
    /// Passe à true à la première connexion établie, ne revient jamais à false
    ever_connected: Arc<AtomicBool>,
    accepted: Arc<AtomicU64>,
    parse_errors: Arc<AtomicU64>,
    unknown_devices: Arc<AtomicU64>,
    ack_failures: Arc<AtomicU64>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            stream_reconnects: Arc::new(AtomicU64::new(0)),
            stream_status: Arc::new(Mutex::new("connecting".to_string())),
            ever_connected: Arc::new(AtomicBool::new(false)),
            accepted: Arc::new(AtomicU64::new(0)),
            parse_errors: Arc::new(AtomicU64::new(0)),
            unknown_devices: Arc::new(AtomicU64::new(0)),
            ack_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn mark_stream_connected(&self) {
        self.ever_connected.store(true, Ordering::Relaxed);
        let mut status = self.stream_status.lock();
        if *status != "connected" {
            *status = "connected".to_string();
        }
    }

    pub fn mark_stream_stopped(&self) {
        *self.stream_status.lock() = "stopped".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.stream_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.stream_status.lock() = "reconnecting".to_string();
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_device(&self) {
        self.unknown_devices.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn has_connected(&self) -> bool {
        self.ever_connected.load(Ordering::Relaxed)
    }

    pub fn stream_status(&self) -> String {
        self.stream_status.lock().clone()
    }

    pub fn reconnects(&self) -> u64 {
        self.stream_reconnects.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> IngestCounters {
        IngestCounters {
            accepted: self.accepted.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            unknown_devices: self.unknown_devices.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
        }
    }

    pub fn get_health(&self, table: &DeviceTable) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            devices_tracked: table.len() as u32,
            memory_usage_mb: get_memory_usage_mb(),
            stream_status: self.stream_status(),
            stream_reconnects: self.reconnects(),
            ingest: self.counters(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb) = line.split_whitespace().nth(1).and_then(|s| s.parse::<u64>().ok()) {
                        return (kb as f32) / 1024.0; // KB -> MB
                    }
                }
            }
        }
    }

    0.0
}
