use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view used to decide whether to accept another batch.
/// In-flight work is never interrupted based on it.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub accepting: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub concurrency: usize,
    pub in_flight: usize,
    pub active_batches: usize,
    pub available_memory_bytes: Option<u64>,
    pub min_free_memory_bytes: u64,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn probe(
        available_memory_bytes: Option<u64>,
        min_free_memory_bytes: u64,
        concurrency: usize,
        in_flight: usize,
        active_batches: usize,
    ) -> Self {
        // Unknown headroom (non-Linux hosts) does not block intake.
        let reason = available_memory_bytes
            .filter(|available| *available < min_free_memory_bytes)
            .map(|available| {
                format!(
                    "available memory {} MiB below floor {} MiB",
                    available / (1024 * 1024),
                    min_free_memory_bytes / (1024 * 1024)
                )
            });
        Self {
            accepting: reason.is_none(),
            reason,
            concurrency,
            in_flight,
            active_batches,
            available_memory_bytes,
            min_free_memory_bytes,
            checked_at: Utc::now(),
        }
    }
}

/// `MemAvailable` from `/proc/meminfo`, in bytes.
pub fn available_memory_bytes() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_available(&meminfo)
}

fn parse_mem_available(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchConfig, BatchController};

    #[test]
    fn parses_meminfo() {
        let sample = "MemTotal:       16318480 kB\nMemFree:         1234567 kB\nMemAvailable:    8000000 kB\n";
        assert_eq!(parse_mem_available(sample), Some(8_000_000 * 1024));
        assert_eq!(parse_mem_available("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn low_memory_stops_intake() {
        let controller = BatchController::new(BatchConfig {
            min_free_memory_bytes: 512 * 1024 * 1024,
            ..BatchConfig::default()
        })
        .with_memory_probe(|| Some(100 * 1024 * 1024));
        let report = controller.health();
        assert!(!report.accepting);
        assert!(report.reason.unwrap().contains("100 MiB"));
        assert_eq!(report.concurrency, 2);
    }

    #[test]
    fn unknown_memory_keeps_accepting() {
        let controller = BatchController::new(BatchConfig::default()).with_memory_probe(|| None);
        controller.set_concurrency(4);
        let report = controller.health();
        assert!(report.accepting);
        assert_eq!(report.concurrency, 4);
        assert_eq!(report.in_flight, 0);
    }
}
