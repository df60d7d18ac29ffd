//! OS resource probes for the sweeper's utilization report

use std::time::Instant;

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, Networks, System};

/// Point-in-time utilization snapshot published with monitoring frames
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResourceUtilization {
    /// Whole-machine CPU usage, 0–100
    pub cpu_percent: f32,
    /// Used memory as a share of total, 0–100
    pub memory_percent: f32,
    /// Used disk space across mounts as a share of total, 0–100
    pub storage_percent: f32,
    /// Bytes received per second since the previous sample
    pub network_rx_bytes_per_sec: u64,
    /// Bytes transmitted per second since the previous sample
    pub network_tx_bytes_per_sec: u64,
}

/// Stateful probe; owned exclusively by the sweeper task
///
/// CPU usage and network rates need deltas between refreshes, so the probe
/// keeps the previous sample.
pub struct ResourceProbe {
    system: System,
    networks: Networks,
    last_sample: Instant,
    last_rx: u64,
    last_tx: u64,
}

impl ResourceProbe {
    /// Initialize and take the baseline sample
    #[must_use]
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        let networks = Networks::new_with_refreshed_list();
        let (rx, tx) = totals(&networks);
        Self {
            system,
            networks,
            last_sample: Instant::now(),
            last_rx: rx,
            last_tx: tx,
        }
    }

    /// Take a sample; call once per sweeper tick
    pub fn sample(&mut self) -> ResourceUtilization {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.networks.refresh(true);

        let total_memory = self.system.total_memory();
        let memory_percent = if total_memory > 0 {
            (self.system.used_memory() as f32 / total_memory as f32) * 100.0
        } else {
            0.0
        };

        let disks = Disks::new_with_refreshed_list();
        let (total_space, available_space) = disks.iter().fold((0u64, 0u64), |(t, a), d| {
            (t + d.total_space(), a + d.available_space())
        });
        let storage_percent = if total_space > 0 {
            ((total_space - available_space) as f32 / total_space as f32) * 100.0
        } else {
            0.0
        };

        let (rx, tx) = totals(&self.networks);
        let elapsed = self.last_sample.elapsed().as_secs_f64().max(0.001);
        let rx_rate = (rx.saturating_sub(self.last_rx) as f64 / elapsed) as u64;
        let tx_rate = (tx.saturating_sub(self.last_tx) as f64 / elapsed) as u64;
        self.last_rx = rx;
        self.last_tx = tx;
        self.last_sample = Instant::now();

        ResourceUtilization {
            cpu_percent: self.system.global_cpu_usage(),
            memory_percent,
            storage_percent,
            network_rx_bytes_per_sec: rx_rate,
            network_tx_bytes_per_sec: tx_rate,
        }
    }
}

impl Default for ResourceProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn totals(networks: &Networks) -> (u64, u64) {
    networks.iter().fold((0, 0), |(rx, tx), (_, data)| {
        (rx + data.total_received(), tx + data.total_transmitted())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_is_bounded() {
        let mut probe = ResourceProbe::new();
        let sample = probe.sample();
        assert!(sample.cpu_percent >= 0.0);
        assert!(sample.memory_percent >= 0.0 && sample.memory_percent <= 100.0);
        assert!(sample.storage_percent >= 0.0 && sample.storage_percent <= 100.0);
    }
}
