//! Host resource sampling

use crate::metrics::{NetworkIo, SystemMetrics};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Disks, Networks, System};
use tracing::error;

/// Source of host resource snapshots. Implementations must not fail: an
/// unreadable host yields [`SystemMetrics::zeroed`].
#[async_trait]
pub trait HostSampler: Send + Sync {
    async fn sample(&self) -> SystemMetrics;
}

/// Reads CPU, memory, disk and network counters through `sysinfo`
#[derive(Debug, Clone)]
pub struct SysinfoSampler {
    /// Mount point whose usage is reported as disk utilisation
    disk_mount: PathBuf,
    /// Gap between the two CPU refreshes used to compute utilisation
    cpu_window: Duration,
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new(PathBuf::from("/"), Duration::from_secs(1))
    }
}

impl SysinfoSampler {
    pub fn new(disk_mount: PathBuf, cpu_window: Duration) -> Self {
        Self {
            disk_mount,
            cpu_window: cpu_window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }

    fn read_host(disk_mount: &Path, cpu_window: Duration) -> Result<SystemMetrics, String> {
        let mut system = System::new();

        system.refresh_cpu();
        std::thread::sleep(cpu_window);
        system.refresh_cpu();
        let cpu_usage = f64::from(system.global_cpu_info().cpu_usage());

        system.refresh_memory();
        let total_memory = system.total_memory();
        if total_memory == 0 {
            return Err("total memory reported as zero".to_string());
        }
        let memory_usage = percent(system.used_memory(), total_memory);

        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .find(|disk| disk.mount_point() == disk_mount)
            .ok_or_else(|| format!("no disk mounted at {}", disk_mount.display()))?;
        let disk_usage = percent(
            disk.total_space().saturating_sub(disk.available_space()),
            disk.total_space(),
        );

        let networks = Networks::new_with_refreshed_list();
        let network_io = networks
            .iter()
            .fold(NetworkIo::default(), |mut io, (_, data)| {
                io.bytes_sent += data.total_transmitted();
                io.bytes_recv += data.total_received();
                io
            });

        Ok(SystemMetrics {
            cpu_usage,
            memory_usage,
            disk_usage,
            network_io,
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl HostSampler for SysinfoSampler {
    async fn sample(&self) -> SystemMetrics {
        let disk_mount = self.disk_mount.clone();
        let cpu_window = self.cpu_window;

        match tokio::task::spawn_blocking(move || Self::read_host(&disk_mount, cpu_window)).await {
            Ok(Ok(metrics)) => metrics,
            Ok(Err(e)) => {
                error!("Error collecting system metrics: {}", e);
                SystemMetrics::zeroed()
            }
            Err(e) => {
                error!("System metrics task failed: {}", e);
                SystemMetrics::zeroed()
            }
        }
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}
