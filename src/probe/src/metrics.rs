//! # Metrics Collection
//!
//! The executor consumes a typed `SystemMetrics` value through the
//! `MetricsSource` seam. The default implementation reads the host through
//! `sysinfo`, off the cooperative path.

use async_trait::async_trait;
use cortex_common::models::SystemMetrics;
use std::collections::HashMap;
use sysinfo::{Disks, Networks, System};

use crate::types::ProbeError;

#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn collect(&self) -> Result<SystemMetrics, ProbeError>;
}

/// Host metrics via `sysinfo`. Collection is blocking (it samples the CPU
/// over a short interval), so it runs on the blocking pool.
pub struct SysinfoCollector;

#[async_trait]
impl MetricsSource for SysinfoCollector {
    async fn collect(&self) -> Result<SystemMetrics, ProbeError> {
        tokio::task::spawn_blocking(collect_blocking)
            .await
            .map_err(|err| ProbeError::Metrics(err.to_string()))?
    }
}

fn collect_blocking() -> Result<SystemMetrics, ProbeError> {
    let mut system = System::new_all();

    // Two refreshes with a pause in between; a single sample reads as 0%.
    system.refresh_cpu();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_cpu();
    system.refresh_memory();

    let cpu_percent = system.global_cpu_info().cpu_usage() as f64;

    let total_memory = system.total_memory();
    let memory_percent = if total_memory > 0 {
        system.used_memory() as f64 / total_memory as f64 * 100.0
    } else {
        0.0
    };

    let disks = Disks::new_with_refreshed_list();
    let disk_percent = root_disk_percent(&disks);

    let mut disk_io = HashMap::new();
    let mut total_space = 0u64;
    let mut available_space = 0u64;
    for disk in disks.list() {
        total_space += disk.total_space();
        available_space += disk.available_space();
    }
    disk_io.insert("total_bytes".to_string(), total_space);
    disk_io.insert("available_bytes".to_string(), available_space);

    let networks = Networks::new_with_refreshed_list();
    let mut bytes_sent = 0u64;
    let mut bytes_recv = 0u64;
    for (_name, data) in networks.iter() {
        bytes_sent += data.total_transmitted();
        bytes_recv += data.total_received();
    }
    let mut network_io = HashMap::new();
    network_io.insert("bytes_sent".to_string(), bytes_sent);
    network_io.insert("bytes_recv".to_string(), bytes_recv);

    let load = System::load_average();

    Ok(SystemMetrics {
        cpu_percent,
        memory_percent,
        disk_percent,
        load_average: [load.one, load.five, load.fifteen],
        uptime_seconds: System::uptime(),
        process_count: Some(system.processes().len() as u64),
        disk_io: Some(disk_io),
        network_io: Some(network_io),
    })
}

/// Usage of the root filesystem; falls back to the fullest disk when no
/// mount point is exactly `/`.
fn root_disk_percent(disks: &Disks) -> f64 {
    let usage = |total: u64, available: u64| -> f64 {
        if total == 0 {
            return 0.0;
        }
        (total - available) as f64 / total as f64 * 100.0
    };

    for disk in disks.list() {
        if disk.mount_point() == std::path::Path::new("/") {
            return usage(disk.total_space(), disk.available_space());
        }
    }

    disks
        .list()
        .iter()
        .map(|disk| usage(disk.total_space(), disk.available_space()))
        .fold(0.0, f64::max)
}

/// Fixed metrics for tests.
#[cfg(test)]
pub struct StaticMetrics(pub SystemMetrics);

#[cfg(test)]
#[async_trait]
impl MetricsSource for StaticMetrics {
    async fn collect(&self) -> Result<SystemMetrics, ProbeError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collector_produces_plausible_values() {
        let metrics = SysinfoCollector.collect().await.unwrap();

        assert!((0.0..=100.0).contains(&metrics.cpu_percent));
        assert!((0.0..=100.0).contains(&metrics.memory_percent));
        assert!((0.0..=100.0).contains(&metrics.disk_percent));
        assert!(metrics.process_count.unwrap_or(0) > 0);
    }
}
