//! Host resource usage shown next to session details by `ytlive logs`.

use serde::Serialize;
use sysinfo::{Disks, Pid, ProcessesToUpdate, System};

#[derive(Debug, Clone, Serialize)]
pub struct DiskUsage {
    pub mount_point: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostUsage {
    pub cpu_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub process_memory_mb: f64,
    pub disks: Vec<DiskUsage>,
}

impl HostUsage {
    pub fn memory_percent(&self) -> f64 {
        if self.memory_total_bytes == 0 {
            return 0.0;
        }
        self.memory_used_bytes as f64 * 100.0 / self.memory_total_bytes as f64
    }
}

/// Sample CPU, memory and disk usage. CPU usage needs two refreshes a short
/// interval apart, so this blocks briefly.
pub fn sample() -> HostUsage {
    let mut system = System::new();
    let pid = Pid::from_u32(std::process::id());

    system.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_cpu_usage();
    system.refresh_memory();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

    let process_memory_mb = system
        .process(pid)
        .map(|process| process.memory() as f64 / 1024.0 / 1024.0)
        .unwrap_or(0.0);

    let disks = Disks::new_with_refreshed_list()
        .list()
        .iter()
        .map(|disk| DiskUsage {
            mount_point: disk.mount_point().display().to_string(),
            total_bytes: disk.total_space(),
            available_bytes: disk.available_space(),
        })
        .collect();

    HostUsage {
        cpu_percent: system.global_cpu_usage(),
        memory_used_bytes: system.used_memory(),
        memory_total_bytes: system.total_memory(),
        process_memory_mb,
        disks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_percent_handles_unknown_totals() {
        let usage = HostUsage {
            cpu_percent: 0.0,
            memory_used_bytes: 512,
            memory_total_bytes: 0,
            process_memory_mb: 0.0,
            disks: Vec::new(),
        };
        assert_eq!(usage.memory_percent(), 0.0);

        let half = HostUsage {
            memory_total_bytes: 1024,
            ..usage
        };
        assert!((half.memory_percent() - 50.0).abs() < f64::EPSILON);
    }
}
