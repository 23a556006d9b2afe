use crate::{gib, usage_percent, CollectorError, MetricSource};
use hostmon_common::types::DiskMetrics;
use sysinfo::Disks;

pub struct DiskSource {
    disks: Disks,
}

impl DiskSource {
    pub fn new() -> Self {
        Self {
            disks: Disks::new_with_refreshed_list(),
        }
    }
}

impl MetricSource for DiskSource {
    type Reading = Vec<DiskMetrics>;

    fn name(&self) -> &'static str {
        "disk"
    }

    fn collect(&mut self) -> Result<Vec<DiskMetrics>, CollectorError> {
        self.disks.refresh();
        let mut readings = Vec::new();
        for disk in self.disks.iter() {
            let total = disk.total_space();
            if total == 0 {
                // Pseudo-filesystems report zero capacity; skip them.
                continue;
            }
            let used = total.saturating_sub(disk.available_space());
            readings.push(DiskMetrics {
                path: disk.mount_point().to_string_lossy().to_string(),
                total_gb: gib(total),
                used_gb: gib(used),
                usage_percent: usage_percent(used, total),
            });
        }
        if readings.is_empty() {
            return Err(CollectorError::unavailable(
                self.name(),
                "no mounted filesystems with capacity",
            ));
        }
        Ok(readings)
    }
}
