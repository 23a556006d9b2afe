use crate::{mib, usage_percent, CollectorError, MetricSource};
use hostmon_common::types::MemoryMetrics;
use sysinfo::System;

pub struct MemorySource {
    system: System,
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl MetricSource for MemorySource {
    type Reading = MemoryMetrics;

    fn name(&self) -> &'static str {
        "memory"
    }

    fn collect(&mut self) -> Result<MemoryMetrics, CollectorError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(CollectorError::unavailable(
                self.name(),
                "total memory reported as zero",
            ));
        }
        let used = self.system.used_memory();
        Ok(MemoryMetrics {
            total_mb: mib(total),
            used_mb: mib(used),
            usage_percent: usage_percent(used, total),
        })
    }
}
