use crate::{round2, CollectorError, MetricSource};
use hostmon_common::types::CpuMetrics;
use sysinfo::System;

pub struct CpuSource {
    system: System,
}

impl CpuSource {
    pub fn new() -> Self {
        let mut system = System::new();
        // Prime the usage counters; the first real reading happens a full
        // interval later, which is enough distance for a meaningful value.
        system.refresh_cpu_all();
        Self { system }
    }
}

impl MetricSource for CpuSource {
    type Reading = CpuMetrics;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn collect(&mut self) -> Result<CpuMetrics, CollectorError> {
        self.system.refresh_cpu_all();
        if self.system.cpus().is_empty() {
            return Err(CollectorError::unavailable(
                self.name(),
                "no cpus reported by the OS",
            ));
        }
        Ok(CpuMetrics {
            usage_percent: round2(self.system.global_cpu_usage() as f64),
        })
    }
}
