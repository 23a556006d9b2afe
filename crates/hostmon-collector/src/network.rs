use crate::{CollectorError, MetricSource};
use hostmon_common::types::NetworkMetrics;
use sysinfo::Networks;

/// Cumulative byte counters summed across all interfaces, as read from the
/// OS at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

/// Network source carrying the previous counters as explicit state so the
/// first-sample-reports-zero behavior stays visible and testable.
pub struct NetworkSource {
    networks: Networks,
    baseline: Option<NetworkCounters>,
}

impl NetworkSource {
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
            baseline: None,
        }
    }

    /// Computes the delta between `current` and the stored baseline, then
    /// makes `current` the new baseline. Without a baseline (the first
    /// reading after process start) the delta is zero.
    pub fn advance(&mut self, current: NetworkCounters) -> NetworkMetrics {
        let delta = match self.baseline {
            None => NetworkMetrics {
                bytes_sent: 0,
                bytes_recv: 0,
            },
            Some(prev) => NetworkMetrics {
                bytes_sent: current.bytes_sent.saturating_sub(prev.bytes_sent),
                bytes_recv: current.bytes_recv.saturating_sub(prev.bytes_recv),
            },
        };
        self.baseline = Some(current);
        delta
    }

    fn read_counters(&self) -> NetworkCounters {
        let mut counters = NetworkCounters {
            bytes_sent: 0,
            bytes_recv: 0,
        };
        for (_, data) in self.networks.iter() {
            counters.bytes_sent = counters.bytes_sent.saturating_add(data.total_transmitted());
            counters.bytes_recv = counters.bytes_recv.saturating_add(data.total_received());
        }
        counters
    }
}

impl MetricSource for NetworkSource {
    type Reading = NetworkMetrics;

    fn name(&self) -> &'static str {
        "network"
    }

    fn collect(&mut self) -> Result<NetworkMetrics, CollectorError> {
        self.networks.refresh();
        let current = self.read_counters();
        Ok(self.advance(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_reports_zero_deltas() {
        let mut source = NetworkSource::new();
        let delta = source.advance(NetworkCounters {
            bytes_sent: 50,
            bytes_recv: 100,
        });
        assert_eq!(delta.bytes_sent, 0);
        assert_eq!(delta.bytes_recv, 0);
    }

    #[test]
    fn later_samples_report_deltas_against_the_baseline() {
        let mut source = NetworkSource::new();
        source.advance(NetworkCounters {
            bytes_sent: 50,
            bytes_recv: 100,
        });
        let delta = source.advance(NetworkCounters {
            bytes_sent: 100,
            bytes_recv: 250,
        });
        assert_eq!(delta.bytes_sent, 50);
        assert_eq!(delta.bytes_recv, 150);
    }

    #[test]
    fn counter_reset_does_not_underflow() {
        let mut source = NetworkSource::new();
        source.advance(NetworkCounters {
            bytes_sent: 500,
            bytes_recv: 500,
        });
        let delta = source.advance(NetworkCounters {
            bytes_sent: 10,
            bytes_recv: 10,
        });
        assert_eq!(delta.bytes_sent, 0);
        assert_eq!(delta.bytes_recv, 0);
    }
}
