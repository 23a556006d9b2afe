//! Metric collection for the hostmon agent.
//!
//! Each [`MetricSource`] implementation reads one category of system
//! metrics (CPU, memory, disk, network) through `sysinfo` and returns the
//! typed fragment that goes into the combined sample the agent reports.

pub mod cpu;
pub mod disk;
pub mod error;
pub mod memory;
pub mod network;

pub use error::CollectorError;

/// A system metric source that runs on the agent host.
///
/// One implementation exists per metric family; the agent composes them
/// explicitly and calls each at every monitoring interval. Sources keep
/// whatever state they need between readings (e.g. the network source's
/// previous byte counters).
pub trait MetricSource {
    /// The typed sample fragment this source produces.
    type Reading;

    /// Returns the source name (e.g. `"cpu"`), used in error context.
    fn name(&self) -> &'static str;

    /// Reads current values from the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system counters are unavailable.
    fn collect(&mut self) -> Result<Self::Reading, CollectorError>;
}

pub(crate) fn mib(bytes: u64) -> f64 {
    round2(bytes as f64 / (1024.0 * 1024.0))
}

pub(crate) fn gib(bytes: u64) -> f64 {
    round2(bytes as f64 / (1024.0 * 1024.0 * 1024.0))
}

pub(crate) fn usage_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(used as f64 / total as f64 * 100.0)
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_conversions_round_to_two_decimals() {
        assert_eq!(mib(3 * 1024 * 1024), 3.0);
        assert_eq!(gib(1024 * 1024 * 1024), 1.0);
        assert_eq!(round2(33.33333), 33.33);
    }

    #[test]
    fn usage_percent_handles_zero_total() {
        assert_eq!(usage_percent(50, 0), 0.0);
        assert_eq!(usage_percent(25, 100), 25.0);
    }
}
