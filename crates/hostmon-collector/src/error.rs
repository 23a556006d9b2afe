/// Errors raised while reading system metrics.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// The OS did not expose the counters this source reads.
    #[error("{source_name} metrics unavailable: {reason}")]
    Unavailable {
        source_name: &'static str,
        reason: String,
    },
}

impl CollectorError {
    pub fn unavailable(source_name: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            source_name,
            reason: reason.into(),
        }
    }
}
