use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One combined reading of every metric family, stamped with a single UTC
/// timestamp at assembly time. This is the unit the agent reports to the
/// control plane; field names follow the control plane's REST contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub disk: Vec<DiskMetrics>,
    pub network: NetworkMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuMetrics {
    #[serde(rename = "usagePercent")]
    pub usage_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetrics {
    #[serde(rename = "totalMB")]
    pub total_mb: f64,
    #[serde(rename = "usedMB")]
    pub used_mb: f64,
    #[serde(rename = "usagePercent")]
    pub usage_percent: f64,
}

/// Usage of one mounted filesystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskMetrics {
    pub path: String,
    #[serde(rename = "totalGB")]
    pub total_gb: f64,
    #[serde(rename = "usedGB")]
    pub used_gb: f64,
    #[serde(rename = "usagePercent")]
    pub usage_percent: f64,
}

/// Bytes moved since the previous sample. Counters at the OS level are
/// cumulative; the agent reports deltas, and the first sample after process
/// start reports zeros because no baseline exists yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetrics {
    #[serde(rename = "bytesSent")]
    pub bytes_sent: u64,
    #[serde(rename = "bytesRecv")]
    pub bytes_recv: u64,
}

/// Heartbeat acknowledgement from the control plane. The server may suggest
/// the interval it expects the next heartbeat within.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    #[serde(
        rename = "nextExpectedInSeconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub next_expected_in_seconds: Option<u64>,
}

/// A server-issued unit of work for the agent to execute locally.
///
/// The id is opaque and server-assigned; `kind` selects the handler. The
/// agent holds no persistent queue: a command whose result was never
/// reported is simply re-fetched on a later poll if the server still
/// considers it pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Success,
    Error,
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandStatus::Success => write!(f, "SUCCESS"),
            CommandStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Result of executing one command, reported back to the control plane.
///
/// `data` is an explicit option: `None` means the field is omitted from the
/// wire payload, while any `Some` value, including an empty object, is sent
/// as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub status: CommandStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Success,
            message: message.into(),
            data: None,
        }
    }

    pub fn success_with_data(message: impl Into<String>, data: Value) -> Self {
        Self {
            status: CommandStatus::Success,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Error,
            message: message.into(),
            data: None,
        }
    }
}
