use serde::Deserialize;

/// Agent configuration, resolved before orchestration starts.
///
/// A complete set of `HOSTMON_*` environment variables takes precedence;
/// otherwise the TOML config file at the given path is used.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub server_url: String,
    pub agent_id: String,
    pub agent_token: String,
    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval_secs: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_command_poll_interval")]
    pub command_poll_interval_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_monitoring_interval() -> u64 {
    60
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_command_poll_interval() -> u64 {
    15
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value in {var}: {reason}")]
    Env { var: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

const ENV_SERVER_URL: &str = "HOSTMON_SERVER_URL";
const ENV_AGENT_ID: &str = "HOSTMON_AGENT_ID";
const ENV_AGENT_TOKEN: &str = "HOSTMON_AGENT_TOKEN";
const ENV_MONITORING_INTERVAL: &str = "HOSTMON_MONITORING_INTERVAL";
const ENV_HEARTBEAT_INTERVAL: &str = "HOSTMON_HEARTBEAT_INTERVAL";
const ENV_COMMAND_POLL_INTERVAL: &str = "HOSTMON_COMMAND_POLL_INTERVAL";
const ENV_LOG_LEVEL: &str = "HOSTMON_LOG_LEVEL";

impl AgentConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        if let Some(config) = Self::from_env()? {
            tracing::debug!("Loaded configuration from environment");
            return Ok(config);
        }
        let config = Self::from_file(path)?;
        tracing::debug!(path = %path, "Loaded configuration from file");
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Builds the config from environment variables when the complete
    /// required set is present; returns `Ok(None)` otherwise so the caller
    /// falls back to the config file.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let (Ok(server_url), Ok(agent_id), Ok(agent_token)) = (
            std::env::var(ENV_SERVER_URL),
            std::env::var(ENV_AGENT_ID),
            std::env::var(ENV_AGENT_TOKEN),
        ) else {
            return Ok(None);
        };

        Ok(Some(Self {
            server_url,
            agent_id,
            agent_token,
            monitoring_interval_secs: env_interval(
                ENV_MONITORING_INTERVAL,
                default_monitoring_interval(),
            )?,
            heartbeat_interval_secs: env_interval(
                ENV_HEARTBEAT_INTERVAL,
                default_heartbeat_interval(),
            )?,
            command_poll_interval_secs: env_interval(
                ENV_COMMAND_POLL_INTERVAL,
                default_command_poll_interval(),
            )?,
            log_level: std::env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| default_log_level()),
        }))
    }

    /// Fails fast on anything the agent cannot start with: missing server
    /// endpoint, identity or token, or a non-positive interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server_url is required".to_string()));
        }
        if self.agent_id.trim().is_empty() {
            return Err(ConfigError::Invalid("agent_id is required".to_string()));
        }
        if self.agent_token.trim().is_empty() {
            return Err(ConfigError::Invalid("agent_token is required".to_string()));
        }
        for (name, value) in [
            ("monitoring_interval_secs", self.monitoring_interval_secs),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            (
                "command_poll_interval_secs",
                self.command_poll_interval_secs,
            ),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

fn env_interval(var: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Env {
            var: var.to_string(),
            reason: format!("expected an integer number of seconds, got {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}
