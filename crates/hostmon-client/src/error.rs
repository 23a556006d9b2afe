/// Errors that can occur when talking to the control plane.
///
/// Authentication rejection is a distinct kind from generic API failure so
/// callers can log it as a credential problem rather than a transient one.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The control plane rejected the agent token (HTTP 401).
    #[error("authentication failed, check agent token")]
    Auth,

    /// The control plane answered with an unexpected status code.
    #[error("control plane API error: status={status}, body={body}")]
    Api { status: u16, body: String },

    /// An underlying HTTP transport error from `reqwest`, including
    /// timeouts and response-body decode failures.
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Convenience alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, ClientError>;
