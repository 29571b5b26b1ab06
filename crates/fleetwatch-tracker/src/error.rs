#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The update stream could not be opened or was dropped.
    #[error("update stream closed: {0}")]
    TransportClosed(String),

    /// The continuation request to the upstream tracker failed.
    #[error("continuation request failed: {0}")]
    DownstreamCallFailed(String),

    #[error("invalid tracker configuration: {0}")]
    InvalidConfig(String),

    #[error("session controller is not running")]
    ControllerStopped,
}

impl TrackerError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::TransportClosed(_) => "transport_closed",
            Self::DownstreamCallFailed(_) => "downstream_call_failed",
            Self::InvalidConfig(_) => "invalid_config",
            Self::ControllerStopped => "controller_stopped",
        }
    }
}
