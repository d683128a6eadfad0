use thiserror::Error;

/// Typed error hierarchy for autosign.
///
/// Use at module boundaries (backend calls, session lifecycle, config validation, tasks).
/// Internal/leaf functions can continue using `anyhow::Result`; the `Internal` variant
/// allows seamless conversion via the `?` operator.
#[derive(Debug, Error)]
pub enum AutosignError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend asked to wait {retry_after}s")]
    FloodWait { retry_after: u64 },

    #[error("Still throttled after {attempts} attempts (last wait {retry_after}s)")]
    RetriesExhausted { attempts: u32, retry_after: u64 },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience alias for results using [`AutosignError`].
pub type AutosignResult<T> = std::result::Result<T, AutosignError>;

impl AutosignError {
    /// Backend-mandated wait, if this is a throttling signal.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::FloodWait { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether a task loop should cool down and restart the cycle.
    ///
    /// Only configuration errors end a task outright.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::FloodWait { .. }
            | Self::RetriesExhausted { .. }
            | Self::Unauthorized(_)
            | Self::Connection(_)
            | Self::Backend(_)
            | Self::Internal(_) => true,
        }
    }

    /// A copy of this error for handing one failure to several callers.
    ///
    /// `Internal` keeps its rendered message and context chain, not its source.
    pub fn replicate(&self) -> Self {
        match self {
            Self::Config(m) => Self::Config(m.clone()),
            Self::FloodWait { retry_after } => Self::FloodWait {
                retry_after: *retry_after,
            },
            Self::RetriesExhausted {
                attempts,
                retry_after,
            } => Self::RetriesExhausted {
                attempts: *attempts,
                retry_after: *retry_after,
            },
            Self::Unauthorized(m) => Self::Unauthorized(m.clone()),
            Self::Connection(m) => Self::Connection(m.clone()),
            Self::Backend(m) => Self::Backend(m.clone()),
            Self::Internal(e) => Self::Internal(anyhow::anyhow!("{:#}", e)),
        }
    }

    /// Transport or session failures that make further calls on the connection pointless.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Unauthorized(_))
    }
}

impl From<std::io::Error> for AutosignError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.into())
    }
}

impl From<serde_json::Error> for AutosignError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(e.into())
    }
}

#[cfg(test)]
mod tests;
