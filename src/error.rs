use thiserror::Error;

pub type Result<T> = std::result::Result<T, self::Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Missing environment: no config, no remote, no LFS tracking. The
    /// message carries the directive the user should run.
    #[error("{0}")]
    Environment(String),

    #[error("auth failed against {endpoint}: {message}")]
    AuthFailed { endpoint: String, message: String },

    #[error("{endpoint} returned {status}: {message}")]
    Remote {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("git command failed: {0}")]
    Git(String),

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("{failed} of {attempted} objects failed")]
    Batch { failed: usize, attempted: usize },

    #[error("config error: {0}")]
    Config(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("malformed record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// `true` when re-invoking the same command may succeed (network-shaped
    /// failures). Input and environment errors never retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Remote { .. } | Self::Timeout(_) | Self::Request(_)
        )
    }
}
