use thiserror::Error;

/// Failures of a single poll cycle. None of them is fatal to the poller;
/// the next tick is the only retry.
#[derive(Debug, Error)]
pub enum Error {
    /// Credential exchange failed or returned something unusable.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Query endpoint answered with a non-success status.
    #[error("API returned status {status}: {body}")]
    Api { status: u16, body: String },

    /// Connection failure or timeout.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("failed to decode API response: {0}")]
    Decode(#[source] serde_json::Error),

    /// The server kept returning page cursors past the configured bound.
    #[error("pagination did not finish within {max_pages} pages")]
    PageLimitExceeded { max_pages: usize },

    #[error("failed to write {sink} output: {source}")]
    Write {
        sink: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Short class name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Api { .. } => "api",
            Self::Network(_) => "network",
            Self::Decode(_) => "decode",
            Self::PageLimitExceeded { .. } => "page-limit",
            Self::Write { .. } => "write",
        }
    }

    pub(crate) fn write(sink: &'static str, source: impl Into<std::io::Error>) -> Self {
        Self::Write { sink, source: source.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
