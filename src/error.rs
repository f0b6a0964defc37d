use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConduitError {
    #[error("provider api error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("provider request timed out")]
    Timeout,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("all providers failed after {attempts} attempt(s): {source}")]
    FailoverExhausted {
        attempts: u32,
        #[source]
        source: Box<ConduitError>,
    },
    #[error("{0}")]
    Other(String),
}

impl ConduitError {
    /// Upstream HTTP status carried by the error, when there is one.
    ///
    /// Does not look through `FailoverExhausted`: a wrapped status belongs
    /// to one attempt, not to the request as a whole.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|code| code.as_u16()),
            _ => None,
        }
    }

    /// True when the error is a deadline expiry, including one buried under
    /// a `FailoverExhausted` wrapper.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Http(err) => err.is_timeout(),
            Self::FailoverExhausted { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConduitError>;
