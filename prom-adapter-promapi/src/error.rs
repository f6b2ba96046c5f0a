use thiserror::Error;

/// Errors from the query backend.
///
/// The first four variants correspond to error types the backend itself
/// reports in a parseable body (HTTP 400, 422 or 503); everything else the
/// backend sends is a `BadResponse`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad query data: {0}")]
    BadData(String),

    #[error("query timed out: {0}")]
    Timeout(String),

    #[error("query was canceled: {0}")]
    Canceled(String),

    #[error("query execution failed: {0}")]
    Exec(String),

    #[error("bad response from the backend (status {status}): {message}")]
    BadResponse { status: u16, message: String },

    #[error("request to the backend failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// The kind of a backend error, used as a metric label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    BadData,
    Timeout,
    Canceled,
    Exec,
    BadResponse,
    Transport,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadData => "bad_data",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::Exec => "execution",
            Self::BadResponse => "bad_response",
            Self::Transport => "transport",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadData(_) => ErrorKind::BadData,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Canceled(_) => ErrorKind::Canceled,
            Self::Exec(_) => ErrorKind::Exec,
            Self::BadResponse { .. } => ErrorKind::BadResponse,
            Self::Transport(_) => ErrorKind::Transport,
        }
    }

    /// Map the `errorType` the backend reported to a typed error.
    pub(crate) fn from_api(status: u16, error_type: &str, message: String) -> Self {
        match error_type {
            "bad_data" => Self::BadData(message),
            "timeout" => Self::Timeout(message),
            "canceled" => Self::Canceled(message),
            "execution" => Self::Exec(message),
            _ => Self::BadResponse { status, message },
        }
    }
}
