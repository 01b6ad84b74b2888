use thiserror::Error;

/// Failure of a remote call: the request never completed, or completed with a non-success status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("HTTP {status}{}", body_suffix(.body))]
    Status { status: u16, body: String },
    #[error("request timed out")]
    Timeout,
    #[error("malformed response body: {0}")]
    Decode(String),
    #[error("invalid request url: {0}")]
    InvalidUrl(String),
}

fn body_suffix(body: &str) -> String {
    match body.trim() {
        "" => String::new(),
        body => format!(": {body}"),
    }
}

impl FetchError {
    /// Response body for non-success responses, otherwise the error text.
    pub fn reason(&self) -> String {
        match self {
            Self::Status { body, .. } if !body.trim().is_empty() => body.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
                body: String::new(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for FetchError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

/// The backend answered the execute call but reported the command as failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("command failed with exit code {exit_code:?}: {message}")]
pub struct ApplicationError {
    pub message: String,
    pub output: String,
    pub exit_code: Option<i32>,
}
