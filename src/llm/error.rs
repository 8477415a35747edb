use thiserror::Error;

use crate::StatusCode;

/// Failure before the relay or the probe has produced anything for the caller.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The caller sent no credential; no upstream call was made.
    #[error("missing credential")]
    MissingCredential,

    /// The upstream answered with a non-success status.
    #[error("upstream returned HTTP {status}")]
    UpstreamStatus { status: u16 },

    /// The upstream could not be reached or its reply could not be read.
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl RelayError {
    /// Status code reported to the caller of the chat relay.
    ///
    /// Upstream statuses outside the server's table become `502 Bad Gateway`.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingCredential => StatusCode::BadRequest,
            Self::UpstreamStatus { status } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BadGateway)
            }
            Self::Transport(_) => StatusCode::InternalServerError,
        }
    }
}

/// The upstream body could not be decoded into lines.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("stream line exceeds {limit} bytes without a terminator")]
    LineTooLong { limit: usize },

    #[error("invalid UTF-8 sequence after {valid_up_to} valid bytes")]
    InvalidUtf8 { valid_up_to: usize },

    #[error("stream ended inside a multi-byte character ({pending} bytes pending)")]
    Truncated { pending: usize },
}

/// Failure after the output stream has started. Ends the stream; never retried.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("upstream read failed: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(RelayError::MissingCredential.status_code(), StatusCode::BadRequest);
        assert_eq!(
            RelayError::UpstreamStatus { status: 429 }.status_code(),
            StatusCode::TooManyRequests
        );
        assert_eq!(
            RelayError::UpstreamStatus { status: 401 }.status_code(),
            StatusCode::Unauthorized
        );
        assert_eq!(
            RelayError::UpstreamStatus { status: 418 }.status_code(),
            StatusCode::BadGateway
        );
    }
}
