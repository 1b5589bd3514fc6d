//! Error types for activity fetching and storage

/// Errors from the activity client, store and pace calculation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("authentication failed: {0}")]
    Auth(#[from] strava_auth::Error),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("invalid heart rate band: {0}")]
    InvalidBand(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Result alias for activity operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_convert_and_keep_message() {
        let err: Error = strava_auth::Error::TokenRefresh {
            status: 400,
            body: "invalid refresh_token".into(),
        }
        .into();
        assert!(matches!(err, Error::Auth(_)));
        assert!(err.to_string().contains("invalid refresh_token"));
    }

    #[test]
    fn api_error_display_includes_status() {
        let err = Error::Api {
            status: 404,
            body: "Record Not Found".into(),
        };
        assert_eq!(err.to_string(), "API returned 404: Record Not Found");
    }
}
