//! Error types for credential and token operations

/// Errors from credential loading and token refresh.
///
/// `Configuration` means the process cannot authenticate at all and should
/// stop. The refresh variants only fail the request that triggered them; the
/// next `get_access_token()` call retries from the stored state.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("token refresh rejected ({status}): {body}")]
    TokenRefresh { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    /// A well-formed token response whose values cannot be stored
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Whether the error leaves the process unable to authenticate.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
