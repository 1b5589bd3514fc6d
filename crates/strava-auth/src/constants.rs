//! Strava OAuth constants

/// Token endpoint used for refresh-token exchange
pub const TOKEN_ENDPOINT: &str = "https://www.strava.com/oauth/token";

/// Grant type sent when trading a refresh token for a new access token
pub const REFRESH_GRANT_TYPE: &str = "refresh_token";

/// Default location of the credential resource
pub const DEFAULT_ENV_FILE: &str = ".env";
