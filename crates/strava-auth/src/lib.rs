//! Strava OAuth credential handling
//!
//! Holds the single credential set used to authenticate every API call,
//! checks it for expiry, and transparently trades the refresh token for a
//! new access token when the cached one has lapsed.
//!
//! Credential flow:
//! 1. `TokenManager::load()` reads the set from a `CredentialStore` (fails fast)
//! 2. Callers ask `TokenManager::get_access_token()` before each request
//! 3. An expired token triggers `token::refresh_token()` against the provider
//! 4. The merged set is persisted via `CredentialStore::save()` and reloaded

pub mod constants;
pub mod credentials;
pub mod error;
pub mod manager;
pub mod token;

pub use constants::*;
pub use credentials::{CredentialSet, CredentialStore, EnvFileStore, MemoryStore};
pub use error::{Error, Result};
pub use manager::TokenManager;
pub use token::{TokenResponse, refresh_token};
