//! Credential storage for the Strava OAuth client
//!
//! The credential set is a five-field record: the application's client ID and
//! secret plus the current access token, refresh token and expiry. It is read
//! from a `CredentialStore` when the manager starts and written back every
//! time a refresh replaces it.
//!
//! `EnvFileStore` keeps the record in a dotenv-style text file:
//!
//! ```text
//! CLIENT_ID="<integer>"
//! CLIENT_SECRET="<string>"
//! ACCESS_TOKEN="<string>"
//! REFRESH_TOKEN="<string>"
//! EXPIRES_AT="<integer>"
//! ```
//!
//! Keys are written uppercased and matched case-insensitively on load. Values
//! are written double-quoted with `\`, `"` and `$` escaped, so dotenv variable
//! substitution and whitespace trimming never alter what was saved.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::Secret;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::token::TokenResponse;

const CLIENT_ID: &str = "CLIENT_ID";
const CLIENT_SECRET: &str = "CLIENT_SECRET";
const ACCESS_TOKEN: &str = "ACCESS_TOKEN";
const REFRESH_TOKEN: &str = "REFRESH_TOKEN";
const EXPIRES_AT: &str = "EXPIRES_AT";

/// The OAuth credential record for one athlete/application pair.
///
/// `expires_at` is an absolute unix timestamp in seconds, as issued by the
/// token endpoint. It always belongs to the current `access_token`; the two
/// are only ever replaced together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSet {
    pub client_id: u64,
    pub client_secret: Secret<String>,
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub expires_at: u64,
}

impl CredentialSet {
    /// Whether the access token has lapsed at `now` (unix seconds).
    ///
    /// The token is valid through its exact expiry instant: only a time
    /// strictly after `expires_at` counts as expired.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now > self.expires_at
    }

    /// Build the successor set from a refresh response.
    ///
    /// The response never carries client credentials, so `client_id` and
    /// `client_secret` are carried over unchanged.
    pub fn with_refreshed_tokens(&self, response: TokenResponse) -> Self {
        Self {
            client_id: self.client_id,
            client_secret: self.client_secret.clone(),
            access_token: Secret::new(response.access_token),
            refresh_token: Secret::new(response.refresh_token),
            expires_at: response.expires_at,
        }
    }

    /// Key/value pairs in the order they are written to the resource.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (CLIENT_ID, self.client_id.to_string()),
            (CLIENT_SECRET, self.client_secret.expose().clone()),
            (ACCESS_TOKEN, self.access_token.expose().clone()),
            (REFRESH_TOKEN, self.refresh_token.expose().clone()),
            (EXPIRES_AT, self.expires_at.to_string()),
        ]
    }

    /// Check that every value can be stored and read back unchanged.
    ///
    /// Tokens must be non-empty and must not contain line breaks.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in self.to_fields() {
            if value.trim().is_empty() {
                return Err(Error::InvalidResponse(format!("{key} is empty")));
            }
            if value.contains(['\n', '\r']) {
                return Err(Error::InvalidResponse(format!("{key} contains a line break")));
            }
        }
        Ok(())
    }

    /// Parse a set from raw key/value pairs.
    ///
    /// Keys are compared case-insensitively; when a key repeats, the last
    /// occurrence wins. Every field is required and must be non-empty, and
    /// `CLIENT_ID`/`EXPIRES_AT` must be unsigned integers.
    pub fn from_fields<I, K, V>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let fields: HashMap<String, String> = fields
            .into_iter()
            .map(|(k, v)| (k.as_ref().trim().to_ascii_uppercase(), v.into()))
            .collect();

        Ok(Self {
            client_id: required_number(&fields, CLIENT_ID)?,
            client_secret: Secret::new(required(&fields, CLIENT_SECRET)?),
            access_token: Secret::new(required(&fields, ACCESS_TOKEN)?),
            refresh_token: Secret::new(required(&fields, REFRESH_TOKEN)?),
            expires_at: required_number(&fields, EXPIRES_AT)?,
        })
    }
}

fn required(fields: &HashMap<String, String>, key: &str) -> Result<String> {
    match fields.get(key) {
        Some(value) if !value.trim().is_empty() => Ok(value.clone()),
        Some(_) => Err(Error::Configuration(format!("{key} is empty"))),
        None => Err(Error::Configuration(format!("{key} is missing"))),
    }
}

fn required_number(fields: &HashMap<String, String>, key: &str) -> Result<u64> {
    let raw = required(fields, key)?;
    raw.trim().parse::<u64>().map_err(|_| {
        Error::Configuration(format!("{key} must be an unsigned integer, got {raw:?}"))
    })
}

/// Boxed future returned by store operations, so the trait stays usable as
/// `Arc<dyn CredentialStore>`.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Durable home of the credential set.
///
/// `load` must fail with `Error::Configuration` when the record is absent or
/// malformed. `save` replaces the whole record; a `load` that follows a
/// completed `save` must return exactly what was saved.
pub trait CredentialStore: Send + Sync {
    /// Read the full credential set.
    fn load(&self) -> StoreFuture<'_, CredentialSet>;

    /// Overwrite the stored record with `credentials`.
    fn save<'a>(&'a self, credentials: &'a CredentialSet) -> StoreFuture<'a, ()>;
}

/// Credential store backed by a dotenv-style `KEY=value` file.
///
/// The file is parsed without touching the process environment, so two
/// stores pointing at different files never interfere.
#[derive(Debug, Clone)]
pub struct EnvFileStore {
    path: PathBuf,
}

impl EnvFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<CredentialSet> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Configuration(format!(
                "reading credential file {}: {e}",
                self.path.display()
            ))
        })?;

        let fields = dotenvy::from_read_iter(contents.as_bytes())
            .collect::<std::result::Result<Vec<(String, String)>, _>>()
            .map_err(|e| {
                Error::Configuration(format!(
                    "parsing credential file {}: {e}",
                    self.path.display()
                ))
            })?;

        let credentials = CredentialSet::from_fields(fields)?;
        info!(
            path = %self.path.display(),
            client_id = credentials.client_id,
            expires_at = credentials.expires_at,
            "loaded credentials"
        );
        Ok(credentials)
    }

    async fn write(&self, credentials: &CredentialSet) -> Result<()> {
        let mut contents = String::new();
        for (key, value) in credentials.to_fields() {
            if value.contains(['\n', '\r']) {
                return Err(Error::Io(format!(
                    "{key} contains a line break and cannot be written to {}",
                    self.path.display()
                )));
            }
            contents.push_str(&format!("{}={}\n", key.to_uppercase(), quote(&value)));
        }

        common::fs::write_atomic(&self.path, contents.as_bytes())
            .await
            .map_err(|e| {
                Error::Io(format!(
                    "writing credential file {}: {e}",
                    self.path.display()
                ))
            })?;

        debug!(path = %self.path.display(), "persisted credentials");
        Ok(())
    }
}

/// Double-quote `value` for a dotenv file, escaping everything dotenvy would
/// otherwise interpret inside quotes.
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

impl CredentialStore for EnvFileStore {
    fn load(&self) -> StoreFuture<'_, CredentialSet> {
        Box::pin(self.read())
    }

    fn save<'a>(&'a self, credentials: &'a CredentialSet) -> StoreFuture<'a, ()> {
        Box::pin(self.write(credentials))
    }
}

/// In-process credential store.
///
/// Useful where the record comes from somewhere other than a file (a secrets
/// manager fetched at startup, or tests).
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<CredentialSet>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new(credentials: CredentialSet) -> Self {
        Self {
            state: Mutex::new(Some(credentials)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of completed `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> StoreFuture<'_, CredentialSet> {
        Box::pin(async move {
            self.state
                .lock()
                .await
                .clone()
                .ok_or_else(|| Error::Configuration("no credentials stored".into()))
        })
    }

    fn save<'a>(&'a self, credentials: &'a CredentialSet) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            *self.state.lock().await = Some(credentials.clone());
            self.saves.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }
}
