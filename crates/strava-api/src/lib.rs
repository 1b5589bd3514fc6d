//! Strava activity access
//!
//! Fetches an athlete's activities and their per-second heart rate and
//! speed streams, keeps them in a local SQLite database, and computes the average
//! pace over the samples that fall inside a heart rate band.
//!
//! Every request asks the shared `strava_auth::TokenManager` for a bearer
//! token first, so an expired token is refreshed transparently.

pub mod client;
pub mod error;
pub mod pace;
pub mod store;
pub mod types;

pub use client::{API_BASE_URL, ActivityClient};
pub use error::{Error, Result};
pub use pace::{HeartRateBand, PaceSummary, band_pace};
pub use store::{ActivityStore, StoredActivity};
pub use types::{Activity, ActivityQuery, ActivityStreams, parse_date};
