//! Activity and stream types

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest page size the activities endpoint accepts.
pub const MAX_PER_PAGE: u32 = 200;

const SECONDS_PER_DAY: i64 = 86_400;

/// Summary activity as returned by `GET /athlete/activities`.
///
/// Only the fields this crate uses are modelled. Heart rate averages are
/// absent for activities recorded without a monitor.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Activity {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub sport_type: String,
    /// UTC start time, RFC 3339
    pub start_date: String,
    #[serde(default)]
    pub start_date_local: Option<String>,
    /// Meters
    #[serde(default)]
    pub distance: f64,
    /// Seconds
    #[serde(default)]
    pub moving_time: u64,
    #[serde(default)]
    pub average_heartrate: Option<f64>,
    /// Meters per second
    #[serde(default)]
    pub average_speed: Option<f64>,
}

/// Per-sample heart rate (bpm) and smoothed speed (m/s) for one activity.
///
/// Samples are aligned by index. A stream the activity does not have is
/// empty rather than missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityStreams {
    pub heartrate: Vec<f64>,
    pub velocity: Vec<f64>,
}

/// Wire shape of `GET /activities/{id}/streams?key_by_type=true`.
#[derive(Debug, Deserialize)]
pub(crate) struct StreamSetResponse {
    #[serde(default)]
    heartrate: Option<Stream>,
    #[serde(default)]
    velocity_smooth: Option<Stream>,
}

#[derive(Debug, Deserialize)]
struct Stream {
    data: Vec<f64>,
}

impl From<StreamSetResponse> for ActivityStreams {
    fn from(response: StreamSetResponse) -> Self {
        Self {
            heartrate: response.heartrate.map(|s| s.data).unwrap_or_default(),
            velocity: response.velocity_smooth.map(|s| s.data).unwrap_or_default(),
        }
    }
}

/// Date window and sport filter for an activity listing.
///
/// `after`/`before` are unix seconds; `before` is the midnight that ends the
/// last requested day, so that day is included. An empty `sport_types` keeps every
/// activity; otherwise `sport_type` must match one entry exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityQuery {
    pub after: i64,
    pub before: i64,
    pub per_page: u32,
    pub sport_types: Vec<String>,
}

impl ActivityQuery {
    /// Query for activities between two `YYYY-MM-DD` dates, both days
    /// inclusive (UTC).
    pub fn between(start: &str, end: &str) -> Result<Self> {
        let after = parse_date(start)?;
        let last_day = parse_date(end)?;
        if last_day < after {
            return Err(Error::InvalidDate(format!(
                "end date {end} is before start date {start}"
            )));
        }
        Ok(Self {
            after,
            before: last_day + SECONDS_PER_DAY,
            per_page: MAX_PER_PAGE,
            sport_types: Vec::new(),
        })
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.clamp(1, MAX_PER_PAGE);
        self
    }

    pub fn with_sport_types<I, S>(mut self, sport_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sport_types = sport_types.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `activity` passes the sport filter.
    pub fn matches(&self, activity: &Activity) -> bool {
        self.sport_types.is_empty() || self.sport_types.iter().any(|s| *s == activity.sport_type)
    }
}

/// Parse a `YYYY-MM-DD` date into unix seconds at UTC midnight.
pub fn parse_date(date: &str) -> Result<i64> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|e| Error::InvalidDate(format!("{date:?}: {e}")))?;
    day.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .ok_or_else(|| Error::InvalidDate(format!("{date:?}: no midnight")))
}
