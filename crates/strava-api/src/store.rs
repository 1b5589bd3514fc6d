//! Local activity storage
//!
//! Downloaded activities live in a SQLite `trainings` table keyed by activity
//! ID, with the raw heart rate and speed streams kept as a JSON column.
//! Activities already present are never fetched or written again, so an
//! interrupted sync (rate limit, refresh failure) can resume where it stopped.
//!
//! # Schema
//! ```sql
//! CREATE TABLE trainings (
//!     activity_id INTEGER PRIMARY KEY,
//!     name TEXT NOT NULL,
//!     sport_type TEXT NOT NULL,
//!     start_date TEXT NOT NULL,   -- RFC 3339, as returned by the API
//!     start_ts INTEGER,           -- unix seconds, NULL if start_date is unparsable
//!     average_heartrate REAL,
//!     average_speed REAL,
//!     streams TEXT NOT NULL       -- {"heartrate": [...], "velocity": [...]}
//! );
//! ```

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::DateTime;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pace::HeartRateBand;
use crate::types::{Activity, ActivityStreams, parse_date};

const SECONDS_PER_DAY: i64 = 86_400;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS trainings (
        activity_id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        sport_type TEXT NOT NULL,
        start_date TEXT NOT NULL,
        start_ts INTEGER,
        average_heartrate REAL,
        average_speed REAL,
        streams TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_trainings_start_ts ON trainings(start_ts);
"#;

const SELECT_COLUMNS: &str = "SELECT activity_id, name, sport_type, start_date, \
     average_heartrate, average_speed, streams FROM trainings";

/// A stored activity: summary fields plus its raw sample streams.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredActivity {
    pub id: u64,
    pub name: String,
    pub sport_type: String,
    /// UTC start time, RFC 3339
    pub start_date: String,
    pub average_heartrate: Option<f64>,
    pub average_speed: Option<f64>,
    pub heartrate: Vec<f64>,
    pub velocity: Vec<f64>,
}

impl StoredActivity {
    pub fn new(activity: &Activity, streams: ActivityStreams) -> Self {
        Self {
            id: activity.id,
            name: activity.name.clone(),
            sport_type: activity.sport_type.clone(),
            start_date: activity.start_date.clone(),
            average_heartrate: activity.average_heartrate,
            average_speed: activity.average_speed,
            heartrate: streams.heartrate,
            velocity: streams.velocity,
        }
    }

    fn started_at(&self) -> Option<i64> {
        DateTime::parse_from_rfc3339(&self.start_date)
            .ok()
            .map(|dt| dt.timestamp())
    }
}

#[derive(Serialize)]
struct StreamsRef<'a> {
    heartrate: &'a [f64],
    velocity: &'a [f64],
}

#[derive(Deserialize)]
struct StoredStreams {
    #[serde(default)]
    heartrate: Vec<f64>,
    #[serde(default)]
    velocity: Vec<f64>,
}

/// SQLite-backed activity store.
///
/// The connection sits behind a mutex; every operation is a single short
/// statement, so callers on the async runtime hold it only briefly.
pub struct ActivityStore {
    conn: Mutex<Connection>,
}

impl ActivityStore {
    /// Open (or create) the database at `path` and make sure the table exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| storage(&format!("opening {}", path.display()), e))?;
        let store = Self::with_connection(conn)?;
        let activities = store.len()?;
        info!(path = %path.display(), activities, "opened activity store");
        Ok(store)
    }

    /// Store that lives only as long as the value.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| storage("opening in-memory store", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| storage("creating trainings table", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("activity store lock poisoned".into()))
    }

    /// Whether an activity with `id` is already stored.
    pub fn contains(&self, id: u64) -> Result<bool> {
        let found = self
            .conn()?
            .query_row(
                "SELECT 1 FROM trainings WHERE activity_id = ?1",
                params![to_sql_id(id)?],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| storage("looking up activity", e))?;
        Ok(found.is_some())
    }

    /// Store `activity`.
    ///
    /// Returns `false` without writing when the ID is already present.
    pub fn insert(&self, activity: &StoredActivity) -> Result<bool> {
        let start_ts = activity.started_at();
        if start_ts.is_none() {
            warn!(
                activity_id = activity.id,
                start_date = %activity.start_date,
                "activity has unparsable start date, it will not match any date range"
            );
        }
        let streams = serde_json::to_string(&StreamsRef {
            heartrate: &activity.heartrate,
            velocity: &activity.velocity,
        })
        .map_err(|e| Error::Storage(format!("serializing streams: {e}")))?;

        let inserted = self
            .conn()?
            .execute(
                "INSERT OR IGNORE INTO trainings \
                 (activity_id, name, sport_type, start_date, start_ts, \
                  average_heartrate, average_speed, streams) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    to_sql_id(activity.id)?,
                    activity.name,
                    activity.sport_type,
                    activity.start_date,
                    start_ts,
                    activity.average_heartrate,
                    activity.average_speed,
                    streams,
                ],
            )
            .map_err(|e| storage("inserting activity", e))?;

        if inserted == 0 {
            debug!(activity_id = activity.id, "activity already stored, skipping");
            return Ok(false);
        }
        debug!(activity_id = activity.id, "stored activity");
        Ok(true)
    }

    /// Activities that started between two `YYYY-MM-DD` dates, both days
    /// inclusive, ordered by start time.
    pub fn records_between(&self, start: &str, end: &str) -> Result<Vec<StoredActivity>> {
        let (from, until) = day_window(start, end)?;
        self.query(
            &format!("{SELECT_COLUMNS} WHERE start_ts BETWEEN ?1 AND ?2 ORDER BY start_ts, activity_id"),
            params![from, until],
        )
    }

    /// Like [`records_between`](Self::records_between), restricted to
    /// activities whose average heart rate lies inside `band`.
    ///
    /// Activities recorded without a heart rate monitor never match.
    pub fn records_in_hr_range(
        &self,
        start: &str,
        end: &str,
        band: HeartRateBand,
    ) -> Result<Vec<StoredActivity>> {
        let (from, until) = day_window(start, end)?;
        self.query(
            &format!(
                "{SELECT_COLUMNS} WHERE start_ts BETWEEN ?1 AND ?2 \
                 AND average_heartrate BETWEEN ?3 AND ?4 ORDER BY start_ts, activity_id"
            ),
            params![from, until, f64::from(band.low), f64::from(band.high)],
        )
    }

    /// Delete every stored activity, returning how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let removed = self
            .conn()?
            .execute("DELETE FROM trainings", [])
            .map_err(|e| storage("clearing trainings", e))?;
        warn!(removed, "cleared activity store");
        Ok(removed)
    }

    /// Number of stored activities.
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM trainings", [], |row| row.get(0))
            .map_err(|e| storage("counting activities", e))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<StoredActivity>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| storage("preparing query", e))?;
        let rows = stmt
            .query_map(params, from_row)
            .map_err(|e| storage("querying activities", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| storage("reading activity row", e))
    }
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<StoredActivity> {
    let id: i64 = row.get(0)?;
    let streams: String = row.get(6)?;
    let streams: StoredStreams = serde_json::from_str(&streams)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    Ok(StoredActivity {
        id: u64::try_from(id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(e)))?,
        name: row.get(1)?,
        sport_type: row.get(2)?,
        start_date: row.get(3)?,
        average_heartrate: row.get(4)?,
        average_speed: row.get(5)?,
        heartrate: streams.heartrate,
        velocity: streams.velocity,
    })
}

/// Unix-second bounds covering both `YYYY-MM-DD` days completely.
fn day_window(start: &str, end: &str) -> Result<(i64, i64)> {
    Ok((parse_date(start)?, parse_date(end)? + SECONDS_PER_DAY - 1))
}

fn to_sql_id(id: u64) -> Result<i64> {
    i64::try_from(id).map_err(|_| Error::Storage(format!("activity id {id} out of range")))
}

fn storage(context: &str, error: rusqlite::Error) -> Error {
    Error::Storage(format!("{context}: {error}"))
}
