//! Fetch → store → summarize pipeline

use strava_api::{
    ActivityClient, ActivityQuery, ActivityStore, Error, HeartRateBand, PaceSummary, Result,
    StoredActivity, band_pace,
};
use tracing::{info, warn};

/// Outcome of one sync run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Activities returned by the listing after the sport filter
    pub listed: usize,
    /// Newly downloaded and stored
    pub stored: usize,
    /// Already in the store
    pub skipped: usize,
    /// Stream requests the API refused for this activity only
    pub failed: usize,
    /// Stopped early because the API rate limit was hit
    pub rate_limited: bool,
}

/// Download streams for every listed activity not yet in `store`.
///
/// A rate limit stops the run but keeps everything stored so far. A
/// per-activity API error skips that activity. Token and transport failures
/// abort the run.
pub async fn sync_activities(
    client: &ActivityClient,
    store: &ActivityStore,
    query: &ActivityQuery,
) -> Result<SyncReport> {
    let activities = client.get_activities(query).await?;
    let mut report = SyncReport {
        listed: activities.len(),
        ..SyncReport::default()
    };

    for activity in &activities {
        if store.contains(activity.id)? {
            report.skipped += 1;
            continue;
        }

        let streams = match client.get_activity_streams(activity.id).await {
            Ok(streams) => streams,
            Err(Error::RateLimited(msg)) => {
                warn!(
                    error = %msg,
                    stored = report.stored,
                    "rate limited, already downloaded activities are kept"
                );
                report.rate_limited = true;
                break;
            }
            Err(Error::Api { status, body }) => {
                warn!(activity_id = activity.id, status, %body, "skipping activity");
                report.failed += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        if store.insert(&StoredActivity::new(activity, streams))? {
            report.stored += 1;
        }
    }

    info!(
        listed = report.listed,
        stored = report.stored,
        skipped = report.skipped,
        failed = report.failed,
        rate_limited = report.rate_limited,
        "sync finished"
    );
    Ok(report)
}

/// Band pace for one stored activity.
#[derive(Debug)]
pub struct ActivityPace {
    pub id: u64,
    pub name: String,
    pub start_date: String,
    pub summary: Option<PaceSummary>,
}

/// Compute the band pace of each record, preserving order.
pub fn band_paces(records: &[StoredActivity], band: HeartRateBand) -> Vec<ActivityPace> {
    records
        .iter()
        .map(|record| ActivityPace {
            id: record.id,
            name: record.name.clone(),
            start_date: record.start_date.clone(),
            summary: band_pace(&record.heartrate, &record.velocity, band),
        })
        .collect()
}
