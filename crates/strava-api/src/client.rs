//! HTTP client for the Strava activity endpoints
//!
//! Each outbound request asks the token manager for a bearer token exactly
//! once, so a token that lapses mid-listing is refreshed before the next page.

use std::collections::HashSet;
use std::sync::Arc;

use reqwest::StatusCode;
use strava_auth::TokenManager;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::{Activity, ActivityQuery, ActivityStreams, StreamSetResponse};

/// Base URL of the Strava v3 API
pub const API_BASE_URL: &str = "https://www.strava.com/api/v3";

/// Stream keys requested for every activity
const STREAM_KEYS: &str = "heartrate,velocity_smooth";

/// Listing pages fetched before giving up on a window
pub const DEFAULT_MAX_PAGES: u32 = 100;

/// Client for athlete activities and activity streams.
pub struct ActivityClient {
    http_client: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenManager>,
    max_pages: u32,
}

impl ActivityClient {
    pub fn new(http_client: reqwest::Client, tokens: Arc<TokenManager>) -> Self {
        Self {
            http_client,
            base_url: API_BASE_URL.to_string(),
            tokens,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    /// Limit how many listing pages one `get_activities` call may request.
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Point the client at a different API root (e.g. a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// List the athlete's activities inside the query's date window.
    ///
    /// Pages through the listing until a short page comes back, then applies
    /// the sport filter. A full page that adds no new activity, or a listing
    /// longer than the page limit, is an `Error::InvalidResponse`.
    pub async fn get_activities(&self, query: &ActivityQuery) -> Result<Vec<Activity>> {
        info!(
            after = query.after,
            before = query.before,
            sport_types = ?query.sport_types,
            "fetching activities"
        );

        let url = format!("{}/athlete/activities", self.base_url);
        let mut fetched = Vec::new();
        let mut seen = HashSet::new();
        let mut page = 1u32;

        loop {
            if page > self.max_pages {
                warn!(max_pages = self.max_pages, "activity listing exceeded page limit");
                return Err(Error::InvalidResponse(format!(
                    "activity listing still full after {} pages",
                    self.max_pages
                )));
            }

            let token = self.tokens.get_access_token().await?;
            let response = self
                .http_client
                .get(&url)
                .bearer_auth(&token)
                .query(&[
                    ("after", query.after.to_string()),
                    ("before", query.before.to_string()),
                    ("per_page", query.per_page.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .await
                .map_err(|e| Error::Http(format!("activities request failed: {e}")))?;

            let status = response.status();
            record_request("activities", status);
            if status != StatusCode::OK {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| String::from("<no body>"));
                warn!(status = status.as_u16(), %body, "error fetching activities");
                return Err(Error::Api {
                    status: status.as_u16(),
                    body,
                });
            }

            let batch: Vec<Activity> = response
                .json()
                .await
                .map_err(|e| Error::InvalidResponse(format!("activities response: {e}")))?;
            debug!(page, count = batch.len(), "received activity page");

            let last_page = batch.len() < query.per_page as usize;
            let before = fetched.len();
            fetched.extend(batch.into_iter().filter(|a| seen.insert(a.id)));
            if last_page {
                break;
            }
            if fetched.len() == before {
                warn!(page, "activity page repeated earlier results");
                return Err(Error::InvalidResponse(format!(
                    "page {page} of the activity listing contained no new activities"
                )));
            }
            page += 1;
        }

        let total = fetched.len();
        let activities: Vec<Activity> = fetched.into_iter().filter(|a| query.matches(a)).collect();
        info!(total, kept = activities.len(), "retrieved activities");
        Ok(activities)
    }

    /// Fetch heart rate and smoothed speed streams for one activity.
    ///
    /// HTTP 429 maps to `Error::RateLimited`: Strava's short-term limit
    /// resets every 15 minutes, and callers should stop fetching rather than
    /// burn through the remaining activities.
    pub async fn get_activity_streams(&self, activity_id: u64) -> Result<ActivityStreams> {
        debug!(activity_id, "fetching activity streams");

        let token = self.tokens.get_access_token().await?;
        let url = format!("{}/activities/{activity_id}/streams", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&token)
            .query(&[("keys", STREAM_KEYS), ("key_by_type", "true")])
            .send()
            .await
            .map_err(|e| Error::Http(format!("streams request for {activity_id} failed: {e}")))?;

        let status = response.status();
        record_request("streams", status);
        match status {
            StatusCode::OK => {}
            StatusCode::TOO_MANY_REQUESTS => {
                warn!(activity_id, "stream request rate limited, retry in 15 minutes");
                return Err(Error::RateLimited(format!(
                    "streams for activity {activity_id}"
                )));
            }
            _ => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| String::from("<no body>"));
                warn!(activity_id, status = status.as_u16(), "error fetching activity streams");
                return Err(Error::Api {
                    status: status.as_u16(),
                    body,
                });
            }
        }

        let streams: StreamSetResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("streams for {activity_id}: {e}")))?;
        Ok(streams.into())
    }
}

fn record_request(endpoint: &'static str, status: StatusCode) {
    metrics::counter!(
        "strava_api_requests_total",
        "endpoint" => endpoint,
        "status" => status.as_u16().to_string()
    )
    .increment(1);
}
