//! Strava activity sync
//!
//! Single-binary batch job that:
//! 1. Loads the OAuth credential set (refreshing the access token if needed)
//! 2. Lists the athlete's activities in a date range
//! 3. Downloads heart rate and speed streams for activities not yet stored
//! 4. Prints the average pace inside the configured heart rate band
//!
//! Usage: `activity-sync --from YYYY-MM-DD --to YYYY-MM-DD [--config PATH]`
//!        `activity-sync --clear [--config PATH]` deletes every stored activity

mod config;
mod sync;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use strava_api::{ActivityClient, ActivityQuery, ActivityStore};
use strava_auth::{CredentialStore, EnvFileStore, TokenManager};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

const USAGE: &str = "usage: activity-sync --from YYYY-MM-DD --to YYYY-MM-DD [--config PATH] \
                     | activity-sync --clear [--config PATH]";

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs on stderr; stdout carries the pace report
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let config_path = Config::resolve_path(flag_value(&args, "--config"));
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    if has_flag(&args, "--clear") {
        let store = ActivityStore::open(&config.sync.store_path)
            .context("failed to open activity store")?;
        let removed = store.clear()?;
        println!("removed {removed} activities");
        return Ok(());
    }

    let start = flag_value(&args, "--from").context(USAGE)?;
    let end = flag_value(&args, "--to").context(USAGE)?;
    let band = config.heart_rate.band()?;

    info!(
        env_file = %config.credentials.env_file.display(),
        store_path = %config.sync.store_path.display(),
        sport_types = ?config.sync.sport_types,
        hr_low = band.low,
        hr_high = band.high,
        "configuration loaded"
    );

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.strava.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let credential_store: Arc<dyn CredentialStore> =
        Arc::new(EnvFileStore::new(config.credentials.env_file.clone()));
    let tokens = TokenManager::load(credential_store, http_client.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load credentials from {}",
                config.credentials.env_file.display()
            )
        })?
        .with_token_endpoint(config.strava.token_endpoint.clone());

    let client = ActivityClient::new(http_client, Arc::new(tokens))
        .with_base_url(config.strava.api_base_url.clone());
    let store =
        ActivityStore::open(&config.sync.store_path).context("failed to open activity store")?;

    let query = ActivityQuery::between(start, end)?
        .with_per_page(config.strava.per_page)
        .with_sport_types(config.sync.sport_types.iter().cloned());

    let report = sync::sync_activities(&client, &store, &query)
        .await
        .context("activity sync failed")?;
    if report.rate_limited {
        info!("rate limit reached, rerun in 15 minutes to fetch the rest");
    }

    let records = store.records_between(start, end)?;
    for row in sync::band_paces(&records, band) {
        match row.summary {
            Some(summary) => println!(
                "{}  {:>12}  {:<24}  {}/km  avg hr {:.0}  ({} samples)",
                row.start_date,
                row.id,
                row.name,
                summary.format_pace(),
                summary.average_heartrate,
                summary.samples
            ),
            None => println!(
                "{}  {:>12}  {:<24}  no samples within {}-{} bpm",
                row.start_date, row.id, row.name, band.low, band.high
            ),
        }
    }

    info!(activities = records.len(), "done");
    Ok(())
}

/// Value following `flag` in the argument list.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().skip(1).any(|a| a == flag)
}
