//! Average pace inside a heart rate band
//!
//! Pairs each heart rate sample with the speed sample at the same index,
//! keeps the pairs whose heart rate lies inside the band and whose speed is
//! positive, and reports the mean heart rate, mean speed and the pace that
//! speed corresponds to.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Inclusive heart rate range in beats per minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateBand {
    pub low: u16,
    pub high: u16,
}

impl HeartRateBand {
    pub fn new(low: u16, high: u16) -> Result<Self> {
        if low > high {
            return Err(Error::InvalidBand(format!(
                "low limit {low} is above high limit {high}"
            )));
        }
        Ok(Self { low, high })
    }

    pub fn contains(&self, heartrate: f64) -> bool {
        (f64::from(self.low)..=f64::from(self.high)).contains(&heartrate)
    }
}

/// Averages over the samples that fell inside a band.
#[derive(Debug, Clone, PartialEq)]
pub struct PaceSummary {
    pub samples: usize,
    pub average_heartrate: f64,
    pub average_speed_kmh: f64,
    /// Time per kilometer at the average speed, whole seconds
    pub pace: Duration,
}

impl PaceSummary {
    /// Pace as `m:ss` per kilometer.
    pub fn format_pace(&self) -> String {
        let secs = self.pace.as_secs();
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}

/// Compute the band pace for one activity's streams.
///
/// Returns `None` when no sample qualifies (no heart rate stream, or the
/// athlete never entered the band while moving).
pub fn band_pace(heartrate: &[f64], velocity: &[f64], band: HeartRateBand) -> Option<PaceSummary> {
    let (count, hr_sum, speed_sum) = heartrate
        .iter()
        .zip(velocity)
        .filter(|&(&hr, &speed)| band.contains(hr) && speed > 0.0)
        .fold((0usize, 0.0, 0.0), |(n, hr_sum, speed_sum), (&hr, &speed)| {
            (n + 1, hr_sum + hr, speed_sum + speed)
        });

    if count == 0 {
        return None;
    }

    let mean_speed = speed_sum / count as f64;
    Some(PaceSummary {
        samples: count,
        average_heartrate: hr_sum / count as f64,
        average_speed_kmh: mean_speed * 3.6,
        pace: Duration::from_secs((1000.0 / mean_speed).round() as u64),
    })
}
