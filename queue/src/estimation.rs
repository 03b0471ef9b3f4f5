//! Wait-time estimation from historical service durations.
//!
//! The average service time of a station is the mean duration (`servedAt` to
//! `completedAt`) of its most recently completed entries, ignoring outliers. A
//! customer's estimate is the number of people ahead times that average, shared
//! across the counters currently staffed.

use crate::config::EstimationConfig;
use crate::error::Result;
use crate::repository::{stage_estimate, QueueRepository};
use crate::types::{QueueEntry, StationId};
use campus_queue_core::document_store::WriteBatch;

/// Mean of the samples within the configured bounds, or the default average
/// when none survive.
#[must_use]
pub fn average_service_minutes(
    durations: impl IntoIterator<Item = f64>,
    config: &EstimationConfig,
) -> f64 {
    let (sum, count) = durations
        .into_iter()
        .filter(|minutes| {
            *minutes >= config.min_service_minutes && *minutes <= config.max_service_minutes
        })
        .fold((0.0, 0_u32), |(sum, count), minutes| (sum + minutes, count + 1));

    if count == 0 {
        config.default_service_minutes
    } else {
        sum / f64::from(count)
    }
}

/// Service duration of a completed entry in minutes.
#[must_use]
#[allow(clippy::cast_precision_loss)] // millisecond durations fit easily in f64
pub fn service_duration_minutes(entry: &QueueEntry) -> Option<f64> {
    let served_at = entry.state.service()?.served_at;
    let completed_at = entry.state.completed_at()?;
    Some((completed_at - served_at).num_milliseconds() as f64 / 60_000.0)
}

/// Counters sharing the load; never less than one.
#[must_use]
pub fn effective_counters(active_counters: usize) -> usize {
    active_counters.max(1)
}

/// `round(people_ahead × average / counters)` in whole minutes.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn estimate_minutes(people_ahead: u32, average_minutes: f64, counters: usize) -> u32 {
    if people_ahead == 0 {
        return 0;
    }
    let minutes = f64::from(people_ahead) * average_minutes / effective_counters(counters) as f64;
    minutes.round().max(0.0) as u32
}

/// Reads history and writes wait estimates for a station's queue.
#[derive(Clone)]
pub struct EstimationEngine {
    repository: QueueRepository,
    config: EstimationConfig,
}

impl EstimationEngine {
    /// Creates an engine
    #[must_use]
    pub const fn new(repository: QueueRepository, config: EstimationConfig) -> Self {
        Self { repository, config }
    }

    /// Average service time of a station in minutes.
    ///
    /// # Errors
    ///
    /// `Internal` on store failures.
    pub async fn average_service_time_minutes(&self, station_id: &StationId) -> Result<f64> {
        let completed = self
            .repository
            .recent_completed(station_id, self.config.sample_limit)
            .await?;
        let average = average_service_minutes(
            completed.iter().filter_map(service_duration_minutes),
            &self.config,
        );
        tracing::debug!(
            station_id = %station_id,
            samples = completed.len(),
            average,
            "Computed average service time"
        );
        Ok(average)
    }

    /// Number of counters at the station with a staff member assigned.
    ///
    /// # Errors
    ///
    /// `Internal` on store failures.
    pub async fn active_counter_count(&self, station_id: &StationId) -> Result<usize> {
        let counters = self.repository.counters_for_station(station_id).await?;
        Ok(counters.iter().filter(|counter| counter.is_active()).count())
    }

    /// Estimated wait in minutes for the customer at `position` (1-based).
    ///
    /// # Errors
    ///
    /// `Internal` on store failures.
    pub async fn calculate_estimated_wait_time(
        &self,
        station_id: &StationId,
        position: u32,
    ) -> Result<u32> {
        let people_ahead = position.saturating_sub(1);
        if people_ahead == 0 {
            return Ok(0);
        }
        let average = self.average_service_time_minutes(station_id).await?;
        let counters = self.active_counter_count(station_id).await?;
        Ok(estimate_minutes(people_ahead, average, counters))
    }

    /// Rewrites the cached estimate of every active entry of a station in one batch.
    ///
    /// Returns the number of entries updated.
    ///
    /// # Errors
    ///
    /// `Internal` on store failures.
    pub async fn refresh_estimated_wait_times_for_station(
        &self,
        station_id: &StationId,
    ) -> Result<usize> {
        let active = self.repository.active_entries(station_id).await?;
        if active.is_empty() {
            return Ok(0);
        }

        let average = self.average_service_time_minutes(station_id).await?;
        let counters = self.active_counter_count(station_id).await?;

        let mut batch = WriteBatch::new();
        for (people_ahead, entry) in (0_u32..).zip(&active) {
            stage_estimate(
                &mut batch,
                &entry.value.id,
                estimate_minutes(people_ahead, average, counters),
            );
        }
        self.repository.commit(batch).await?;

        tracing::debug!(
            station_id = %station_id,
            updated = active.len(),
            "Refreshed wait estimates"
        );
        Ok(active.len())
    }
}
