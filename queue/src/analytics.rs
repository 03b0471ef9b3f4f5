//! Read-only analytics over queue history.
//!
//! Both aggregations visit every station concurrently and key their results by
//! station id.

use crate::config::AnalyticsConfig;
use crate::error::{QueueError, Result};
use crate::repository::QueueRepository;
use crate::types::{QueueEntry, Station, StationId};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::BTreeMap;

const INVALID_DATE: &str = "Invalid date format. Use ISO date strings.";
const MISSING_RANGE: &str = "Missing startDate or endDate query parameters";

/// Offset-less date-time layouts, read as UTC.
const LOCAL_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Parses an ISO-8601 date-time, or a plain `YYYY-MM-DD` date taken as UTC midnight.
///
/// Date-times without an offset are taken as UTC.
///
/// # Errors
///
/// `BadRequest` when the input is none of these.
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    if let Some(local) = LOCAL_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
    {
        return Ok(local.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| QueueError::BadRequest(INVALID_DATE.to_string()))
}

/// Inclusive time range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DateRange {
    /// Creates a range.
    ///
    /// # Errors
    ///
    /// `BadRequest` if `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(QueueError::BadRequest(
                "startDate must not be after endDate".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    /// Parses a range supplied as two ISO strings.
    ///
    /// # Errors
    ///
    /// `BadRequest` if either bound is missing or unparseable, or the bounds are reversed.
    pub fn parse_required(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        match (start, end) {
            (Some(start), Some(end)) => Self::new(parse_date(start)?, parse_date(end)?),
            _ => Err(QueueError::BadRequest(MISSING_RANGE.to_string())),
        }
    }

    /// Parses an optional range. Unless both bounds are given the range is ignored.
    ///
    /// # Errors
    ///
    /// `BadRequest` if a given pair is unparseable or reversed.
    pub fn parse_optional(start: Option<&str>, end: Option<&str>) -> Result<Option<Self>> {
        match (start, end) {
            (Some(start), Some(end)) => Self::new(parse_date(start)?, parse_date(end)?).map(Some),
            _ => Ok(None),
        }
    }

    /// Range start
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Range end
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

/// Average wait of one station.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationWaitTime {
    /// Station display name
    pub station_name: String,
    /// Mean wait in minutes, one decimal
    pub average_wait_time_minutes: f64,
    /// Samples behind the mean
    pub sample_count: usize,
}

/// Completed entries of one station.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationThroughput {
    /// Station display name
    pub station_name: String,
    /// Entries completed in the range
    pub completed_count: usize,
}

/// Minutes between joining and being called.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn wait_minutes(entry: &QueueEntry) -> Option<f64> {
    let served_at = entry.state.service()?.served_at;
    Some((served_at - entry.created_at).num_milliseconds() as f64 / 60_000.0)
}

/// Mean of the samples within the configured bounds, rounded to one decimal,
/// with the number of samples kept.
#[must_use]
pub fn average_wait(samples: impl IntoIterator<Item = f64>, config: &AnalyticsConfig) -> (f64, usize) {
    let kept: Vec<f64> = samples
        .into_iter()
        .filter(|minutes| *minutes >= config.min_wait_minutes && *minutes <= config.max_wait_minutes)
        .collect();
    if kept.is_empty() {
        return (0.0, 0);
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = kept.iter().sum::<f64>() / kept.len() as f64;
    ((mean * 10.0).round() / 10.0, kept.len())
}

/// Analytics over the queue collections.
#[derive(Clone)]
pub struct AnalyticsView {
    repository: QueueRepository,
    config: AnalyticsConfig,
}

impl AnalyticsView {
    /// Creates a view
    #[must_use]
    pub const fn new(repository: QueueRepository, config: AnalyticsConfig) -> Self {
        Self { repository, config }
    }

    /// Average wait per station, over a served-at range or the most recent samples.
    ///
    /// # Errors
    ///
    /// `Internal` on store failures.
    pub async fn average_wait_time(
        &self,
        range: Option<DateRange>,
    ) -> Result<BTreeMap<StationId, StationWaitTime>> {
        let stations = self.repository.stations().await?;
        let bounds = range.map(|range| (range.start, range.end));

        let results = try_join_all(stations.into_iter().map(|station| async move {
            let served = self
                .repository
                .served_entries(&station.id, bounds, self.config.recent_sample_limit)
                .await?;
            let (average, samples) = average_wait(served.iter().filter_map(wait_minutes), &self.config);
            Ok::<_, QueueError>((
                station.id,
                StationWaitTime {
                    station_name: station.name,
                    average_wait_time_minutes: average,
                    sample_count: samples,
                },
            ))
        }))
        .await?;

        tracing::debug!(stations = results.len(), ranged = bounds.is_some(), "Computed average wait times");
        Ok(results.into_iter().collect())
    }

    /// Completed entries per station inside a range.
    ///
    /// # Errors
    ///
    /// `Internal` on store failures.
    pub async fn completed_throughput(
        &self,
        range: DateRange,
    ) -> Result<BTreeMap<StationId, StationThroughput>> {
        let stations: Vec<Station> = self.repository.stations().await?;

        let results = try_join_all(stations.into_iter().map(|station| async move {
            let completed = self
                .repository
                .completed_count(&station.id, range.start, range.end)
                .await?;
            Ok::<_, QueueError>((
                station.id,
                StationThroughput {
                    station_name: station.name,
                    completed_count: completed,
                },
            ))
        }))
        .await?;

        tracing::debug!(stations = results.len(), "Computed completed throughput");
        Ok(results.into_iter().collect())
    }
}
