//! Observation history persistence.
//!
//! One row per activity in `activities`, one row per participating detector
//! in `activity_units`. The scheduler replays `activity_units` coverage to
//! rebuild per-target observed frequency bands, and followups re-apply the
//! tuning of the activity they chase. Bulk writes run here, off the
//! activity's event task.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use seeker_core::DetectorAssignment;
use seeker_model::{ActivityId, TargetId};
use sqlx::PgPool;
use tracing::info;

use crate::activity::ActivityUnit;
use crate::errors::AppResult;

/// Database-backed activity and unit records.
#[derive(Debug, Clone)]
pub struct ObsHistory {
    pool: PgPool,
}

impl ObsHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Allocate the next monotonically increasing activity id.
    pub async fn next_activity_id(&self) -> AppResult<ActivityId> {
        let row: (i64,) =
            sqlx::query_as("INSERT INTO activities DEFAULT VALUES RETURNING id")
                .fetch_one(&self.pool)
                .await?;
        Ok(ActivityId(row.0))
    }

    /// Finalize the activity row and write one unit row per valid unit.
    /// Retried once on failure; inserts are idempotent per (activity,
    /// detector) thanks to the uniqueness constraint.
    pub async fn record_activity_results(
        &self,
        activity_id: ActivityId,
        activity_type: &str,
        valid_observation: bool,
        start_of_data_collection: DateTime<Utc>,
        units: &[ActivityUnit],
    ) -> AppResult<()> {
        let mut attempt = self
            .write_results(
                activity_id,
                activity_type,
                valid_observation,
                start_of_data_collection,
                units,
            )
            .await;
        if attempt.is_err() {
            attempt = self
                .write_results(
                    activity_id,
                    activity_type,
                    valid_observation,
                    start_of_data_collection,
                    units,
                )
                .await;
        }
        attempt
    }

    async fn write_results(
        &self,
        activity_id: ActivityId,
        activity_type: &str,
        valid_observation: bool,
        start_of_data_collection: DateTime<Utc>,
        units: &[ActivityUnit],
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE activities SET type = $2, valid_observation = $3, \
             start_of_data_collection = $4 WHERE id = $1",
        )
        .bind(activity_id.0)
        .bind(activity_type)
        .bind(valid_observation)
        .bind(start_of_data_collection)
        .execute(&mut *tx)
        .await?;

        for unit in units {
            // Units that lost their component mid-activity leave no row.
            if !unit.valid_observation {
                continue;
            }
            let (Some(tuning), Some(low), Some(high)) =
                (unit.tuning, unit.low_freq_mhz(), unit.high_freq_mhz())
            else {
                continue;
            };
            sqlx::query(
                "INSERT INTO activity_units \
                 (activity_id, target_id, primary_target_id, beam_number, \
                  dx_number, dx_tune_freq, dx_low_freq_mhz, dx_high_freq_mhz, \
                  valid_observation, start_of_data_collection) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 ON CONFLICT (activity_id, dx_number) DO NOTHING",
            )
            .bind(activity_id.0)
            .bind(unit.target.0)
            .bind(unit.primary_target.0)
            .bind(unit.beam.0)
            .bind(unit.detector_number.0)
            .bind(tuning.center_freq_mhz)
            .bind(low)
            .bind(high)
            .bind(unit.valid_observation)
            .bind(start_of_data_collection)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            activity = %activity_id,
            units = units.len(),
            "observation history recorded"
        );
        Ok(())
    }

    /// Frequency coverage written by one activity, for scheduler replay.
    pub async fn coverage_for_activity(
        &self,
        activity_id: ActivityId,
    ) -> AppResult<Vec<(TargetId, f64, f64)>> {
        let rows: Vec<(i64, f64, f64)> = sqlx::query_as(
            "SELECT target_id, dx_low_freq_mhz, dx_high_freq_mhz \
             FROM activity_units \
             WHERE activity_id = $1 AND valid_observation",
        )
        .bind(activity_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(target, low, high)| (TargetId(target), low, high))
            .collect())
    }

    /// Tuning of a previous activity keyed by detector name, so a followup
    /// can re-observe the same spectrum on the same hardware.
    pub async fn previous_assignments(
        &self,
        activity_id: ActivityId,
    ) -> AppResult<HashMap<String, DetectorAssignment>> {
        let rows: Vec<(i32, f64)> = sqlx::query_as(
            "SELECT dx_number, dx_tune_freq FROM activity_units \
             WHERE activity_id = $1 AND valid_observation \
             ORDER BY dx_tune_freq",
        )
        .bind(activity_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut out = HashMap::new();
        for (index, (dx_number, tune_freq)) in rows.into_iter().enumerate() {
            out.insert(
                format!("dx{dx_number}"),
                DetectorAssignment {
                    channel: index as i32,
                    center_freq_mhz: tune_freq,
                },
            );
        }
        Ok(out)
    }

    /// Observed frequency bands for every target, for scheduler startup.
    pub async fn full_coverage(&self) -> AppResult<Vec<(TargetId, f64, f64)>> {
        let rows: Vec<(i64, f64, f64)> = sqlx::query_as(
            "SELECT target_id, dx_low_freq_mhz, dx_high_freq_mhz \
             FROM activity_units WHERE valid_observation",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(target, low, high)| (TargetId(target), low, high))
            .collect())
    }
}

/// Schema the server expects; applied at startup when the database is on.
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS activities (
    id BIGSERIAL PRIMARY KEY,
    type TEXT,
    valid_observation BOOLEAN NOT NULL DEFAULT FALSE,
    start_of_data_collection TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS activity_units (
    activity_id BIGINT NOT NULL REFERENCES activities(id),
    target_id BIGINT NOT NULL,
    primary_target_id BIGINT NOT NULL,
    beam_number INT NOT NULL,
    dx_number INT NOT NULL,
    dx_tune_freq DOUBLE PRECISION NOT NULL,
    dx_low_freq_mhz DOUBLE PRECISION NOT NULL,
    dx_high_freq_mhz DOUBLE PRECISION NOT NULL,
    valid_observation BOOLEAN NOT NULL DEFAULT TRUE,
    start_of_data_collection TIMESTAMPTZ,
    UNIQUE (activity_id, dx_number)
);

CREATE TABLE IF NOT EXISTS parameter_snapshots (
    id BIGSERIAL PRIMARY KEY,
    activity_id BIGINT NOT NULL,
    group_name TEXT NOT NULL,
    params JSONB NOT NULL
);

CREATE INDEX IF NOT EXISTS activity_units_target_idx
    ON activity_units (target_id);
";

impl ObsHistory {
    /// Create the schema when absent.
    pub async fn ensure_schema(&self) -> AppResult<()> {
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}
