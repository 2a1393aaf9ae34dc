/// Durable persistence gateway for tank readings.
///
/// Every accepted reading is appended to an append-only log keyed by
/// (tank, timestamp); the pipeline never updates or deletes log rows.
/// Daily aggregates are recomputed from the log and upserted by
/// (tank, date) — recomputation is a pure fold over the day's rows, so
/// repeating it always yields the same aggregate.
///
/// Two implementations: `PostgresStore` for deployments with a database,
/// and `MemoryStore` for tests and database-less runs. The pipeline treats
/// every store failure as non-fatal — in-memory state stays authoritative.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use postgres::NoTls;
use serde::Serialize;

use crate::model::{TankError, TankReading};
use crate::tanks::TankId;

// ---------------------------------------------------------------------------
// Daily aggregate
// ---------------------------------------------------------------------------

/// Per-day summary for one tank, derived from the durable log.
///
/// `consumption_liters` is the day's volume span (max − min), clamped at
/// zero so a refill day never reports negative consumption.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub max_level: f64,
    pub min_level: f64,
    pub avg_level: f64,
    pub consumption_liters: f64,
}

/// Folds one day's readings into an aggregate. Returns `None` for an empty
/// day. Pure and order-insensitive, so recomputing from the same log rows
/// is idempotent.
pub fn compute_daily_aggregate(date: NaiveDate, readings: &[TankReading]) -> Option<DailyAggregate> {
    if readings.is_empty() {
        return None;
    }
    let mut max_level = f64::NEG_INFINITY;
    let mut min_level = f64::INFINITY;
    let mut level_sum = 0.0;
    let mut max_volume = f64::NEG_INFINITY;
    let mut min_volume = f64::INFINITY;
    for r in readings {
        max_level = max_level.max(r.level_percentage);
        min_level = min_level.min(r.level_percentage);
        level_sum += r.level_percentage;
        max_volume = max_volume.max(r.volume_liters);
        min_volume = min_volume.min(r.volume_liters);
    }
    Some(DailyAggregate {
        date,
        max_level,
        min_level,
        avg_level: level_sum / readings.len() as f64,
        consumption_liters: (max_volume - min_volume).max(0.0),
    })
}

// ---------------------------------------------------------------------------
// Store contract
// ---------------------------------------------------------------------------

pub trait HistoryStore: Send + Sync {
    /// Appends one reading to the durable log.
    fn append(&self, reading: &TankReading) -> Result<(), TankError>;

    /// Readings for a tank since `since`, most-recent-first, capped at
    /// `limit` rows.
    fn history(
        &self,
        tank: &TankId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TankReading>, TankError>;

    /// All log rows for a tank falling on a UTC calendar day.
    fn readings_for_day(
        &self,
        tank: &TankId,
        date: NaiveDate,
    ) -> Result<Vec<TankReading>, TankError>;

    /// Inserts or replaces the aggregate for (tank, date).
    fn upsert_daily_aggregate(
        &self,
        tank: &TankId,
        aggregate: &DailyAggregate,
    ) -> Result<(), TankError>;

    /// Stored aggregates for a tank from `since_date` onward, oldest first.
    fn daily_aggregates(
        &self,
        tank: &TankId,
        since_date: NaiveDate,
    ) -> Result<Vec<DailyAggregate>, TankError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Store backed by process memory. Used by tests and by deployments
/// without a configured database; contents vanish on restart.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<TankId, Vec<TankReading>>>,
    aggregates: Mutex<HashMap<(TankId, NaiveDate), DailyAggregate>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl HistoryStore for MemoryStore {
    fn append(&self, reading: &TankReading) -> Result<(), TankError> {
        self.rows
            .lock()
            .unwrap()
            .entry(reading.tank_id.clone())
            .or_default()
            .push(reading.clone());
        Ok(())
    }

    fn history(
        &self,
        tank: &TankId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TankReading>, TankError> {
        let rows = self.rows.lock().unwrap();
        let mut out: Vec<TankReading> = rows
            .get(tank)
            .map(|v| v.iter().filter(|r| r.timestamp >= since).cloned().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out.truncate(limit);
        Ok(out)
    }

    fn readings_for_day(
        &self,
        tank: &TankId,
        date: NaiveDate,
    ) -> Result<Vec<TankReading>, TankError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .get(tank)
            .map(|v| {
                v.iter()
                    .filter(|r| r.timestamp.date_naive() == date)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn upsert_daily_aggregate(
        &self,
        tank: &TankId,
        aggregate: &DailyAggregate,
    ) -> Result<(), TankError> {
        self.aggregates
            .lock()
            .unwrap()
            .insert((tank.clone(), aggregate.date), aggregate.clone());
        Ok(())
    }

    fn daily_aggregates(
        &self,
        tank: &TankId,
        since_date: NaiveDate,
    ) -> Result<Vec<DailyAggregate>, TankError> {
        let aggregates = self.aggregates.lock().unwrap();
        let mut out: Vec<DailyAggregate> = aggregates
            .iter()
            .filter(|((id, date), _)| id == tank && *date >= since_date)
            .map(|(_, agg)| agg.clone())
            .collect();
        out.sort_by_key(|a| a.date);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Postgres store
// ---------------------------------------------------------------------------

/// Store backed by Postgres. The synchronous client is not `Sync`, so it
/// sits behind a mutex; the pipeline only reaches this store outside its
/// per-tank state locks, so the coarse lock never blocks readers of the
/// in-memory state.
pub struct PostgresStore {
    client: Mutex<postgres::Client>,
}

impl PostgresStore {
    /// Connects and ensures the schema exists.
    pub fn connect(database_url: &str) -> Result<PostgresStore, TankError> {
        let mut client = postgres::Client::connect(database_url, NoTls)
            .map_err(|e| TankError::PersistenceFailure(e.to_string()))?;
        Self::ensure_schema(&mut client)?;
        Ok(PostgresStore {
            client: Mutex::new(client),
        })
    }

    fn ensure_schema(client: &mut postgres::Client) -> Result<(), TankError> {
        client
            .batch_execute(
                "
                CREATE TABLE IF NOT EXISTS tank_history (
                    id BIGSERIAL PRIMARY KEY,
                    tank_id TEXT NOT NULL,
                    recorded_at TIMESTAMPTZ NOT NULL,
                    distance_cm DOUBLE PRECISION NOT NULL,
                    level_percentage DOUBLE PRECISION NOT NULL,
                    volume_liters DOUBLE PRECISION NOT NULL,
                    status TEXT NOT NULL,
                    alert_low BOOLEAN NOT NULL
                );
                CREATE INDEX IF NOT EXISTS tank_history_tank_time
                    ON tank_history (tank_id, recorded_at);
                CREATE TABLE IF NOT EXISTS daily_consumption (
                    tank_id TEXT NOT NULL,
                    date DATE NOT NULL,
                    max_level DOUBLE PRECISION NOT NULL,
                    min_level DOUBLE PRECISION NOT NULL,
                    avg_level DOUBLE PRECISION NOT NULL,
                    consumption_liters DOUBLE PRECISION NOT NULL,
                    PRIMARY KEY (tank_id, date)
                );
                ",
            )
            .map_err(|e| TankError::PersistenceFailure(e.to_string()))
    }

    fn row_to_reading(row: &postgres::Row) -> TankReading {
        TankReading {
            tank_id: TankId::new(row.get::<_, String>(0)),
            timestamp: row.get(1),
            distance_cm: row.get(2),
            level_percentage: row.get(3),
            volume_liters: row.get(4),
            status: row.get(5),
            alert_low: row.get(6),
        }
    }
}

impl HistoryStore for PostgresStore {
    fn append(&self, reading: &TankReading) -> Result<(), TankError> {
        let mut client = self.client.lock().unwrap();
        client
            .execute(
                "INSERT INTO tank_history
                     (tank_id, recorded_at, distance_cm, level_percentage,
                      volume_liters, status, alert_low)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &reading.tank_id.as_str(),
                    &reading.timestamp,
                    &reading.distance_cm,
                    &reading.level_percentage,
                    &reading.volume_liters,
                    &reading.status,
                    &reading.alert_low,
                ],
            )
            .map(|_| ())
            .map_err(|e| TankError::PersistenceFailure(e.to_string()))
    }

    fn history(
        &self,
        tank: &TankId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TankReading>, TankError> {
        let mut client = self.client.lock().unwrap();
        let rows = client
            .query(
                "SELECT tank_id, recorded_at, distance_cm, level_percentage,
                        volume_liters, status, alert_low
                 FROM tank_history
                 WHERE tank_id = $1 AND recorded_at >= $2
                 ORDER BY recorded_at DESC
                 LIMIT $3",
                &[&tank.as_str(), &since, &(limit as i64)],
            )
            .map_err(|e| TankError::PersistenceFailure(e.to_string()))?;
        Ok(rows.iter().map(Self::row_to_reading).collect())
    }

    fn readings_for_day(
        &self,
        tank: &TankId,
        date: NaiveDate,
    ) -> Result<Vec<TankReading>, TankError> {
        let day_start = date.and_time(NaiveTime::MIN).and_utc();
        let day_end = day_start + Duration::days(1);
        let mut client = self.client.lock().unwrap();
        let rows = client
            .query(
                "SELECT tank_id, recorded_at, distance_cm, level_percentage,
                        volume_liters, status, alert_low
                 FROM tank_history
                 WHERE tank_id = $1 AND recorded_at >= $2 AND recorded_at < $3
                 ORDER BY recorded_at",
                &[&tank.as_str(), &day_start, &day_end],
            )
            .map_err(|e| TankError::PersistenceFailure(e.to_string()))?;
        Ok(rows.iter().map(Self::row_to_reading).collect())
    }

    fn upsert_daily_aggregate(
        &self,
        tank: &TankId,
        aggregate: &DailyAggregate,
    ) -> Result<(), TankError> {
        let mut client = self.client.lock().unwrap();
        client
            .execute(
                "INSERT INTO daily_consumption
                     (tank_id, date, max_level, min_level, avg_level, consumption_liters)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (tank_id, date) DO UPDATE SET
                     max_level = EXCLUDED.max_level,
                     min_level = EXCLUDED.min_level,
                     avg_level = EXCLUDED.avg_level,
                     consumption_liters = EXCLUDED.consumption_liters",
                &[
                    &tank.as_str(),
                    &aggregate.date,
                    &aggregate.max_level,
                    &aggregate.min_level,
                    &aggregate.avg_level,
                    &aggregate.consumption_liters,
                ],
            )
            .map(|_| ())
            .map_err(|e| TankError::PersistenceFailure(e.to_string()))
    }

    fn daily_aggregates(
        &self,
        tank: &TankId,
        since_date: NaiveDate,
    ) -> Result<Vec<DailyAggregate>, TankError> {
        let mut client = self.client.lock().unwrap();
        let rows = client
            .query(
                "SELECT date, max_level, min_level, avg_level, consumption_liters
                 FROM daily_consumption
                 WHERE tank_id = $1 AND date >= $2
                 ORDER BY date",
                &[&tank.as_str(), &since_date],
            )
            .map_err(|e| TankError::PersistenceFailure(e.to_string()))?;
        Ok(rows
            .iter()
            .map(|row| DailyAggregate {
                date: row.get(0),
                max_level: row.get(1),
                min_level: row.get(2),
                avg_level: row.get(3),
                consumption_liters: row.get(4),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn reading(minute: u32, level: f64, volume: f64) -> TankReading {
        TankReading {
            tank_id: TankId::new("main"),
            distance_cm: 500.0,
            level_percentage: level,
            volume_liters: volume,
            status: "online".to_string(),
            alert_low: false,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    // --- Aggregate computation ----------------------------------------------

    #[test]
    fn test_aggregate_of_empty_day_is_none() {
        assert!(compute_daily_aggregate(day(), &[]).is_none());
    }

    #[test]
    fn test_aggregate_min_max_avg_and_consumption() {
        let rows = [
            reading(0, 80.0, 32_000.0),
            reading(10, 60.0, 24_000.0),
            reading(20, 70.0, 28_000.0),
        ];
        let agg = compute_daily_aggregate(day(), &rows).unwrap();
        assert_eq!(agg.max_level, 80.0);
        assert_eq!(agg.min_level, 60.0);
        assert_eq!(agg.avg_level, 70.0);
        assert_eq!(agg.consumption_liters, 8_000.0);
    }

    #[test]
    fn test_aggregate_recomputation_is_idempotent() {
        let rows = [
            reading(0, 55.5, 22_200.0),
            reading(15, 54.0, 21_600.0),
            reading(30, 52.5, 21_000.0),
        ];
        let first = compute_daily_aggregate(day(), &rows).unwrap();
        let second = compute_daily_aggregate(day(), &rows).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_single_reading_day_reports_zero_consumption() {
        let agg = compute_daily_aggregate(day(), &[reading(0, 50.0, 20_000.0)]).unwrap();
        assert_eq!(agg.consumption_liters, 0.0);
        assert_eq!(agg.max_level, agg.min_level);
    }

    // --- Memory store --------------------------------------------------------

    #[test]
    fn test_memory_store_history_is_windowed_and_most_recent_first() {
        let store = MemoryStore::new();
        for minute in [0, 10, 20, 30] {
            store.append(&reading(minute, 50.0, 20_000.0)).unwrap();
        }
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 12, 10, 0).unwrap();
        let rows = store.history(&TankId::new("main"), since, 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp.minute(), 30);
        assert_eq!(rows[1].timestamp.minute(), 20);
    }

    #[test]
    fn test_memory_store_upsert_replaces_same_date() {
        let store = MemoryStore::new();
        let tank = TankId::new("main");
        let mut agg = compute_daily_aggregate(day(), &[reading(0, 50.0, 20_000.0)]).unwrap();
        store.upsert_daily_aggregate(&tank, &agg).unwrap();
        agg.avg_level = 42.0;
        store.upsert_daily_aggregate(&tank, &agg).unwrap();
        let stored = store.daily_aggregates(&tank, day()).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].avg_level, 42.0);
    }

    #[test]
    fn test_memory_store_day_filter_excludes_other_days() {
        let store = MemoryStore::new();
        store.append(&reading(0, 50.0, 20_000.0)).unwrap();
        let mut next_day = reading(0, 40.0, 16_000.0);
        next_day.timestamp = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 1).unwrap();
        store.append(&next_day).unwrap();

        let tank = TankId::new("main");
        assert_eq!(store.readings_for_day(&tank, day()).unwrap().len(), 1);
        let may2 = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        assert_eq!(store.readings_for_day(&tank, may2).unwrap().len(), 1);
    }

    #[test]
    fn test_memory_store_isolates_tanks() {
        let store = MemoryStore::new();
        store.append(&reading(0, 50.0, 20_000.0)).unwrap();
        let other = TankId::new("garden");
        assert!(store.readings_for_day(&other, day()).unwrap().is_empty());
    }
}
