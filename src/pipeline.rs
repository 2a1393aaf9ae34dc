/// Ingestion pipeline and current-state store.
///
/// `Monitor` owns all mutable telemetry state: one slot per tank holding
/// the filter state, the alert state machine, the latest snapshot, and the
/// in-memory history ring. It is an explicit process-scoped value injected
/// into the transport layer — never ambient — so tests can run several
/// independent pipelines in one process.
///
/// Concurrency: readings for the same tank serialize on that tank's slot
/// mutex and apply in arrival order; readings for different tanks proceed
/// in parallel. The durable write runs after the slot lock is released, so
/// a storage outage can never block readers or delay the in-memory update.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::alert::{derive_status, staleness::OFFLINE_STATUS, AlertState};
use crate::calibrate::calibrate;
use crate::db::{compute_daily_aggregate, DailyAggregate, HistoryStore};
use crate::filter::FilterState;
use crate::history::{HistoryBuffer, DEFAULT_HISTORY_CAPACITY};
use crate::logging;
use crate::model::{
    IngestOutcome, SensorMessage, TankError, TankReading, DEFAULT_STALENESS_WINDOW_SECS,
    DEFAULT_STATUS, OUT_OF_RANGE_MARGIN_CM,
};
use crate::tanks::{TankId, TankRegistry};

/// Default query window for durable history, in days.
pub const DEFAULT_HISTORY_WINDOW_DAYS: i64 = 7;

/// Default row cap for durable history queries.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Per-tank state
// ---------------------------------------------------------------------------

/// All mutable state for one tank. Created lazily on the tank's first
/// reading and kept for the life of the process; the latest snapshot is
/// replaced wholesale on each accepted reading, never mutated field by
/// field, so readers always see a complete record.
#[derive(Debug)]
struct TankSlot {
    filter: FilterState,
    alert: AlertState,
    latest: Option<TankReading>,
    history: HistoryBuffer,
}

impl TankSlot {
    fn new(history_capacity: usize) -> TankSlot {
        TankSlot {
            filter: FilterState::new(),
            alert: AlertState::default(),
            latest: None,
            history: HistoryBuffer::new(history_capacity),
        }
    }
}

// ---------------------------------------------------------------------------
// Fleet status
// ---------------------------------------------------------------------------

/// Summary of one tank for fleet-status reports.
#[derive(Debug, Clone, Serialize)]
pub struct TankStatus {
    pub tank_id: TankId,
    pub name: String,
    /// Stored status label while fresh, `"offline"` once stale or when the
    /// tank has never reported.
    pub status: String,
    pub level_percentage: Option<f64>,
    pub alert_low: bool,
    pub last_update: Option<DateTime<Utc>>,
}

/// Fleet-wide summary across all configured tanks.
#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    pub tank_count: usize,
    pub total_readings: u64,
    pub tanks: Vec<TankStatus>,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

pub struct Monitor {
    registry: RwLock<TankRegistry>,
    slots: Mutex<HashMap<TankId, Arc<Mutex<TankSlot>>>>,
    store: Box<dyn HistoryStore>,
    history_capacity: usize,
    staleness_window_secs: i64,
    total_accepted: AtomicU64,
}

impl Monitor {
    pub fn new(registry: TankRegistry, store: Box<dyn HistoryStore>) -> Monitor {
        logging::info(
            logging::Subsystem::Pipeline,
            None,
            &format!("pipeline started with {} tanks", registry.len()),
        );
        Monitor {
            registry: RwLock::new(registry),
            slots: Mutex::new(HashMap::new()),
            store,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            staleness_window_secs: DEFAULT_STALENESS_WINDOW_SECS,
            total_accepted: AtomicU64::new(0),
        }
    }

    /// Overrides the per-tank in-memory window size. Applies to slots
    /// created after the call, so set it before ingesting.
    pub fn with_history_capacity(mut self, capacity: usize) -> Monitor {
        self.history_capacity = capacity;
        self
    }

    pub fn with_staleness_window(mut self, window_secs: i64) -> Monitor {
        self.staleness_window_secs = window_secs;
        self
    }

    /// Replaces the tank configuration set. Per-tank filter and alert
    /// state survive the reload; new thresholds take effect on the next
    /// reading. The caller validates the new registry by constructing it.
    pub fn reload_registry(&self, registry: TankRegistry) {
        logging::info(
            logging::Subsystem::Config,
            None,
            &format!("registry reloaded with {} tanks", registry.len()),
        );
        *self.registry.write().unwrap() = registry;
    }

    fn slot(&self, id: &TankId) -> Arc<Mutex<TankSlot>> {
        let mut slots = self.slots.lock().unwrap();
        slots
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(TankSlot::new(self.history_capacity))))
            .clone()
    }

    fn existing_slot(&self, id: &TankId) -> Option<Arc<Mutex<TankSlot>>> {
        self.slots.lock().unwrap().get(id).cloned()
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Processes one sensor message to completion: resolve → condition →
    /// calibrate → alert → snapshot/history → durable append.
    ///
    /// A reading is processed atomically or rejected atomically; the three
    /// outcome variants are distinct and the transport layer must not
    /// collapse them. The returned reading is rounded for reporting;
    /// internal state keeps full precision.
    pub fn ingest(&self, msg: SensorMessage, now: DateTime<Utc>) -> IngestOutcome {
        if !msg.distance_cm.is_finite() {
            return IngestOutcome::Rejected(TankError::MalformedInput(
                "distance_cm must be a finite number".to_string(),
            ));
        }

        let cfg = {
            let registry = self.registry.read().unwrap();
            match registry.resolve(msg.tank_id.as_deref()) {
                Ok(cfg) => cfg.clone(),
                Err(e) => {
                    logging::warn(
                        logging::Subsystem::Ingest,
                        msg.tank_id.as_deref(),
                        &format!("rejected reading: {}", e),
                    );
                    return IngestOutcome::Rejected(e);
                }
            }
        };
        let tank_id = cfg.tank_id();

        let slot = self.slot(&tank_id);
        let reading = {
            let mut slot = slot.lock().unwrap();

            let max_plausible = cfg.empty_distance_cm + OUT_OF_RANGE_MARGIN_CM;
            let smoothed = match slot.filter.condition(msg.distance_cm, max_plausible) {
                Some(s) => s,
                None => {
                    logging::log_ignored_reading(tank_id.as_str(), msg.distance_cm);
                    return IngestOutcome::Ignored {
                        tank_id,
                        reason: "distance outside plausible range".to_string(),
                    };
                }
            };

            let (percentage, volume) = calibrate(&cfg, smoothed);
            slot.alert = slot.alert.step(
                percentage,
                cfg.low_alert_threshold_pct,
                cfg.low_alert_exit_pct,
            );

            let reading = TankReading {
                tank_id: tank_id.clone(),
                distance_cm: smoothed,
                level_percentage: percentage,
                volume_liters: volume,
                status: msg.status.unwrap_or_else(|| DEFAULT_STATUS.to_string()),
                alert_low: slot.alert.is_active(),
                timestamp: now,
            };
            slot.latest = Some(reading.clone());
            slot.history.push(reading.clone());
            reading
        }; // slot lock released; the durable write below never holds it

        self.total_accepted.fetch_add(1, Ordering::Relaxed);
        let persisted = self.persist(&reading);

        IngestOutcome::Accepted {
            reading: reading.rounded(),
            persisted,
        }
    }

    /// Appends to the durable log and refreshes the day's aggregate.
    /// Failures are logged and reported through the return value; they
    /// never roll back the in-memory update.
    fn persist(&self, reading: &TankReading) -> bool {
        if let Err(e) = self.store.append(reading) {
            logging::log_db_failure(reading.tank_id.as_str(), "append", &e);
            return false;
        }

        let date = reading.timestamp.date_naive();
        match self.store.readings_for_day(&reading.tank_id, date) {
            Ok(rows) => {
                if let Some(agg) = compute_daily_aggregate(date, &rows) {
                    if let Err(e) = self.store.upsert_daily_aggregate(&reading.tank_id, &agg) {
                        logging::log_db_failure(reading.tank_id.as_str(), "aggregate upsert", &e);
                    }
                }
            }
            Err(e) => {
                logging::log_db_failure(reading.tank_id.as_str(), "aggregate query", &e);
            }
        }
        true
    }

    // -----------------------------------------------------------------------
    // Query surface
    // -----------------------------------------------------------------------

    /// Latest snapshot for a tank (rounded for reporting). `Ok(None)` when
    /// the tank is configured but has not reported yet.
    pub fn latest(&self, tank: Option<&str>) -> Result<Option<TankReading>, TankError> {
        let id = {
            let registry = self.registry.read().unwrap();
            registry.resolve(tank)?.tank_id()
        };
        Ok(self
            .existing_slot(&id)
            .and_then(|slot| slot.lock().unwrap().latest.clone())
            .map(|r| r.rounded()))
    }

    /// Latest snapshot per tank that has reported at least once.
    pub fn all_latest(&self) -> HashMap<TankId, TankReading> {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .filter_map(|(id, slot)| {
                slot.lock()
                    .unwrap()
                    .latest
                    .clone()
                    .map(|r| (id.clone(), r.rounded()))
            })
            .collect()
    }

    /// Recent readings from the in-memory ring, most-recent-first.
    pub fn recent(&self, tank: Option<&str>, limit: usize) -> Result<Vec<TankReading>, TankError> {
        let id = {
            let registry = self.registry.read().unwrap();
            registry.resolve(tank)?.tank_id()
        };
        Ok(self
            .existing_slot(&id)
            .map(|slot| slot.lock().unwrap().history.recent(limit))
            .unwrap_or_default()
            .iter()
            .map(|r| r.rounded())
            .collect())
    }

    /// Durable history for a tank over the trailing window, most-recent-
    /// first, capped at `limit` rows. Omitted parameters fall back to the
    /// 7-day window and 100-row cap.
    pub fn history(
        &self,
        tank: Option<&str>,
        window_days: Option<i64>,
        limit: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TankReading>, TankError> {
        let id = {
            let registry = self.registry.read().unwrap();
            registry.resolve(tank)?.tank_id()
        };
        let window_days = window_days.unwrap_or(DEFAULT_HISTORY_WINDOW_DAYS);
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        let since = now - Duration::days(window_days.max(0));
        let rows = self.store.history(&id, since, limit)?;
        Ok(rows.iter().map(|r| r.rounded()).collect())
    }

    /// Stored daily aggregates for the trailing window (7 days when
    /// omitted), oldest first.
    pub fn daily_consumption(
        &self,
        tank: Option<&str>,
        window_days: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<DailyAggregate>, TankError> {
        let id = {
            let registry = self.registry.read().unwrap();
            registry.resolve(tank)?.tank_id()
        };
        let window_days = window_days.unwrap_or(DEFAULT_HISTORY_WINDOW_DAYS);
        let since_date = (now - Duration::days(window_days.max(0))).date_naive();
        self.store.daily_aggregates(&id, since_date)
    }

    /// Fleet-wide summary over all configured, enabled tanks. A tank with
    /// no accepted reading inside the staleness window reports offline
    /// regardless of its last stored status label.
    pub fn fleet_status(&self, now: DateTime<Utc>) -> FleetStatus {
        let registry = self.registry.read().unwrap();
        let tanks = registry
            .tank_ids()
            .into_iter()
            .map(|id| {
                let name = registry
                    .get(&id)
                    .map(|cfg| cfg.name.clone())
                    .unwrap_or_default();
                let latest = self
                    .existing_slot(&id)
                    .and_then(|slot| slot.lock().unwrap().latest.clone());
                match latest {
                    Some(r) => TankStatus {
                        tank_id: id,
                        name,
                        status: derive_status(
                            &r.status,
                            r.timestamp,
                            self.staleness_window_secs,
                            now,
                        ),
                        level_percentage: Some(crate::calibrate::round2(r.level_percentage)),
                        alert_low: r.alert_low,
                        last_update: Some(r.timestamp),
                    },
                    None => TankStatus {
                        tank_id: id,
                        name,
                        status: OFFLINE_STATUS.to_string(),
                        level_percentage: None,
                        alert_low: false,
                        last_update: None,
                    },
                }
            })
            .collect();

        FleetStatus {
            tank_count: registry.len(),
            total_readings: self.total_accepted.load(Ordering::Relaxed),
            tanks,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrate::CalibrationStrategy;
    use crate::db::MemoryStore;
    use crate::tanks::TankConfig;
    use chrono::TimeZone;

    fn registry() -> TankRegistry {
        let cfg = TankConfig {
            id: "main".to_string(),
            name: "Main cistern".to_string(),
            sensor_offset_cm: 30.0,
            empty_distance_cm: 1000.0,
            total_volume_liters: 40_000.0,
            low_alert_threshold_pct: 20.0,
            low_alert_exit_pct: 23.0,
            high_alert_threshold_pct: 90.0,
            calibration: CalibrationStrategy::Deadband,
            aliases: vec!["tank1".to_string()],
            enabled: true,
        };
        TankRegistry::new(vec![cfg], Some("main")).unwrap()
    }

    fn monitor() -> Monitor {
        Monitor::new(registry(), Box::new(MemoryStore::new()))
    }

    fn msg(tank_id: Option<&str>, distance: f64) -> SensorMessage {
        SensorMessage {
            tank_id: tank_id.map(String::from),
            distance_cm: distance,
            status: None,
        }
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    #[test]
    fn test_accepted_reading_updates_snapshot() {
        let m = monitor();
        let outcome = m.ingest(msg(Some("main"), 515.0), at(0));
        match outcome {
            IngestOutcome::Accepted { reading, persisted } => {
                assert!(persisted);
                assert!((reading.level_percentage - 50.26).abs() < 0.01);
                assert_eq!(reading.status, "online");
            }
            other => panic!("expected Accepted, got {:?}", other),
        }
        let latest = m.latest(Some("main")).unwrap().expect("snapshot present");
        assert_eq!(latest.timestamp, at(0));
    }

    #[test]
    fn test_alias_resolves_to_canonical_snapshot() {
        let m = monitor();
        m.ingest(msg(Some("tank1"), 500.0), at(0));
        let latest = m.latest(Some("main")).unwrap().expect("alias fed main");
        assert_eq!(latest.tank_id.as_str(), "main");
    }

    #[test]
    fn test_unknown_tank_is_rejected_without_state_change() {
        let m = monitor();
        let outcome = m.ingest(msg(Some("tank9"), 500.0), at(0));
        assert_eq!(
            outcome,
            IngestOutcome::Rejected(TankError::UnknownTank("tank9".to_string()))
        );
        assert!(m.latest(Some("main")).unwrap().is_none());
        assert_eq!(m.fleet_status(at(1)).total_readings, 0);
    }

    #[test]
    fn test_out_of_range_reading_is_ignored_without_state_change() {
        let m = monitor();
        m.ingest(msg(None, 500.0), at(0));
        let before = m.latest(None).unwrap().unwrap();

        // emptyDistance + 500 is far beyond the plausibility margin.
        let outcome = m.ingest(msg(None, 1500.0), at(1));
        assert!(matches!(outcome, IngestOutcome::Ignored { .. }));

        let after = m.latest(None).unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(m.recent(None, 10).unwrap().len(), 1);
        assert_eq!(m.fleet_status(at(2)).total_readings, 1);
    }

    #[test]
    fn test_non_finite_distance_is_malformed() {
        let m = monitor();
        let outcome = m.ingest(msg(None, f64::NAN), at(0));
        assert!(matches!(
            outcome,
            IngestOutcome::Rejected(TankError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_persistence_failure_does_not_disturb_pipeline() {
        struct FailingStore;
        impl HistoryStore for FailingStore {
            fn append(&self, _: &TankReading) -> Result<(), TankError> {
                Err(TankError::PersistenceFailure("disk on fire".to_string()))
            }
            fn history(
                &self,
                _: &TankId,
                _: DateTime<Utc>,
                _: usize,
            ) -> Result<Vec<TankReading>, TankError> {
                Err(TankError::PersistenceFailure("disk on fire".to_string()))
            }
            fn readings_for_day(
                &self,
                _: &TankId,
                _: chrono::NaiveDate,
            ) -> Result<Vec<TankReading>, TankError> {
                Err(TankError::PersistenceFailure("disk on fire".to_string()))
            }
            fn upsert_daily_aggregate(
                &self,
                _: &TankId,
                _: &DailyAggregate,
            ) -> Result<(), TankError> {
                Err(TankError::PersistenceFailure("disk on fire".to_string()))
            }
            fn daily_aggregates(
                &self,
                _: &TankId,
                _: chrono::NaiveDate,
            ) -> Result<Vec<DailyAggregate>, TankError> {
                Err(TankError::PersistenceFailure("disk on fire".to_string()))
            }
        }

        let m = Monitor::new(registry(), Box::new(FailingStore));
        let outcome = m.ingest(msg(None, 515.0), at(0));
        match outcome {
            IngestOutcome::Accepted { persisted, .. } => assert!(!persisted),
            other => panic!("expected Accepted despite store outage, got {:?}", other),
        }
        // In-memory state remains authoritative.
        assert!(m.latest(None).unwrap().is_some());
        assert_eq!(m.recent(None, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_fleet_status_reports_offline_after_staleness_window() {
        let m = monitor().with_staleness_window(120);
        m.ingest(msg(None, 500.0), at(0));

        let fresh = m.fleet_status(at(1));
        assert_eq!(fresh.tanks[0].status, "online");

        let stale = m.fleet_status(at(10));
        assert_eq!(stale.tanks[0].status, "offline");
        assert_eq!(stale.tank_count, 1);
        assert_eq!(stale.total_readings, 1);
    }

    #[test]
    fn test_tank_that_never_reported_is_offline() {
        let m = monitor();
        let status = m.fleet_status(at(0));
        assert_eq!(status.tanks[0].status, "offline");
        assert!(status.tanks[0].last_update.is_none());
        assert!(status.tanks[0].level_percentage.is_none());
    }

    #[test]
    fn test_independent_monitors_do_not_share_state() {
        let a = monitor();
        let b = monitor();
        a.ingest(msg(None, 500.0), at(0));
        assert!(a.latest(None).unwrap().is_some());
        assert!(b.latest(None).unwrap().is_none());
    }

    #[test]
    fn test_reload_keeps_alert_state_and_applies_new_thresholds() {
        let m = monitor();
        // Drive the level below 20% to enter the alert. Deadband mapping:
        // distance 900 → (1000-900)/965*100 ≈ 10.4%.
        m.ingest(msg(None, 900.0), at(0));
        let before = m.latest(None).unwrap().unwrap();
        assert!(before.alert_low);

        m.reload_registry(registry());
        // Next reading near the same level: alert stays sticky.
        let outcome = m.ingest(msg(None, 900.0), at(1));
        match outcome {
            IngestOutcome::Accepted { reading, .. } => assert!(reading.alert_low),
            other => panic!("expected Accepted, got {:?}", other),
        }
    }

    #[test]
    fn test_history_query_reads_durable_store() {
        let m = monitor();
        for minute in 0..5 {
            m.ingest(msg(None, 500.0 + minute as f64), at(minute));
        }
        let rows = m.history(None, Some(7), Some(3), at(10)).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].timestamp > rows[1].timestamp);
    }

    #[test]
    fn test_history_defaults_to_seven_day_window() {
        let m = monitor();
        // One reading eight days old, one fresh.
        m.ingest(msg(None, 500.0), at(0) - Duration::days(8));
        m.ingest(msg(None, 510.0), at(0));

        let rows = m.history(None, None, None, at(1)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, at(0));

        // An explicit wider window still reaches the old reading.
        let all = m.history(None, Some(30), None, at(1)).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_history_defaults_to_hundred_row_cap() {
        let m = monitor();
        for n in 0..110u32 {
            m.ingest(msg(None, 500.0), at(0) + Duration::minutes(n as i64));
        }
        let rows = m.history(None, None, None, at(0) + Duration::hours(3)).unwrap();
        assert_eq!(rows.len(), DEFAULT_HISTORY_LIMIT);
    }
}
