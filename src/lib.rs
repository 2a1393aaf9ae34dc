/// Tank telemetry service: ingests raw ultrasonic distance readings from
/// remote liquid-level sensors, conditions them, converts them to
/// calibrated level/volume metrics per tank, evaluates a hysteresis-based
/// low-level alert, and retains a bounded in-memory window plus a durable
/// time-series history per tank.
///
/// Module map, leaf-first:
/// - `model` — shared domain types and the error taxonomy.
/// - `tanks` — tank registry, alias resolution, TOML configuration.
/// - `filter` — bounds check + exponential smoothing.
/// - `calibrate` — distance → percentage/volume strategies.
/// - `alert` — low-level hysteresis and staleness derivation.
/// - `history` — bounded in-memory ring per tank.
/// - `db` — durable log and daily aggregates (Postgres or in-memory).
/// - `pipeline` — the `Monitor` orchestrator and query surface.
/// - `logging` — structured logging.

pub mod alert;
pub mod calibrate;
pub mod db;
pub mod filter;
pub mod history;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod tanks;

pub use db::{HistoryStore, MemoryStore, PostgresStore};
pub use model::{parse_message, IngestOutcome, SensorMessage, TankError, TankReading};
pub use pipeline::{FleetStatus, Monitor};
pub use tanks::{load_tanks, TankConfig, TankId, TankRegistry};
