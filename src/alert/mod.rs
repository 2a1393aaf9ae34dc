/// Alerting for the tank telemetry pipeline.
///
/// Submodules:
/// - `thresholds` — low-level hysteresis state machine over level
///   percentage.
/// - `staleness` — online/offline derivation from the age of a tank's
///   last accepted reading.

pub mod staleness;
pub mod thresholds;

pub use staleness::{derive_status, is_stale_at};
pub use thresholds::AlertState;
