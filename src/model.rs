/// Core data types for the tank telemetry service.
///
/// This module defines the shared domain model imported by all other modules:
/// the ingest message, the canonical computed reading, the ingestion outcome,
/// and the error taxonomy. It contains no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tanks::TankId;

// ---------------------------------------------------------------------------
// Pipeline constants
// ---------------------------------------------------------------------------

/// Exponential smoothing factor for the distance filter. Heavily favors
/// history, suited to slow-moving liquid levels.
pub const SMOOTHING_ALPHA: f64 = 0.08;

/// Minimum plausible sensor reading, in cm. Ultrasonic rangefinders cannot
/// resolve distances below roughly 2 cm; anything smaller is a glitch.
pub const MIN_SENSOR_RANGE_CM: f64 = 2.0;

/// Margin above the tank's empty distance beyond which a raw reading is
/// treated as implausible and rejected before it reaches the filter.
pub const OUT_OF_RANGE_MARGIN_CM: f64 = 100.0;

/// Margin above the sensor offset within which the tank reports 100%,
/// absorbing sensor jitter near a full tank (deadband calibration only).
pub const DEADBAND_MARGIN_CM: f64 = 5.0;

/// Status label assumed when the sensor message omits one.
pub const DEFAULT_STATUS: &str = "online";

/// A tank with no accepted reading inside this window is reported offline
/// in fleet summaries, regardless of its last stored status label.
pub const DEFAULT_STALENESS_WINDOW_SECS: i64 = 120;

// ---------------------------------------------------------------------------
// Ingest message
// ---------------------------------------------------------------------------

/// A single raw measurement pushed by a sensor transmitter.
///
/// The transport is out of scope here; the reference deployment POSTs this
/// as JSON, but any transport that can deliver one structured message per
/// reading works. `tank_id` may be omitted in single-tank deployments and
/// may be a known alias rather than the canonical id.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorMessage {
    #[serde(default)]
    pub tank_id: Option<String>,
    pub distance_cm: f64,
    #[serde(default)]
    pub status: Option<String>,
}

/// Parses a raw message body into a `SensorMessage`.
///
/// A missing or non-numeric `distance_cm` is a `MalformedInput` error, not
/// an `Ignored` outcome — the caller never saw a usable measurement.
pub fn parse_message(body: &str) -> Result<SensorMessage, TankError> {
    serde_json::from_str(body).map_err(|e| TankError::MalformedInput(e.to_string()))
}

// ---------------------------------------------------------------------------
// Computed reading
// ---------------------------------------------------------------------------

/// The canonical computed record for one accepted sensor reading.
///
/// Created once per successful ingestion cycle and immutable afterwards.
/// The newest one replaces the previous snapshot for its tank; older ones
/// live in the in-memory history ring and the durable log. `distance_cm`
/// is the post-filter (smoothed) value, not the raw measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TankReading {
    pub tank_id: TankId,
    pub distance_cm: f64,
    pub level_percentage: f64,
    pub volume_liters: f64,
    pub status: String,
    pub alert_low: bool,
    /// Timezone-aware; serialized as RFC 3339.
    pub timestamp: DateTime<Utc>,
}

impl TankReading {
    /// Copy with percentage and volume rounded to 2 decimal places, for
    /// external reporting. Internal state keeps full precision.
    pub fn rounded(&self) -> TankReading {
        TankReading {
            level_percentage: crate::calibrate::round2(self.level_percentage),
            volume_liters: crate::calibrate::round2(self.volume_liters),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Ingestion outcome
// ---------------------------------------------------------------------------

/// Result of one ingestion cycle. The three variants are distinct contract
/// outcomes and must not be conflated at the transport boundary: a
/// bounds-check rejection is acknowledged as intentionally ignored, not as
/// an error.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Reading processed end to end. `persisted` is false when the durable
    /// write failed; the in-memory state is updated either way.
    Accepted { reading: TankReading, persisted: bool },
    /// Raw distance failed the plausibility bounds check. No state changed.
    Ignored { tank_id: TankId, reason: String },
    /// Unknown tank or malformed input. No state changed.
    Rejected(TankError),
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise in the telemetry pipeline.
///
/// Conditioning, calibration, and alert logic never fail for numeric edge
/// cases (clamping absorbs them); only identifier resolution, configuration
/// validation, and durable I/O produce errors.
#[derive(Debug, Clone, PartialEq)]
pub enum TankError {
    /// The identifier resolved to no configured, enabled tank.
    UnknownTank(String),
    /// Tank geometry invariant violated. Raised at config-load time,
    /// never at ingestion time.
    BadConfig { tank: String, reason: String },
    /// Missing or non-numeric required field in the ingest message.
    MalformedInput(String),
    /// Durable write or query failed. The in-memory pipeline state
    /// remains authoritative.
    PersistenceFailure(String),
}

impl std::fmt::Display for TankError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TankError::UnknownTank(id) => write!(f, "Unknown tank: {}", id),
            TankError::BadConfig { tank, reason } => {
                write!(f, "Bad config for tank {}: {}", tank, reason)
            }
            TankError::MalformedInput(msg) => write!(f, "Malformed input: {}", msg),
            TankError::PersistenceFailure(msg) => write!(f, "Persistence failure: {}", msg),
        }
    }
}

impl std::error::Error for TankError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_full() {
        let msg = parse_message(r#"{"tank_id":"main","distance_cm":42.5,"status":"online"}"#)
            .expect("full message should parse");
        assert_eq!(msg.tank_id.as_deref(), Some("main"));
        assert_eq!(msg.distance_cm, 42.5);
        assert_eq!(msg.status.as_deref(), Some("online"));
    }

    #[test]
    fn test_parse_message_distance_only() {
        let msg = parse_message(r#"{"distance_cm":100}"#)
            .expect("tank_id and status are optional");
        assert!(msg.tank_id.is_none());
        assert_eq!(msg.distance_cm, 100.0);
        assert!(msg.status.is_none());
    }

    #[test]
    fn test_parse_message_missing_distance_is_malformed() {
        let err = parse_message(r#"{"tank_id":"main"}"#).unwrap_err();
        assert!(matches!(err, TankError::MalformedInput(_)));
    }

    #[test]
    fn test_parse_message_non_numeric_distance_is_malformed() {
        let err = parse_message(r#"{"distance_cm":"far"}"#).unwrap_err();
        assert!(matches!(err, TankError::MalformedInput(_)));
    }

    #[test]
    fn test_error_display_names_the_tank() {
        let err = TankError::UnknownTank("tank9".to_string());
        assert_eq!(err.to_string(), "Unknown tank: tank9");
    }
}
