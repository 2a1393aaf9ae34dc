/// Calibration: smoothed distance → level percentage and volume.
///
/// Both mappings in the field are special cases of piecewise-linear with an
/// optional plateau, so they live behind one strategy enum selected per tank
/// rather than forked code paths. The math here is pure and total: any
/// finite distance maps into [0, 100] % and [0, capacity] L, so callers
/// never handle numeric errors from this module.

use serde::{Deserialize, Serialize};

use crate::model::DEADBAND_MARGIN_CM;
use crate::tanks::TankConfig;

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Per-tank percentage mapping, selectable in the tank config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStrategy {
    /// Straight interpolation between empty distance (0%) and sensor
    /// offset (100%), clamped.
    #[default]
    Linear,
    /// Linear, but pinned to 100% within a small margin above the sensor
    /// offset to absorb jitter near a full tank.
    Deadband,
}

// ---------------------------------------------------------------------------
// Calibration
// ---------------------------------------------------------------------------

/// Maps a conditioned distance to `(level_percentage, volume_liters)`.
///
/// Expects a registry-validated config: `empty_distance_cm` strictly above
/// `sensor_offset_cm` and a positive capacity. Registry construction
/// enforces this (`tanks::validate_config`), so a zero usable range cannot
/// reach this function.
pub fn calibrate(cfg: &TankConfig, distance_cm: f64) -> (f64, f64) {
    debug_assert!(cfg.usable_range_cm() > 0.0);

    let percentage = match cfg.calibration {
        CalibrationStrategy::Linear => {
            ((cfg.empty_distance_cm - distance_cm) / cfg.usable_range_cm() * 100.0)
                .clamp(0.0, 100.0)
        }
        CalibrationStrategy::Deadband => {
            let full_at = cfg.sensor_offset_cm + DEADBAND_MARGIN_CM;
            if distance_cm <= full_at {
                100.0
            } else if distance_cm >= cfg.empty_distance_cm {
                0.0
            } else {
                (cfg.empty_distance_cm - distance_cm) / (cfg.empty_distance_cm - full_at) * 100.0
            }
        }
    };

    let volume = (percentage / 100.0 * cfg.total_volume_liters)
        .clamp(0.0, cfg.total_volume_liters);
    (percentage, volume)
}

/// Rounds to 2 decimal places for external reporting. Internal state and
/// the durable log keep full precision.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
