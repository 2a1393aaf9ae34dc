/// Signal conditioning for raw ultrasonic distance readings.
///
/// Two stages: an absolute plausibility bounds check that protects the
/// filter from single-sample glitches, then exponential smoothing with a
/// fixed factor. Rejected samples leave the filter state untouched and
/// produce no output, so a glitch can never corrupt the smoothed value.
///
/// For a fixed factor and a fixed sequence of accepted samples the smoothed
/// sequence is fully deterministic; tests replay sequences directly.

use crate::model::{MIN_SENSOR_RANGE_CM, SMOOTHING_ALPHA};

// ---------------------------------------------------------------------------
// Bounds check
// ---------------------------------------------------------------------------

/// Returns `true` if the raw distance is physically plausible for a tank
/// whose maximum credible reading is `max_plausible_cm` (empty distance
/// plus margin). Non-finite values are never plausible.
pub fn within_bounds(raw_cm: f64, max_plausible_cm: f64) -> bool {
    raw_cm.is_finite() && raw_cm >= MIN_SENSOR_RANGE_CM && raw_cm <= max_plausible_cm
}

// ---------------------------------------------------------------------------
// Filter state
// ---------------------------------------------------------------------------

/// Per-tank smoothing state. Created lazily on the first reading for a
/// tank and updated in place for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    smoothed_cm: Option<f64>,
}

impl FilterState {
    pub fn new() -> FilterState {
        FilterState::default()
    }

    /// Conditions one raw sample.
    ///
    /// Returns the new smoothed distance, or `None` if the sample failed
    /// the bounds check (in which case no state was mutated). The first
    /// accepted sample passes through unchanged — there is no history to
    /// blend with.
    pub fn condition(&mut self, raw_cm: f64, max_plausible_cm: f64) -> Option<f64> {
        if !within_bounds(raw_cm, max_plausible_cm) {
            return None;
        }
        let smoothed = match self.smoothed_cm {
            None => raw_cm,
            Some(prev) => SMOOTHING_ALPHA * raw_cm + (1.0 - SMOOTHING_ALPHA) * prev,
        };
        self.smoothed_cm = Some(smoothed);
        Some(smoothed)
    }

    /// Last smoothed distance, if any sample has been accepted yet.
    pub fn last(&self) -> Option<f64> {
        self.smoothed_cm
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: f64 = 1100.0; // empty distance 1000 + 100 margin

    #[test]
    fn test_first_sample_passes_through_exactly() {
        let mut f = FilterState::new();
        assert_eq!(f.condition(512.0, MAX), Some(512.0));
        assert_eq!(f.last(), Some(512.0));
    }

    #[test]
    fn test_smoothing_blends_toward_new_sample() {
        let mut f = FilterState::new();
        f.condition(500.0, MAX);
        let second = f.condition(600.0, MAX).unwrap();
        // 0.08 * 600 + 0.92 * 500 = 508
        assert!((second - 508.0).abs() < 1e-9);
    }

    #[test]
    fn test_smoothing_is_deterministic_across_replays() {
        let samples = [500.0, 498.5, 497.0, 510.0, 505.0, 503.3];
        let run = |samples: &[f64]| -> Vec<f64> {
            let mut f = FilterState::new();
            samples.iter().filter_map(|&s| f.condition(s, MAX)).collect()
        };
        assert_eq!(run(&samples), run(&samples));
    }

    #[test]
    fn test_negative_distance_is_rejected_without_mutation() {
        let mut f = FilterState::new();
        f.condition(500.0, MAX);
        assert_eq!(f.condition(-5.0, MAX), None);
        assert_eq!(f.last(), Some(500.0));
    }

    #[test]
    fn test_distance_far_beyond_tank_is_rejected() {
        let mut f = FilterState::new();
        f.condition(500.0, MAX);
        // emptyDistance + 500 is well past the plausibility margin
        assert_eq!(f.condition(1500.0, MAX), None);
        assert_eq!(f.last(), Some(500.0));
    }

    #[test]
    fn test_bounds_are_inclusive() {
        assert!(within_bounds(MIN_SENSOR_RANGE_CM, MAX));
        assert!(within_bounds(MAX, MAX));
        assert!(!within_bounds(MIN_SENSOR_RANGE_CM - 0.01, MAX));
        assert!(!within_bounds(MAX + 0.01, MAX));
    }

    #[test]
    fn test_non_finite_samples_are_rejected() {
        let mut f = FilterState::new();
        assert_eq!(f.condition(f64::NAN, MAX), None);
        assert_eq!(f.condition(f64::INFINITY, MAX), None);
        assert_eq!(f.last(), None);
    }

    #[test]
    fn test_rejected_sample_produces_no_first_sample_state() {
        // A rejection before any accepted sample must not count as the
        // "first sample" for pass-through purposes.
        let mut f = FilterState::new();
        assert_eq!(f.condition(-1.0, MAX), None);
        assert_eq!(f.condition(400.0, MAX), Some(400.0));
    }
}
