//! Low-level alert threshold checking.
//!
//! The alert is a two-state machine with distinct enter and exit
//! thresholds (hysteresis). A level oscillating inside the band between
//! them does not toggle the flag — once entered at 19% with enter=20 and
//! exit=23, the alert stays active through 21% and only clears above 23%.
//! This is what keeps the flag from flapping when the surface sloshes
//! around the boundary.

/// Per-tank low-level alert state. One instance per tank, persisting
/// across readings for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertState {
    #[default]
    Normal,
    LowAlert,
}

impl AlertState {
    /// Advances the state machine for one computed level percentage.
    ///
    /// Transitions:
    ///   Normal → LowAlert  when percentage < enter_pct
    ///   LowAlert → Normal  when percentage > exit_pct
    /// No transition otherwise. The registry guarantees
    /// `exit_pct > enter_pct`, so the sticky band is never empty.
    #[must_use]
    pub fn step(self, percentage: f64, enter_pct: f64, exit_pct: f64) -> AlertState {
        match self {
            AlertState::Normal if percentage < enter_pct => AlertState::LowAlert,
            AlertState::LowAlert if percentage > exit_pct => AlertState::Normal,
            other => other,
        }
    }

    pub fn is_active(self) -> bool {
        self == AlertState::LowAlert
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ENTER: f64 = 20.0;
    const EXIT: f64 = 23.0;

    fn replay(levels: &[f64]) -> Vec<bool> {
        let mut state = AlertState::default();
        levels
            .iter()
            .map(|&pct| {
                state = state.step(pct, ENTER, EXIT);
                state.is_active()
            })
            .collect()
    }

    #[test]
    fn test_initial_state_is_normal() {
        assert!(!AlertState::default().is_active());
    }

    #[test]
    fn test_enters_alert_below_enter_threshold() {
        assert_eq!(replay(&[25.0, 19.0]), vec![false, true]);
    }

    #[test]
    fn test_alert_is_sticky_inside_hysteresis_band() {
        // 19 → 21 → 19: once entered at 19, the 21% sample sits inside the
        // band and must not clear the alert.
        assert_eq!(replay(&[19.0, 21.0, 19.0]), vec![true, true, true]);
    }

    #[test]
    fn test_alert_clears_only_above_exit_threshold() {
        assert_eq!(replay(&[19.0, 23.0, 23.1]), vec![true, true, false]);
    }

    #[test]
    fn test_exactly_at_enter_threshold_stays_normal() {
        // Entry is strictly less-than.
        assert_eq!(replay(&[20.0]), vec![false]);
    }

    #[test]
    fn test_normal_state_unaffected_inside_band() {
        // Falling to 21 from above never enters the alert.
        assert_eq!(replay(&[30.0, 21.0, 22.9]), vec![false, false, false]);
    }

    #[test]
    fn test_full_cycle_enter_and_recover() {
        assert_eq!(
            replay(&[50.0, 18.0, 22.0, 24.0, 19.5]),
            vec![false, true, true, false, true]
        );
    }
}
