/// Tank registry for the water level monitoring service.
///
/// Defines the set of physical tanks the service knows about, along with
/// their geometry and alert thresholds. This is the single source of truth
/// for tank identifiers — all other modules resolve identifiers through the
/// registry rather than trusting raw strings from the wire.
///
/// Configuration comes from a TOML file (`tanks.toml` by default) and is
/// re-validated on every load; a registry with a geometry violation is never
/// constructed.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibrate::CalibrationStrategy;
use crate::model::{DEADBAND_MARGIN_CM, TankError};

// ---------------------------------------------------------------------------
// Tank identifier
// ---------------------------------------------------------------------------

/// Canonical, normalized tank identifier.
///
/// Normalization is trim + ASCII lowercase, so `" Main "` and `"main"` name
/// the same tank. Constructed directly only at configuration edges; pipeline
/// code obtains ids from the registry via `resolve`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TankId(String);

impl TankId {
    pub fn new(raw: impl AsRef<str>) -> TankId {
        TankId(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for TankId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Tank configuration
// ---------------------------------------------------------------------------

/// Geometry and alert configuration for a single tank.
///
/// Immutable during a processing cycle; replaced wholesale when the
/// registry is reloaded from the settings store.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TankConfig {
    /// Canonical identifier (normalized on registry construction).
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Sensor-to-surface distance of a full tank (dead zone), in cm.
    pub sensor_offset_cm: f64,
    /// Sensor-to-surface distance of an empty tank, in cm.
    /// Must be strictly greater than `sensor_offset_cm`.
    pub empty_distance_cm: f64,
    /// Tank capacity in liters. Must be positive.
    pub total_volume_liters: f64,
    /// Low-level alert enters below this percentage.
    #[serde(default = "default_low_enter")]
    pub low_alert_threshold_pct: f64,
    /// Low-level alert clears above this percentage.
    /// Must be strictly greater than the enter threshold (hysteresis).
    #[serde(default = "default_low_exit")]
    pub low_alert_exit_pct: f64,
    /// High-level warning threshold, reported to the web layer.
    #[serde(default = "default_high")]
    pub high_alert_threshold_pct: f64,
    /// Which percentage mapping to apply to the smoothed distance.
    #[serde(default)]
    pub calibration: CalibrationStrategy,
    /// Known synonyms for this tank's identifier (transmitter firmware
    /// revisions disagree on naming).
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_low_enter() -> f64 {
    20.0
}

fn default_low_exit() -> f64 {
    23.0
}

fn default_high() -> f64 {
    90.0
}

fn default_enabled() -> bool {
    true
}

impl TankConfig {
    pub fn tank_id(&self) -> TankId {
        TankId::new(&self.id)
    }

    /// Distance span between a full and an empty tank, in cm.
    pub fn usable_range_cm(&self) -> f64 {
        self.empty_distance_cm - self.sensor_offset_cm
    }
}

/// Checks the geometry invariants for one tank config.
///
/// Runs at registry construction time, never at ingestion time: a config
/// that fails here is rejected before the pipeline can see it, so
/// calibration never has to guard against a zero usable range.
pub fn validate_config(cfg: &TankConfig) -> Result<(), TankError> {
    let bad = |reason: &str| TankError::BadConfig {
        tank: cfg.id.clone(),
        reason: reason.to_string(),
    };

    if cfg.id.trim().is_empty() {
        return Err(bad("tank id must not be empty"));
    }
    if !cfg.sensor_offset_cm.is_finite() || !cfg.empty_distance_cm.is_finite() {
        return Err(bad("geometry distances must be finite"));
    }
    if cfg.empty_distance_cm <= cfg.sensor_offset_cm {
        return Err(bad("empty_distance_cm must exceed sensor_offset_cm"));
    }
    if !(cfg.total_volume_liters > 0.0) {
        return Err(bad("total_volume_liters must be positive"));
    }
    if cfg.low_alert_exit_pct <= cfg.low_alert_threshold_pct {
        return Err(bad("low_alert_exit_pct must exceed low_alert_threshold_pct"));
    }
    if cfg.calibration == CalibrationStrategy::Deadband
        && cfg.usable_range_cm() <= DEADBAND_MARGIN_CM
    {
        return Err(bad("usable range too small for deadband calibration"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Validated set of tank configurations with alias resolution.
#[derive(Debug, Clone)]
pub struct TankRegistry {
    tanks: Vec<TankConfig>,
    default_id: Option<TankId>,
}

impl TankRegistry {
    /// Builds a registry, validating every config and the default-tank
    /// reference. Identifiers and aliases are normalized; duplicates
    /// across ids and aliases are a `BadConfig` error.
    pub fn new(mut tanks: Vec<TankConfig>, default_tank: Option<&str>) -> Result<Self, TankError> {
        let mut seen = std::collections::HashSet::new();
        for cfg in &mut tanks {
            validate_config(cfg)?;
            cfg.id = TankId::new(&cfg.id).0;
            for alias in &mut cfg.aliases {
                *alias = TankId::new(alias.as_str()).0;
            }
        }
        for cfg in &tanks {
            for key in std::iter::once(&cfg.id).chain(cfg.aliases.iter()) {
                if !seen.insert(key.clone()) {
                    return Err(TankError::BadConfig {
                        tank: cfg.id.clone(),
                        reason: format!("duplicate identifier or alias '{}'", key),
                    });
                }
            }
        }

        let default_id = match default_tank {
            Some(raw) => {
                let id = TankId::new(raw);
                if !tanks.iter().any(|t| t.id == id.as_str() && t.enabled) {
                    return Err(TankError::BadConfig {
                        tank: id.as_str().to_string(),
                        reason: "default_tank does not name an enabled tank".to_string(),
                    });
                }
                Some(id)
            }
            None => None,
        };

        Ok(TankRegistry { tanks, default_id })
    }

    /// Resolves an incoming identifier to its tank config.
    ///
    /// An omitted (or blank) identifier falls back to the configured default
    /// tank. An *unrecognized* identifier never falls back — that is a
    /// distinct failure from "identifier omitted" and returns `UnknownTank`.
    /// Disabled tanks do not resolve.
    pub fn resolve(&self, identifier: Option<&str>) -> Result<&TankConfig, TankError> {
        let normalized = identifier.map(|s| TankId::new(s));
        let wanted = match normalized {
            Some(ref id) if !id.is_empty() => id.clone(),
            _ => match &self.default_id {
                Some(id) => id.clone(),
                None => {
                    return Err(TankError::UnknownTank("<omitted>".to_string()));
                }
            },
        };

        self.tanks
            .iter()
            .filter(|t| t.enabled)
            .find(|t| t.id == wanted.as_str() || t.aliases.iter().any(|a| a == wanted.as_str()))
            .ok_or_else(|| TankError::UnknownTank(wanted.as_str().to_string()))
    }

    /// Looks up a tank by canonical id. Returns `None` for aliases.
    pub fn get(&self, id: &TankId) -> Option<&TankConfig> {
        self.tanks.iter().find(|t| t.id == id.as_str())
    }

    /// Canonical ids of all enabled tanks, in configuration order.
    pub fn tank_ids(&self) -> Vec<TankId> {
        self.tanks
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.tank_id())
            .collect()
    }

    pub fn default_id(&self) -> Option<&TankId> {
        self.default_id.as_ref()
    }

    pub fn len(&self) -> usize {
        self.tanks.iter().filter(|t| t.enabled).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Configuration loading
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TankFile {
    #[serde(default)]
    default_tank: Option<String>,
    #[serde(default, rename = "tank")]
    tanks: Vec<TankConfig>,
}

/// Loads and validates the tank registry from a TOML file.
///
/// Every load re-validates the full config set; cached values are never
/// trusted across a reload.
pub fn load_tanks(path: &Path) -> Result<TankRegistry, TankError> {
    let text = std::fs::read_to_string(path).map_err(|e| TankError::BadConfig {
        tank: path.display().to_string(),
        reason: format!("cannot read config file: {}", e),
    })?;
    let file: TankFile = toml::from_str(&text).map_err(|e| TankError::BadConfig {
        tank: path.display().to_string(),
        reason: format!("cannot parse config file: {}", e),
    })?;
    if file.tanks.is_empty() {
        return Err(TankError::BadConfig {
            tank: path.display().to_string(),
            reason: "config file defines no tanks".to_string(),
        });
    }
    TankRegistry::new(file.tanks, file.default_tank.as_deref())
}

/// Single-tank registry matching the default settings of the original
/// deployment (100 cm tank, 5 cm dead zone, 1000 L). Used when no config
/// file is present.
pub fn default_registry() -> TankRegistry {
    let cfg = TankConfig {
        id: "main".to_string(),
        name: "Main tank".to_string(),
        sensor_offset_cm: 5.0,
        empty_distance_cm: 100.0,
        total_volume_liters: 1000.0,
        low_alert_threshold_pct: default_low_enter(),
        low_alert_exit_pct: default_low_exit(),
        high_alert_threshold_pct: default_high(),
        calibration: CalibrationStrategy::Linear,
        aliases: Vec::new(),
        enabled: true,
    };
    // The built-in config is known valid.
    match TankRegistry::new(vec![cfg], Some("main")) {
        Ok(reg) => reg,
        Err(e) => unreachable!("built-in default registry must validate: {}", e),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
