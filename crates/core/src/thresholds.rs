//! Engineering thresholds for each test type
//!
//! The catalog is loaded once at startup and never mutated at runtime.
//! Default values come from the lane calibration sheets used by the
//! inspection centers.

use serde::{Deserialize, Serialize};

use crate::TestType;

/// Thresholds for the rolling-road speed test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedThresholds {
    /// Minimum plausible reading in km/h
    pub min_speed: f64,

    /// Maximum plausible reading in km/h
    pub max_speed: f64,

    /// Speed the operator is asked to hold, in km/h
    pub target_speed: f64,

    /// Allowed deviation from the target / window mean, in km/h
    pub tolerance: f64,

    /// Share of readings that must sit within tolerance of the target
    pub pass_compliance: f64,

    /// Readings required before the test can be finalized
    pub min_samples: usize,

    /// Stabilization window: readings the instability rule averages over
    pub window: usize,
}

impl Default for SpeedThresholds {
    fn default() -> Self {
        Self {
            min_speed: 0.0,
            max_speed: 120.0,
            target_speed: 60.0,
            tolerance: 2.0,
            pass_compliance: 0.95,
            min_samples: 5,
            window: 5,
        }
    }
}

/// Thresholds for the brake roller bench.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrakeThresholds {
    /// Minimum plausible pedal force in Newtons
    pub min_force: f64,

    /// Maximum plausible pedal force in Newtons
    pub max_force: f64,

    /// Minimum braking efficiency (best force / max force) in percent
    pub min_efficiency: f64,

    /// Maximum left/right channel imbalance in percent
    pub max_imbalance_pct: f64,

    /// Maximum acceptable response time in seconds
    pub response_time_limit: f64,

    /// Readings required before the test can be finalized
    pub min_samples: usize,
}

impl Default for BrakeThresholds {
    fn default() -> Self {
        Self {
            min_force: 0.0,
            max_force: 1000.0,
            min_efficiency: 50.0,
            max_imbalance_pct: 30.0,
            response_time_limit: 0.75,
            min_samples: 3,
        }
    }
}

/// Thresholds for the headlight bench.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadlightThresholds {
    /// Minimum acceptable intensity in candela
    pub min_intensity: f64,

    /// Maximum acceptable intensity in candela
    pub max_intensity: f64,

    /// Maximum beam misalignment in degrees
    pub max_misalignment_deg: f64,

    /// Readings required before the test can be finalized
    pub min_samples: usize,

    /// Stabilization window: readings the flicker rule averages over
    pub window: usize,
}

impl Default for HeadlightThresholds {
    fn default() -> Self {
        Self {
            min_intensity: 100.0,
            max_intensity: 1000.0,
            max_misalignment_deg: 2.0,
            min_samples: 3,
            window: 3,
        }
    }
}

/// Thresholds for the exhaust noise test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseThresholds {
    /// Maximum measurable level in dB; readings above are instrument errors
    pub max_level: f64,

    /// Ambient level above which readings are unusable, in dB
    pub ambient_threshold: f64,

    /// Minimum differential between vehicle and ambient level, in dB
    pub min_differential: f64,

    /// Readings required before the test can be finalized
    pub min_samples: usize,
}

impl Default for NoiseThresholds {
    fn default() -> Self {
        Self {
            max_level: 90.0,
            ambient_threshold: 45.0,
            min_differential: 20.0,
            min_samples: 3,
        }
    }
}

/// Thresholds for the axle weigh bench.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxleThresholds {
    /// Maximum plausible axle load in kg
    pub max_weight: f64,

    /// Maximum left/right load imbalance in percent
    pub max_imbalance_pct: f64,

    /// Readings required before the test can be finalized (one per wheel point)
    pub min_samples: usize,
}

impl Default for AxleThresholds {
    fn default() -> Self {
        Self {
            max_weight: 5000.0,
            max_imbalance_pct: 10.0,
            min_samples: 4,
        }
    }
}

/// Immutable per-test-type validation rules.
///
/// One instance is shared by the validator, the anomaly detector and the
/// outcome evaluation; it is never mutated after startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdCatalog {
    pub speed: SpeedThresholds,
    pub brake: BrakeThresholds,
    pub headlight: HeadlightThresholds,
    pub noise: NoiseThresholds,
    pub axle: AxleThresholds,
}

impl ThresholdCatalog {
    /// Readings required before `test_type` can be finalized.
    pub fn min_samples(&self, test_type: TestType) -> usize {
        match test_type {
            TestType::Speed => self.speed.min_samples,
            TestType::Brake => self.brake.min_samples,
            TestType::Headlight => self.headlight.min_samples,
            TestType::Noise => self.noise.min_samples,
            TestType::Axle => self.axle.min_samples,
        }
    }

    /// How many recent records the anomaly rules for `test_type` look at.
    pub fn recent_window(&self, test_type: TestType) -> usize {
        match test_type {
            TestType::Speed => self.speed.window,
            TestType::Headlight => self.headlight.window,
            // The remaining rules only inspect the new reading itself.
            TestType::Brake | TestType::Noise | TestType::Axle => 1,
        }
    }
}
