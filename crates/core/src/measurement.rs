//! Validated measurement records
//!
//! A `Measurement` carries the typed field values of one accepted reading;
//! a `MeasurementRecord` couples it with the server-assigned timestamp.
//! Records are immutable once appended to a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TestType;

/// Validated field values for one accepted reading.
///
/// Serialized untagged: each variant has a distinct field set, so the
/// wire form is exactly the instrument fields with no extra envelope.
/// The test type travels separately (frame header, storage map key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Measurement {
    /// Rolling-road speed reading in km/h
    Speed { speed: f64 },

    /// Brake bench reading: pedal force, response time, per-channel forces
    Brake {
        force: f64,
        response_time: f64,
        left_force: f64,
        right_force: f64,
    },

    /// Headlight bench reading: intensity in candela, misalignment in degrees
    Headlight { intensity: f64, misalignment: f64 },

    /// Sound meter reading: vehicle and ambient level in dB
    Noise { noise_level: f64, ambient_level: f64 },

    /// Axle bench reading: load in kg, left/right imbalance in percent
    Axle { weight: f64, imbalance: f64 },
}

impl Measurement {
    /// The test type this measurement belongs to.
    pub fn test_type(&self) -> TestType {
        match self {
            Measurement::Speed { .. } => TestType::Speed,
            Measurement::Brake { .. } => TestType::Brake,
            Measurement::Headlight { .. } => TestType::Headlight,
            Measurement::Noise { .. } => TestType::Noise,
            Measurement::Axle { .. } => TestType::Axle,
        }
    }
}

/// One accepted reading plus the server-assigned timestamp.
///
/// The timestamp is always assigned by the gateway, never taken from the
/// client, so sequencing logic cannot be skewed by equipment clocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Validated field values
    #[serde(flatten)]
    pub measurement: Measurement,

    /// When the gateway accepted the reading
    pub timestamp: DateTime<Utc>,
}

impl MeasurementRecord {
    /// Create a record from a validated measurement and the accept time.
    pub fn new(measurement: Measurement, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement,
            timestamp,
        }
    }

    /// The test type this record belongs to.
    pub fn test_type(&self) -> TestType {
        self.measurement.test_type()
    }
}

/// Left/right imbalance between two channel readings, in percent of the
/// stronger channel. Returns 0 when both channels are zero.
pub fn channel_imbalance_pct(left: f64, right: f64) -> f64 {
    let stronger = left.max(right);
    if stronger <= 0.0 {
        return 0.0;
    }
    ((left - right).abs() / stronger) * 100.0
}
