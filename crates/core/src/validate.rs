//! Payload validation against the threshold catalog
//!
//! Raw frames from the equipment gateway carry untyped JSON. The validator
//! turns them into typed measurements or rejects them with an error naming
//! the offending field and bound. Rejection is per-measurement and
//! recoverable: the session continues.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::{Measurement, TestType, ThresholdCatalog};

/// Why a raw payload was rejected.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("unknown test type: {0}")]
    UnknownTestType(String),

    #[error("missing or non-numeric field: {0}")]
    MissingField(&'static str),

    #[error("{field} {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} must not be negative, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("ambient level {ambient} dB above limit {limit} dB, reading unusable")]
    AmbientTooHigh { ambient: f64, limit: f64 },
}

/// Validates raw equipment payloads into typed measurements.
///
/// Pure with respect to the catalog: the same payload always produces the
/// same result, and session state is never touched here. The caller appends
/// the resulting record and assigns the server timestamp.
#[derive(Clone)]
pub struct Validator {
    catalog: Arc<ThresholdCatalog>,
}

impl Validator {
    /// Create a validator over the given catalog.
    pub fn new(catalog: Arc<ThresholdCatalog>) -> Self {
        Self { catalog }
    }

    /// Validate a raw payload for the given test type.
    pub fn validate(
        &self,
        test_type: TestType,
        payload: &Value,
    ) -> Result<Measurement, ValidationError> {
        match test_type {
            TestType::Speed => self.validate_speed(payload),
            TestType::Brake => self.validate_brake(payload),
            TestType::Headlight => self.validate_headlight(payload),
            TestType::Noise => self.validate_noise(payload),
            TestType::Axle => self.validate_axle(payload),
        }
    }

    fn validate_speed(&self, payload: &Value) -> Result<Measurement, ValidationError> {
        let t = &self.catalog.speed;
        let speed = in_range("speed", number(payload, "speed")?, t.min_speed, t.max_speed)?;
        Ok(Measurement::Speed { speed })
    }

    fn validate_brake(&self, payload: &Value) -> Result<Measurement, ValidationError> {
        let t = &self.catalog.brake;
        let force = in_range("force", number(payload, "force")?, t.min_force, t.max_force)?;
        let response_time = non_negative("response_time", number(payload, "response_time")?)?;
        let left_force = in_range(
            "left_force",
            number(payload, "left_force")?,
            0.0,
            t.max_force,
        )?;
        let right_force = in_range(
            "right_force",
            number(payload, "right_force")?,
            0.0,
            t.max_force,
        )?;
        Ok(Measurement::Brake {
            force,
            response_time,
            left_force,
            right_force,
        })
    }

    fn validate_headlight(&self, payload: &Value) -> Result<Measurement, ValidationError> {
        let t = &self.catalog.headlight;
        let intensity = in_range(
            "intensity",
            number(payload, "intensity")?,
            t.min_intensity,
            t.max_intensity,
        )?;
        let misalignment = non_negative("misalignment", number(payload, "misalignment")?)?;
        Ok(Measurement::Headlight {
            intensity,
            misalignment,
        })
    }

    fn validate_noise(&self, payload: &Value) -> Result<Measurement, ValidationError> {
        let t = &self.catalog.noise;
        let ambient_level = non_negative("ambient_level", number(payload, "ambient_level")?)?;
        // An over-loud hall invalidates the reading before the vehicle level
        // is even considered.
        if ambient_level > t.ambient_threshold {
            return Err(ValidationError::AmbientTooHigh {
                ambient: ambient_level,
                limit: t.ambient_threshold,
            });
        }
        let noise_level = in_range(
            "noise_level",
            number(payload, "noise_level")?,
            0.0,
            t.max_level,
        )?;
        Ok(Measurement::Noise {
            noise_level,
            ambient_level,
        })
    }

    fn validate_axle(&self, payload: &Value) -> Result<Measurement, ValidationError> {
        let t = &self.catalog.axle;
        let weight = in_range("weight", number(payload, "weight")?, 0.0, t.max_weight)?;
        let imbalance = in_range("imbalance", number(payload, "imbalance")?, 0.0, 100.0)?;
        Ok(Measurement::Axle { weight, imbalance })
    }
}

fn number(payload: &Value, field: &'static str) -> Result<f64, ValidationError> {
    payload
        .get(field)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .ok_or(ValidationError::MissingField(field))
}

fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<f64, ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(value)
}

fn non_negative(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if value < 0.0 {
        return Err(ValidationError::Negative { field, value });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> Validator {
        Validator::new(Arc::new(ThresholdCatalog::default()))
    }

    #[test]
    fn test_speed_in_range_accepted() {
        let m = validator()
            .validate(TestType::Speed, &json!({"speed": 65.0}))
            .unwrap();
        assert_eq!(m, Measurement::Speed { speed: 65.0 });
    }

    #[test]
    fn test_speed_over_max_rejected() {
        let err = validator()
            .validate(TestType::Speed, &json!({"speed": 150.0}))
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::OutOfRange {
                field: "speed",
                value: 150.0,
                min: 0.0,
                max: 120.0,
            }
        );
    }

    #[test]
    fn test_missing_field_named() {
        let err = validator()
            .validate(TestType::Speed, &json!({"velocity": 60.0}))
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("speed"));
    }

    #[test]
    fn test_non_numeric_field_rejected() {
        let err = validator()
            .validate(TestType::Speed, &json!({"speed": "fast"}))
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("speed"));
    }

    #[test]
    fn test_brake_requires_both_channels() {
        let err = validator()
            .validate(
                TestType::Brake,
                &json!({"force": 400.0, "response_time": 0.5, "left_force": 200.0}),
            )
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("right_force"));
    }

    #[test]
    fn test_brake_force_out_of_range() {
        let err = validator()
            .validate(
                TestType::Brake,
                &json!({
                    "force": 1200.0,
                    "response_time": 0.5,
                    "left_force": 600.0,
                    "right_force": 600.0
                }),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OutOfRange { field: "force", .. }
        ));
    }

    #[test]
    fn test_negative_response_time_rejected() {
        let err = validator()
            .validate(
                TestType::Brake,
                &json!({
                    "force": 400.0,
                    "response_time": -0.1,
                    "left_force": 200.0,
                    "right_force": 200.0
                }),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::Negative {
                field: "response_time",
                ..
            }
        ));
    }

    #[test]
    fn test_noise_rejected_when_hall_too_loud() {
        let err = validator()
            .validate(
                TestType::Noise,
                &json!({"noise_level": 80.0, "ambient_level": 50.0}),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::AmbientTooHigh {
                ambient: 50.0,
                limit: 45.0,
            }
        );
    }

    #[test]
    fn test_noise_accepted_under_quiet_hall() {
        let m = validator()
            .validate(
                TestType::Noise,
                &json!({"noise_level": 78.0, "ambient_level": 40.0}),
            )
            .unwrap();
        assert_eq!(
            m,
            Measurement::Noise {
                noise_level: 78.0,
                ambient_level: 40.0
            }
        );
    }

    #[test]
    fn test_headlight_below_min_intensity_rejected() {
        let err = validator()
            .validate(
                TestType::Headlight,
                &json!({"intensity": 50.0, "misalignment": 0.5}),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OutOfRange {
                field: "intensity",
                ..
            }
        ));
    }

    #[test]
    fn test_axle_weight_bound() {
        let err = validator()
            .validate(TestType::Axle, &json!({"weight": 6000.0, "imbalance": 3.0}))
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OutOfRange { field: "weight", .. }
        ));
    }

    #[test]
    fn test_infinite_value_treated_as_missing() {
        // serde_json cannot represent infinity literally, but a huge float
        // parses fine and must hit the range check instead.
        let err = validator()
            .validate(TestType::Speed, &json!({"speed": 1e308}))
            .unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { .. }));
    }
}
