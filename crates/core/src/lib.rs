//! Test Lane Domain Layer
//!
//! Shared types and rules for live vehicle-inspection test lanes.
//! This crate provides:
//! - `TestType` / `SequenceTemplate` - the inspection procedures and the fixed
//!   orders a session can run them in
//! - `ThresholdCatalog` - immutable per-test engineering thresholds
//! - `Validator` - raw payload -> typed `Measurement` validation
//! - `AnomalyDetector` - screening of accepted readings against the recent window
//! - `evaluate` - pass/fail evaluation of a finished test from its readings
//!
//! Everything here is pure with respect to the catalog: no IO, no clocks,
//! no session state. The gateway service owns timestamps and persistence.

mod anomaly;
mod measurement;
mod outcome;
mod test_type;
mod thresholds;
mod validate;

pub use anomaly::{AlertKind, AlertRecord, AnomalyDetector, Severity};
pub use measurement::{channel_imbalance_pct, Measurement, MeasurementRecord};
pub use outcome::{evaluate, TestOutcome};
pub use test_type::{SequenceTemplate, TestType};
pub use thresholds::{
    AxleThresholds, BrakeThresholds, HeadlightThresholds, NoiseThresholds, SpeedThresholds,
    ThresholdCatalog,
};
pub use validate::{ValidationError, Validator};
