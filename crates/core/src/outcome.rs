//! Pass/fail evaluation of a finished test
//!
//! When a session finalizes, each test type in the sequence is judged from
//! its accumulated readings using the same thresholds that validated them.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{channel_imbalance_pct, Measurement, MeasurementRecord, TestType, ThresholdCatalog};

/// Verdict for one test type of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    /// The test type judged
    pub test_type: TestType,

    /// Whether the pass criterion was met
    pub passed: bool,

    /// Key figures behind the verdict
    pub detail: serde_json::Value,
}

impl TestOutcome {
    fn failed(test_type: TestType, detail: serde_json::Value) -> Self {
        Self {
            test_type,
            passed: false,
            detail,
        }
    }

    fn passed(test_type: TestType, detail: serde_json::Value) -> Self {
        Self {
            test_type,
            passed: true,
            detail,
        }
    }
}

/// Judge one test type from its accumulated records.
pub fn evaluate(
    catalog: &ThresholdCatalog,
    test_type: TestType,
    records: &[MeasurementRecord],
) -> TestOutcome {
    let min = catalog.min_samples(test_type);
    if records.len() < min {
        return TestOutcome::failed(
            test_type,
            json!({
                "reason": "insufficient_samples",
                "samples": records.len(),
                "required": min,
            }),
        );
    }

    match test_type {
        TestType::Speed => evaluate_speed(catalog, records),
        TestType::Brake => evaluate_brake(catalog, records),
        TestType::Headlight => evaluate_headlight(catalog, records),
        TestType::Noise => evaluate_noise(catalog, records),
        TestType::Axle => evaluate_axle(catalog, records),
    }
}

fn evaluate_speed(catalog: &ThresholdCatalog, records: &[MeasurementRecord]) -> TestOutcome {
    let t = &catalog.speed;
    let speeds: Vec<f64> = records
        .iter()
        .filter_map(|r| match r.measurement {
            Measurement::Speed { speed } => Some(speed),
            _ => None,
        })
        .collect();

    let compliant = speeds
        .iter()
        .filter(|&&s| (s - t.target_speed).abs() <= t.tolerance)
        .count();
    let rate = compliant as f64 / speeds.len().max(1) as f64;
    let detail = json!({
        "target_speed": t.target_speed,
        "compliance_rate": rate,
        "required_rate": t.pass_compliance,
        "samples": speeds.len(),
    });

    if rate >= t.pass_compliance {
        TestOutcome::passed(TestType::Speed, detail)
    } else {
        TestOutcome::failed(TestType::Speed, detail)
    }
}

fn evaluate_brake(catalog: &ThresholdCatalog, records: &[MeasurementRecord]) -> TestOutcome {
    let t = &catalog.brake;
    let mut best_efficiency: f64 = 0.0;
    let mut worst_imbalance: f64 = 0.0;
    for record in records {
        if let Measurement::Brake {
            force,
            left_force,
            right_force,
            ..
        } = record.measurement
        {
            best_efficiency = best_efficiency.max(force / t.max_force * 100.0);
            worst_imbalance = worst_imbalance.max(channel_imbalance_pct(left_force, right_force));
        }
    }
    let detail = json!({
        "best_efficiency_pct": best_efficiency,
        "min_efficiency_pct": t.min_efficiency,
        "worst_imbalance_pct": worst_imbalance,
        "max_imbalance_pct": t.max_imbalance_pct,
    });

    if best_efficiency >= t.min_efficiency && worst_imbalance <= t.max_imbalance_pct {
        TestOutcome::passed(TestType::Brake, detail)
    } else {
        TestOutcome::failed(TestType::Brake, detail)
    }
}

fn evaluate_headlight(catalog: &ThresholdCatalog, records: &[MeasurementRecord]) -> TestOutcome {
    let t = &catalog.headlight;
    let mut intensities = Vec::new();
    let mut worst_misalignment: f64 = 0.0;
    for record in records {
        if let Measurement::Headlight {
            intensity,
            misalignment,
        } = record.measurement
        {
            intensities.push(intensity);
            worst_misalignment = worst_misalignment.max(misalignment);
        }
    }
    let mean = intensities.iter().sum::<f64>() / intensities.len().max(1) as f64;
    let detail = json!({
        "mean_intensity": mean,
        "worst_misalignment_deg": worst_misalignment,
        "max_misalignment_deg": t.max_misalignment_deg,
    });

    let intensity_ok = mean >= t.min_intensity && mean <= t.max_intensity;
    if intensity_ok && worst_misalignment <= t.max_misalignment_deg {
        TestOutcome::passed(TestType::Headlight, detail)
    } else {
        TestOutcome::failed(TestType::Headlight, detail)
    }
}

fn evaluate_noise(catalog: &ThresholdCatalog, records: &[MeasurementRecord]) -> TestOutcome {
    let t = &catalog.noise;
    let best_differential = records
        .iter()
        .filter_map(|r| match r.measurement {
            Measurement::Noise {
                noise_level,
                ambient_level,
            } => Some(noise_level - ambient_level),
            _ => None,
        })
        .fold(f64::MIN, f64::max);
    let detail = json!({
        "best_differential": best_differential,
        "min_differential": t.min_differential,
    });

    if best_differential >= t.min_differential {
        TestOutcome::passed(TestType::Noise, detail)
    } else {
        TestOutcome::failed(TestType::Noise, detail)
    }
}

fn evaluate_axle(catalog: &ThresholdCatalog, records: &[MeasurementRecord]) -> TestOutcome {
    let t = &catalog.axle;
    let worst_imbalance = records
        .iter()
        .filter_map(|r| match r.measurement {
            Measurement::Axle { imbalance, .. } => Some(imbalance),
            _ => None,
        })
        .fold(0.0f64, f64::max);
    let detail = json!({
        "worst_imbalance_pct": worst_imbalance,
        "max_imbalance_pct": t.max_imbalance_pct,
    });

    if worst_imbalance <= t.max_imbalance_pct {
        TestOutcome::passed(TestType::Axle, detail)
    } else {
        TestOutcome::failed(TestType::Axle, detail)
    }
}
