//! Anomaly screening over recent measurement windows
//!
//! Anomalies are deviations that pass validation but warrant an alert:
//! the reading is plausible on its own and suspicious next to its
//! neighbours. Every rule here emits `warning` severity; escalation to
//! `critical` is a property of accumulation and belongs to the session
//! supervisor, not to any single finding.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{channel_imbalance_pct, Measurement, MeasurementRecord, ThresholdCatalog};

/// What an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    SpeedInstability,
    SlowBrakeResponse,
    BrakeImbalance,
    UnstableLightIntensity,
    InsufficientNoiseDifferential,
    AxleImbalance,
    DataGap,
    EquipmentIssue,
    SessionPaused,
}

impl AlertKind {
    /// Wire name of this alert kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::SpeedInstability => "speed_instability",
            AlertKind::SlowBrakeResponse => "slow_brake_response",
            AlertKind::BrakeImbalance => "brake_imbalance",
            AlertKind::UnstableLightIntensity => "unstable_light_intensity",
            AlertKind::InsufficientNoiseDifferential => "insufficient_noise_differential",
            AlertKind::AxleImbalance => "axle_imbalance",
            AlertKind::DataGap => "data_gap",
            AlertKind::EquipmentIssue => "equipment_issue",
            AlertKind::SessionPaused => "session_paused",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn is_critical(&self) -> bool {
        matches!(self, Severity::Critical)
    }
}

/// A warning or critical event attached to a session. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// What the alert is about
    pub kind: AlertKind,

    /// Warning or critical
    pub severity: Severity,

    /// Free-form key/value context for the finding
    pub detail: Value,

    /// When the alert was recorded
    pub timestamp: DateTime<Utc>,
}

impl AlertRecord {
    /// Build a warning alert.
    pub fn warning(kind: AlertKind, detail: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            detail,
            timestamp,
        }
    }

    /// Build a critical alert.
    pub fn critical(kind: AlertKind, detail: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            severity: Severity::Critical,
            detail,
            timestamp,
        }
    }
}

/// Screens accepted measurements against the session's recent window.
#[derive(Clone)]
pub struct AnomalyDetector {
    catalog: Arc<ThresholdCatalog>,
}

impl AnomalyDetector {
    /// Create a detector over the given catalog.
    pub fn new(catalog: Arc<ThresholdCatalog>) -> Self {
        Self { catalog }
    }

    /// Screen a newly accepted measurement.
    ///
    /// `window` holds the most recent accepted records for the same test
    /// type, oldest first, and excludes the new measurement itself. The
    /// rules are independent; zero or more findings may come back.
    pub fn detect(
        &self,
        measurement: &Measurement,
        window: &[MeasurementRecord],
        now: DateTime<Utc>,
    ) -> Vec<AlertRecord> {
        match measurement {
            Measurement::Speed { speed } => self.detect_speed(*speed, window, now),
            Measurement::Brake {
                response_time,
                left_force,
                right_force,
                ..
            } => self.detect_brake(*response_time, *left_force, *right_force, now),
            Measurement::Headlight { intensity, .. } => {
                self.detect_headlight(*intensity, window, now)
            }
            Measurement::Noise {
                noise_level,
                ambient_level,
            } => self.detect_noise(*noise_level, *ambient_level, now),
            Measurement::Axle { imbalance, .. } => self.detect_axle(*imbalance, now),
        }
    }

    fn detect_speed(
        &self,
        speed: f64,
        window: &[MeasurementRecord],
        now: DateTime<Utc>,
    ) -> Vec<AlertRecord> {
        let t = &self.catalog.speed;
        let recent: Vec<f64> = window
            .iter()
            .filter_map(|r| match r.measurement {
                Measurement::Speed { speed } => Some(speed),
                _ => None,
            })
            .collect();

        // The rule only fires once the stabilization window is full.
        if recent.len() < t.window {
            return Vec::new();
        }
        let tail = &recent[recent.len() - t.window..];
        let mean = tail.iter().sum::<f64>() / tail.len() as f64;
        if (speed - mean).abs() > t.tolerance {
            return vec![AlertRecord::warning(
                AlertKind::SpeedInstability,
                json!({
                    "speed": speed,
                    "window_mean": mean,
                    "tolerance": t.tolerance,
                }),
                now,
            )];
        }
        Vec::new()
    }

    fn detect_brake(
        &self,
        response_time: f64,
        left_force: f64,
        right_force: f64,
        now: DateTime<Utc>,
    ) -> Vec<AlertRecord> {
        let t = &self.catalog.brake;
        let mut findings = Vec::new();

        if response_time > t.response_time_limit {
            findings.push(AlertRecord::warning(
                AlertKind::SlowBrakeResponse,
                json!({
                    "response_time": response_time,
                    "limit": t.response_time_limit,
                }),
                now,
            ));
        }

        let imbalance = channel_imbalance_pct(left_force, right_force);
        if imbalance > t.max_imbalance_pct {
            findings.push(AlertRecord::warning(
                AlertKind::BrakeImbalance,
                json!({
                    "left_force": left_force,
                    "right_force": right_force,
                    "imbalance_pct": imbalance,
                    "limit_pct": t.max_imbalance_pct,
                }),
                now,
            ));
        }

        findings
    }

    fn detect_headlight(
        &self,
        intensity: f64,
        window: &[MeasurementRecord],
        now: DateTime<Utc>,
    ) -> Vec<AlertRecord> {
        let t = &self.catalog.headlight;
        let recent: Vec<f64> = window
            .iter()
            .filter_map(|r| match r.measurement {
                Measurement::Headlight { intensity, .. } => Some(intensity),
                _ => None,
            })
            .collect();

        if recent.len() < t.window {
            return Vec::new();
        }
        let tail = &recent[recent.len() - t.window..];
        let mean = tail.iter().sum::<f64>() / tail.len() as f64;
        let limit = t.max_intensity * 0.10;
        if (intensity - mean).abs() > limit {
            return vec![AlertRecord::warning(
                AlertKind::UnstableLightIntensity,
                json!({
                    "intensity": intensity,
                    "window_mean": mean,
                    "deviation_limit": limit,
                }),
                now,
            )];
        }
        Vec::new()
    }

    fn detect_noise(
        &self,
        noise_level: f64,
        ambient_level: f64,
        now: DateTime<Utc>,
    ) -> Vec<AlertRecord> {
        let t = &self.catalog.noise;
        let differential = noise_level - ambient_level;
        if differential < t.min_differential {
            return vec![AlertRecord::warning(
                AlertKind::InsufficientNoiseDifferential,
                json!({
                    "noise_level": noise_level,
                    "ambient_level": ambient_level,
                    "differential": differential,
                    "min_differential": t.min_differential,
                }),
                now,
            )];
        }
        Vec::new()
    }

    fn detect_axle(&self, imbalance: f64, now: DateTime<Utc>) -> Vec<AlertRecord> {
        let t = &self.catalog.axle;
        if imbalance > t.max_imbalance_pct {
            return vec![AlertRecord::warning(
                AlertKind::AxleImbalance,
                json!({
                    "imbalance_pct": imbalance,
                    "limit_pct": t.max_imbalance_pct,
                }),
                now,
            )];
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(Arc::new(ThresholdCatalog::default()))
    }

    fn now() -> DateTime<Utc> {
        "2026-03-01T10:00:00Z".parse().unwrap()
    }

    fn speed_window(values: &[f64]) -> Vec<MeasurementRecord> {
        values
            .iter()
            .map(|&v| MeasurementRecord::new(Measurement::Speed { speed: v }, now()))
            .collect()
    }

    #[test]
    fn test_speed_instability_fires_on_sixth_reading() {
        let detector = detector();
        let window = speed_window(&[60.0, 60.0, 60.0, 60.0, 60.0]);

        let findings = detector.detect(&Measurement::Speed { speed: 70.0 }, &window, now());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, AlertKind::SpeedInstability);
        assert_eq!(findings[0].severity, Severity::Warning);
    }

    #[test]
    fn test_speed_stable_reading_is_clean() {
        let detector = detector();
        let window = speed_window(&[60.0, 60.0, 60.0, 60.0, 60.0]);

        let findings = detector.detect(&Measurement::Speed { speed: 61.0 }, &window, now());
        assert!(findings.is_empty());
    }

    #[test]
    fn test_speed_rule_waits_for_full_window() {
        let detector = detector();
        let window = speed_window(&[60.0, 60.0]);

        // Deviation is large but the stabilization window is not full yet.
        let findings = detector.detect(&Measurement::Speed { speed: 80.0 }, &window, now());
        assert!(findings.is_empty());
    }

    #[test]
    fn test_slow_brake_response() {
        let findings = detector().detect(
            &Measurement::Brake {
                force: 400.0,
                response_time: 0.9,
                left_force: 200.0,
                right_force: 200.0,
            },
            &[],
            now(),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, AlertKind::SlowBrakeResponse);
    }

    #[test]
    fn test_brake_imbalance_and_slow_response_both_fire() {
        let findings = detector().detect(
            &Measurement::Brake {
                force: 400.0,
                response_time: 1.0,
                left_force: 300.0,
                right_force: 100.0,
            },
            &[],
            now(),
        );
        let kinds: Vec<AlertKind> = findings.iter().map(|f| f.kind).collect();
        assert!(kinds.contains(&AlertKind::SlowBrakeResponse));
        assert!(kinds.contains(&AlertKind::BrakeImbalance));
    }

    #[test]
    fn test_headlight_flicker_against_window_mean() {
        let detector = detector();
        let window: Vec<MeasurementRecord> = [500.0, 500.0, 500.0]
            .iter()
            .map(|&v| {
                MeasurementRecord::new(
                    Measurement::Headlight {
                        intensity: v,
                        misalignment: 0.5,
                    },
                    now(),
                )
            })
            .collect();

        // 10% of max intensity (1000 cd) is the deviation limit.
        let findings = detector.detect(
            &Measurement::Headlight {
                intensity: 650.0,
                misalignment: 0.5,
            },
            &window,
            now(),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, AlertKind::UnstableLightIntensity);

        let findings = detector.detect(
            &Measurement::Headlight {
                intensity: 580.0,
                misalignment: 0.5,
            },
            &window,
            now(),
        );
        assert!(findings.is_empty());
    }

    #[test]
    fn test_noise_differential_floor() {
        let findings = detector().detect(
            &Measurement::Noise {
                noise_level: 60.0,
                ambient_level: 44.0,
            },
            &[],
            now(),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, AlertKind::InsufficientNoiseDifferential);

        let findings = detector().detect(
            &Measurement::Noise {
                noise_level: 70.0,
                ambient_level: 44.0,
            },
            &[],
            now(),
        );
        assert!(findings.is_empty());
    }

    #[test]
    fn test_axle_imbalance() {
        let findings = detector().detect(
            &Measurement::Axle {
                weight: 1500.0,
                imbalance: 12.0,
            },
            &[],
            now(),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, AlertKind::AxleImbalance);
    }

    #[test]
    fn test_no_rule_emits_critical() {
        // Feed every rule a firing input and confirm all findings are warnings.
        let detector = detector();
        let mut findings = Vec::new();
        findings.extend(detector.detect(
            &Measurement::Speed { speed: 70.0 },
            &speed_window(&[60.0; 5]),
            now(),
        ));
        findings.extend(detector.detect(
            &Measurement::Brake {
                force: 400.0,
                response_time: 2.0,
                left_force: 400.0,
                right_force: 10.0,
            },
            &[],
            now(),
        ));
        findings.extend(detector.detect(
            &Measurement::Noise {
                noise_level: 50.0,
                ambient_level: 45.0,
            },
            &[],
            now(),
        ));
        assert!(!findings.is_empty());
        assert!(findings.iter().all(|f| f.severity == Severity::Warning));
    }

    #[test]
    fn test_alert_kind_wire_names() {
        assert_eq!(AlertKind::SpeedInstability.as_str(), "speed_instability");
        assert_eq!(AlertKind::DataGap.as_str(), "data_gap");
        let json = serde_json::to_string(&AlertKind::EquipmentIssue).unwrap();
        assert_eq!(json, "\"equipment_issue\"");
    }

    #[test]
    fn test_window_ignores_other_test_types() {
        // A mixed window must only average readings of the same test type.
        let detector = detector();
        let mut window = speed_window(&[60.0; 5]);
        window.push(MeasurementRecord::new(
            Measurement::Noise {
                noise_level: 70.0,
                ambient_level: 40.0,
            },
            now(),
        ));

        let findings = detector.detect(&Measurement::Speed { speed: 70.0 }, &window, now());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, AlertKind::SpeedInstability);
    }
}
