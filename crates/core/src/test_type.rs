//! Test types and sequence templates
//!
//! A test type is one named inspection procedure performed on the lane.
//! Sessions run test types in a fixed order chosen from a named template
//! at creation time; the order never changes afterwards.

use serde::{Deserialize, Serialize};

/// A named inspection procedure with its own threshold configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    /// Rolling-road speedometer check
    Speed,

    /// Brake force and response on the roller bench
    Brake,

    /// Headlight intensity and alignment
    Headlight,

    /// Exhaust noise against ambient level
    Noise,

    /// Axle load and left/right balance
    Axle,
}

impl TestType {
    /// Wire name of this test type (snake_case, matches the JSON frames).
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Speed => "speed",
            TestType::Brake => "brake",
            TestType::Headlight => "headlight",
            TestType::Noise => "noise",
            TestType::Axle => "axle",
        }
    }

    /// Parse a wire name into a test type.
    ///
    /// Returns `None` for unknown names; callers turn that into a
    /// validation error naming the offending string.
    pub fn parse(name: &str) -> Option<TestType> {
        match name {
            "speed" => Some(TestType::Speed),
            "brake" => Some(TestType::Brake),
            "headlight" => Some(TestType::Headlight),
            "noise" => Some(TestType::Noise),
            "axle" => Some(TestType::Axle),
            _ => None,
        }
    }
}

impl std::fmt::Display for TestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named, fixed test sequences a session can be created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceTemplate {
    /// The periodic-inspection sequence run on every vehicle.
    Standard,

    /// Standard plus the axle bench, used for heavy vehicles and re-tests.
    Comprehensive,
}

impl SequenceTemplate {
    /// The ordered test types this template prescribes.
    pub fn tests(&self) -> Vec<TestType> {
        match self {
            SequenceTemplate::Standard => vec![
                TestType::Speed,
                TestType::Brake,
                TestType::Headlight,
                TestType::Noise,
            ],
            SequenceTemplate::Comprehensive => vec![
                TestType::Speed,
                TestType::Brake,
                TestType::Headlight,
                TestType::Noise,
                TestType::Axle,
            ],
        }
    }

    /// Parse a template name.
    pub fn parse(name: &str) -> Option<SequenceTemplate> {
        match name {
            "standard" => Some(SequenceTemplate::Standard),
            "comprehensive" => Some(SequenceTemplate::Comprehensive),
            _ => None,
        }
    }

    /// Wire name of this template.
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceTemplate::Standard => "standard",
            SequenceTemplate::Comprehensive => "comprehensive",
        }
    }
}

impl std::fmt::Display for SequenceTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_round_trip() {
        for test_type in [
            TestType::Speed,
            TestType::Brake,
            TestType::Headlight,
            TestType::Noise,
            TestType::Axle,
        ] {
            assert_eq!(TestType::parse(test_type.as_str()), Some(test_type));
        }
        assert_eq!(TestType::parse("visual"), None);
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&TestType::Headlight).unwrap();
        assert_eq!(json, "\"headlight\"");

        let parsed: TestType = serde_json::from_str("\"noise\"").unwrap();
        assert_eq!(parsed, TestType::Noise);
    }

    #[test]
    fn test_standard_template_order() {
        let tests = SequenceTemplate::Standard.tests();
        assert_eq!(
            tests,
            vec![
                TestType::Speed,
                TestType::Brake,
                TestType::Headlight,
                TestType::Noise
            ]
        );
    }

    #[test]
    fn test_comprehensive_adds_axle_last() {
        let tests = SequenceTemplate::Comprehensive.tests();
        assert_eq!(tests.len(), 5);
        assert_eq!(*tests.last().unwrap(), TestType::Axle);
    }

    #[test]
    fn test_template_parse() {
        assert_eq!(
            SequenceTemplate::parse("standard"),
            Some(SequenceTemplate::Standard)
        );
        assert_eq!(
            SequenceTemplate::parse("comprehensive"),
            Some(SequenceTemplate::Comprehensive)
        );
        assert_eq!(SequenceTemplate::parse("express"), None);
    }
}
