//! Log severity, normalized to a fixed five-level scale on ingest.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Normalized log severity. Unknown wire-level severities map to `Info`
/// (§3 invariant: "unknown values map to INFO").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// The numeric scale used by the filter engine: DEBUG=10, INFO=20,
    /// WARN=30, ERROR=40, FATAL=50.
    pub fn numeric(self) -> u8 {
        match self {
            Severity::Debug => 10,
            Severity::Info => 20,
            Severity::Warn => 30,
            Severity::Error => 40,
            Severity::Fatal => 50,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    /// Normalizes a free-form severity string (case-insensitively) to the
    /// fixed five-level scale. Idempotent: `normalize(normalize(s).as_str())
    /// == normalize(s)` for any input, since every variant's `as_str()` round
    /// trips through this same match.
    pub fn normalize(raw: &str) -> Severity {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DEBUG" | "TRACE" => Severity::Debug,
            "WARN" | "WARNING" => Severity::Warn,
            "ERROR" => Severity::Error,
            "FATAL" | "CRITICAL" | "PANIC" => Severity::Fatal,
            _ => Severity::Info,
        }
    }

    /// Normalizes from the OTLP `SeverityNumber` enum (1-24, grouped into
    /// five bands of four), falling back to `INFO` outside the known range.
    pub fn from_otlp_number(n: i32) -> Severity {
        match n {
            1..=4 => Severity::Debug,
            5..=8 => Severity::Debug,
            9..=12 => Severity::Info,
            13..=16 => Severity::Warn,
            17..=20 => Severity::Error,
            21..=24 => Severity::Fatal,
            _ => Severity::Info,
        }
    }
}

impl FromStr for Severity {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Severity::normalize(s))
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_scale_is_ordered_by_severity() {
        assert_eq!(Severity::Debug.numeric(), 10);
        assert_eq!(Severity::Info.numeric(), 20);
        assert_eq!(Severity::Warn.numeric(), 30);
        assert_eq!(Severity::Error.numeric(), 40);
        assert_eq!(Severity::Fatal.numeric(), 50);
    }

    #[test]
    fn unknown_strings_normalize_to_info() {
        assert_eq!(Severity::normalize("banana"), Severity::Info);
        assert_eq!(Severity::normalize(""), Severity::Info);
    }

    #[test]
    fn normalization_is_case_insensitive() {
        assert_eq!(Severity::normalize("warn"), Severity::Warn);
        assert_eq!(Severity::normalize("WaRn"), Severity::Warn);
        assert_eq!(Severity::normalize("warning"), Severity::Warn);
    }

    #[test]
    fn normalization_is_idempotent() {
        for s in [
            Severity::Debug,
            Severity::Info,
            Severity::Warn,
            Severity::Error,
            Severity::Fatal,
        ] {
            let once = Severity::normalize(s.as_str());
            let twice = Severity::normalize(once.as_str());
            assert_eq!(once, twice);
            assert_eq!(once, s);
        }
    }

    #[test]
    fn otlp_number_bands_map_correctly() {
        assert_eq!(Severity::from_otlp_number(5), Severity::Debug);
        assert_eq!(Severity::from_otlp_number(9), Severity::Info);
        assert_eq!(Severity::from_otlp_number(13), Severity::Warn);
        assert_eq!(Severity::from_otlp_number(17), Severity::Error);
        assert_eq!(Severity::from_otlp_number(21), Severity::Fatal);
        assert_eq!(Severity::from_otlp_number(0), Severity::Info);
        assert_eq!(Severity::from_otlp_number(99), Severity::Info);
    }
}
