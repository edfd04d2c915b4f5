//! The ingestion-time filter: a pure function over `(service_name,
//! severity?)` and a small allow/deny configuration. No state, no I/O — safe
//! to call directly from a receiver task with no suspension point.

use std::collections::HashSet;

use crate::metrics;
use crate::model::Severity;

/// Filter configuration loaded once from `INGEST_MIN_SEVERITY`,
/// `INGEST_ALLOWED_SERVICES`, `INGEST_EXCLUDED_SERVICES`.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub min_severity: Severity,
    pub allowed_services: HashSet<String>,
    pub excluded_services: HashSet<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_severity: Severity::Info,
            allowed_services: HashSet::new(),
            excluded_services: HashSet::new(),
        }
    }
}

/// Why a record was denied, used only for metrics labeling — never exposed to
/// callers beyond the decision itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    DenyList,
    AllowMiss,
    Severity,
}

impl Rejection {
    fn as_str(self) -> &'static str {
        match self {
            Rejection::DenyList => "deny_list",
            Rejection::AllowMiss => "allow_miss",
            Rejection::Severity => "severity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Deny(Rejection),
}

impl Decision {
    pub fn is_admit(self) -> bool {
        matches!(self, Decision::Admit)
    }
}

/// Pure filter evaluation. Rules apply in fixed order: deny-list, then
/// allow-list, then (logs only) minimum severity. `severity` is `None` for
/// traces, which are never severity-filtered.
pub fn evaluate(config: &FilterConfig, service_name: &str, severity: Option<Severity>) -> Decision {
    if config.excluded_services.contains(service_name) {
        return Decision::Deny(Rejection::DenyList);
    }

    if !config.allowed_services.is_empty() && !config.allowed_services.contains(service_name) {
        return Decision::Deny(Rejection::AllowMiss);
    }

    if let Some(severity) = severity {
        if severity.numeric() < config.min_severity.numeric() {
            return Decision::Deny(Rejection::Severity);
        }
    }

    Decision::Admit
}

/// Evaluates the filter and records the `argus_filter_rejections` metric for
/// a denial. Receivers should call this rather than `evaluate` directly so
/// rejection accounting never gets forgotten at a call site.
pub fn evaluate_and_record(
    config: &FilterConfig,
    service_name: &str,
    severity: Option<Severity>,
) -> Decision {
    let decision = evaluate(config, service_name, severity);
    if let Decision::Deny(reason) = decision {
        metrics::FILTER_REJECTIONS
            .with_label_values(&[reason.as_str()])
            .inc();
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(allow: &[&str], deny: &[&str], min: Severity) -> FilterConfig {
        FilterConfig {
            min_severity: min,
            allowed_services: allow.iter().map(|s| s.to_string()).collect(),
            excluded_services: deny.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn default_config_admits_everything() {
        let cfg = FilterConfig::default();
        assert_eq!(evaluate(&cfg, "order", Some(Severity::Debug)), Decision::Admit);
        assert_eq!(evaluate(&cfg, "anything", None), Decision::Admit);
    }

    #[test]
    fn deny_list_wins_over_allow_list() {
        // Scenario 4 from §8: allow={a,b}, deny={a}. a denied, b admitted, c denied.
        let cfg = config(&["a", "b"], &["a"], Severity::Debug);
        assert_eq!(
            evaluate(&cfg, "a", None),
            Decision::Deny(Rejection::DenyList)
        );
        assert_eq!(evaluate(&cfg, "b", None), Decision::Admit);
        assert_eq!(
            evaluate(&cfg, "c", None),
            Decision::Deny(Rejection::AllowMiss)
        );
    }

    #[test]
    fn empty_allow_list_means_any_service() {
        let cfg = config(&[], &["blocked"], Severity::Debug);
        assert_eq!(evaluate(&cfg, "anything", None), Decision::Admit);
        assert_eq!(
            evaluate(&cfg, "blocked", None),
            Decision::Deny(Rejection::DenyList)
        );
    }

    #[test]
    fn severity_filter_applies_only_when_severity_given() {
        // Scenario 3 from §8: min=WARN, five logs DEBUG..FATAL -> two dropped.
        let cfg = config(&[], &[], Severity::Warn);
        assert_eq!(
            evaluate(&cfg, "svc", Some(Severity::Debug)),
            Decision::Deny(Rejection::Severity)
        );
        assert_eq!(
            evaluate(&cfg, "svc", Some(Severity::Info)),
            Decision::Deny(Rejection::Severity)
        );
        assert_eq!(evaluate(&cfg, "svc", Some(Severity::Warn)), Decision::Admit);
        assert_eq!(evaluate(&cfg, "svc", Some(Severity::Error)), Decision::Admit);
        assert_eq!(evaluate(&cfg, "svc", Some(Severity::Fatal)), Decision::Admit);
    }

    #[test]
    fn traces_are_never_severity_filtered() {
        let cfg = config(&[], &[], Severity::Fatal);
        assert_eq!(evaluate(&cfg, "svc", None), Decision::Admit);
    }

    #[test]
    fn filter_is_deterministic() {
        let cfg = config(&["a"], &["b"], Severity::Warn);
        for _ in 0..5 {
            assert_eq!(
                evaluate(&cfg, "a", Some(Severity::Error)),
                Decision::Admit
            );
        }
    }
}
