//! # Issue Classifier
//!
//! Pure mapping from findings to tiers. Rules are evaluated in order:
//! critical or unknown issues are L3, known-safe types are L1, known
//! decision-needing types are L2, and everything else defaults to L2 so it
//! surfaces for a decision instead of being acted on or ignored.

use cortex_common::models::{IssueLevel, IssueReport, Severity};
use std::collections::HashSet;

/// Sentinel type that always escalates to L3.
const UNKNOWN_TYPE: &str = "unknown";

pub struct IssueClassifier {
    l1_types: HashSet<String>,
    l2_types: HashSet<String>,
}

impl Default for IssueClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Issues bucketed by tier, with `level` rewritten on every entry.
#[derive(Debug, Default)]
pub struct ClassifiedIssues {
    pub l1: Vec<IssueReport>,
    pub l2: Vec<IssueReport>,
    pub l3: Vec<IssueReport>,
}

impl ClassifiedIssues {
    pub fn total(&self) -> usize {
        self.l1.len() + self.l2.len() + self.l3.len()
    }
}

impl IssueClassifier {
    pub fn new() -> Self {
        let l1_types = [
            "disk_space_low",
            "temp_files_cleanup",
            "log_rotation_needed",
            "cache_cleanup",
            "old_package_cleanup",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let l2_types = [
            "service_down",
            "service_failed",
            "process_crashed",
            "config_drift",
            "certificate_expiring",
            "memory_leak",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self { l1_types, l2_types }
    }

    /// Assign a tier to every issue and bucket them.
    pub fn classify(&self, issues: Vec<IssueReport>) -> ClassifiedIssues {
        let mut classified = ClassifiedIssues::default();

        for mut issue in issues {
            let level = self.determine_level(&issue);
            issue.level = level;
            match level {
                IssueLevel::L1 => classified.l1.push(issue),
                IssueLevel::L2 => classified.l2.push(issue),
                IssueLevel::L3 => classified.l3.push(issue),
            }
        }

        classified
    }

    pub fn determine_level(&self, issue: &IssueReport) -> IssueLevel {
        if issue.severity == Severity::Critical || issue.kind == UNKNOWN_TYPE {
            return IssueLevel::L3;
        }
        if self.l1_types.contains(&issue.kind) {
            return IssueLevel::L1;
        }
        if self.l2_types.contains(&issue.kind) {
            return IssueLevel::L2;
        }
        IssueLevel::L2
    }

    pub fn add_l1_type(&mut self, issue_type: impl Into<String>) {
        self.l1_types.insert(issue_type.into());
    }

    pub fn add_l2_type(&mut self, issue_type: impl Into<String>) {
        self.l2_types.insert(issue_type.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn issue(kind: &str, severity: Severity) -> IssueReport {
        IssueReport {
            // Producers fill in a provisional level; the classifier overwrites it
            level: IssueLevel::L2,
            kind: kind.to_string(),
            description: format!("{kind} detected"),
            severity,
            proposed_fix: None,
            risk_assessment: None,
            details: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn critical_severity_is_always_l3() {
        let classifier = IssueClassifier::new();
        // Even a type from the L1 set escalates when critical
        let level = classifier.determine_level(&issue("disk_space_low", Severity::Critical));
        assert_eq!(level, IssueLevel::L3);
    }

    #[test]
    fn unknown_type_is_l3() {
        let classifier = IssueClassifier::new();
        assert_eq!(
            classifier.determine_level(&issue("unknown", Severity::Low)),
            IssueLevel::L3
        );
    }

    #[test]
    fn known_safe_types_are_l1() {
        let classifier = IssueClassifier::new();
        for kind in [
            "disk_space_low",
            "temp_files_cleanup",
            "log_rotation_needed",
            "cache_cleanup",
            "old_package_cleanup",
        ] {
            assert_eq!(
                classifier.determine_level(&issue(kind, Severity::High)),
                IssueLevel::L1,
                "{kind} should be L1"
            );
        }
    }

    #[test]
    fn known_decision_types_are_l2() {
        let classifier = IssueClassifier::new();
        for kind in ["service_down", "memory_leak", "certificate_expiring"] {
            assert_eq!(
                classifier.determine_level(&issue(kind, Severity::Medium)),
                IssueLevel::L2,
                "{kind} should be L2"
            );
        }
    }

    #[test]
    fn unrecognized_types_default_to_l2() {
        let classifier = IssueClassifier::new();
        assert_eq!(
            classifier.determine_level(&issue("something_new", Severity::Low)),
            IssueLevel::L2
        );
    }

    #[test]
    fn classify_rewrites_levels_and_buckets_everything() {
        let classifier = IssueClassifier::new();
        let issues = vec![
            issue("disk_space_low", Severity::High),
            issue("service_down", Severity::Medium),
            issue("database_corruption", Severity::Critical),
            issue("unheard_of", Severity::Low),
        ];

        let classified = classifier.classify(issues);

        assert_eq!(classified.l1.len(), 1);
        assert_eq!(classified.l2.len(), 2);
        assert_eq!(classified.l3.len(), 1);
        assert_eq!(classified.total(), 4);

        assert!(classified.l1.iter().all(|i| i.level == IssueLevel::L1));
        assert!(classified.l2.iter().all(|i| i.level == IssueLevel::L2));
        assert!(classified.l3.iter().all(|i| i.level == IssueLevel::L3));
    }

    #[test]
    fn sets_are_extensible_at_runtime() {
        let mut classifier = IssueClassifier::new();
        classifier.add_l1_type("swap_cleanup");
        classifier.add_l2_type("replication_lag");

        assert_eq!(
            classifier.determine_level(&issue("swap_cleanup", Severity::Low)),
            IssueLevel::L1
        );
        assert_eq!(
            classifier.determine_level(&issue("replication_lag", Severity::Low)),
            IssueLevel::L2
        );
    }
}
