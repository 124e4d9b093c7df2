//! Section and audit-level aggregation.
//!
//! Findings roll up into section results (counts, ratios, flags) and, once
//! every section is complete, into a single audit verdict. The audit verdict
//! follows a strict precedence list; the first matching rule wins:
//!
//! 1. Any non-compliant finding of material severity → `ERHEBLICHE MÄNGEL`
//! 2. ≥ 50 % not assessable → `UNZUREICHENDE EVIDENZ – PRÜFUNG NICHT BELASTBAR`
//! 3. Any non-compliant, or ≥ 3 partially compliant → `MÄNGEL FESTGESTELLT`
//! 4. ≥ 30 % not assessable → `EINGESCHRÄNKT BELASTBAR`
//! 5. Any partially compliant → `TEILKONFORM – NACHBESSERUNG ERFORDERLICH`
//! 6. Otherwise → `KONFORM`
//!
//! The audit-level constants are fixed; only the section flags are
//! configurable through [`Thresholds`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::Severity;
use crate::thresholds::Thresholds;
use crate::types::{Finding, Verdict};

/// Not-assessable share at which the whole audit is unreliable.
pub const AUDIT_INSUFFICIENT_RATIO: f64 = 0.5;

/// Not-assessable share at which the audit is only partly reliable.
pub const AUDIT_LIMITED_RATIO: f64 = 0.3;

/// Number of partially compliant findings that count as deficiencies.
pub const PARTIAL_DEFICIENCY_COUNT: usize = 3;

/// Per-verdict finding counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCounts {
    #[serde(rename = "konform")]
    pub compliant: usize,
    #[serde(rename = "teilkonform")]
    pub partially_compliant: usize,
    #[serde(rename = "nicht_konform")]
    pub non_compliant: usize,
    #[serde(rename = "nicht_pruefbar")]
    pub not_assessable: usize,
}

impl VerdictCounts {
    pub fn from_findings<'a>(findings: impl IntoIterator<Item = &'a Finding>) -> Self {
        let mut counts = Self::default();
        for finding in findings {
            counts.record(finding.verdict);
        }
        counts
    }

    pub fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Compliant => self.compliant += 1,
            Verdict::PartiallyCompliant => self.partially_compliant += 1,
            Verdict::NonCompliant => self.non_compliant += 1,
            Verdict::NotAssessable => self.not_assessable += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.compliant + self.partially_compliant + self.non_compliant + self.not_assessable
    }
}

/// Aggregated result of one catalog section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionResult {
    pub section_id: String,
    pub title: String,

    /// Findings in catalog order
    pub findings: Vec<Finding>,

    pub counts: VerdictCounts,
    pub review_ratio: f64,
    pub not_assessable_ratio: f64,
    pub evidence_insufficient: bool,
    pub escalation_recommended: bool,
}

impl SectionResult {
    /// Aggregate the findings of one section.
    ///
    /// An empty section has ratio 0 and raises no flag.
    pub fn aggregate(
        section_id: impl Into<String>,
        title: impl Into<String>,
        findings: Vec<Finding>,
        thresholds: &Thresholds,
    ) -> Self {
        let counts = VerdictCounts::from_findings(&findings);
        let total = findings.len();
        let review = findings.iter().filter(|f| f.requires_review).count();

        let (review_ratio, not_assessable_ratio) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                review as f64 / total as f64,
                counts.not_assessable as f64 / total as f64,
            )
        };

        let (escalation_recommended, evidence_insufficient) = if total == 0 {
            (false, false)
        } else {
            (
                review_ratio > thresholds.section_escalation_ratio,
                not_assessable_ratio >= thresholds.section_insufficient_ratio,
            )
        };

        Self {
            section_id: section_id.into(),
            title: title.into(),
            findings,
            counts,
            review_ratio,
            not_assessable_ratio,
            evidence_insufficient,
            escalation_recommended,
        }
    }

    /// Recompute the flags from the findings and compare.
    ///
    /// Used to detect tampered or stale persisted results.
    pub fn is_consistent(&self, thresholds: &Thresholds) -> bool {
        let recomputed = Self::aggregate(
            self.section_id.clone(),
            self.title.clone(),
            self.findings.clone(),
            thresholds,
        );
        recomputed.counts == self.counts
            && recomputed.evidence_insufficient == self.evidence_insufficient
            && recomputed.escalation_recommended == self.escalation_recommended
            && (recomputed.review_ratio - self.review_ratio).abs() < 1e-9
            && (recomputed.not_assessable_ratio - self.not_assessable_ratio).abs() < 1e-9
    }

    /// Non-compliant and partially compliant findings, in catalog order.
    pub fn critical_findings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.is_critical())
    }

    pub fn review_count(&self) -> usize {
        self.findings.iter().filter(|f| f.requires_review).count()
    }
}

/// Overall verdict of an audit run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditVerdict {
    #[serde(rename = "ERHEBLICHE MÄNGEL")]
    MaterialDeficiencies,

    #[serde(rename = "UNZUREICHENDE EVIDENZ – PRÜFUNG NICHT BELASTBAR")]
    InsufficientEvidence,

    #[serde(rename = "MÄNGEL FESTGESTELLT")]
    DeficienciesFound,

    #[serde(rename = "EINGESCHRÄNKT BELASTBAR")]
    LimitedReliability,

    #[serde(rename = "TEILKONFORM – NACHBESSERUNG ERFORDERLICH")]
    PartiallyCompliant,

    #[serde(rename = "KONFORM")]
    Compliant,
}

impl AuditVerdict {
    pub fn label(&self) -> &'static str {
        match self {
            AuditVerdict::MaterialDeficiencies => "ERHEBLICHE MÄNGEL",
            AuditVerdict::InsufficientEvidence => {
                "UNZUREICHENDE EVIDENZ – PRÜFUNG NICHT BELASTBAR"
            }
            AuditVerdict::DeficienciesFound => "MÄNGEL FESTGESTELLT",
            AuditVerdict::LimitedReliability => "EINGESCHRÄNKT BELASTBAR",
            AuditVerdict::PartiallyCompliant => "TEILKONFORM – NACHBESSERUNG ERFORDERLICH",
            AuditVerdict::Compliant => "KONFORM",
        }
    }
}

impl fmt::Display for AuditVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Compute the audit verdict over every finding of a run.
pub fn overall_verdict<'a>(findings: impl IntoIterator<Item = &'a Finding>) -> AuditVerdict {
    let mut counts = VerdictCounts::default();
    let mut material_deficiency = false;

    for finding in findings {
        counts.record(finding.verdict);
        material_deficiency |= finding.is_material_deficiency();
    }

    let total = counts.total();
    let not_assessable_ratio = if total == 0 {
        0.0
    } else {
        counts.not_assessable as f64 / total as f64
    };

    if material_deficiency {
        AuditVerdict::MaterialDeficiencies
    } else if not_assessable_ratio >= AUDIT_INSUFFICIENT_RATIO {
        AuditVerdict::InsufficientEvidence
    } else if counts.non_compliant > 0 || counts.partially_compliant >= PARTIAL_DEFICIENCY_COUNT {
        AuditVerdict::DeficienciesFound
    } else if not_assessable_ratio >= AUDIT_LIMITED_RATIO {
        AuditVerdict::LimitedReliability
    } else if counts.partially_compliant > 0 {
        AuditVerdict::PartiallyCompliant
    } else {
        AuditVerdict::Compliant
    }
}

/// Short reference to a critical finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalFinding {
    pub item_id: String,
    pub question: String,
    pub severity: Severity,
    pub verdict: Verdict,
    pub deficiency_text: Option<String>,
}

/// Run-wide statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub total_items: usize,
    pub counts: VerdictCounts,

    /// Share of not-assessable findings in percent, one decimal
    pub not_assessable_percent: f64,

    pub review_required: usize,
    pub average_confidence: f64,
    pub deficiencies: usize,
    pub material_deficiencies: usize,

    /// Critical findings, material severity first
    pub critical_findings: Vec<CriticalFinding>,
}

impl AuditSummary {
    pub fn from_sections(sections: &[SectionResult]) -> Self {
        let findings: Vec<&Finding> = sections.iter().flat_map(|s| s.findings.iter()).collect();
        let counts = VerdictCounts::from_findings(findings.iter().copied());
        let total = findings.len();

        let (not_assessable_percent, average_confidence) = if total == 0 {
            (0.0, 0.0)
        } else {
            let ratio = counts.not_assessable as f64 / total as f64;
            let confidence = findings.iter().map(|f| f.confidence).sum::<f64>() / total as f64;
            ((ratio * 1000.0).round() / 10.0, (confidence * 1000.0).round() / 1000.0)
        };

        let mut critical: Vec<&Finding> = findings.iter().copied().filter(|f| f.is_critical()).collect();
        // stable: catalog order within each severity group
        critical.sort_by_key(|f| f.severity != Severity::Material);

        Self {
            total_items: total,
            counts,
            not_assessable_percent,
            review_required: findings.iter().filter(|f| f.requires_review).count(),
            average_confidence,
            deficiencies: counts.non_compliant,
            material_deficiencies: findings.iter().filter(|f| f.is_material_deficiency()).count(),
            critical_findings: critical
                .into_iter()
                .map(|f| CriticalFinding {
                    item_id: f.item_id.clone(),
                    question: f.question.clone(),
                    severity: f.severity,
                    verdict: f.verdict,
                    deficiency_text: f.deficiency_text.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn finding(id: &str, verdict: Verdict, severity: Severity, review: bool) -> Finding {
        Finding {
            item_id: id.to_string(),
            section_id: "S01".to_string(),
            question: format!("Frage {}", id),
            severity,
            verdict,
            model_verdict: None,
            justification: String::new(),
            cited_sources: Vec::new(),
            evidence_quotes: Vec::new(),
            deficiency_text: None,
            recommendations: Vec::new(),
            self_assessment: 0.5,
            confidence: if review { 0.5 } else { 0.9 },
            requires_review: review,
            overridden: verdict == Verdict::NotAssessable,
            warnings: Vec::new(),
        }
    }

    fn many(n: usize, verdict: Verdict, severity: Severity, review: bool) -> Vec<Finding> {
        (0..n)
            .map(|i| finding(&format!("{:?}-{}", verdict, i), verdict, severity, review))
            .collect()
    }

    #[test]
    fn test_empty_section() {
        let section = SectionResult::aggregate("S01", "Leer", Vec::new(), &Thresholds::default());
        assert_eq!(section.review_ratio, 0.0);
        assert_eq!(section.not_assessable_ratio, 0.0);
        assert!(!section.escalation_recommended);
        assert!(!section.evidence_insufficient);
    }

    #[test]
    fn test_escalation_is_strictly_greater() {
        let t = Thresholds::default();

        let mut findings = many(4, Verdict::Compliant, Severity::Minor, true);
        findings.extend(many(6, Verdict::Compliant, Severity::Minor, false));
        let section = SectionResult::aggregate("S01", "A", findings, &t);
        assert!(section.escalation_recommended);

        let mut findings = many(3, Verdict::Compliant, Severity::Minor, true);
        findings.extend(many(7, Verdict::Compliant, Severity::Minor, false));
        let section = SectionResult::aggregate("S01", "A", findings, &t);
        assert!(!section.escalation_recommended);
    }

    #[test]
    fn test_evidence_insufficient_is_inclusive() {
        let t = Thresholds::default();
        let mut findings = many(3, Verdict::NotAssessable, Severity::Minor, false);
        findings.extend(many(7, Verdict::Compliant, Severity::Minor, false));
        let section = SectionResult::aggregate("S01", "A", findings, &t);

        assert!(section.evidence_insufficient);
        assert_eq!(section.counts.not_assessable, 3);
        assert!(section.is_consistent(&t));
    }

    #[test]
    fn test_tampered_section_is_inconsistent() {
        let t = Thresholds::default();
        let mut section =
            SectionResult::aggregate("S01", "A", many(2, Verdict::Compliant, Severity::Minor, false), &t);
        section.escalation_recommended = true;
        assert!(!section.is_consistent(&t));
    }

    #[test]
    fn test_material_deficiency_wins_over_insufficient_evidence() {
        let mut findings = vec![finding("M", Verdict::NonCompliant, Severity::Material, false)];
        findings.extend(many(6, Verdict::NotAssessable, Severity::Minor, false));
        findings.extend(many(3, Verdict::Compliant, Severity::Minor, false));

        assert_eq!(overall_verdict(&findings), AuditVerdict::MaterialDeficiencies);
    }

    #[test]
    fn test_verdict_precedence() {
        let na = many(5, Verdict::NotAssessable, Severity::Minor, false);
        let ok = many(5, Verdict::Compliant, Severity::Minor, false);
        let all: Vec<Finding> = na.iter().chain(ok.iter()).cloned().collect();
        assert_eq!(overall_verdict(&all), AuditVerdict::InsufficientEvidence);

        let mut findings = many(3, Verdict::PartiallyCompliant, Severity::Minor, false);
        findings.extend(many(7, Verdict::Compliant, Severity::Minor, false));
        assert_eq!(overall_verdict(&findings), AuditVerdict::DeficienciesFound);

        let mut findings = vec![finding("N", Verdict::NonCompliant, Severity::Significant, false)];
        findings.extend(many(9, Verdict::Compliant, Severity::Minor, false));
        assert_eq!(overall_verdict(&findings), AuditVerdict::DeficienciesFound);

        let mut findings = many(3, Verdict::NotAssessable, Severity::Minor, false);
        findings.extend(many(7, Verdict::Compliant, Severity::Minor, false));
        assert_eq!(overall_verdict(&findings), AuditVerdict::LimitedReliability);

        let mut findings = many(2, Verdict::PartiallyCompliant, Severity::Minor, false);
        findings.extend(many(8, Verdict::Compliant, Severity::Minor, false));
        assert_eq!(overall_verdict(&findings), AuditVerdict::PartiallyCompliant);

        assert_eq!(
            overall_verdict(&many(4, Verdict::Compliant, Severity::Material, false)),
            AuditVerdict::Compliant
        );
    }

    #[test]
    fn test_verdict_labels() {
        assert_eq!(
            serde_json::to_string(&AuditVerdict::InsufficientEvidence).unwrap(),
            "\"UNZUREICHENDE EVIDENZ – PRÜFUNG NICHT BELASTBAR\""
        );
        assert_eq!(AuditVerdict::Compliant.to_string(), "KONFORM");
    }

    #[test]
    fn test_summary_orders_material_first() {
        let mut minor = finding("S01-01", Verdict::PartiallyCompliant, Severity::Minor, true);
        minor.deficiency_text = Some("klein".to_string());
        let material = finding("S01-02", Verdict::NonCompliant, Severity::Material, false);
        let ok = finding("S01-03", Verdict::Compliant, Severity::Minor, false);
        let na = finding("S01-04", Verdict::NotAssessable, Severity::Minor, false);

        let section =
            SectionResult::aggregate("S01", "A", vec![minor, material, ok, na], &Thresholds::default());
        let summary = AuditSummary::from_sections(&[section]);

        assert_eq!(summary.total_items, 4);
        assert_eq!(summary.not_assessable_percent, 25.0);
        assert_eq!(summary.review_required, 1);
        assert_eq!(summary.deficiencies, 1);
        assert_eq!(summary.material_deficiencies, 1);
        assert_eq!(summary.critical_findings.len(), 2);
        assert_eq!(summary.critical_findings[0].item_id, "S01-02");
        assert_eq!(summary.critical_findings[1].item_id, "S01-01");
    }

    fn verdict_strategy() -> impl Strategy<Value = Verdict> {
        prop_oneof![
            Just(Verdict::Compliant),
            Just(Verdict::PartiallyCompliant),
            Just(Verdict::NonCompliant),
            Just(Verdict::NotAssessable),
        ]
    }

    proptest! {
        #[test]
        fn prop_section_ratios_in_unit_interval(
            entries in proptest::collection::vec((verdict_strategy(), any::<bool>()), 0..40)
        ) {
            let findings: Vec<Finding> = entries
                .iter()
                .enumerate()
                .map(|(i, (v, review))| finding(&i.to_string(), *v, Severity::Minor, *review))
                .collect();
            let section = SectionResult::aggregate("S", "T", findings, &Thresholds::default());

            prop_assert!((0.0..=1.0).contains(&section.review_ratio));
            prop_assert!((0.0..=1.0).contains(&section.not_assessable_ratio));
            prop_assert_eq!(section.counts.total(), entries.len());
        }

        #[test]
        fn prop_material_non_compliant_always_wins(
            verdicts in proptest::collection::vec(verdict_strategy(), 0..30)
        ) {
            let mut findings: Vec<Finding> = verdicts
                .iter()
                .enumerate()
                .map(|(i, v)| finding(&i.to_string(), *v, Severity::Minor, false))
                .collect();
            findings.push(finding("M", Verdict::NonCompliant, Severity::Material, false));

            prop_assert_eq!(overall_verdict(&findings), AuditVerdict::MaterialDeficiencies);
        }
    }
}
