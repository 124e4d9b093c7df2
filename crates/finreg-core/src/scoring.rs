//! Confidence scoring.
//!
//! Combines four normalized signals into one trust score per finding:
//!
//! | Signal            | Weight |
//! |-------------------|--------|
//! | Retrieval mean    | 0.30   |
//! | Evidence coverage | 0.30   |
//! | Type match        | 0.20   |
//! | Self-assessment   | 0.20   |
//!
//! The scorer is a pure function; thresholds are passed in explicitly.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::catalog::ChecklistItem;
use crate::thresholds::Thresholds;
use crate::types::{RawFinding, RetrievalResult};

pub const RETRIEVAL_WEIGHT: f64 = 0.30;
pub const COVERAGE_WEIGHT: f64 = 0.30;
pub const TYPE_MATCH_WEIGHT: f64 = 0.20;
pub const SELF_ASSESSMENT_WEIGHT: f64 = 0.20;

/// Combine the four signals into a confidence score in [0, 1].
///
/// Inputs are expected in [0, 1]. The result is clamped so floating-point
/// drift cannot leave the range; non-finite inputs count as 0.
pub fn score(
    retrieval_mean_score: f64,
    evidence_coverage: f64,
    type_match_ratio: f64,
    self_assessment: f64,
) -> f64 {
    let weighted = RETRIEVAL_WEIGHT * finite_or_zero(retrieval_mean_score)
        + COVERAGE_WEIGHT * finite_or_zero(evidence_coverage)
        + TYPE_MATCH_WEIGHT * finite_or_zero(type_match_ratio)
        + SELF_ASSESSMENT_WEIGHT * finite_or_zero(self_assessment);
    weighted.clamp(0.0, 1.0)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// A model-reported signal forced into [0, 1]; non-finite counts as 0.
pub fn unit_signal(value: f64) -> f64 {
    finite_or_zero(value).clamp(0.0, 1.0)
}

/// Fraction of expected evidence labels found among the source ids.
///
/// A label matches when any of its whitespace-separated tokens occurs,
/// case-insensitively, inside one of the sources. An empty label list is
/// vacuously satisfied.
pub fn evidence_coverage<S: AsRef<str>>(expected: &[String], sources: &[S]) -> f64 {
    if expected.is_empty() {
        return 1.0;
    }

    let haystack: Vec<String> = sources.iter().map(|s| s.as_ref().to_lowercase()).collect();

    let matched = expected
        .iter()
        .filter(|label| {
            label
                .to_lowercase()
                .split_whitespace()
                .any(|token| haystack.iter().any(|source| source.contains(token)))
        })
        .count();

    matched as f64 / expected.len() as f64
}

/// Fraction of acceptable document types present among the found types.
///
/// Comparison is case-insensitive. An empty acceptable list is vacuously
/// satisfied.
pub fn type_match_ratio<S: AsRef<str>>(acceptable: &[String], found: &[S]) -> f64 {
    if acceptable.is_empty() {
        return 1.0;
    }

    let found: BTreeSet<String> = found.iter().map(|t| t.as_ref().to_lowercase()).collect();
    let wanted: BTreeSet<String> = acceptable.iter().map(|t| t.to_lowercase()).collect();

    let overlap = wanted.intersection(&found).count();
    overlap as f64 / wanted.len() as f64
}

/// The four inputs of a confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceSignals {
    pub retrieval: f64,
    pub coverage: f64,
    pub type_match: f64,
    pub self_assessment: f64,
}

impl ConfidenceSignals {
    /// Derive the signals for a generated finding.
    ///
    /// Coverage looks at retrieved and cited sources together; type match
    /// looks at the retrieved document types.
    pub fn collect(item: &ChecklistItem, retrieval: &RetrievalResult, raw: &RawFinding) -> Self {
        let mut sources: Vec<&str> = retrieval.source_ids();
        for cited in &raw.cited_sources {
            if !sources.contains(&cited.as_str()) {
                sources.push(cited);
            }
        }
        let types: Vec<&str> = retrieval.doc_types().into_iter().collect();

        Self {
            retrieval: retrieval.mean_score(),
            coverage: evidence_coverage(&item.expected_evidence, &sources),
            type_match: type_match_ratio(&item.input_types, &types),
            self_assessment: unit_signal(raw.self_assessment),
        }
    }

    pub fn score(&self) -> f64 {
        score(
            self.retrieval,
            self.coverage,
            self.type_match,
            self.self_assessment,
        )
    }
}

/// Where a confidence score falls relative to the thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    /// `score < reject_below`: verdict is overridden
    Rejected,
    /// `reject_below <= score <= review_up_to`: manual review
    Review,
    /// `score > review_up_to`: accepted as-is
    Accepted,
}

pub fn classify(confidence: f64, thresholds: &Thresholds) -> ConfidenceBand {
    if confidence < thresholds.reject_below || confidence.is_nan() {
        ConfidenceBand::Rejected
    } else if confidence <= thresholds.review_up_to {
        ConfidenceBand::Review
    } else {
        ConfidenceBand::Accepted
    }
}
