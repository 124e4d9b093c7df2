//! Structural validation of raw findings.
//!
//! Checks a generated finding against the evidence it was produced from and
//! against itself. Every applicable warning is collected; validation never
//! stops at the first problem and never changes the verdict.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::{RawFinding, RetrievalResult, ValidationWarning, Verdict, WarningKind};

lazy_static! {
    /// Brace-delimited template token, e.g. `{institution}`
    static ref PLACEHOLDER_PATTERN: Regex = Regex::new(r"\{[^}]*\}").unwrap();
}

/// Validate a raw finding against the retrieval result it was based on.
///
/// Warnings are returned in a fixed order: phantom sources (citation order),
/// placeholders (justification, then deficiency text), then consistency.
pub fn validate(raw: &RawFinding, retrieval: &RetrievalResult) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    check_phantom_sources(raw, retrieval, &mut warnings);
    check_placeholders(raw, &mut warnings);
    check_consistency(raw, &mut warnings);

    warnings
}

fn check_phantom_sources(
    raw: &RawFinding,
    retrieval: &RetrievalResult,
    warnings: &mut Vec<ValidationWarning>,
) {
    let mut reported = HashSet::new();

    for source in &raw.cited_sources {
        if retrieval.contains_source(source) || !reported.insert(source.as_str()) {
            continue;
        }
        warnings.push(ValidationWarning::new(
            WarningKind::PhantomSource,
            format!("Zitierte Quelle '{}' nicht im Retrieval-Ergebnis", source),
        ));
    }
}

fn check_placeholders(raw: &RawFinding, warnings: &mut Vec<ValidationWarning>) {
    let fields = [
        ("begruendung", Some(raw.justification.as_str())),
        ("mangel_text", raw.deficiency_text.as_deref()),
    ];

    for (field, text) in fields {
        let Some(token) = text.and_then(|t| PLACEHOLDER_PATTERN.find(t)) else {
            continue;
        };
        warnings.push(ValidationWarning::new(
            WarningKind::UnresolvedPlaceholder,
            format!("Ungefüllter Platzhalter {} in {}", token.as_str(), field),
        ));
    }
}

fn check_consistency(raw: &RawFinding, warnings: &mut Vec<ValidationWarning>) {
    let deficiency = raw.deficiency();

    match raw.verdict {
        Verdict::Compliant => {
            if raw.cited_sources.is_empty() {
                warnings.push(ValidationWarning::new(
                    WarningKind::MissingEvidenceText,
                    "Bewertung 'konform' ohne zitierte Quellen",
                ));
            }
            if deficiency.is_some() {
                warnings.push(ValidationWarning::new(
                    WarningKind::VerdictTextMismatch,
                    "Bewertung 'konform' mit Mangeltext",
                ));
            }
        }
        Verdict::NonCompliant | Verdict::PartiallyCompliant => {
            if deficiency.is_none() {
                warnings.push(ValidationWarning::new(
                    WarningKind::VerdictTextMismatch,
                    format!("Bewertung '{}' ohne Mangeltext", raw.verdict),
                ));
            }
        }
        Verdict::NotAssessable => {}
    }
}
