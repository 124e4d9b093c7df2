//! Finding assembly: gate decision + raw finding + confidence → final finding.
//!
//! The override decision is an explicit ordered rule list, evaluated top to
//! bottom; the first rule that applies decides the verdict:
//!
//! 1. Gate rejected → `nicht_prüfbar`, overridden, confidence 0, no review
//! 2. Low confidence (`confidence < reject_below`) or no usable raw finding
//!    → `nicht_prüfbar`, overridden
//! 3. Otherwise → the generator's verdict, not overridden
//!
//! `requires_review` holds iff the confidence lies in
//! `[reject_below, review_up_to]` and the finding was not overridden.

use crate::catalog::ChecklistItem;
use crate::gate::GateDecision;
use crate::scoring::unit_signal;
use crate::thresholds::Thresholds;
use crate::types::{Finding, RawFinding, ValidationWarning, Verdict, WarningKind};

/// One rule of the override decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyRule {
    GateRejected,
    LowConfidence,
    Accepted,
}

/// Rules in precedence order.
pub const ASSEMBLY_RULES: [AssemblyRule; 3] = [
    AssemblyRule::GateRejected,
    AssemblyRule::LowConfidence,
    AssemblyRule::Accepted,
];

impl AssemblyRule {
    fn applies(
        &self,
        gate: &GateDecision,
        raw: Option<&RawFinding>,
        confidence: f64,
        thresholds: &Thresholds,
    ) -> bool {
        match self {
            AssemblyRule::GateRejected => !gate.proceed,
            AssemblyRule::LowConfidence => {
                raw.is_none() || confidence.is_nan() || confidence < thresholds.reject_below
            }
            AssemblyRule::Accepted => true,
        }
    }

    /// First rule that applies to the given inputs.
    pub fn select(
        gate: &GateDecision,
        raw: Option<&RawFinding>,
        confidence: f64,
        thresholds: &Thresholds,
    ) -> AssemblyRule {
        ASSEMBLY_RULES
            .into_iter()
            .find(|rule| rule.applies(gate, raw, confidence, thresholds))
            .unwrap_or(AssemblyRule::Accepted)
    }
}

/// Assemble the final finding for one checklist item.
///
/// `raw` is `None` when the generator was never called (closed gate) or
/// failed; warnings are attached verbatim.
pub fn assemble(
    item: &ChecklistItem,
    raw: Option<RawFinding>,
    gate: &GateDecision,
    confidence: f64,
    warnings: Vec<ValidationWarning>,
    thresholds: &Thresholds,
) -> Finding {
    let confidence = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let rule = AssemblyRule::select(gate, raw.as_ref(), confidence, thresholds);

    let mut finding = match (rule, raw) {
        (AssemblyRule::GateRejected, raw) => {
            let mut finding = blank(item, gate.reason.clone(), warnings);
            finding.model_verdict = raw.map(|r| r.verdict);
            finding
        }
        (AssemblyRule::LowConfidence, None) | (AssemblyRule::Accepted, None) => blank(
            item,
            "Keine verwertbare Modellantwort; Prüffeld nicht bewertbar.".to_string(),
            warnings,
        ),
        (AssemblyRule::LowConfidence, Some(raw)) => {
            let justification = format!(
                "Konfidenz {:.2} unter Schwellwert {:.2}; Bewertung '{}' nicht belastbar. {}",
                confidence, thresholds.reject_below, raw.verdict, raw.justification
            );
            let mut finding = from_raw(item, raw, confidence, warnings);
            finding.model_verdict = Some(finding.verdict);
            finding.verdict = Verdict::NotAssessable;
            finding.justification = justification.trim_end().to_string();
            finding.deficiency_text = None;
            finding.overridden = true;
            finding
        }
        (AssemblyRule::Accepted, Some(raw)) => from_raw(item, raw, confidence, warnings),
    };

    finding.requires_review = !finding.overridden
        && finding.confidence >= thresholds.reject_below
        && finding.confidence <= thresholds.review_up_to;

    finding
}

/// Finding for an item whose gate was closed. No generation took place.
pub fn skipped(item: &ChecklistItem, gate: &GateDecision, thresholds: &Thresholds) -> Finding {
    assemble(item, None, gate, 0.0, Vec::new(), thresholds)
}

/// Finding for an item whose generation failed after all retries.
pub fn degraded(
    item: &ChecklistItem,
    gate: &GateDecision,
    detail: impl Into<String>,
    thresholds: &Thresholds,
) -> Finding {
    let warning = ValidationWarning::new(WarningKind::GenerationFailed, detail);
    assemble(item, None, gate, 0.0, vec![warning], thresholds)
}

fn blank(item: &ChecklistItem, justification: String, warnings: Vec<ValidationWarning>) -> Finding {
    Finding {
        item_id: item.id.clone(),
        section_id: item.section_id.clone(),
        question: item.question.clone(),
        severity: item.severity,
        verdict: Verdict::NotAssessable,
        model_verdict: None,
        justification,
        cited_sources: Vec::new(),
        evidence_quotes: Vec::new(),
        deficiency_text: None,
        recommendations: Vec::new(),
        self_assessment: 0.0,
        confidence: 0.0,
        requires_review: false,
        overridden: true,
        warnings,
    }
}

fn from_raw(
    item: &ChecklistItem,
    raw: RawFinding,
    confidence: f64,
    warnings: Vec<ValidationWarning>,
) -> Finding {
    let deficiency_text = raw.deficiency().map(str::to_string);
    Finding {
        item_id: item.id.clone(),
        section_id: item.section_id.clone(),
        question: item.question.clone(),
        severity: item.severity,
        verdict: raw.verdict,
        model_verdict: None,
        justification: raw.justification,
        cited_sources: raw.cited_sources,
        evidence_quotes: raw.evidence_quotes,
        deficiency_text,
        recommendations: raw.recommendations,
        self_assessment: unit_signal(raw.self_assessment),
        confidence,
        requires_review: false,
        overridden: false,
        warnings,
    }
}
