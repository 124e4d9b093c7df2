//! # finreg-core
//!
//! Deterministic scoring and validation layer for simulated regulatory audits.
//!
//! This crate sits between raw language-model output and the final audit
//! report. Given a checklist item, the evidence retrieved for it and the
//! model's raw finding, it answers:
//! - Is the evidence good enough to ask the model at all?
//! - How far can the model's verdict be trusted?
//! - Is the finding internally consistent?
//! - What does the audit as a whole conclude?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: same inputs, same finding
//! 2. **No LLM calls**: retrieval and generation live in `finreg-runtime`
//! 3. **Explicit thresholds**: every decision takes a [`Thresholds`] value
//! 4. **Traceable**: overridden verdicts keep the model's original verdict
//!
//! ## Example
//!
//! ```rust,ignore
//! use finreg_core::{assess, gate, Catalog, Thresholds};
//!
//! let catalog = Catalog::from_file("catalogs/gwg.yaml")?;
//! let thresholds = Thresholds::default();
//! let (_, item) = catalog.items().next().unwrap();
//!
//! let decision = gate::evaluate(retrieval.mean_score(), thresholds.retrieval_gate);
//! let finding = assess(item, &retrieval, &decision, raw, &thresholds);
//! println!("{}: {} ({:.2})", finding.item_id, finding.verdict, finding.confidence);
//! ```

pub mod aggregate;
pub mod assembler;
pub mod catalog;
pub mod gate;
pub mod regime;
pub mod report;
pub mod scoring;
pub mod thresholds;
pub mod types;
pub mod validator;

// Re-export main types at crate root
pub use aggregate::{overall_verdict, AuditSummary, AuditVerdict, SectionResult, VerdictCounts};
pub use assembler::{assemble, AssemblyRule};
pub use catalog::{Catalog, CatalogError, ChecklistItem, Section, Severity};
pub use gate::GateDecision;
pub use regime::Regime;
pub use report::{
    render_report, AuditReport, AuditTrail, OutputFormat, ReportError, ReportMeta, UsageSummary,
};
pub use scoring::{ConfidenceBand, ConfidenceSignals};
pub use thresholds::{ThresholdError, Thresholds};
pub use types::{
    Finding, RawFinding, RetrievalResult, RetrievedChunk, ValidationWarning, Verdict, WarningKind,
};

/// Turn a raw finding into a final finding.
///
/// Runs the structural validator, derives the confidence signals, scores
/// them and applies the ordered override rules. The gate decision is taken
/// by the caller before generation; a closed gate still wins here.
pub fn assess(
    item: &ChecklistItem,
    retrieval: &RetrievalResult,
    gate: &GateDecision,
    raw: RawFinding,
    thresholds: &Thresholds,
) -> Finding {
    let warnings = validator::validate(&raw, retrieval);
    let signals = ConfidenceSignals::collect(item, retrieval, &raw);
    let confidence = signals.score();

    tracing::trace!(
        item = %item.id,
        retrieval = signals.retrieval,
        coverage = signals.coverage,
        type_match = signals.type_match,
        self_assessment = signals.self_assessment,
        confidence,
        warnings = warnings.len(),
        "Finding scored"
    );

    assemble(item, Some(raw), gate, confidence, warnings, thresholds)
}
