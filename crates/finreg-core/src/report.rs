//! Audit report data tree and plain renderers.
//!
//! The report is the hand-off to whatever formats it for humans. It carries
//! the audit verdict, every section result, run statistics and an audit trail
//! identifying model, catalog version and run time.

use std::fmt::Write;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::{overall_verdict, AuditSummary, AuditVerdict, SectionResult};
use crate::regime::Regime;
use crate::types::Verdict;

/// Identifier written into every audit trail.
pub const GENERATOR_VERSION: &str = concat!("finreg v", env!("CARGO_PKG_VERSION"));

/// Errors from report rendering.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to format report: {0}")]
    Format(#[from] std::fmt::Error),
}

/// Descriptive metadata of an audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMeta {
    pub institution: String,
    pub auditor: String,
    pub audit_date: NaiveDate,
    pub title: String,
    pub audit_type: String,
    pub basis: Vec<String>,
}

impl ReportMeta {
    /// Metadata for a regime. `basis` falls back to the regime default
    /// when the catalog names none.
    pub fn for_regime(
        regime: Regime,
        institution: impl Into<String>,
        auditor: impl Into<String>,
        catalog_basis: &[String],
        audit_date: NaiveDate,
    ) -> Self {
        let basis = if catalog_basis.is_empty() {
            regime.default_basis().iter().map(|s| s.to_string()).collect()
        } else {
            catalog_basis.to_vec()
        };

        Self {
            institution: institution.into(),
            auditor: auditor.into(),
            audit_date,
            title: regime.report_title().to_string(),
            audit_type: format!("{} (simuliert)", regime.audit_type()),
            basis,
        }
    }
}

/// LLM usage over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub llm_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl UsageSummary {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Provenance of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    pub model: String,
    pub catalog_version: String,
    pub regime: Regime,
    pub generator_version: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub usage: UsageSummary,
}

impl AuditTrail {
    pub fn new(model: impl Into<String>, catalog_version: impl Into<String>, regime: Regime) -> Self {
        Self {
            model: model.into(),
            catalog_version: catalog_version.into(),
            regime,
            generator_version: GENERATOR_VERSION.to_string(),
            timestamp: Utc::now(),
            usage: UsageSummary::default(),
        }
    }

    pub fn with_usage(mut self, usage: UsageSummary) -> Self {
        self.usage = usage;
        self
    }
}

/// Complete result of an audit run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub meta: ReportMeta,
    pub audit_trail: AuditTrail,
    pub verdict: AuditVerdict,
    pub summary: AuditSummary,
    pub sections: Vec<SectionResult>,
}

impl AuditReport {
    /// Build the report once all sections are complete. Verdict and
    /// summary are computed here and never recomputed.
    pub fn new(meta: ReportMeta, audit_trail: AuditTrail, sections: Vec<SectionResult>) -> Self {
        let verdict = overall_verdict(sections.iter().flat_map(|s| s.findings.iter()));
        let summary = AuditSummary::from_sections(&sections);

        Self {
            meta,
            audit_trail,
            verdict,
            summary,
            sections,
        }
    }
}

/// Output styles for [`render_report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Render a report as pretty JSON or as a terse terminal summary.
pub fn render_report(report: &AuditReport, format: OutputFormat) -> Result<String, ReportError> {
    match format {
        OutputFormat::Human => render_human(report),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
    }
}

fn render_human(report: &AuditReport) -> Result<String, ReportError> {
    let mut out = String::new();
    let summary = &report.summary;

    writeln!(out, "{} – {}", report.meta.title, report.meta.institution)?;
    writeln!(out, "{}", report.audit_trail.regime.report_subtitle())?;
    writeln!(out, "Gesamtbewertung: {}", report.verdict)?;
    writeln!(
        out,
        "Prüffelder: {} (konform {}, teilkonform {}, nicht konform {}, nicht prüfbar {} = {:.1} %)",
        summary.total_items,
        summary.counts.compliant,
        summary.counts.partially_compliant,
        summary.counts.non_compliant,
        summary.counts.not_assessable,
        summary.not_assessable_percent,
    )?;
    writeln!(
        out,
        "Review erforderlich: {} • Ø Confidence: {:.3}",
        summary.review_required, summary.average_confidence
    )?;
    writeln!(out)?;

    for section in &report.sections {
        let mut flags = Vec::new();
        if section.escalation_recommended {
            flags.push("ESKALATION");
        }
        if section.evidence_insufficient {
            flags.push("EVIDENZ UNZUREICHEND");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };

        writeln!(out, "{} {}{}", section.section_id, section.title, flags)?;
        for finding in &section.findings {
            let marker = if finding.requires_review { " (Review)" } else { "" };
            writeln!(
                out,
                "  - {id:<10} {verdict:<14} {confidence:.2}{marker}",
                id = finding.item_id,
                verdict = finding.verdict.as_str(),
                confidence = finding.confidence,
            )?;
        }
    }

    if !summary.critical_findings.is_empty() {
        writeln!(out)?;
        writeln!(out, "Kritische Befunde:")?;
        for critical in &summary.critical_findings {
            let label = match critical.verdict {
                Verdict::NonCompliant => "Mangel",
                _ => "Teilmangel",
            };
            writeln!(
                out,
                "  - {} [{}] {}: {}",
                critical.item_id,
                critical.severity.label(),
                label,
                critical.deficiency_text.as_deref().unwrap_or("–")
            )?;
        }
    }

    writeln!(out)?;
    writeln!(
        out,
        "Modell {} • Katalog {} • {} • {}",
        report.audit_trail.model,
        report.audit_trail.catalog_version,
        report.audit_trail.generator_version,
        report.audit_trail.timestamp.to_rfc3339()
    )?;

    Ok(out)
}
