//! Shared data model: retrieval evidence, raw model findings and final findings.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::Severity;

/// Compliance verdict for a single checklist item.
///
/// Wire values follow the catalog language (`konform`, `teilkonform`, ...);
/// the English names are accepted as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "konform", alias = "compliant")]
    Compliant,

    #[serde(rename = "teilkonform", alias = "partially_compliant")]
    PartiallyCompliant,

    #[serde(rename = "nicht_konform", alias = "non_compliant")]
    NonCompliant,

    #[serde(
        rename = "nicht_prüfbar",
        alias = "nicht_pruefbar",
        alias = "not_assessable"
    )]
    NotAssessable,
}

impl Verdict {
    /// Wire representation of the verdict.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Compliant => "konform",
            Verdict::PartiallyCompliant => "teilkonform",
            Verdict::NonCompliant => "nicht_konform",
            Verdict::NotAssessable => "nicht_prüfbar",
        }
    }

    /// Verdicts that must carry a deficiency text.
    pub fn requires_deficiency_text(&self) -> bool {
        matches!(self, Verdict::NonCompliant | Verdict::PartiallyCompliant)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chunk returned by the retrieval collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Source document id (file name)
    #[serde(alias = "source")]
    pub source_id: String,

    /// Document type tag (pdf, excel, interview, screenshot, log)
    #[serde(alias = "input_type")]
    pub doc_type: String,

    /// Relevance score in [0, 1]
    pub score: f64,

    /// Text span of the chunk
    #[serde(default)]
    pub text: String,
}

impl RetrievedChunk {
    pub fn new(
        source_id: impl Into<String>,
        doc_type: impl Into<String>,
        score: f64,
        text: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            doc_type: doc_type.into(),
            score,
            text: text.into(),
        }
    }
}

/// Ordered retrieval output for one checklist question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetrievalResult {
    chunks: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn new(chunks: Vec<RetrievedChunk>) -> Self {
        Self { chunks }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> &[RetrievedChunk] {
        &self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Mean relevance over all chunks, 0 for an empty result.
    ///
    /// Clamped to [0, 1]; non-finite scores count as 0.
    pub fn mean_score(&self) -> f64 {
        if self.chunks.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .chunks
            .iter()
            .map(|c| if c.score.is_finite() { c.score } else { 0.0 })
            .sum();
        (sum / self.chunks.len() as f64).clamp(0.0, 1.0)
    }

    /// Highest single relevance score, 0 for an empty result.
    pub fn best_score(&self) -> f64 {
        self.chunks
            .iter()
            .map(|c| c.score)
            .filter(|s| s.is_finite())
            .fold(0.0, f64::max)
    }

    /// Distinct source ids in retrieval order.
    pub fn source_ids(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.chunks
            .iter()
            .map(|c| c.source_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Distinct document types.
    pub fn doc_types(&self) -> BTreeSet<&str> {
        self.chunks.iter().map(|c| c.doc_type.as_str()).collect()
    }

    pub fn contains_source(&self, source_id: &str) -> bool {
        self.chunks.iter().any(|c| c.source_id == source_id)
    }
}

/// Finding as produced by the generation collaborator, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFinding {
    pub verdict: Verdict,

    #[serde(default)]
    pub justification: String,

    /// Source ids the model cites
    #[serde(default)]
    pub cited_sources: Vec<String>,

    /// Quoted passages backing the verdict
    #[serde(default)]
    pub evidence_quotes: Vec<String>,

    /// Required iff the verdict is non_compliant or partially_compliant
    #[serde(default)]
    pub deficiency_text: Option<String>,

    #[serde(default)]
    pub recommendations: Vec<String>,

    /// Model self-assessment in [0, 1]
    pub self_assessment: f64,
}

impl RawFinding {
    pub fn new(verdict: Verdict, justification: impl Into<String>) -> Self {
        Self {
            verdict,
            justification: justification.into(),
            cited_sources: Vec::new(),
            evidence_quotes: Vec::new(),
            deficiency_text: None,
            recommendations: Vec::new(),
            self_assessment: 0.5,
        }
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cited_sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_deficiency(mut self, text: impl Into<String>) -> Self {
        self.deficiency_text = Some(text.into());
        self
    }

    pub fn with_self_assessment(mut self, confidence: f64) -> Self {
        self.self_assessment = confidence;
        self
    }

    /// Deficiency text if present and not blank.
    pub fn deficiency(&self) -> Option<&str> {
        self.deficiency_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Category of a structural validation warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Cited source id not present in the retrieval result
    PhantomSource,
    /// Brace-delimited template token left in the text
    UnresolvedPlaceholder,
    /// Compliant verdict without any cited source
    MissingEvidenceText,
    /// Deficiency text present/absent contrary to the verdict
    VerdictTextMismatch,
    /// Generation collaborator failed after all retries
    GenerationFailed,
}

/// A warning attached to a finding. Warnings never change a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub kind: WarningKind,
    pub detail: String,
}

impl ValidationWarning {
    pub fn new(kind: WarningKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

/// Final, assembled finding for one checklist item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub item_id: String,
    pub section_id: String,
    pub question: String,
    pub severity: Severity,

    pub verdict: Verdict,

    /// Verdict returned by the model when it was overridden
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_verdict: Option<Verdict>,

    pub justification: String,

    #[serde(default)]
    pub cited_sources: Vec<String>,

    #[serde(default)]
    pub evidence_quotes: Vec<String>,

    #[serde(default)]
    pub deficiency_text: Option<String>,

    #[serde(default)]
    pub recommendations: Vec<String>,

    pub self_assessment: f64,

    /// Combined confidence score in [0, 1]
    pub confidence: f64,

    pub requires_review: bool,

    /// Set when the verdict was forced to not_assessable
    pub overridden: bool,

    #[serde(default)]
    pub warnings: Vec<ValidationWarning>,
}

impl Finding {
    /// Non-compliant or partially compliant.
    pub fn is_critical(&self) -> bool {
        matches!(
            self.verdict,
            Verdict::NonCompliant | Verdict::PartiallyCompliant
        )
    }

    /// Non-compliant finding on a material checklist item.
    pub fn is_material_deficiency(&self) -> bool {
        self.verdict == Verdict::NonCompliant && self.severity == Severity::Material
    }

    pub fn has_warning(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|w| w.kind == kind)
    }
}
