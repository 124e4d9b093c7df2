//! Retrieval quality gate.
//!
//! Decides from retrieval scores alone whether a checklist item is worth a
//! generation call. A closed gate means no external call is made at all.

use serde::{Deserialize, Serialize};

/// Outcome of the quality gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub proceed: bool,
    pub reason: String,
    pub mean_score: f64,
    pub threshold: f64,
}

/// Evaluate the gate: proceed iff `retrieval_mean_score >= threshold`.
///
/// A non-finite mean never passes.
pub fn evaluate(retrieval_mean_score: f64, threshold: f64) -> GateDecision {
    // false for NaN on either side
    let proceed = retrieval_mean_score >= threshold;

    let reason = if proceed {
        format!(
            "Retrieval-Quality-Gate bestanden: mittlere Relevanz {:.2} ≥ Schwellwert {:.2}",
            retrieval_mean_score, threshold
        )
    } else {
        format!(
            "Retrieval-Quality-Gate: keine Dokumente mit ausreichender Relevanz gefunden \
             (mittlere Relevanz {:.2}, Schwellwert {:.2}). Der Prüfungskorpus enthält keine \
             ausreichend relevanten Informationen zu diesem Prüffeld.",
            retrieval_mean_score, threshold
        )
    };

    GateDecision {
        proceed,
        reason,
        mean_score: retrieval_mean_score,
        threshold,
    }
}
