//! Decision thresholds for gating, overriding and escalation.
//!
//! Thresholds are passed explicitly to every function that needs them so
//! that audits with different settings can run side by side.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from threshold validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdError {
    #[error("{name} must be within [0, 1], got {value}")]
    OutOfRange { name: &'static str, value: f64 },

    #[error("reject_below ({reject}) must not exceed review_up_to ({review})")]
    InvertedBand { reject: f64, review: f64 },
}

/// Operator-configurable thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Mean retrieval relevance required to call the generator
    pub retrieval_gate: f64,

    /// Confidence below this forces `not_assessable`
    pub reject_below: f64,

    /// Confidence up to and including this requires review
    pub review_up_to: f64,

    /// Section escalates when its review ratio exceeds this
    pub section_escalation_ratio: f64,

    /// Section is flagged evidence-insufficient at or above this
    /// not-assessable ratio
    pub section_insufficient_ratio: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            retrieval_gate: 0.35,
            reject_below: 0.40,
            review_up_to: 0.70,
            section_escalation_ratio: 0.30,
            section_insufficient_ratio: 0.30,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ThresholdError> {
        let checks = [
            ("retrieval_gate", self.retrieval_gate),
            ("reject_below", self.reject_below),
            ("review_up_to", self.review_up_to),
            ("section_escalation_ratio", self.section_escalation_ratio),
            ("section_insufficient_ratio", self.section_insufficient_ratio),
        ];

        for (name, value) in checks {
            if !(0.0..=1.0).contains(&value) {
                return Err(ThresholdError::OutOfRange { name, value });
            }
        }

        if self.reject_below > self.review_up_to {
            return Err(ThresholdError::InvertedBand {
                reject: self.reject_below,
                review: self.review_up_to,
            });
        }

        Ok(())
    }
}
