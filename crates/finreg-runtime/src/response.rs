//! Parsing of model output into raw findings.
//!
//! Models do not always answer with bare JSON. Extraction tries, in order:
//! the whole text, a fenced ```json block, then the first balanced object.
//! Anything else is a malformed response.

use finreg_core::{RawFinding, Verdict};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::generation::GenerationError;

/// Self-assessment assumed when the model omits one.
pub const DEFAULT_SELF_ASSESSMENT: f64 = 0.5;

lazy_static! {
    static ref FENCED_JSON: Regex = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap();
}

/// Extract the first JSON object from model output.
pub fn extract_json(raw: &str) -> Result<Value, GenerationError> {
    let raw = raw.trim();

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(raw) {
        return Ok(value);
    }

    if let Some(block) = FENCED_JSON.captures(raw).and_then(|c| c.get(1)) {
        if let Ok(value) = serde_json::from_str::<Value>(block.as_str()) {
            return Ok(value);
        }
    }

    if let Some(object) = first_balanced_object(raw) {
        if let Ok(value) = serde_json::from_str::<Value>(object) {
            return Ok(value);
        }
    }

    Err(GenerationError::MalformedResponse(
        "no JSON object found in model output".to_string(),
    ))
}

/// Slice of the first `{ ... }` whose braces balance, ignoring braces
/// inside string literals.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Model answer as requested by the generation prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelResponse {
    #[serde(rename = "bewertung")]
    pub verdict: Option<Verdict>,

    #[serde(rename = "begruendung", default)]
    pub justification: Option<String>,

    #[serde(rename = "belegte_textstellen", default)]
    pub evidence_quotes: Vec<String>,

    #[serde(rename = "mangel_text", default)]
    pub deficiency_text: Option<String>,

    #[serde(rename = "empfehlungen", default)]
    pub recommendations: Vec<String>,

    #[serde(rename = "quellen", default)]
    pub sources: Vec<String>,

    #[serde(rename = "confidence_self", default)]
    pub self_assessment: Option<f64>,
}

impl TryFrom<ModelResponse> for RawFinding {
    type Error = GenerationError;

    fn try_from(response: ModelResponse) -> Result<Self, Self::Error> {
        let verdict = response
            .verdict
            .ok_or_else(|| GenerationError::MissingField("bewertung".to_string()))?;

        let justification = response
            .justification
            .filter(|j| !j.trim().is_empty())
            .ok_or_else(|| GenerationError::MissingField("begruendung".to_string()))?;

        Ok(RawFinding {
            verdict,
            justification,
            cited_sources: response.sources,
            evidence_quotes: response.evidence_quotes,
            deficiency_text: response.deficiency_text,
            recommendations: response.recommendations,
            self_assessment: response
                .self_assessment
                .unwrap_or(DEFAULT_SELF_ASSESSMENT),
        })
    }
}

/// Parse model output into a raw finding.
pub fn parse_raw_finding(raw: &str) -> Result<RawFinding, GenerationError> {
    let value = extract_json(raw)?;
    let response: ModelResponse = serde_json::from_value(value)
        .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;
    RawFinding::try_from(response)
}
