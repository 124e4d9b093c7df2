//! Retrieval collaborator.
//!
//! Index construction and embeddings live outside this crate; a
//! [`Retriever`] only answers queries.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use finreg_core::{ChecklistItem, RetrievalResult, Section};
use thiserror::Error;

/// Errors from the retrieval collaborator.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Retrieval backend failed: {0}")]
    Backend(String),

    #[error("Failed to read recordings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse recordings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Query for one checklist item.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalQuery {
    pub item_id: String,

    /// Question plus expected-evidence terms and legal bases
    pub text: String,

    /// Preferred document types; empty means any
    pub type_filter: Vec<String>,

    pub top_k: usize,
}

impl RetrievalQuery {
    pub fn for_item(item: &ChecklistItem, section: &Section, top_k: usize) -> Self {
        let mut lines = vec![item.question.clone()];
        if !item.expected_evidence.is_empty() {
            lines.push(format!(
                "Relevante Begriffe: {}",
                item.expected_evidence.join(", ")
            ));
        }
        if !section.legal_bases.is_empty() {
            lines.push(format!("Rechtsgrundlage: {}", section.legal_bases.join(", ")));
        }

        Self {
            item_id: item.id.clone(),
            text: lines.join("\n"),
            type_filter: item.input_types.clone(),
            top_k,
        }
    }
}

/// Answers retrieval queries with ordered, scored chunks.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<RetrievalResult, RetrievalError>;
}

/// Retriever that replays stored results keyed by item id.
///
/// Items without a recording get an empty result, which closes the gate.
#[derive(Debug, Clone, Default)]
pub struct RecordedRetriever {
    results: HashMap<String, RetrievalResult>,
}

impl RecordedRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load recordings from `{ "<item id>": [ {chunk}, ... ], ... }`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RetrievalError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, RetrievalError> {
        Ok(Self {
            results: serde_json::from_str(json)?,
        })
    }

    pub fn insert(&mut self, item_id: impl Into<String>, result: RetrievalResult) {
        self.results.insert(item_id.into(), result);
    }
}

#[async_trait]
impl Retriever for RecordedRetriever {
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<RetrievalResult, RetrievalError> {
        let Some(result) = self.results.get(&query.item_id) else {
            tracing::debug!(item = %query.item_id, "No recorded retrieval");
            return Ok(RetrievalResult::empty());
        };

        Ok(RetrievalResult::new(
            result.chunks().iter().take(query.top_k).cloned().collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finreg_core::Severity;

    fn item() -> ChecklistItem {
        ChecklistItem {
            id: "S02-01".to_string(),
            question: "Ist ein Geldwäschebeauftragter bestellt?".to_string(),
            expected_evidence: vec!["Bestellungsurkunde".to_string(), "Organigramm".to_string()],
            input_types: vec!["pdf".to_string()],
            severity: Severity::Significant,
            deficiency_template: None,
            criteria: None,
            section_id: "S02".to_string(),
        }
    }

    fn section(bases: &[&str]) -> Section {
        Section {
            id: "S02".to_string(),
            title: "Geldwäschebeauftragter".to_string(),
            legal_bases: bases.iter().map(|s| s.to_string()).collect(),
            items: Vec::new(),
        }
    }

    #[test]
    fn test_query_text() {
        let query = RetrievalQuery::for_item(&item(), &section(&["§ 7 GwG"]), 5);
        assert_eq!(
            query.text,
            "Ist ein Geldwäschebeauftragter bestellt?\n\
             Relevante Begriffe: Bestellungsurkunde, Organigramm\n\
             Rechtsgrundlage: § 7 GwG"
        );
        assert_eq!(query.type_filter, vec!["pdf"]);
        assert_eq!(query.top_k, 5);
    }

    #[test]
    fn test_query_without_bases() {
        let query = RetrievalQuery::for_item(&item(), &section(&[]), 5);
        assert!(!query.text.contains("Rechtsgrundlage"));
    }

    #[tokio::test]
    async fn test_recorded_retriever() {
        let retriever = RecordedRetriever::from_json(
            r#"{
                "S02-01": [
                    {"source_id": "bestellung.pdf", "doc_type": "pdf", "score": 0.9, "text": "Bestellung"},
                    {"source": "organigramm.pdf", "input_type": "pdf", "score": 0.7},
                    {"source_id": "mail.txt", "doc_type": "log", "score": 0.3}
                ]
            }"#,
        )
        .unwrap();

        let query = RetrievalQuery::for_item(&item(), &section(&[]), 2);
        let result = retriever.retrieve(&query).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.source_ids(), vec!["bestellung.pdf", "organigramm.pdf"]);

        let mut other = item();
        other.id = "S02-99".to_string();
        let query = RetrievalQuery::for_item(&other, &section(&[]), 2);
        assert!(retriever.retrieve(&query).await.unwrap().is_empty());
    }
}
