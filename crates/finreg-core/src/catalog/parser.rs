//! Catalog parsing from YAML/JSON.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use super::schema::validate_catalog_schema;

/// Errors that can occur when loading a catalog.
///
/// Every variant is fatal: a run must not start on a malformed catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read catalog file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Catalog does not match schema: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Duplicate id: {0}")]
    DuplicateId(String),

    #[error("Unknown section: {0}")]
    UnknownSection(String),
}

/// Severity of a checklist item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "wesentlich", alias = "material")]
    Material,

    #[serde(rename = "bedeutsam", alias = "significant")]
    Significant,

    #[serde(rename = "gering", alias = "minor")]
    Minor,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Material => "WESENTLICH",
            Severity::Significant => "BEDEUTSAM",
            Severity::Minor => "GERING",
        }
    }
}

/// A single auditable question (Prüffeld).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChecklistItem {
    pub id: String,

    #[serde(rename = "frage")]
    pub question: String,

    /// Evidence labels the auditor expects to find
    #[serde(rename = "erwartete_evidenz", default)]
    pub expected_evidence: Vec<String>,

    /// Acceptable document types
    #[serde(rename = "input_typen", default)]
    pub input_types: Vec<String>,

    #[serde(rename = "schweregrad")]
    pub severity: Severity,

    /// Template for the deficiency wording
    #[serde(rename = "mangel_template", default)]
    pub deficiency_template: Option<String>,

    /// Free-text assessment criteria passed to the generator
    #[serde(rename = "bewertungskriterien", default)]
    pub criteria: Option<String>,

    /// Owning section, filled in at load time
    #[serde(skip)]
    pub section_id: String,
}

/// A named group of checklist items under one regulatory theme.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    pub id: String,

    #[serde(rename = "titel")]
    pub title: String,

    #[serde(
        rename = "rechtsgrundlagen",
        default,
        deserialize_with = "string_or_list"
    )]
    pub legal_bases: Vec<String>,

    #[serde(rename = "prueffelder")]
    pub items: Vec<ChecklistItem>,
}

/// An audit catalog: ordered sections plus an immutable version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    #[serde(rename = "katalog_version")]
    version: String,

    #[serde(default)]
    basis: Vec<String>,

    #[serde(rename = "pruefsektionen")]
    sections: Vec<Section>,
}

impl Catalog {
    /// Parse a catalog from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, CatalogError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a catalog from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a catalog file, choosing the format by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            _ => Self::from_json(&contents),
        }
    }

    fn from_value(value: serde_json::Value) -> Result<Self, CatalogError> {
        validate_catalog_schema(&value).map_err(CatalogError::SchemaError)?;

        let mut catalog: Catalog = serde_json::from_value(value)?;
        catalog.validate()?;
        catalog.link_sections();

        tracing::debug!(
            version = %catalog.version,
            sections = catalog.sections.len(),
            items = catalog.item_count(),
            "Catalog loaded"
        );
        Ok(catalog)
    }

    /// Validate the catalog structure.
    fn validate(&self) -> Result<(), CatalogError> {
        if self.version.trim().is_empty() {
            return Err(CatalogError::MissingField("katalog_version".to_string()));
        }

        for section in &self.sections {
            if section.id.trim().is_empty() {
                return Err(CatalogError::MissingField("pruefsektionen[].id".to_string()));
            }
            if section.title.trim().is_empty() {
                return Err(CatalogError::MissingField(format!("{}.titel", section.id)));
            }
            for item in &section.items {
                if item.id.trim().is_empty() {
                    return Err(CatalogError::MissingField(format!(
                        "{}.prueffelder[].id",
                        section.id
                    )));
                }
                if item.question.trim().is_empty() {
                    return Err(CatalogError::MissingField(format!("{}.frage", item.id)));
                }
            }
        }

        self.validate_unique_ids()
    }

    /// Section ids and item ids must each be unique across the catalog.
    fn validate_unique_ids(&self) -> Result<(), CatalogError> {
        let mut sections = HashSet::new();
        let mut items = HashSet::new();

        for section in &self.sections {
            if !sections.insert(section.id.as_str()) {
                return Err(CatalogError::DuplicateId(section.id.clone()));
            }
            for item in &section.items {
                if !items.insert(item.id.as_str()) {
                    return Err(CatalogError::DuplicateId(item.id.clone()));
                }
            }
        }

        Ok(())
    }

    fn link_sections(&mut self) {
        for section in &mut self.sections {
            for item in &mut section.items {
                item.section_id = section.id.clone();
            }
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn basis(&self) -> &[String] {
        &self.basis
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    /// All items in catalog order, paired with their section.
    pub fn items(&self) -> impl Iterator<Item = (&Section, &ChecklistItem)> {
        self.sections
            .iter()
            .flat_map(|s| s.items.iter().map(move |i| (s, i)))
    }

    pub fn item_count(&self) -> usize {
        self.sections.iter().map(|s| s.items.len()).sum()
    }

    /// Restrict the catalog to the given section ids, keeping catalog order.
    ///
    /// An empty filter keeps every section. The original catalog is untouched.
    pub fn filter_sections(&self, ids: &[String]) -> Result<Catalog, CatalogError> {
        if ids.is_empty() {
            return Ok(self.clone());
        }

        if let Some(unknown) = ids.iter().find(|id| self.section(id).is_none()) {
            return Err(CatalogError::UnknownSection(unknown.clone()));
        }

        Ok(Catalog {
            version: self.version.clone(),
            basis: self.basis.clone(),
            sections: self
                .sections
                .iter()
                .filter(|s| ids.contains(&s.id))
                .cloned()
                .collect(),
        })
    }
}

/// Legal bases may be given as a single string or a list.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.trim().is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CATALOG: &str = r#"
katalog_version: "2024.1"
basis:
  - "GwG 2017 i.d.F. 2024"
pruefsektionen:
  - id: "S01"
    titel: "Risikoanalyse"
    rechtsgrundlagen: ["§ 5 GwG"]
    prueffelder:
      - id: "S01-01"
        frage: "Liegt eine aktuelle Risikoanalyse vor?"
        erwartete_evidenz: ["Risikoanalyse", "Versionierung"]
        input_typen: ["pdf"]
        schweregrad: "wesentlich"
      - id: "S01-02"
        frage: "Wird die Risikoanalyse jährlich aktualisiert?"
        schweregrad: "bedeutsam"
  - id: "S02"
    titel: "Kundensorgfaltspflichten"
    rechtsgrundlagen: "§ 10 GwG"
    prueffelder:
      - id: "S02-01"
        frage: "Werden Kunden identifiziert?"
        schweregrad: "gering"
"#;

    #[test]
    fn test_parse_valid_catalog() {
        let catalog = Catalog::from_yaml(VALID_CATALOG).unwrap();
        assert_eq!(catalog.version(), "2024.1");
        assert_eq!(catalog.sections().len(), 2);
        assert_eq!(catalog.item_count(), 3);

        let first = &catalog.sections()[0].items[0];
        assert_eq!(first.severity, Severity::Material);
        assert_eq!(first.section_id, "S01");
        assert_eq!(first.expected_evidence.len(), 2);
    }

    #[test]
    fn test_legal_bases_accept_single_string() {
        let catalog = Catalog::from_yaml(VALID_CATALOG).unwrap();
        assert_eq!(catalog.sections()[1].legal_bases, vec!["§ 10 GwG".to_string()]);
    }

    #[test]
    fn test_items_iterate_in_catalog_order() {
        let catalog = Catalog::from_yaml(VALID_CATALOG).unwrap();
        let ids: Vec<&str> = catalog.items().map(|(_, i)| i.id.as_str()).collect();
        assert_eq!(ids, vec!["S01-01", "S01-02", "S02-01"]);
    }

    #[test]
    fn test_duplicate_item_ids() {
        let yaml = r#"
katalog_version: "1"
pruefsektionen:
  - id: "S01"
    titel: "A"
    prueffelder:
      - { id: "X-01", frage: "Q1", schweregrad: "gering" }
  - id: "S02"
    titel: "B"
    prueffelder:
      - { id: "X-01", frage: "Q2", schweregrad: "gering" }
"#;
        let result = Catalog::from_yaml(yaml);
        assert!(matches!(result, Err(CatalogError::DuplicateId(id)) if id == "X-01"));
    }

    #[test]
    fn test_duplicate_section_ids() {
        let yaml = r#"
katalog_version: "1"
pruefsektionen:
  - { id: "S01", titel: "A", prueffelder: [] }
  - { id: "S01", titel: "B", prueffelder: [] }
"#;
        assert!(matches!(
            Catalog::from_yaml(yaml),
            Err(CatalogError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_missing_version_fails_schema() {
        let yaml = r#"
pruefsektionen: []
"#;
        assert!(matches!(
            Catalog::from_yaml(yaml),
            Err(CatalogError::SchemaError(_))
        ));
    }

    #[test]
    fn test_blank_question_is_missing_field() {
        let yaml = r#"
katalog_version: "1"
pruefsektionen:
  - id: "S01"
    titel: "A"
    prueffelder:
      - { id: "S01-01", frage: "  ", schweregrad: "gering" }
"#;
        assert!(matches!(
            Catalog::from_yaml(yaml),
            Err(CatalogError::MissingField(_))
        ));
    }

    #[test]
    fn test_filter_sections() {
        let catalog = Catalog::from_yaml(VALID_CATALOG).unwrap();

        let filtered = catalog.filter_sections(&["S02".to_string()]).unwrap();
        assert_eq!(filtered.sections().len(), 1);
        assert_eq!(filtered.version(), catalog.version());
        assert_eq!(catalog.sections().len(), 2);

        assert!(matches!(
            catalog.filter_sections(&["S99".to_string()]),
            Err(CatalogError::UnknownSection(_))
        ));
    }

    #[test]
    fn test_json_catalog() {
        let json = r#"{
            "katalog_version": "dora-1.0",
            "basis": ["DORA (EU) 2022/2554"],
            "pruefsektionen": [{
                "id": "D01",
                "titel": "IKT-Risikomanagement",
                "prueffelder": [{
                    "id": "D01-01",
                    "frage": "Existiert ein IKT-Risikomanagementrahmen?",
                    "schweregrad": "material"
                }]
            }]
        }"#;
        let catalog = Catalog::from_json(json).unwrap();
        assert_eq!(catalog.sections()[0].items[0].severity, Severity::Material);
    }
}
