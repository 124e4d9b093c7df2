//! Audit catalog loading and validation.
//!
//! A catalog is an owned tree: catalog → sections → checklist items. Items
//! carry their section id for lookup; there are no other back-references.

mod parser;
mod schema;

pub use parser::{Catalog, CatalogError, ChecklistItem, Section, Severity};
pub use schema::validate_catalog_schema;
