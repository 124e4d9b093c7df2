//! Prompts for the generation collaborator.
//!
//! The system prompt is the regime's auditor context followed by a shared
//! task description and the JSON answer format. The user prompt carries the
//! checklist item and the formatted evidence.

use finreg_core::{ChecklistItem, Regime, RetrievalResult, Section};

/// Maximum characters of chunk text passed to the model.
pub const MAX_CHUNK_CHARS: usize = 2000;

/// Marker used when no usable evidence was retrieved.
pub const NO_EVIDENCE_MARKER: &str =
    "KEINE EVIDENZ GEFUNDEN – keine relevanten Dokumente im Prüfungskorpus.";

/// Task description and answer format shared by all regimes.
pub const AUDIT_TASK_PROMPT: &str = r#"
Deine Aufgabe:
1. Analysiere die bereitgestellten Dokumentenausschnitte (Evidenz)
2. Beantworte die Prüffrage präzise und mit direktem Bezug auf die Evidenz
3. Bewerte gemäß: konform | teilkonform | nicht_konform | nicht_prüfbar
4. Belege deine Bewertung mit konkreten Textstellen aus den Dokumenten
5. Formuliere ggf. einen Mangel im Stil der Aufsicht und konkrete Empfehlungen
6. Schätze deine eigene Sicherheit ein (confidence_self: 0.0 bis 1.0)

Grundsätze:
- Zweifelhafte Evidenz führt zu "teilkonform"
- Fehlende Evidenz führt zu "nicht_prüfbar", nicht zu "nicht_konform"
- Zitiere nur Quellen, die in der bereitgestellten Evidenz vorkommen
- Erfinde keine Belege

Antworte ausschließlich als JSON mit dieser Struktur:
{
  "bewertung": "konform|teilkonform|nicht_konform|nicht_prüfbar",
  "begruendung": "Begründung (3-8 Sätze)",
  "belegte_textstellen": ["Zitat (Quelle: datei.pdf, S.X)"],
  "mangel_text": "Mangelformulierung oder null wenn konform",
  "empfehlungen": ["Konkrete Maßnahme"],
  "quellen": ["datei.pdf"],
  "confidence_self": 0.85
}
"#;

/// System prompt for a regime.
pub fn system_prompt(regime: Regime) -> String {
    format!("{}\n{}", regime.auditor_context(), AUDIT_TASK_PROMPT)
}

/// User prompt for one checklist item.
pub fn user_prompt(item: &ChecklistItem, section: &Section, evidence: &str) -> String {
    let template = match &item.deficiency_template {
        Some(template) => format!("**Formulierungsvorlage für mangel_text:** {}\n", template),
        None => String::new(),
    };

    format!(
        "## PRÜFFELD: {id}\n\
         **Frage:** {question}\n\
         **Rechtsgrundlage:** {bases}\n\
         **Erwartete Evidenz:** {expected}\n\
         **Schweregrad:** {severity}\n\
         **Bewertungskriterien:** {criteria}\n\
         {template}\
         \n\
         {evidence}\n\
         \n\
         Bewerte dieses Prüffeld und antworte als JSON.\n",
        id = item.id,
        question = item.question,
        bases = section.legal_bases.join(", "),
        expected = item.expected_evidence.join(", "),
        severity = item.severity.label(),
        criteria = item.criteria.as_deref().unwrap_or(""),
        template = template,
        evidence = evidence,
    )
}

/// Format retrieved chunks as prompt evidence.
///
/// Chunks whose type is not acceptable for the item are left out; an empty
/// acceptable list admits every type. Screenshots are not passed as text.
pub fn format_evidence(retrieval: &RetrievalResult, acceptable_types: &[String]) -> String {
    let mut blocks = Vec::new();

    for (index, chunk) in retrieval.chunks().iter().enumerate() {
        if !acceptable_types.is_empty()
            && !acceptable_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&chunk.doc_type))
        {
            continue;
        }

        let mut block = format!(
            "--- Evidenz {}: {} [{}] (Relevanz: {:.2}) ---\n",
            index + 1,
            chunk.source_id,
            chunk.doc_type,
            chunk.score
        );
        if chunk.doc_type.eq_ignore_ascii_case("screenshot") {
            block.push_str(&format!(
                "[Screenshot-Datei: {} – visuelle Prüfung durch Mensch erforderlich]",
                chunk.source_id
            ));
        } else {
            block.extend(chunk.text.chars().take(MAX_CHUNK_CHARS));
        }
        blocks.push(block);
    }

    if blocks.is_empty() {
        return NO_EVIDENCE_MARKER.to_string();
    }

    format!("=== GEFUNDENE EVIDENZ ===\n\n{}\n", blocks.join("\n\n"))
}
