//! Audit pipeline.
//!
//! Sections run in catalog order. Inside a section, items are assessed
//! concurrently up to `fan_out` and re-sorted into catalog order before
//! aggregation. Per item the flow is sequential:
//!
//! retrieve → gate → (skip | generate with retries) → validate → score → assemble
//!
//! A completed section is checkpointed; on the next run a valid checkpoint
//! replaces the section's work.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use finreg_core::{
    assembler, gate, AuditReport, AuditTrail, Catalog, ChecklistItem, Finding, ReportMeta,
    RetrievalResult, Section, SectionResult,
};
use futures::stream::{self, StreamExt};
use thiserror::Error;

use crate::checkpoint::{CheckpointKey, CheckpointStatus, CheckpointStore, SectionCheckpoint};
use crate::config::{ConfigError, RuntimeConfig};
use crate::generation::{Generation, GenerationError, GenerationRequest, Generator};
use crate::retrieval::{RetrievalQuery, Retriever};
use crate::usage::{LlmUsage, UsageTracker};

/// Errors that stop a run before any collaborator is called.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog has no sections to audit")]
    EmptyCatalog,
}

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub report: AuditReport,

    /// Sections taken from a valid checkpoint
    pub resumed_sections: Vec<String>,

    /// Sections whose checkpoint could not be written
    pub resume_unsafe_sections: Vec<String>,

    pub usage: LlmUsage,
}

/// Runs a catalog against a retrieval and a generation collaborator.
pub struct AuditPipeline {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    config: RuntimeConfig,
    checkpoints: Option<CheckpointStore>,
}

impl AuditPipeline {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        config: RuntimeConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let checkpoints = config.checkpoint_dir.clone().map(CheckpointStore::new);

        Ok(Self {
            retriever,
            generator,
            config,
            checkpoints,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Identity that checkpoints of this pipeline carry.
    pub fn checkpoint_key(&self, catalog: &Catalog) -> CheckpointKey {
        CheckpointKey {
            model: self.generator.model().to_string(),
            catalog_version: catalog.version().to_string(),
        }
    }

    /// Audit every section of `catalog` and build the report.
    pub async fn run(&self, catalog: &Catalog, meta: ReportMeta) -> Result<RunResult, PipelineError> {
        if catalog.sections().is_empty() {
            return Err(PipelineError::EmptyCatalog);
        }

        let key = self.checkpoint_key(catalog);
        let usage = UsageTracker::new();
        let mut sections = Vec::with_capacity(catalog.sections().len());
        let mut resumed_sections = Vec::new();
        let mut resume_unsafe_sections = Vec::new();

        tracing::info!(
            catalog_version = catalog.version(),
            sections = catalog.sections().len(),
            items = catalog.item_count(),
            model = %key.model,
            "Starting audit run"
        );

        for section in catalog.sections() {
            if let Some(checkpoint) = self.resume(section, &key) {
                resumed_sections.push(section.id.clone());
                sections.push(checkpoint.result);
                continue;
            }

            let result = self.run_section(section, &usage).await;

            if let Some(store) = &self.checkpoints {
                let checkpoint = SectionCheckpoint::new(
                    result.clone(),
                    key.model.clone(),
                    key.catalog_version.clone(),
                );
                if !save_with_retry(store, &checkpoint) {
                    resume_unsafe_sections.push(section.id.clone());
                }
            }

            sections.push(result);
        }

        let usage = usage.snapshot();
        let trail = AuditTrail::new(key.model, key.catalog_version, self.config.regime)
            .with_usage(usage.summary());
        let report = AuditReport::new(meta, trail, sections);

        tracing::info!(
            verdict = %report.verdict,
            findings = report.summary.total_items,
            llm_calls = usage.llm_calls,
            resumed = resumed_sections.len(),
            "Audit run complete"
        );

        Ok(RunResult {
            report,
            resumed_sections,
            resume_unsafe_sections,
            usage,
        })
    }

    fn resume(&self, section: &Section, key: &CheckpointKey) -> Option<SectionCheckpoint> {
        let store = self.checkpoints.as_ref()?;
        match store.load(section, key, &self.config.thresholds) {
            Ok(checkpoint) => {
                tracing::info!(section = %section.id, "Resuming section from checkpoint");
                Some(checkpoint)
            }
            Err(CheckpointStatus::Missing) => None,
            Err(status) => {
                tracing::warn!(
                    section = %section.id,
                    status = %status.label(),
                    "Ignoring checkpoint, section will be re-run"
                );
                None
            }
        }
    }

    /// Assess all items of a section and aggregate them.
    pub async fn run_section(&self, section: &Section, usage: &UsageTracker) -> SectionResult {
        tracing::info!(section = %section.id, items = section.items.len(), "Auditing section");

        let mut findings: Vec<(usize, Finding)> = stream::iter(section.items.iter().enumerate())
            .map(|(index, item)| async move { (index, self.assess_item(section, item, usage).await) })
            .buffer_unordered(self.config.fan_out)
            .collect()
            .await;
        findings.sort_by_key(|(index, _)| *index);

        SectionResult::aggregate(
            section.id.clone(),
            section.title.clone(),
            findings.into_iter().map(|(_, finding)| finding).collect(),
            &self.config.thresholds,
        )
    }

    async fn assess_item(
        &self,
        section: &Section,
        item: &ChecklistItem,
        usage: &UsageTracker,
    ) -> Finding {
        let thresholds = &self.config.thresholds;
        let query = RetrievalQuery::for_item(item, section, self.config.top_k);

        let retrieval = match self.retriever.retrieve(&query).await {
            Ok(retrieval) => retrieval,
            Err(e) => {
                tracing::warn!(item = %item.id, error = %e, "Retrieval failed, treating as no evidence");
                RetrievalResult::empty()
            }
        };

        let decision = gate::evaluate(retrieval.mean_score(), thresholds.retrieval_gate);
        if !decision.proceed {
            tracing::debug!(
                item = %item.id,
                mean_score = decision.mean_score,
                best_score = retrieval.best_score(),
                chunks = retrieval.len(),
                "Gate closed, skipping generation"
            );
            return assembler::skipped(item, &decision, thresholds);
        }

        let request = GenerationRequest {
            item,
            section,
            retrieval: &retrieval,
        };

        match self.generate(&request, usage).await {
            Ok(generation) => {
                finreg_core::assess(item, &retrieval, &decision, generation.raw, thresholds)
            }
            Err(e) => {
                tracing::warn!(item = %item.id, error = %e, "Generation failed, finding degraded");
                assembler::degraded(item, &decision, e.to_string(), thresholds)
            }
        }
    }

    /// One generation with per-attempt timeout and exponential backoff.
    /// Every billed attempt is recorded, including failed ones.
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
        usage: &UsageTracker,
    ) -> Result<Generation, GenerationError> {
        let retry = &self.config.retry;
        let timeout = self.config.generation_timeout;
        let generator = &self.generator;
        let model = self.generator.model();
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;

        let backoff = ExponentialBuilder::default()
            .with_min_delay(retry.min_backoff)
            .with_max_delay(retry.max_backoff)
            .with_max_times(retry.max_attempts.saturating_sub(1) as usize);

        (|| async move {
            attempts.fetch_add(1, Ordering::Relaxed);
            let result = match tokio::time::timeout(timeout, generator.generate(request)).await {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout(timeout)),
            };
            match &result {
                Ok(generation) => usage.record(&generation.usage, model),
                Err(e) => {
                    if let Some(billed) = e.usage() {
                        usage.record(billed, model);
                    }
                }
            }
            result
        })
        .retry(backoff)
        .when(GenerationError::is_retryable)
        .notify(|e, delay| {
            tracing::warn!(
                item = %request.item.id,
                attempt = attempts.load(Ordering::Relaxed),
                error = %e,
                delay = ?delay,
                "Generation attempt failed, retrying"
            );
        })
        .await
    }
}

/// Save a checkpoint, retrying once. Returns whether it was written.
fn save_with_retry(store: &CheckpointStore, checkpoint: &SectionCheckpoint) -> bool {
    for attempt in 1..=2 {
        match store.save(checkpoint) {
            Ok(()) => return true,
            Err(e) => tracing::warn!(
                section = %checkpoint.section_id,
                attempt,
                error = %e,
                "Checkpoint write failed"
            ),
        }
    }

    tracing::warn!(
        section = %checkpoint.section_id,
        "Continuing in memory; section is not resume-safe"
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{LlmGenerator, RecordedGenerator};
    use crate::providers::{
        ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
    };
    use crate::retrieval::{RecordedRetriever, RetrievalError};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use finreg_core::{
        AuditVerdict, RawFinding, Regime, RetrievedChunk, Verdict, WarningKind,
    };
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    const CATALOG: &str = r#"
katalog_version: "2024.1"
basis: ["GwG 2017"]
pruefsektionen:
  - id: "S01"
    titel: "Risikoanalyse"
    rechtsgrundlagen: "§ 5 GwG"
    prueffelder:
      - id: "S01-01"
        frage: "Liegt eine aktuelle Risikoanalyse vor?"
        erwartete_evidenz: ["Risikoanalyse"]
        input_typen: ["pdf"]
        schweregrad: "wesentlich"
      - id: "S01-02"
        frage: "Wird die Risikoanalyse jährlich aktualisiert?"
        erwartete_evidenz: ["Risikoanalyse"]
        input_typen: ["pdf"]
        schweregrad: "bedeutsam"
      - id: "S01-03"
        frage: "Ist die Risikoanalyse von der Geschäftsleitung genehmigt?"
        erwartete_evidenz: ["Protokoll"]
        input_typen: ["pdf"]
        schweregrad: "gering"
  - id: "S02"
    titel: "Geldwäschebeauftragter"
    prueffelder:
      - id: "S02-01"
        frage: "Ist ein Geldwäschebeauftragter bestellt?"
        erwartete_evidenz: ["Bestellung"]
        input_typen: ["pdf"]
        schweregrad: "wesentlich"
"#;

    fn catalog() -> Catalog {
        Catalog::from_yaml(CATALOG).unwrap()
    }

    fn meta() -> ReportMeta {
        ReportMeta::for_regime(
            Regime::Gwg,
            "Musterbank AG",
            "Simulation",
            &[],
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        )
    }

    fn fast_config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.retry.min_backoff = Duration::from_millis(1);
        config.retry.max_backoff = Duration::from_millis(5);
        config
    }

    fn chunk(source: &str, score: f64) -> RetrievalResult {
        RetrievalResult::new(vec![RetrievedChunk::new(source, "pdf", score, "Text")])
    }

    /// Retriever with strong evidence for every item.
    fn strong_retriever() -> RecordedRetriever {
        let mut retriever = RecordedRetriever::new();
        retriever.insert("S01-01", chunk("risikoanalyse.pdf", 0.9));
        retriever.insert("S01-02", chunk("risikoanalyse.pdf", 0.9));
        retriever.insert("S01-03", chunk("protokoll_gl.pdf", 0.9));
        retriever.insert("S02-01", chunk("bestellung_gwb.pdf", 0.9));
        retriever
    }

    /// Generator returning fixed findings and counting calls per item.
    struct CountingGenerator {
        answers: HashMap<String, RawFinding>,
        calls: Mutex<HashMap<String, u32>>,
        failures_before_success: u32,
        delay: Option<Duration>,
    }

    impl CountingGenerator {
        fn new(answers: HashMap<String, RawFinding>) -> Self {
            Self {
                answers,
                calls: Mutex::new(HashMap::new()),
                failures_before_success: 0,
                delay: None,
            }
        }

        fn calls(&self, item: &str) -> u32 {
            self.calls.lock().get(item).copied().unwrap_or(0)
        }

        fn total_calls(&self) -> u32 {
            self.calls.lock().values().sum()
        }
    }

    #[async_trait]
    impl Generator for CountingGenerator {
        async fn generate(
            &self,
            request: &GenerationRequest<'_>,
        ) -> Result<Generation, GenerationError> {
            let call = {
                let mut calls = self.calls.lock();
                let count = calls.entry(request.item.id.clone()).or_insert(0);
                *count += 1;
                *count
            };

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if call <= self.failures_before_success {
                return Err(GenerationError::Unusable {
                    source: Box::new(GenerationError::MalformedResponse("truncated".to_string())),
                    usage: TokenUsage {
                        prompt_tokens: 100,
                        completion_tokens: 50,
                    },
                });
            }

            let raw = self
                .answers
                .get(&request.item.id)
                .cloned()
                .ok_or_else(|| GenerationError::NoRecording(request.item.id.clone()))?;
            Ok(Generation {
                raw,
                usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 50,
                },
            })
        }

        fn model(&self) -> &str {
            "claude-sonnet-4-5-20250514"
        }
    }

    fn compliant(source: &str) -> RawFinding {
        RawFinding::new(Verdict::Compliant, "Nachweis liegt vor.")
            .with_sources([source])
            .with_self_assessment(0.9)
    }

    fn all_compliant() -> HashMap<String, RawFinding> {
        HashMap::from([
            ("S01-01".to_string(), compliant("risikoanalyse.pdf")),
            ("S01-02".to_string(), compliant("risikoanalyse.pdf")),
            ("S01-03".to_string(), compliant("protokoll_gl.pdf")),
            ("S02-01".to_string(), compliant("bestellung_gwb.pdf")),
        ])
    }

    #[tokio::test]
    async fn test_run_all_compliant() {
        let generator = Arc::new(CountingGenerator::new(all_compliant()));
        let pipeline =
            AuditPipeline::new(Arc::new(strong_retriever()), generator.clone(), fast_config())
                .unwrap();

        let result = pipeline.run(&catalog(), meta()).await.unwrap();
        let report = &result.report;

        assert_eq!(report.verdict, AuditVerdict::Compliant);
        assert_eq!(report.sections.len(), 2);
        let ids: Vec<_> = report.sections[0]
            .findings
            .iter()
            .map(|f| f.item_id.as_str())
            .collect();
        assert_eq!(ids, vec!["S01-01", "S01-02", "S01-03"]);
        assert!(report.sections[0]
            .findings
            .iter()
            .all(|f| f.verdict == Verdict::Compliant && !f.overridden && !f.requires_review));

        assert_eq!(generator.total_calls(), 4);
        assert_eq!(result.usage.llm_calls, 4);
        assert_eq!(report.audit_trail.usage.input_tokens, 400);
        assert_eq!(report.audit_trail.catalog_version, "2024.1");
        assert_eq!(report.audit_trail.model, "claude-sonnet-4-5-20250514");
    }

    #[tokio::test]
    async fn test_closed_gate_makes_no_generation_call() {
        let mut retriever = strong_retriever();
        retriever.insert("S01-02", chunk("risikoanalyse.pdf", 0.2));
        let generator = Arc::new(CountingGenerator::new(all_compliant()));
        let pipeline =
            AuditPipeline::new(Arc::new(retriever), generator.clone(), fast_config()).unwrap();

        let result = pipeline.run(&catalog(), meta()).await.unwrap();
        let finding = &result.report.sections[0].findings[1];

        assert_eq!(generator.calls("S01-02"), 0);
        assert_eq!(finding.verdict, Verdict::NotAssessable);
        assert!(finding.overridden);
        assert_eq!(finding.confidence, 0.0);
        assert!(!finding.requires_review);
        // 1 of 3 not assessable reaches the 0.30 insufficiency threshold
        assert!(result.report.sections[0].evidence_insufficient);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let mut generator = CountingGenerator::new(all_compliant());
        generator.failures_before_success = 2;
        let generator = Arc::new(generator);
        let pipeline =
            AuditPipeline::new(Arc::new(strong_retriever()), generator.clone(), fast_config())
                .unwrap();

        let result = pipeline.run(&catalog(), meta()).await.unwrap();

        assert_eq!(generator.calls("S01-01"), 3);
        assert_eq!(result.report.verdict, AuditVerdict::Compliant);
        // Two billed failures plus one success per item
        assert_eq!(result.usage.llm_calls, 12);
        assert_eq!(result.report.audit_trail.usage.input_tokens, 1200);
    }

    #[tokio::test]
    async fn test_exhausted_retries_degrade() {
        let mut generator = CountingGenerator::new(all_compliant());
        generator.failures_before_success = 10;
        let generator = Arc::new(generator);
        let pipeline =
            AuditPipeline::new(Arc::new(strong_retriever()), generator.clone(), fast_config())
                .unwrap();

        let result = pipeline.run(&catalog(), meta()).await.unwrap();
        let finding = &result.report.sections[1].findings[0];

        assert_eq!(generator.calls("S02-01"), 3);
        assert_eq!(finding.verdict, Verdict::NotAssessable);
        assert!(finding.overridden);
        assert_eq!(finding.confidence, 0.0);
        assert!(finding.has_warning(WarningKind::GenerationFailed));
        assert!(finding.warnings[0].detail.contains("truncated"));
        assert_eq!(result.usage.llm_calls, 12);
        assert_eq!(result.usage.completion_tokens, 600);
        assert_eq!(
            result.report.verdict,
            AuditVerdict::InsufficientEvidence
        );
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_fast() {
        let mut answers = all_compliant();
        answers.remove("S01-03");
        let generator = Arc::new(CountingGenerator::new(answers));
        let pipeline =
            AuditPipeline::new(Arc::new(strong_retriever()), generator.clone(), fast_config())
                .unwrap();

        let result = pipeline.run(&catalog(), meta()).await.unwrap();

        assert_eq!(generator.calls("S01-03"), 1);
        assert!(result.report.sections[0].findings[2].has_warning(WarningKind::GenerationFailed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retryable() {
        let mut generator = CountingGenerator::new(all_compliant());
        generator.delay = Some(Duration::from_secs(120));
        let generator = Arc::new(generator);
        let mut config = fast_config();
        config.generation_timeout = Duration::from_secs(1);
        config.retry.max_attempts = 2;
        let pipeline =
            AuditPipeline::new(Arc::new(strong_retriever()), generator.clone(), config).unwrap();

        let result = pipeline.run(&catalog(), meta()).await.unwrap();
        let finding = &result.report.sections[0].findings[0];

        assert_eq!(generator.calls("S01-01"), 2);
        assert!(finding.has_warning(WarningKind::GenerationFailed));
        assert!(finding.warnings[0].detail.contains("timed out"));
    }

    /// Generator whose earlier items take longer, so items finish in
    /// reverse catalog order.
    struct SlowFirstGenerator {
        finished: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for SlowFirstGenerator {
        async fn generate(
            &self,
            request: &GenerationRequest<'_>,
        ) -> Result<Generation, GenerationError> {
            let position = request
                .section
                .items
                .iter()
                .position(|i| i.id == request.item.id)
                .unwrap_or(0);
            let remaining = request.section.items.len() - position;
            tokio::time::sleep(Duration::from_secs(remaining as u64)).await;

            self.finished.lock().push(request.item.id.clone());
            Ok(Generation {
                raw: compliant("risikoanalyse.pdf"),
                usage: TokenUsage::default(),
            })
        }

        fn model(&self) -> &str {
            "recorded"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_findings_keep_catalog_order() {
        let generator = Arc::new(SlowFirstGenerator {
            finished: Mutex::new(Vec::new()),
        });
        let pipeline =
            AuditPipeline::new(Arc::new(strong_retriever()), generator.clone(), fast_config())
                .unwrap();

        let catalog = catalog();
        let section = &catalog.sections()[0];
        let result = pipeline.run_section(section, &UsageTracker::new()).await;

        assert_eq!(
            *generator.finished.lock(),
            vec!["S01-03", "S01-02", "S01-01"]
        );
        let ids: Vec<_> = result.findings.iter().map(|f| f.item_id.as_str()).collect();
        assert_eq!(ids, vec!["S01-01", "S01-02", "S01-03"]);
    }

    /// Provider that answers with prose on its first call and with a valid
    /// finding afterwards.
    struct FlakyProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let content = if call == 0 {
                "Ich benötige weitere Unterlagen.".to_string()
            } else {
                r#"{"bewertung": "konform", "begruendung": "Belegt.", "quellen": ["risikoanalyse.pdf"], "confidence_self": 0.9}"#.to_string()
            };
            Ok(CompletionResponse {
                content,
                usage: TokenUsage {
                    prompt_tokens: 1000,
                    completion_tokens: 500,
                },
                model: config.model.clone(),
                stop_reason: Some("end_turn".to_string()),
            })
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_unusable_answers_are_billed() {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicU32::new(0),
        });
        let config = fast_config();
        let generator = LlmGenerator::new(provider.clone(), config.completion_config(), Regime::Gwg);
        let pipeline =
            AuditPipeline::new(Arc::new(strong_retriever()), Arc::new(generator), config).unwrap();

        let result = pipeline.run(&catalog(), meta()).await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 5);
        assert_eq!(result.usage.llm_calls, 5);
        assert_eq!(result.report.audit_trail.usage.llm_calls, 5);
        assert_eq!(result.report.audit_trail.usage.input_tokens, 5000);
        assert_eq!(result.report.audit_trail.usage.output_tokens, 2500);
    }

    struct FailingRetriever;

    #[async_trait]
    impl Retriever for FailingRetriever {
        async fn retrieve(
            &self,
            _query: &RetrievalQuery,
        ) -> Result<RetrievalResult, RetrievalError> {
            Err(RetrievalError::Backend("index unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_retrieval_failure_closes_gate() {
        let generator = Arc::new(CountingGenerator::new(all_compliant()));
        let pipeline =
            AuditPipeline::new(Arc::new(FailingRetriever), generator.clone(), fast_config())
                .unwrap();

        let result = pipeline.run(&catalog(), meta()).await.unwrap();

        assert_eq!(generator.total_calls(), 0);
        assert_eq!(result.report.verdict, AuditVerdict::InsufficientEvidence);
    }

    #[tokio::test]
    async fn test_resume_skips_valid_checkpoints() {
        let dir = TempDir::new().unwrap();
        let mut config = fast_config();
        config.checkpoint_dir = Some(dir.path().to_path_buf());

        let first = Arc::new(CountingGenerator::new(all_compliant()));
        let pipeline =
            AuditPipeline::new(Arc::new(strong_retriever()), first.clone(), config.clone())
                .unwrap();
        let result = pipeline.run(&catalog(), meta()).await.unwrap();
        assert!(result.resumed_sections.is_empty());
        assert!(result.resume_unsafe_sections.is_empty());

        // Corrupt S02; S01 stays valid
        let store = CheckpointStore::new(dir.path());
        std::fs::write(store.path("S02"), "{ truncated").unwrap();

        let second = Arc::new(CountingGenerator::new(all_compliant()));
        let pipeline =
            AuditPipeline::new(Arc::new(strong_retriever()), second.clone(), config).unwrap();
        let result = pipeline.run(&catalog(), meta()).await.unwrap();

        assert_eq!(result.resumed_sections, vec!["S01"]);
        assert_eq!(second.calls("S01-01"), 0);
        assert_eq!(second.calls("S02-01"), 1);
        assert_eq!(result.report.sections[0].findings.len(), 3);
        assert_eq!(result.report.verdict, AuditVerdict::Compliant);
    }

    #[tokio::test]
    async fn test_unwritable_checkpoint_dir_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "file").unwrap();

        let mut config = fast_config();
        config.checkpoint_dir = Some(blocker);
        let pipeline = AuditPipeline::new(
            Arc::new(strong_retriever()),
            Arc::new(CountingGenerator::new(all_compliant())),
            config,
        )
        .unwrap();

        let result = pipeline.run(&catalog(), meta()).await.unwrap();
        assert_eq!(result.resume_unsafe_sections, vec!["S01", "S02"]);
        assert_eq!(result.report.verdict, AuditVerdict::Compliant);
    }

    #[tokio::test]
    async fn test_recorded_collaborators_end_to_end() {
        let generator = RecordedGenerator::from_json(
            r#"{
                "S01-01": {"bewertung": "nicht_konform", "begruendung": "Die Risikoanalyse fehlt.", "mangel_text": "Keine Risikoanalyse vorhanden.", "quellen": ["risikoanalyse.pdf"], "confidence_self": 0.9},
                "S01-02": {"bewertung": "konform", "begruendung": "Jährliche Aktualisierung belegt.", "quellen": ["risikoanalyse.pdf"], "confidence_self": 0.9},
                "S01-03": {"bewertung": "konform", "begruendung": "Genehmigt.", "quellen": ["protokoll_gl.pdf"], "confidence_self": 0.9},
                "S02-01": {"bewertung": "konform", "begruendung": "Bestellt.", "quellen": ["bestellung_gwb.pdf"], "confidence_self": 0.9}
            }"#,
        )
        .unwrap();
        let pipeline = AuditPipeline::new(
            Arc::new(strong_retriever()),
            Arc::new(generator),
            fast_config(),
        )
        .unwrap();

        let result = pipeline.run(&catalog(), meta()).await.unwrap();

        assert_eq!(result.report.verdict, AuditVerdict::MaterialDeficiencies);
        assert_eq!(result.report.audit_trail.model, "recorded");
        assert_eq!(result.report.summary.critical_findings[0].item_id, "S01-01");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = RuntimeConfig::default();
        config.fan_out = 0;
        let result = AuditPipeline::new(
            Arc::new(RecordedRetriever::new()),
            Arc::new(RecordedGenerator::new()),
            config,
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
