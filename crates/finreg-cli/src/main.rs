use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use finreg_core::{render_report, Catalog, OutputFormat, Regime, ReportMeta};
use finreg_runtime::{
    AuditPipeline, CheckpointKey, CheckpointStore, Generator, RecordedGenerator, RecordedRetriever,
    RuntimeConfig,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "finreg",
    author,
    version,
    about = "Regulatory audit simulation for German financial supervision"
)]
struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate a catalog without calling any collaborator
    ValidateCatalog {
        /// Catalog file (.yaml, .yml or .json)
        catalog: PathBuf,

        /// Print the catalog outline as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run an audit over a catalog
    Run {
        /// Catalog file (.yaml, .yml or .json)
        #[arg(long, value_name = "FILE")]
        catalog: PathBuf,

        /// Recorded retrieval results keyed by item id
        #[arg(long, value_name = "FILE")]
        retrieval: PathBuf,

        /// Recorded model responses keyed by item id; without it the live
        /// provider is used
        #[arg(long, value_name = "FILE")]
        responses: Option<PathBuf>,

        /// Runtime configuration (YAML)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Only audit these section ids (comma separated)
        #[arg(long, value_delimiter = ',')]
        sections: Vec<String>,

        #[arg(long, default_value = "Musterbank AG")]
        institution: String,

        #[arg(long, default_value = "finreg (Simulation)")]
        auditor: String,

        /// Audit date, defaults to today
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,

        /// gwg, dora, marisk or wphg
        #[arg(long)]
        regime: Option<Regime>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        fan_out: Option<usize>,

        /// Directory for section checkpoints
        #[arg(long, value_name = "DIR")]
        checkpoint_dir: Option<PathBuf>,

        /// Write the report here instead of stdout
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = Format::Human)]
        format: Format,
    },

    /// Show the checkpoint status of every section
    Checkpoints {
        #[arg(long, value_name = "FILE")]
        catalog: PathBuf,

        #[arg(long, value_name = "DIR")]
        checkpoint_dir: PathBuf,

        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Model id the checkpoints must belong to ("recorded" for replayed runs)
        #[arg(long)]
        model: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Human,
    Json,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Human => OutputFormat::Human,
            Format::Json => OutputFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::ValidateCatalog { catalog, json } => validate_catalog(&catalog, json),
        Commands::Run {
            catalog,
            retrieval,
            responses,
            config,
            sections,
            institution,
            auditor,
            date,
            regime,
            model,
            fan_out,
            checkpoint_dir,
            output,
            format,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(regime) = regime {
                config.regime = regime;
            }
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(fan_out) = fan_out {
                config.fan_out = fan_out;
            }
            if checkpoint_dir.is_some() {
                config.checkpoint_dir = checkpoint_dir;
            }

            let catalog = load_catalog(&catalog)?
                .filter_sections(&sections)
                .context("invalid --sections")?;
            let retriever = RecordedRetriever::from_file(&retrieval)
                .with_context(|| format!("failed to load retrieval from {}", retrieval.display()))?;
            let generator = build_generator(responses.as_deref(), &config)?;

            let meta = ReportMeta::for_regime(
                config.regime,
                institution,
                auditor,
                catalog.basis(),
                date.unwrap_or_else(|| Local::now().date_naive()),
            );

            let pipeline = AuditPipeline::new(Arc::new(retriever), generator, config)?;
            let result = pipeline.run(&catalog, meta).await?;

            if !result.resume_unsafe_sections.is_empty() {
                tracing::warn!(
                    sections = ?result.resume_unsafe_sections,
                    "Checkpoints missing for these sections; a resumed run will redo them"
                );
            }

            let rendered = render_report(&result.report, format.into())?;
            match output {
                Some(path) => {
                    fs::write(&path, rendered)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Report written to {}", path.display());
                }
                None => print!("{}", rendered),
            }
            Ok(())
        }
        Commands::Checkpoints {
            catalog,
            checkpoint_dir,
            config,
            model,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(model) = model {
                config.model = model;
            }
            list_checkpoints(&load_catalog(&catalog)?, &checkpoint_dir, &config);
            Ok(())
        }
    }
}

fn load_catalog(path: &Path) -> Result<Catalog> {
    Catalog::from_file(path).with_context(|| format!("failed to load catalog {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

fn validate_catalog(path: &Path, json: bool) -> Result<()> {
    let catalog = load_catalog(path)?;

    if json {
        let outline = serde_json::json!({
            "katalog_version": catalog.version(),
            "basis": catalog.basis(),
            "sections": catalog.sections().iter().map(|s| serde_json::json!({
                "id": s.id,
                "titel": s.title,
                "prueffelder": s.items.len(),
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&outline)?);
        return Ok(());
    }

    println!(
        "Catalog {} OK: {} section(s), {} item(s)",
        catalog.version(),
        catalog.sections().len(),
        catalog.item_count()
    );
    for section in catalog.sections() {
        println!(
            "- {id:<8} {title} ({count} Prüffelder)",
            id = section.id,
            title = section.title,
            count = section.items.len()
        );
    }
    Ok(())
}

fn build_generator(responses: Option<&Path>, config: &RuntimeConfig) -> Result<Arc<dyn Generator>> {
    if let Some(path) = responses {
        let recorded = RecordedGenerator::from_file(path)
            .with_context(|| format!("failed to load responses from {}", path.display()))?;
        tracing::info!(responses = recorded.len(), "Using recorded model responses");
        return Ok(Arc::new(recorded));
    }
    live_generator(config)
}

#[cfg(feature = "anthropic")]
fn live_generator(config: &RuntimeConfig) -> Result<Arc<dyn Generator>> {
    use finreg_runtime::{AnthropicProvider, LlmGenerator};

    let provider = AnthropicProvider::from_env()?;
    Ok(Arc::new(LlmGenerator::new(
        Arc::new(provider),
        config.completion_config(),
        config.regime,
    )))
}

#[cfg(not(feature = "anthropic"))]
fn live_generator(_config: &RuntimeConfig) -> Result<Arc<dyn Generator>> {
    anyhow::bail!("no --responses given and this build has no live provider (enable the `anthropic` feature)")
}

fn list_checkpoints(catalog: &Catalog, dir: &Path, config: &RuntimeConfig) {
    let store = CheckpointStore::new(dir);
    let key = CheckpointKey {
        model: config.model.clone(),
        catalog_version: catalog.version().to_string(),
    };

    println!(
        "Checkpoints in {} (model {}, catalog {})",
        dir.display(),
        key.model,
        key.catalog_version
    );
    for section in catalog.sections() {
        let status = store.inspect(section, &key, &config.thresholds);
        println!("- {:<8} {}", section.id, status.label());
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
