use anyhow::{Context, Result};
use planweave::cli::{self, Command};
use planweave::llm::provider::Embedder;
use planweave::pipeline::state::UserConfig;
use planweave::store::KnowledgeStore;
use planweave::utils::error::{PlanweaveError, format_error};
use planweave::{Planweave, init_logging};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Try to determine verbose mode early for better error formatting
    let verbose = std::env::args().any(|arg| arg == "-v" || arg == "--verbose");

    if let Err(e) = run_main().await {
        display_error(&e, verbose);
        std::process::exit(1);
    }
}

/// Display an error with contextual formatting.
///
/// Tries to downcast to `PlanweaveError` for rich formatting, falls back
/// to anyhow's error chain display for other errors.
fn display_error(error: &anyhow::Error, verbose: bool) {
    if let Some(planweave_error) = error.downcast_ref::<PlanweaveError>() {
        eprintln!("{}", format_error(planweave_error, verbose));
    } else {
        eprintln!("\n\u{26a0} Error: {}", error);

        let causes: Vec<_> = error.chain().skip(1).collect();
        if !causes.is_empty() {
            eprintln!("\nCaused by:");
            for (i, cause) in causes.iter().enumerate() {
                let prefix = if i == causes.len() - 1 {
                    "\u{2514}\u{2500}"
                } else {
                    "\u{251c}\u{2500}"
                };
                eprintln!("{} {}", prefix, cause);
            }
        }
    }
    eprintln!();
}

async fn run_main() -> Result<()> {
    let args = cli::args::parse();
    init_logging(args.verbose);

    let settings = cli::config::load(args.config.as_deref())?;
    let dimension = settings.embedding.embedding_dimension;
    let store_dir = settings.general.store_dir.clone();

    // Reopen a persisted store when one exists, otherwise start empty
    let store = if store_dir.join("graph.json").exists() {
        KnowledgeStore::load(&store_dir, dimension)?
    } else {
        KnowledgeStore::new(dimension)
    };

    let embedder = build_embedder(&settings)?;
    let default_doc_type = settings.ingestion.doc_type.clone();
    let system = Planweave::new(settings, store, embedder)?;

    match args.command {
        Command::Ingest { dir, doc_type } => {
            let doc_type = doc_type.unwrap_or(default_doc_type);
            let report = system.ingest_directory(&dir, &doc_type).await?;

            for doc in &report.reports {
                tracing::info!(
                    document = %doc.document,
                    headings = doc.headings,
                    chunks = doc.chunks,
                    coverage = format!("{:.0}%", doc.embedding_coverage * 100.0),
                    "Ingested"
                );
            }
            for (path, error) in &report.failures {
                tracing::error!(path = %path, error = %error, "Ingestion failed");
            }

            system.store().save(&store_dir)?;
            tracing::info!(
                ok = report.reports.len(),
                failed = report.failures.len(),
                "Corpus ingestion finished"
            );

            if !report.failures.is_empty() {
                anyhow::bail!("{} document(s) failed to ingest", report.failures.len());
            }
            Ok(())
        }
        Command::Generate {
            name,
            timing,
            level,
            phase,
            subject,
            special_protocols,
            documents,
            guidelines,
            output,
        } => {
            let request = UserConfig {
                name,
                timing,
                level,
                phase,
                subject,
                special_protocols_node_ids: special_protocols,
                documents_to_query: documents,
                guideline_documents: guidelines,
            };

            let outcome = system.generate(request).await?;
            let written = planweave::output::write_plan(&output, &outcome.plan)
                .context("Failed to write plan")?;

            tracing::info!(
                status = ?outcome.status,
                path = %written.path.display(),
                actions_cost = outcome.cost.total_cost,
                "Plan written"
            );
            if !outcome.errors.is_empty() {
                for entry in &outcome.errors {
                    tracing::warn!(stage = %entry.stage, kind = %entry.kind, "{}", entry.message);
                }
            }
            Ok(())
        }
    }
}

fn build_embedder(settings: &cli::Settings) -> Result<Arc<dyn Embedder>> {
    let config = &settings.embedding;
    match config.provider.to_lowercase().as_str() {
        #[cfg(feature = "openai")]
        "openai" => {
            use planweave::llm::providers::openai::OpenAiEmbedder;

            let api_key = match config.api_key.clone() {
                Some(key) => key,
                None => std::env::var("OPENAI_API_KEY")
                    .map_err(|_| PlanweaveError::missing_api_key("openai"))?,
            };
            let embedder = match config.api_base.clone() {
                Some(base) => OpenAiEmbedder::with_api_base(
                    api_key,
                    config.model.clone(),
                    config.embedding_dimension,
                    base,
                )?,
                None => OpenAiEmbedder::new(
                    api_key,
                    config.model.clone(),
                    config.embedding_dimension,
                )?,
            };
            Ok(Arc::new(embedder))
        }
        #[cfg(feature = "ollama")]
        "ollama" => {
            use planweave::llm::providers::ollama::OllamaEmbedder;

            let host = config
                .api_base
                .clone()
                .or_else(|| std::env::var("OLLAMA_HOST").ok())
                .unwrap_or_else(|| "http://localhost:11434".to_string());
            Ok(Arc::new(OllamaEmbedder::new(
                host,
                config.model.clone(),
                config.embedding_dimension,
            )?))
        }
        other => Err(PlanweaveError::Config(format!(
            "Unsupported embedding backend '{}'. Supported backends: openai, ollama",
            other
        ))
        .into()),
    }
}
