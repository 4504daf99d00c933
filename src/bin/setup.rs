use std::fs;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use summit_kb::config::{PathSettings, Settings};
use summit_kb::logging::init_from_settings;
use summit_kb::{load_dotenv, Embedder, OllamaEmbedder, OllamaLlm, PineconeClient, VectorStore};

#[derive(Parser, Debug)]
#[command(
    name = "summit-kb-setup",
    about = "Create project directories, check Ollama and Pinecone, and make sure the index exists"
)]
struct SetupCli {
    #[command(flatten)]
    settings: Settings,
}

fn main() -> Result<ExitCode> {
    load_dotenv();
    let cli = SetupCli::parse();
    init_from_settings(&cli.settings.logging)?;
    let settings = &cli.settings;
    settings.validate().context("invalid configuration")?;

    create_directories(&settings.paths)?;

    if !validate_environment(settings) {
        tracing::error!("environment validation failed; check your configuration");
        return Ok(ExitCode::FAILURE);
    }

    if let Err(err) = initialize_index(settings) {
        tracing::error!(error = %format!("{err:#}"), "Pinecone initialization failed");
        return Ok(ExitCode::FAILURE);
    }

    println!("Setup complete. Next steps:");
    println!("  1. Place documents in {}", settings.paths.raw_data_dir().display());
    println!("  2. Run summit-kb-ingest");
    println!("  3. Query with summit-kb-search");
    Ok(ExitCode::SUCCESS)
}

fn create_directories(paths: &PathSettings) -> Result<()> {
    for dir in paths.required_dirs() {
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        tracing::info!(dir = %dir.display(), "directory ready");
    }
    Ok(())
}

fn validate_environment(settings: &Settings) -> bool {
    if settings.pinecone.require_api_key().is_err() {
        tracing::error!("PINECONE_API_KEY not set");
        return false;
    }
    tracing::info!("Pinecone API key configured");

    let llm = match OllamaLlm::from_settings(&settings.ollama) {
        Ok(llm) => llm,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "failed to build Ollama client");
            return false;
        }
    };
    if !llm.check_health() {
        tracing::error!(url = %settings.ollama.base_url, "Ollama service is not accessible");
        return false;
    }
    match llm.list_models() {
        Ok(models) => {
            println!("Available models: {}", models.join(", "));
            let wanted = &settings.ollama.embedding_model;
            if !models.iter().any(|name| name == wanted || name.starts_with(&format!("{wanted}:"))) {
                tracing::warn!(model = %wanted, "embedding model not installed; run `ollama pull`");
            }
        }
        Err(err) => tracing::warn!(error = %format!("{err:#}"), "could not list Ollama models"),
    }

    let embedder = match OllamaEmbedder::from_settings(&settings.ollama) {
        Ok(embedder) => embedder,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "failed to build embedding client");
            return false;
        }
    };
    if !embedder.check_health() {
        tracing::error!(model = embedder.model(), "embedding model is not accessible");
        return false;
    }
    tracing::info!(model = embedder.model(), "embedding model is accessible");
    true
}

fn initialize_index(settings: &Settings) -> Result<()> {
    let client = PineconeClient::from_settings(&settings.pinecone)?;
    let index = client.ensure_index(settings.pinecone.dimension)?;
    let stats = index.stats()?;
    println!(
        "Index {} ready: dimension {}, {} vectors",
        index.name(),
        stats.dimension,
        stats.total_vector_count
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_valid() {
        SetupCli::command().debug_assert();
    }

    #[test]
    fn creates_project_directories() {
        let root = tempfile::tempdir().unwrap();
        let paths = PathSettings::new(root.path());
        create_directories(&paths).unwrap();
        for dir in paths.required_dirs() {
            assert!(dir.is_dir(), "{} missing", dir.display());
        }
    }
}
