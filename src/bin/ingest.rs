use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use summit_kb::config::Settings;
use summit_kb::logging::init_from_settings;
use summit_kb::vector_store::Metadata;
use summit_kb::{load_dotenv, BatchReport, KnowledgeBase, OllamaEmbedder, PineconeClient};

#[derive(Parser, Debug)]
#[command(
    name = "summit-kb-ingest",
    about = "Extract, chunk, embed and upsert summit documents into the knowledge base"
)]
struct IngestCli {
    #[command(flatten)]
    settings: Settings,

    /// Directory to scan (defaults to <project-root>/data/raw)
    #[arg(long, conflicts_with_all = ["file", "delete"])]
    dir: Option<PathBuf>,

    /// Ingest a single file instead of a directory
    #[arg(long, conflicts_with = "delete")]
    file: Option<PathBuf>,

    /// Remove every vector previously ingested from this file
    #[arg(long)]
    delete: Option<PathBuf>,

    /// Extra metadata for --file, as KEY=VALUE (repeatable; overrides inferred values)
    #[arg(long = "meta", value_parser = parse_key_value, requires = "file")]
    meta: Vec<(String, String)>,

    /// Pinecone namespace
    #[arg(long, env = "PINECONE_NAMESPACE", default_value = "")]
    namespace: String,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.trim().is_empty() {
        return Err("metadata key must not be empty".to_string());
    }
    Ok((key.trim().to_string(), value.to_string()))
}

fn main() -> Result<()> {
    load_dotenv();
    let cli = IngestCli::parse();
    init_from_settings(&cli.settings.logging)?;
    let settings = &cli.settings;
    settings.validate().context("invalid configuration")?;

    let embedder = OllamaEmbedder::from_settings(&settings.ollama)?;
    let client = PineconeClient::from_settings(&settings.pinecone)?;
    let index = client.ensure_index(settings.pinecone.dimension)?;
    let kb = KnowledgeBase::new(embedder, index, &settings.ingestion);

    if let Some(path) = &cli.delete {
        kb.delete_document(path, &cli.namespace)?;
        println!("Deleted vectors for {}", path.display());
        return Ok(());
    }

    if let Some(path) = &cli.file {
        let overrides: Metadata = cli
            .meta
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let overrides = (!overrides.is_empty()).then_some(&overrides);
        let report = kb
            .ingest_document(path, overrides, &cli.namespace)
            .with_context(|| format!("failed to ingest {}", path.display()))?;
        println!(
            "Ingested {}: {} chunks, {} vectors upserted",
            report.file.display(),
            report.chunks,
            report.upserted
        );
    } else {
        let dir = cli
            .dir
            .clone()
            .unwrap_or_else(|| settings.paths.raw_data_dir());
        let report = kb.ingest_directory(&dir, &cli.namespace)?;
        if report.total == 0 {
            println!("No documents found in {}", dir.display());
            println!("Place PDF, DOCX, TXT or MD files there and try again.");
            return Ok(());
        }
        print_summary(&report);
    }

    let stats = kb.stats(&cli.namespace)?;
    println!(
        "Index stats: {} vectors total, {} in namespace '{}', dimension {}",
        stats.total_vector_count,
        stats.namespace_count(&cli.namespace),
        cli.namespace,
        stats.dimension
    );
    Ok(())
}

fn print_summary(report: &BatchReport) {
    println!("Ingestion summary");
    println!("  Total documents:       {}", report.total);
    println!("  Successfully ingested: {}", report.succeeded.len());
    println!("  Failed:                {}", report.failed.len());
    println!("  Total chunks created:  {}", report.total_chunks());
    if !report.failed.is_empty() {
        println!("Failed files:");
        for (path, error) in &report.failed {
            println!("  - {}: {}", path.display(), error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn cli_is_valid() {
        IngestCli::command().debug_assert();
    }

    #[test]
    fn single_file_accepts_metadata_overrides() {
        let cli = IngestCli::try_parse_from([
            "summit-kb-ingest",
            "--file",
            "data/raw/energy_treaty.pdf",
            "--meta",
            "sector=energy",
            "--meta",
            "title=Power Pool Accord",
        ])
        .unwrap();
        assert_eq!(cli.file, Some(PathBuf::from("data/raw/energy_treaty.pdf")));
        assert_eq!(
            cli.meta,
            vec![
                ("sector".to_string(), "energy".to_string()),
                ("title".to_string(), "Power Pool Accord".to_string()),
            ]
        );
    }

    #[test]
    fn sources_are_mutually_exclusive() {
        let conflicts: [&[&str]; 3] = [
            &["--file", "a.pdf", "--dir", "data"],
            &["--dir", "data", "--delete", "a.pdf"],
            &["--file", "a.pdf", "--delete", "a.pdf"],
        ];
        for args in conflicts {
            let argv = std::iter::once("summit-kb-ingest").chain(args.iter().copied());
            assert!(IngestCli::try_parse_from(argv).is_err(), "{args:?} should conflict");
        }
        assert!(
            IngestCli::try_parse_from(["summit-kb-ingest", "--meta", "sector=energy"]).is_err()
        );
    }

    #[test]
    fn key_value_parsing() {
        assert_eq!(
            parse_key_value(" date = 2024-05 "),
            Ok(("date".to_string(), " 2024-05 ".to_string()))
        );
        assert_eq!(
            parse_key_value("note=a=b"),
            Ok(("note".to_string(), "a=b".to_string()))
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value(" =x").is_err());
    }
}
