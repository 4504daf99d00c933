use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use summit_kb::config::Settings;
use summit_kb::knowledge::metadata_filter;
use summit_kb::logging::init_from_settings;
use summit_kb::metadata::{DocumentType, Sector};
use summit_kb::{load_dotenv, KnowledgeBase, OllamaEmbedder, PineconeClient, SearchHit};

const PREVIEW_CHARS: usize = 300;

#[derive(Parser, Debug)]
#[command(
    name = "summit-kb-search",
    about = "Semantic search over ingested summit documents"
)]
struct SearchCli {
    #[command(flatten)]
    settings: Settings,

    /// Run a single query and exit instead of starting the interactive prompt
    #[arg(long)]
    query: Option<String>,

    /// Number of results per query
    #[arg(long, default_value_t = 10)]
    top_k: usize,

    /// Only return chunks from this sector (minerals, energy, agriculture, investment, general)
    #[arg(long)]
    sector: Option<Sector>,

    /// Only return chunks of this document type (treaty, policy, study)
    #[arg(long)]
    document_type: Option<DocumentType>,

    /// Pinecone namespace
    #[arg(long, env = "PINECONE_NAMESPACE", default_value = "")]
    namespace: String,
}

fn main() -> Result<()> {
    load_dotenv();
    let cli = SearchCli::parse();
    init_from_settings(&cli.settings.logging)?;
    let settings = &cli.settings;
    settings.validate().context("invalid configuration")?;
    anyhow::ensure!(cli.top_k > 0, "--top-k must be positive");

    let embedder = OllamaEmbedder::from_settings(&settings.ollama)?;
    let client = PineconeClient::from_settings(&settings.pinecone)?;
    let index = client.connect()?;
    let kb = KnowledgeBase::new(embedder, index, &settings.ingestion);
    let filter = metadata_filter(cli.sector, cli.document_type);

    if let Some(query) = &cli.query {
        let hits = kb.search(query, cli.top_k, filter.as_ref(), &cli.namespace)?;
        print_hits(&hits);
        return Ok(());
    }

    let stats = kb.stats(&cli.namespace)?;
    println!(
        "Connected to knowledge base ({} vectors loaded)",
        stats.total_vector_count
    );
    println!("Type your query and press Enter. Type 'exit', 'quit' or 'q' to stop.\n");
    search_loop(&kb, &cli, filter.as_ref())
}

fn search_loop<E, S>(kb: &KnowledgeBase<E, S>, cli: &SearchCli, filter: Option<&Value>) -> Result<()>
where
    E: summit_kb::Embedder,
    S: summit_kb::VectorStore,
{
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    prompt_loop(stdin.lock(), &mut stdout, |query| {
        let hits = kb.search(query, cli.top_k, filter, &cli.namespace)?;
        print_hits(&hits);
        println!("\n{}\n", "-".repeat(50));
        Ok(())
    })
}

/// Prompts for queries until EOF or an exit word; blank lines are skipped and a failing query
/// is reported without ending the session.
fn prompt_loop<R, W, F>(input: R, out: &mut W, mut on_query: F) -> Result<()>
where
    R: BufRead,
    W: Write,
    F: FnMut(&str) -> Result<()>,
{
    let mut lines = input.lines();
    loop {
        write!(out, "Query > ")?;
        out.flush().context("failed to flush stdout")?;
        let Some(line) = lines.next() else {
            writeln!(out)?;
            break;
        };
        let line = line.context("failed to read query")?;
        let query = line.trim();
        if is_exit_word(query) {
            break;
        }
        if query.is_empty() {
            continue;
        }
        if let Err(err) = on_query(query) {
            eprintln!("Error: {err:#}");
        }
    }
    writeln!(out, "Goodbye!")?;
    Ok(())
}

fn is_exit_word(query: &str) -> bool {
    matches!(query.to_lowercase().as_str(), "exit" | "quit" | "q")
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results found.");
        return;
    }
    println!("\nFound {} results:\n", hits.len());
    for (rank, hit) in hits.iter().enumerate() {
        let source = hit
            .metadata
            .source
            .as_deref()
            .map(|source| {
                Path::new(source)
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| source.to_string())
            })
            .unwrap_or_else(|| "(unknown)".to_string());
        println!(
            "Result #{} | Score: {:.4} | Source: {} | Sector: {}",
            rank + 1,
            hit.score,
            source,
            hit.metadata.sector.as_deref().unwrap_or("N/A")
        );
        println!("{}\n", preview(&hit.content));
    }
}

fn preview(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Cursor;

    fn run(input: &str) -> (Vec<String>, String) {
        let mut seen = Vec::new();
        let mut out = Vec::new();
        prompt_loop(Cursor::new(input), &mut out, |query| {
            seen.push(query.to_string());
            Ok(())
        })
        .unwrap();
        (seen, String::from_utf8(out).unwrap())
    }

    #[test]
    fn cli_is_valid() {
        SearchCli::command().debug_assert();
    }

    #[test]
    fn one_shot_query_and_filters_parse() {
        let cli = SearchCli::try_parse_from([
            "summit-kb-search",
            "--query",
            "power pool",
            "--top-k",
            "3",
            "--sector",
            "energy",
            "--document-type",
            "treaty",
        ])
        .unwrap();
        assert_eq!(cli.query.as_deref(), Some("power pool"));
        assert_eq!(cli.top_k, 3);
        assert_eq!(cli.sector, Some(Sector::Energy));
        assert_eq!(cli.document_type, Some(DocumentType::Treaty));
        assert!(SearchCli::try_parse_from(["summit-kb-search", "--sector", "fishing"]).is_err());
    }

    #[test]
    fn exit_words_end_the_session() {
        for word in ["exit", "QUIT", " q "] {
            let (seen, out) = run(&format!("energy\n{word}\nminerals\n"));
            assert_eq!(seen, vec!["energy".to_string()]);
            assert!(out.ends_with("Goodbye!\n"));
        }
    }

    #[test]
    fn blank_lines_are_skipped_until_eof() {
        let (seen, out) = run("\n   \n  cocoa exports  \n\n");
        assert_eq!(seen, vec!["cocoa exports".to_string()]);
        assert_eq!(out.matches("Query > ").count(), 5);
    }

    #[test]
    fn failing_queries_keep_the_session_alive() {
        let mut seen = Vec::new();
        let mut out = Vec::new();
        prompt_loop(Cursor::new("first\nsecond\n"), &mut out, |query| {
            seen.push(query.to_string());
            anyhow::bail!("index unreachable")
        })
        .unwrap();
        assert_eq!(seen, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn preview_truncates_long_content() {
        let long = "word ".repeat(100);
        let cut = preview(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview("  short\n text "), "short text");
    }
}
