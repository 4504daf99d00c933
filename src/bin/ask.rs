use anyhow::{Context, Result};
use clap::Parser;
use summit_kb::config::Settings;
use summit_kb::knowledge::{metadata_filter, AnswerRequest};
use summit_kb::llm::{render_context, GenerationOptions};
use summit_kb::logging::init_from_settings;
use summit_kb::metadata::{DocumentType, Sector};
use summit_kb::{load_dotenv, KnowledgeBase, OllamaEmbedder, OllamaLlm, PineconeClient};

#[derive(Parser, Debug)]
#[command(
    name = "summit-kb-ask",
    about = "Answer a question from the knowledge base with the local chat model"
)]
struct AskCli {
    #[command(flatten)]
    settings: Settings,

    /// Question to answer using the ingested documents
    #[arg(long)]
    query: String,

    /// Number of chunks retrieved as context
    #[arg(long, default_value_t = 5)]
    top_k: usize,

    /// Restrict context to one sector
    #[arg(long)]
    sector: Option<Sector>,

    /// Restrict context to one document type
    #[arg(long)]
    document_type: Option<DocumentType>,

    /// Pinecone namespace
    #[arg(long, env = "PINECONE_NAMESPACE", default_value = "")]
    namespace: String,

    /// Optional max words constraint included in the prompt
    #[arg(long)]
    max_words: Option<usize>,

    /// Only print the retrieved context (skip the chat model)
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn main() -> Result<()> {
    load_dotenv();
    let cli = AskCli::parse();
    init_from_settings(&cli.settings.logging)?;
    let settings = &cli.settings;
    settings.validate().context("invalid configuration")?;
    anyhow::ensure!(cli.top_k > 0, "--top-k must be positive");

    let embedder = OllamaEmbedder::from_settings(&settings.ollama)?;
    let index = PineconeClient::from_settings(&settings.pinecone)?.connect()?;
    let kb = KnowledgeBase::new(embedder, index, &settings.ingestion);
    let filter = metadata_filter(cli.sector, cli.document_type);

    if cli.dry_run {
        let hits = kb.search(&cli.query, cli.top_k, filter.as_ref(), &cli.namespace)?;
        anyhow::ensure!(!hits.is_empty(), "no matching chunks in the knowledge base");
        println!("--- Retrieved Context ---\n{}", render_context(&hits));
        println!("dry-run enabled; skipping chat model.");
        return Ok(());
    }

    let llm = OllamaLlm::from_settings(&settings.ollama)?;
    let options = GenerationOptions::from_settings(&settings.ollama);
    let answer = kb.answer(
        &llm,
        &AnswerRequest {
            question: &cli.query,
            top_k: cli.top_k,
            filter: filter.as_ref(),
            namespace: &cli.namespace,
            max_words: cli.max_words,
            options: &options,
        },
    )?;
    println!("--- Retrieved Context ---\n{}", render_context(&answer.hits));
    println!("--- Answer ({}) ---\n{}", llm.model(), answer.text.trim());
    Ok(())
}
