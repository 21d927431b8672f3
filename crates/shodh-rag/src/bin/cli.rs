//! Thin `clap` front end over the crate's async API: index a profile's
//! bibliographic source, chat against a session, and manage profiles and
//! sessions. The teacher has no CLI precedent for this; the shape (a
//! `clap`-derived subcommand enum over a library core) follows the other
//! example repos that expose one.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use shodh_rag::embeddings::e5::{E5Config, E5Embeddings};
use shodh_rag::{
    indexing::{IndexBuilder, NoopProgressSink},
    llm::provider_for_id,
    BibliographicItem, ChatOrchestrator, ConversationStore, CrossEncoderReranker, EmbeddingService,
    MetadataFilter, ProfileManager, RagConfig, SparseIndex, VectorStore,
};

/// Open the dense+sparse stores for a profile, parameterized by the active
/// embedding model's collection naming (`RagConfig::collection_name`/
/// `sparse_index_name`). Shared by every subcommand that touches C4.
async fn open_stores(
    profile_manager: &ProfileManager,
    config: &RagConfig,
    profile_id: &str,
    embeddings: &EmbeddingService,
) -> anyhow::Result<(Arc<VectorStore>, Arc<SparseIndex>)> {
    let store_dir = profile_manager.store_dir(profile_id);
    let vector_path = store_dir.join(config.collection_name());
    let vector_store = Arc::new(
        VectorStore::new(
            vector_path.to_string_lossy().as_ref(),
            embeddings.dimension(),
            config.collection_name(),
        )
        .await?,
    );
    let sparse_path = store_dir.join(config.sparse_index_name());
    let sparse_index = Arc::new(SparseIndex::new(
        sparse_path.to_string_lossy().as_ref(),
        &config.sparse_index_name(),
    )?);
    Ok((vector_store, sparse_index))
}

#[derive(Parser)]
#[command(name = "shodh-rag-cli", version, about = "Conversational RAG over a personal bibliographic library")]
struct Cli {
    /// Root directory holding all profiles. Defaults to the config's data_dir/profiles.
    #[arg(long, global = true)]
    profiles_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index the active profile's configured bibliographic source.
    Index,
    /// Report index stats without running an index pass.
    IndexStats,
    /// Ask a question in a chat session.
    Chat {
        /// Existing session id to continue. Omit to start a new session.
        #[arg(long)]
        session: Option<String>,
        /// Restrict retrieval to these bibliographic item ids.
        #[arg(long = "item", num_args = 0..)]
        items: Vec<String>,
        question: String,
    },
    #[command(subcommand)]
    Profile(ProfileCommand),
    #[command(subcommand)]
    Session(SessionCommand),
}

#[derive(Subcommand)]
enum ProfileCommand {
    List,
    Create {
        id: String,
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    Activate {
        id: String,
    },
    Delete {
        id: String,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    List,
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let config = RagConfig::default();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let profiles_root = cli
        .profiles_root
        .unwrap_or_else(|| config.data_dir.join("profiles"));
    let profile_manager = ProfileManager::new(profiles_root)?;

    match cli.command {
        Command::Profile(cmd) => run_profile_command(&profile_manager, cmd),
        Command::Session(cmd) => run_session_command(&profile_manager, cmd),
        Command::Index => run_index(&profile_manager, &config).await,
        Command::IndexStats => run_index_stats(&profile_manager, &config).await,
        Command::Chat {
            session,
            items,
            question,
        } => run_chat(&profile_manager, &config, session, items, question).await,
    }
}

fn active_profile_id(profile_manager: &ProfileManager) -> anyhow::Result<String> {
    profile_manager
        .active_profile_id()
        .ok_or_else(|| anyhow::anyhow!("no active profile; run `profile activate <id>` first"))
}

fn run_profile_command(profile_manager: &ProfileManager, cmd: ProfileCommand) -> anyhow::Result<()> {
    match cmd {
        ProfileCommand::List => {
            let active = profile_manager.active_profile_id();
            for profile in profile_manager.list() {
                let marker = if Some(&profile.id) == active.as_ref() { "*" } else { " " };
                println!("{marker} {} — {}", profile.id, profile.name);
            }
        }
        ProfileCommand::Create { id, name, description } => {
            profile_manager.create(&id, &name, description)?;
            println!("created profile '{id}'");
        }
        ProfileCommand::Activate { id } => {
            profile_manager.activate(&id)?;
            println!("activated profile '{id}'");
        }
        ProfileCommand::Delete { id, force } => {
            profile_manager.delete(&id, force)?;
            println!("deleted profile '{id}'");
        }
    }
    Ok(())
}

fn run_session_command(profile_manager: &ProfileManager, cmd: SessionCommand) -> anyhow::Result<()> {
    let profile_id = active_profile_id(profile_manager)?;
    let conversations = ConversationStore::new(profile_manager.sessions_dir(&profile_id));
    match cmd {
        SessionCommand::List => {
            for session in conversations.list_sessions()? {
                println!("{}  {}  ({} messages)", session.id, session.title, session.messages.len());
            }
        }
        SessionCommand::Delete { id } => {
            conversations.delete_session(&id)?;
            println!("deleted session '{id}'");
        }
    }
    Ok(())
}

/// Read an external bibliographic enumerator's output: a JSON array of
/// items at the profile's configured `bibliographic_source_path`. The core
/// never writes to this file — spec.md treats the reference manager as a
/// read-only external collaborator; this is the thinnest possible adapter
/// over that contract.
fn load_bibliographic_items(path: &std::path::Path) -> anyhow::Result<Vec<BibliographicItem>> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read bibliographic source {}: {e}", path.display()))?;
    let items: Vec<BibliographicItem> = serde_json::from_str(&data)
        .map_err(|e| anyhow::anyhow!("failed to parse bibliographic source {}: {e}", path.display()))?;
    Ok(items)
}

fn build_embedding_service(config: &RagConfig) -> anyhow::Result<Arc<EmbeddingService>> {
    let e5_config = E5Config::auto_detect(&config.embedding.model_dir)
        .ok_or_else(|| anyhow::anyhow!("no embedding model found under {}", config.embedding.model_dir.display()))?;
    let model = E5Embeddings::new(e5_config)?;
    Ok(Arc::new(EmbeddingService::new(Box::new(model))))
}

async fn run_index(profile_manager: &ProfileManager, config: &RagConfig) -> anyhow::Result<()> {
    let profile_id = active_profile_id(profile_manager)?;
    let settings = profile_manager.load_settings(&profile_id)?;
    let source_path = settings
        .bibliographic_source_path
        .ok_or_else(|| anyhow::anyhow!("profile '{profile_id}' has no bibliographic_source_path configured"))?;
    let items = load_bibliographic_items(&source_path)?;

    let embeddings = build_embedding_service(config)?;
    let (vector_store, sparse_index) =
        open_stores(profile_manager, config, &profile_id, &embeddings).await?;

    let chunker = shodh_rag::processing::TextChunker::new(
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
        config.chunking.min_chunk_size,
    );
    let builder = IndexBuilder::new(vector_store, sparse_index, embeddings, chunker);
    let cancel = IndexBuilder::new_cancel_handle();
    let report = builder.index(&items, &cancel, &NoopProgressSink).await?;

    println!(
        "indexed {} items, {} chunks, {} skipped",
        report.indexed_items,
        report.total_chunks,
        report.skipped.len()
    );
    for skip in &report.skipped {
        println!("  skipped {}: {}", skip.item_id, skip.reason);
    }
    Ok(())
}

async fn run_index_stats(profile_manager: &ProfileManager, config: &RagConfig) -> anyhow::Result<()> {
    let profile_id = active_profile_id(profile_manager)?;
    let settings = profile_manager.load_settings(&profile_id)?;
    let source_path = settings
        .bibliographic_source_path
        .ok_or_else(|| anyhow::anyhow!("profile '{profile_id}' has no bibliographic_source_path configured"))?;
    let source_item_count = load_bibliographic_items(&source_path)?.len();

    let embeddings = build_embedding_service(config)?;
    let (vector_store, sparse_index) =
        open_stores(profile_manager, config, &profile_id, &embeddings).await?;
    let chunker = shodh_rag::processing::TextChunker::new(
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
        config.chunking.min_chunk_size,
    );
    let builder = IndexBuilder::new(vector_store, sparse_index, embeddings, chunker);
    let stats = builder.stats(source_item_count, config.collection_name()).await?;

    println!("collection:            {}", stats.collection_name);
    println!("embedding model:       {}", stats.current_embedding_model);
    println!("indexed items:         {}", stats.indexed_items);
    println!("total chunks:          {}", stats.total_chunks);
    println!("source items:          {}", stats.source_items);
    println!("new (unindexed) items: {}", stats.new_items);
    Ok(())
}

async fn run_chat(
    profile_manager: &ProfileManager,
    config: &RagConfig,
    session_id: Option<String>,
    items: Vec<String>,
    question: String,
) -> anyhow::Result<()> {
    let profile_id = active_profile_id(profile_manager)?;
    let settings = profile_manager.load_settings(&profile_id)?;

    let embeddings = build_embedding_service(config)?;
    let (vector_store, sparse_index) =
        open_stores(profile_manager, config, &profile_id, &embeddings).await?;
    let reranker = Arc::new(CrossEncoderReranker::new(&config.embedding.model_dir)?);
    let conversations = Arc::new(ConversationStore::new(profile_manager.sessions_dir(&profile_id)));

    let session_id = match session_id {
        Some(id) => id,
        None => conversations.create_session(&question, "You are a research assistant answering questions about the user's library with cited evidence.")?.id,
    };

    let provider = provider_for_id(&settings.provider_id, &settings.active_model)?;
    let orchestrator = ChatOrchestrator::new(
        vector_store,
        sparse_index,
        embeddings,
        reranker,
        conversations,
        config.search.clone(),
    );

    let filter = if items.is_empty() {
        None
    } else {
        Some(MetadataFilter { item_ids: Some(items) })
    };

    let result = orchestrator
        .chat(
            &session_id,
            &question,
            provider.as_ref(),
            &settings.generation,
            settings.credentials.as_deref(),
            filter.as_ref(),
        )
        .await?;

    println!("{}", result.summary);
    println!();
    for citation in &result.citations {
        println!(
            "[{}] {} — {} ({})",
            citation.id,
            citation.title,
            citation.authors.join(", "),
            citation.year.map(|y| y.to_string()).unwrap_or_else(|| "n.d.".to_string())
        );
    }
    Ok(())
}
