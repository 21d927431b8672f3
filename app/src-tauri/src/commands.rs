//! Tauri command layer: the only glue this app contributes. Each command
//! is a thin pass-through to the `shodh-rag` core — no business logic
//! lives here. Grounded on the teacher's `rag_commands.rs` (managed-state
//! shape, `#[tauri::command]` surface) narrowed to the four external
//! interfaces spec.md names: chat, index, profile CRUD, sessions.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shodh_rag::embeddings::e5::{E5Config, E5Embeddings};
use shodh_rag::processing::TextChunker;
use shodh_rag::{
    indexing::{IndexBuilder, NoopProgressSink},
    llm::provider_for_id,
    BibliographicItem, ChatOrchestrator, ChatTurnResult, ConversationStore, CrossEncoderReranker,
    EmbeddingService, MetadataFilter, ProfileManager, RagConfig, SparseIndex, VectorStore,
};
use tokio::sync::RwLock;

pub struct AppState {
    pub config: RagConfig,
    pub profiles: Arc<ProfileManager>,
    pub embeddings: RwLock<Option<Arc<EmbeddingService>>>,
}

impl AppState {
    pub fn new(config: RagConfig, profiles: ProfileManager) -> Self {
        Self {
            config,
            profiles: Arc::new(profiles),
            embeddings: RwLock::new(None),
        }
    }

    async fn embeddings(&self) -> Result<Arc<EmbeddingService>, String> {
        if let Some(existing) = self.embeddings.read().await.clone() {
            return Ok(existing);
        }
        let e5_config = E5Config::auto_detect(&self.config.embedding.model_dir)
            .ok_or_else(|| format!("no embedding model found under {}", self.config.embedding.model_dir.display()))?;
        let model = E5Embeddings::new(e5_config).map_err(|e| e.to_string())?;
        let service = Arc::new(EmbeddingService::new(Box::new(model)));
        *self.embeddings.write().await = Some(service.clone());
        Ok(service)
    }

    fn active_profile_id(&self) -> Result<String, String> {
        self.profiles
            .active_profile_id()
            .ok_or_else(|| "no active profile; activate one first".to_string())
    }

    async fn open_stores(
        &self,
        profile_id: &str,
    ) -> Result<(Arc<VectorStore>, Arc<SparseIndex>, Arc<EmbeddingService>), String> {
        let embeddings = self.embeddings().await?;
        let store_dir = self.profiles.store_dir(profile_id);
        let vector_path = store_dir.join(self.config.collection_name());
        let vector_store = Arc::new(
            VectorStore::new(
                vector_path.to_string_lossy().as_ref(),
                embeddings.dimension(),
                self.config.collection_name(),
            )
            .await
            .map_err(|e| e.to_string())?,
        );
        let sparse_path = store_dir.join(self.config.sparse_index_name());
        let sparse_index = Arc::new(
            SparseIndex::new(sparse_path.to_string_lossy().as_ref(), &self.config.sparse_index_name())
                .map_err(|e| e.to_string())?,
        );
        Ok((vector_store, sparse_index, embeddings))
    }
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub indexed_items: usize,
    pub total_chunks: usize,
    pub skipped: Vec<SkipResponse>,
}

#[derive(Debug, Serialize)]
pub struct IndexStatsResponse {
    pub indexed_items: usize,
    pub total_chunks: usize,
    pub source_items: usize,
    pub new_items: usize,
    pub current_embedding_model: String,
    pub collection_name: String,
}

#[derive(Debug, Serialize)]
pub struct SkipResponse {
    pub item_id: String,
    pub reason: String,
}

#[tauri::command]
pub async fn index_active_profile(state: tauri::State<'_, AppState>) -> Result<IndexResponse, String> {
    let profile_id = state.active_profile_id()?;
    let settings = state.profiles.load_settings(&profile_id).map_err(|e| e.to_string())?;
    let source_path = settings
        .bibliographic_source_path
        .ok_or_else(|| format!("profile '{profile_id}' has no bibliographic_source_path configured"))?;
    let items = load_bibliographic_items(&source_path)?;

    let (vector_store, sparse_index, embeddings) = state.open_stores(&profile_id).await?;
    let chunker = TextChunker::new(
        state.config.chunking.chunk_size,
        state.config.chunking.chunk_overlap,
        state.config.chunking.min_chunk_size,
    );
    let builder = IndexBuilder::new(vector_store, sparse_index, embeddings, chunker);
    let cancel = IndexBuilder::new_cancel_handle();
    let report = builder.index(&items, &cancel, &NoopProgressSink).await.map_err(|e| e.to_string())?;

    Ok(IndexResponse {
        indexed_items: report.indexed_items,
        total_chunks: report.total_chunks,
        skipped: report
            .skipped
            .into_iter()
            .map(|s| SkipResponse { item_id: s.item_id, reason: s.reason })
            .collect(),
    })
}

#[tauri::command]
pub async fn index_stats(state: tauri::State<'_, AppState>) -> Result<IndexStatsResponse, String> {
    let profile_id = state.active_profile_id()?;
    let settings = state.profiles.load_settings(&profile_id).map_err(|e| e.to_string())?;
    let source_path = settings
        .bibliographic_source_path
        .ok_or_else(|| format!("profile '{profile_id}' has no bibliographic_source_path configured"))?;
    let source_item_count = load_bibliographic_items(&source_path)?.len();

    let (vector_store, sparse_index, embeddings) = state.open_stores(&profile_id).await?;
    let chunker = TextChunker::new(
        state.config.chunking.chunk_size,
        state.config.chunking.chunk_overlap,
        state.config.chunking.min_chunk_size,
    );
    let builder = IndexBuilder::new(vector_store, sparse_index, embeddings, chunker);
    let stats = builder
        .stats(source_item_count, state.config.collection_name())
        .await
        .map_err(|e| e.to_string())?;

    Ok(IndexStatsResponse {
        indexed_items: stats.indexed_items,
        total_chunks: stats.total_chunks,
        source_items: stats.source_items,
        new_items: stats.new_items,
        current_embedding_model: stats.current_embedding_model,
        collection_name: stats.collection_name,
    })
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub question: String,
    pub item_ids: Option<Vec<String>>,
}

#[tauri::command]
pub async fn chat(state: tauri::State<'_, AppState>, request: ChatRequest) -> Result<ChatTurnResult, String> {
    let profile_id = state.active_profile_id()?;
    let settings = state.profiles.load_settings(&profile_id).map_err(|e| e.to_string())?;
    let (vector_store, sparse_index, embeddings) = state.open_stores(&profile_id).await?;
    let reranker = Arc::new(CrossEncoderReranker::new(&state.config.embedding.model_dir).map_err(|e| e.to_string())?);
    let conversations = Arc::new(ConversationStore::new(state.profiles.sessions_dir(&profile_id)));

    let session_id = match request.session_id {
        Some(id) => id,
        None => conversations
            .create_session(
                &request.question,
                "You are a research assistant answering questions about the user's library with cited evidence.",
            )
            .map_err(|e| e.to_string())?
            .id,
    };

    let provider = provider_for_id(&settings.provider_id, &settings.active_model).map_err(|e| e.to_string())?;
    let orchestrator = ChatOrchestrator::new(
        vector_store,
        sparse_index,
        embeddings,
        reranker,
        conversations,
        state.config.search.clone(),
    );

    let filter = request.item_ids.map(|item_ids| MetadataFilter { item_ids: Some(item_ids) });

    orchestrator
        .chat(
            &session_id,
            &request.question,
            provider.as_ref(),
            &settings.generation,
            settings.credentials.as_deref(),
            filter.as_ref(),
        )
        .await
        .map_err(|e| e.to_string())
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
}

#[tauri::command]
pub fn list_profiles(state: tauri::State<'_, AppState>) -> Vec<ProfileResponse> {
    let active = state.profiles.active_profile_id();
    state
        .profiles
        .list()
        .into_iter()
        .map(|p| ProfileResponse {
            active: Some(&p.id) == active.as_ref(),
            id: p.id,
            name: p.name,
            description: p.description,
        })
        .collect()
}

#[tauri::command]
pub fn create_profile(
    state: tauri::State<'_, AppState>,
    id: String,
    name: String,
    description: Option<String>,
) -> Result<(), String> {
    state.profiles.create(&id, &name, description).map_err(|e| e.to_string())?;
    Ok(())
}

#[tauri::command]
pub fn activate_profile(state: tauri::State<'_, AppState>, id: String) -> Result<(), String> {
    state.profiles.activate(&id).map_err(|e| e.to_string())
}

#[tauri::command]
pub fn delete_profile(state: tauri::State<'_, AppState>, id: String, force: bool) -> Result<(), String> {
    state.profiles.delete(&id, force).map_err(|e| e.to_string())
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub message_count: usize,
}

#[tauri::command]
pub fn list_sessions(state: tauri::State<'_, AppState>) -> Result<Vec<SessionSummary>, String> {
    let profile_id = state.active_profile_id()?;
    let conversations = ConversationStore::new(state.profiles.sessions_dir(&profile_id));
    conversations
        .list_sessions()
        .map(|sessions| {
            sessions
                .into_iter()
                .map(|s| SessionSummary { id: s.id, title: s.title, message_count: s.messages.len() })
                .collect()
        })
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub fn delete_session(state: tauri::State<'_, AppState>, id: String) -> Result<(), String> {
    let profile_id = state.active_profile_id()?;
    let conversations = ConversationStore::new(state.profiles.sessions_dir(&profile_id));
    conversations.delete_session(&id).map_err(|e| e.to_string())
}

/// Read an external bibliographic enumerator's output: a JSON array of
/// items at the profile's configured source path. The core never writes
/// to this file — the reference manager is a read-only external
/// collaborator.
fn load_bibliographic_items(path: &std::path::Path) -> Result<Vec<BibliographicItem>, String> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read bibliographic source {}: {e}", path.display()))?;
    serde_json::from_str(&data).map_err(|e| format!("failed to parse bibliographic source {}: {e}", path.display()))
}

pub fn default_profiles_root(app_data_dir: &std::path::Path) -> PathBuf {
    app_data_dir.join("profiles")
}
