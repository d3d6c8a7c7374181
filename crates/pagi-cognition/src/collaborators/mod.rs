//! Contracts for the services the cycle consumes but does not own.
//!
//! Memory tiers, the knowledge base, the entity extractor and the user model live outside
//! this crate. Each is an async trait object so the orchestrator can run against remote
//! services or the in-process implementations in [`local`].

pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

pub use local::{LocalKnowledgeBase, LocalUserModel, PatternEntityExtractor, WorkingMemory};

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// A semantic search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub id: String,
    pub content: String,
    /// Similarity to the query (0.0 to 1.0).
    pub similarity: f64,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
}

/// A recent working-memory item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub content: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KbEntity {
    pub id: String,
    pub entity_type: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub confidence: f64,
    #[serde(default)]
    pub source_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Arguments for [`KnowledgeBase::add_entity`].
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub entity_type: String,
    pub name: String,
    pub description: String,
    pub confidence: f64,
    pub source_tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub entities_found: Vec<String>,
    pub new_entities_added: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMention {
    pub name: String,
    pub mentions: u64,
}

#[async_trait]
pub trait MemoryReader: Send + Sync {
    /// Hits with `similarity >= min_similarity`, best first, at most `limit`.
    async fn search_semantic(
        &self,
        query: &str,
        limit: usize,
        min_similarity: f64,
    ) -> CollaboratorResult<Vec<MemoryHit>>;

    /// Items recorded at or after `since`, newest first.
    async fn recent_items(&self, since: DateTime<Utc>) -> CollaboratorResult<Vec<MemoryItem>>;
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Case-insensitive name search. An empty name matches every entity.
    async fn search(&self, name: &str, limit: usize) -> CollaboratorResult<Vec<KbEntity>>;

    async fn add_entity(&self, entity: NewEntity) -> CollaboratorResult<KbEntity>;

    /// Folds `source_id` into `target_id` and removes the source.
    async fn merge_entities(&self, source_id: &str, target_id: &str)
        -> CollaboratorResult<KbEntity>;
}

#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract_from_text(&self, text: &str) -> CollaboratorResult<ExtractionReport>;

    /// Most-mentioned entities first.
    async fn top_entities(&self, limit: usize) -> CollaboratorResult<Vec<EntityMention>>;
}

#[async_trait]
pub trait UserModel: Send + Sync {
    async fn add_interest(&self, topic: &str, confidence: f64) -> CollaboratorResult<()>;
    async fn add_capability(&self, capability: &str, confidence: f64) -> CollaboratorResult<()>;
    async fn add_preference(&self, key: &str, value: &str) -> CollaboratorResult<()>;
    async fn get_preference(&self, key: &str) -> CollaboratorResult<Option<String>>;
}

/// The collaborator set handed to the orchestrator and lent to each task.
#[derive(Clone)]
pub struct Collaborators {
    pub memory: Arc<dyn MemoryReader>,
    pub knowledge: Arc<dyn KnowledgeBase>,
    pub extractor: Arc<dyn EntityExtractor>,
    pub user_model: Arc<dyn UserModel>,
}

impl Collaborators {
    pub fn new(
        memory: Arc<dyn MemoryReader>,
        knowledge: Arc<dyn KnowledgeBase>,
        extractor: Arc<dyn EntityExtractor>,
        user_model: Arc<dyn UserModel>,
    ) -> Self {
        Self {
            memory,
            knowledge,
            extractor,
            user_model,
        }
    }

    /// All in-process implementations. The working memory is returned separately so the
    /// caller can feed it.
    pub fn in_process() -> (Self, Arc<WorkingMemory>) {
        let memory = Arc::new(WorkingMemory::new());
        let collaborators = Self::new(
            memory.clone(),
            Arc::new(LocalKnowledgeBase::new()),
            Arc::new(PatternEntityExtractor::new()),
            Arc::new(LocalUserModel::new()),
        );
        (collaborators, memory)
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryReader>) -> Self {
        self.memory = memory;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
