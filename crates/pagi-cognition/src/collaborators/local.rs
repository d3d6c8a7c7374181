//! In-process collaborators backed by `DashMap`.
//!
//! These stand in for the embedding service, knowledge base, extractor and user model when
//! the daemon runs standalone. Similarity is lexical token overlap, not embeddings.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;
use uuid::Uuid;

use super::{
    CollaboratorResult, EntityExtractor, EntityMention, ExtractionReport, KbEntity, KnowledgeBase,
    MemoryHit, MemoryItem, MemoryReader, NewEntity, UserModel,
};
use crate::error::CollaboratorError;

/// Capitalised phrases ("Rust", "Project Phoenix").
static ENTITY_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\b[A-Z][a-zA-Z0-9]+(?:\s+[A-Z][a-zA-Z0-9]+)*\b").ok());

/// Words that open sentences but are not entities.
const ENTITY_STOPWORDS: &[&str] = &[
    "The", "This", "That", "These", "Those", "I", "It", "A", "An", "We", "My", "Our", "You",
    "He", "She", "They", "But", "And", "Then", "When", "If", "So", "Today", "Yesterday",
];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "have", "has", "was", "are", "were",
    "but", "not", "you", "your", "our", "its", "into", "about", "will", "would", "should",
    "can", "could", "been", "being", "they", "them", "their", "there", "what", "which", "when",
    "where", "who", "how", "all", "any", "some", "more", "most", "also", "just", "than",
    "then", "very", "like", "want", "need",
];

/// Lower-cased content words of at least three characters, in order of appearance.
pub fn content_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Overlap coefficient of the two token sets: `|a ∩ b| / min(|a|, |b|)`.
pub fn token_similarity(a: &str, b: &str) -> f64 {
    let a: HashSet<String> = content_tokens(a).into_iter().collect();
    let b: HashSet<String> = content_tokens(b).into_iter().collect();
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / smaller as f64
}

// -----------------------------------------------------------------------------
// Working memory
// -----------------------------------------------------------------------------

/// Short-term memory tier: recent observations with a confidence.
#[derive(Debug, Default)]
pub struct WorkingMemory {
    items: DashMap<String, MemoryItem>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, content: impl Into<String>, confidence: f64) -> String {
        self.remember_at(content, confidence, Utc::now())
    }

    pub fn remember_at(
        &self,
        content: impl Into<String>,
        confidence: f64,
        timestamp: DateTime<Utc>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        self.items.insert(
            id.clone(),
            MemoryItem {
                id: id.clone(),
                content: content.into(),
                confidence: confidence.clamp(0.0, 1.0),
                timestamp,
            },
        );
        id
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drops items older than `cutoff`. Returns how many were removed.
    pub fn forget_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.items.len();
        self.items.retain(|_, item| item.timestamp >= cutoff);
        before - self.items.len()
    }

    /// Remembers every non-empty line until EOF at `confidence`. Items older than
    /// `retention` are forgotten as new lines arrive. Returns the number of lines stored.
    pub async fn ingest_lines<R>(
        &self,
        reader: R,
        confidence: f64,
        retention: chrono::Duration,
    ) -> std::io::Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut stored = 0;
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.remember(line, confidence);
            stored += 1;
            let forgotten = self.forget_before(Utc::now() - retention);
            debug!(target: "pagi::memory", stored, forgotten, "Working memory line ingested");
        }
        Ok(stored)
    }
}

#[async_trait]
impl MemoryReader for WorkingMemory {
    async fn search_semantic(
        &self,
        query: &str,
        limit: usize,
        min_similarity: f64,
    ) -> CollaboratorResult<Vec<MemoryHit>> {
        let mut hits: Vec<MemoryHit> = self
            .items
            .iter()
            .filter_map(|entry| {
                let item = entry.value();
                let similarity = token_similarity(query, &item.content);
                (similarity >= min_similarity).then(|| MemoryHit {
                    id: item.id.clone(),
                    content: item.content.clone(),
                    similarity,
                    timestamp: item.timestamp,
                    confidence: item.confidence,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn recent_items(&self, since: DateTime<Utc>) -> CollaboratorResult<Vec<MemoryItem>> {
        let mut items: Vec<MemoryItem> = self
            .items
            .iter()
            .filter(|entry| entry.value().timestamp >= since)
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(items)
    }
}

// -----------------------------------------------------------------------------
// Knowledge base
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct LocalKnowledgeBase {
    entities: DashMap<String, KbEntity>,
}

impl LocalKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<KbEntity> {
        self.entities.get(id).map(|e| e.value().clone())
    }
}

#[async_trait]
impl KnowledgeBase for LocalKnowledgeBase {
    async fn search(&self, name: &str, limit: usize) -> CollaboratorResult<Vec<KbEntity>> {
        let needle = name.trim().to_lowercase();
        let mut found: Vec<KbEntity> = self
            .entities
            .iter()
            .filter(|entry| needle.is_empty() || entry.value().name.to_lowercase().contains(&needle))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        found.truncate(limit);
        Ok(found)
    }

    async fn add_entity(&self, entity: NewEntity) -> CollaboratorResult<KbEntity> {
        if entity.name.trim().is_empty() {
            return Err(CollaboratorError::rejected("knowledge_base", "entity name is empty"));
        }
        let record = KbEntity {
            id: Uuid::new_v4().to_string(),
            entity_type: entity.entity_type,
            name: entity.name.trim().to_string(),
            description: entity.description,
            confidence: entity.confidence.clamp(0.0, 1.0),
            source_tags: entity.source_tags,
            created_at: Utc::now(),
        };
        self.entities.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn merge_entities(
        &self,
        source_id: &str,
        target_id: &str,
    ) -> CollaboratorResult<KbEntity> {
        if source_id == target_id {
            return Err(CollaboratorError::rejected(
                "knowledge_base",
                "cannot merge an entity into itself",
            ));
        }
        if !self.entities.contains_key(target_id) {
            return Err(CollaboratorError::rejected(
                "knowledge_base",
                format!("unknown target entity {}", target_id),
            ));
        }
        let (_, source) = self.entities.remove(source_id).ok_or_else(|| {
            CollaboratorError::rejected("knowledge_base", format!("unknown source entity {}", source_id))
        })?;

        let mut target = self.entities.get_mut(target_id).ok_or_else(|| {
            CollaboratorError::rejected("knowledge_base", format!("unknown target entity {}", target_id))
        })?;
        target.confidence = target.confidence.max(source.confidence);
        if target.description.is_empty() {
            target.description = source.description;
        }
        for tag in source.source_tags {
            if !target.source_tags.contains(&tag) {
                target.source_tags.push(tag);
            }
        }
        Ok(target.value().clone())
    }
}

// -----------------------------------------------------------------------------
// Entity extractor
// -----------------------------------------------------------------------------

/// Counts capitalised phrases as entity mentions.
#[derive(Debug, Default)]
pub struct PatternEntityExtractor {
    mentions: DashMap<String, u64>,
}

impl PatternEntityExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mentions_of(&self, name: &str) -> u64 {
        self.mentions.get(name).map(|m| *m).unwrap_or(0)
    }
}

/// Capitalised phrases in `text`, stopwords removed, first occurrence order, deduplicated.
pub fn find_entities(text: &str) -> Vec<String> {
    let Some(pattern) = ENTITY_PATTERN.as_ref() else {
        return Vec::new();
    };
    let mut found: Vec<String> = Vec::new();
    for m in pattern.find_iter(text) {
        let words: Vec<&str> = m
            .as_str()
            .split_whitespace()
            .skip_while(|w| ENTITY_STOPWORDS.contains(w))
            .collect();
        if words.is_empty() {
            continue;
        }
        let name = words.join(" ");
        if !found.contains(&name) {
            found.push(name);
        }
    }
    found
}

#[async_trait]
impl EntityExtractor for PatternEntityExtractor {
    async fn extract_from_text(&self, text: &str) -> CollaboratorResult<ExtractionReport> {
        let entities_found = find_entities(text);
        let mut new_entities_added = 0;
        for name in &entities_found {
            let mut count = self.mentions.entry(name.clone()).or_insert(0);
            if *count == 0 {
                new_entities_added += 1;
            }
            *count += 1;
        }
        Ok(ExtractionReport {
            entities_found,
            new_entities_added,
        })
    }

    async fn top_entities(&self, limit: usize) -> CollaboratorResult<Vec<EntityMention>> {
        let mut top: Vec<EntityMention> = self
            .mentions
            .iter()
            .map(|entry| EntityMention {
                name: entry.key().clone(),
                mentions: *entry.value(),
            })
            .collect();
        top.sort_by(|a, b| b.mentions.cmp(&a.mentions).then_with(|| a.name.cmp(&b.name)));
        top.truncate(limit);
        Ok(top)
    }
}

// -----------------------------------------------------------------------------
// User model
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct LocalUserModel {
    interests: DashMap<String, f64>,
    capabilities: DashMap<String, f64>,
    preferences: DashMap<String, String>,
}

impl LocalUserModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interests sorted by confidence, strongest first.
    pub fn interests(&self) -> Vec<(String, f64)> {
        let mut out: Vec<(String, f64)> = self
            .interests
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        out
    }

    pub fn capability(&self, name: &str) -> Option<f64> {
        self.capabilities.get(&name.to_lowercase()).map(|c| *c)
    }
}

/// Repeated observations strengthen an existing entry instead of overwriting it.
fn reinforce(map: &DashMap<String, f64>, key: &str, confidence: f64) {
    let key = key.trim().to_lowercase();
    if key.is_empty() {
        return;
    }
    let confidence = confidence.clamp(0.0, 1.0);
    map.entry(key)
        .and_modify(|c| *c = (*c + (1.0 - *c) * confidence * 0.5).min(1.0))
        .or_insert(confidence);
}

#[async_trait]
impl UserModel for LocalUserModel {
    async fn add_interest(&self, topic: &str, confidence: f64) -> CollaboratorResult<()> {
        reinforce(&self.interests, topic, confidence);
        Ok(())
    }

    async fn add_capability(&self, capability: &str, confidence: f64) -> CollaboratorResult<()> {
        reinforce(&self.capabilities, capability, confidence);
        Ok(())
    }

    async fn add_preference(&self, key: &str, value: &str) -> CollaboratorResult<()> {
        let key = key.trim().to_lowercase();
        if key.is_empty() {
            return Err(CollaboratorError::rejected("user_model", "preference key is empty"));
        }
        self.preferences.insert(key, value.trim().to_string());
        Ok(())
    }

    async fn get_preference(&self, key: &str) -> CollaboratorResult<Option<String>> {
        Ok(self
            .preferences
            .get(&key.trim().to_lowercase())
            .map(|v| v.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn semantic_search_ranks_by_overlap() {
        let memory = WorkingMemory::new();
        memory.remember("Drafted the chapter outline for the Rust book", 0.9);
        memory.remember("Bought groceries", 0.8);
        let hits = memory
            .search_semantic("Finish the Rust book chapter", 10, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("Rust book"));
    }

    #[tokio::test]
    async fn recent_items_respects_cutoff() {
        let memory = WorkingMemory::new();
        let now = Utc::now();
        memory.remember_at("old note", 0.5, now - Duration::days(3));
        memory.remember_at("new note", 0.5, now);
        let items = memory.recent_items(now - Duration::days(1)).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "new note");
        assert_eq!(memory.forget_before(now - Duration::days(1)), 1);
    }

    #[tokio::test]
    async fn ingest_lines_skips_blanks_and_expires_old_items() {
        let memory = WorkingMemory::new();
        memory.remember_at("stale note", 0.5, Utc::now() - Duration::days(30));
        let input: &[u8] = b"Phoenix launch checklist reviewed\n\n   \nI prefer dark mode\n";
        let stored = memory
            .ingest_lines(input, 0.8, Duration::days(7))
            .await
            .unwrap();
        assert_eq!(stored, 2);
        assert_eq!(memory.len(), 2);
        let items = memory.recent_items(Utc::now() - Duration::hours(1)).await.unwrap();
        assert!(items.iter().all(|i| i.confidence == 0.8));
    }

    #[tokio::test]
    async fn kb_merge_folds_tags_and_removes_source() {
        let kb = LocalKnowledgeBase::new();
        let new = |tag: &str| NewEntity {
            entity_type: "project".into(),
            name: "Phoenix".into(),
            description: String::new(),
            confidence: 0.6,
            source_tags: vec![tag.to_string()],
        };
        let a = kb.add_entity(new("chat")).await.unwrap();
        let b = kb.add_entity(new("email")).await.unwrap();
        let merged = kb.merge_entities(&b.id, &a.id).await.unwrap();
        assert_eq!(merged.source_tags, vec!["chat", "email"]);
        assert_eq!(kb.len(), 1);
        assert!(kb.merge_entities(&b.id, &a.id).await.is_err());
        assert_eq!(kb.search("", 10).await.unwrap().len(), 1);
        assert_eq!(kb.search("phoe", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn extractor_counts_mentions() {
        let extractor = PatternEntityExtractor::new();
        let first = extractor
            .extract_from_text("The Rust team met Project Phoenix leads.")
            .await
            .unwrap();
        assert_eq!(first.entities_found, vec!["Rust", "Project Phoenix"]);
        assert_eq!(first.new_entities_added, 2);
        let second = extractor.extract_from_text("Rust again").await.unwrap();
        assert_eq!(second.new_entities_added, 0);
        let top = extractor.top_entities(1).await.unwrap();
        assert_eq!(top[0].name, "Rust");
        assert_eq!(top[0].mentions, 2);
    }

    #[tokio::test]
    async fn user_model_reinforces_interests() {
        let model = LocalUserModel::new();
        model.add_interest("Hiking", 0.6).await.unwrap();
        model.add_interest("hiking", 0.6).await.unwrap();
        let interests = model.interests();
        assert_eq!(interests.len(), 1);
        assert!(interests[0].1 > 0.6);
        model.add_preference("Editor", "helix").await.unwrap();
        assert_eq!(model.get_preference("editor").await.unwrap().as_deref(), Some("helix"));
        assert!(model.add_preference("  ", "x").await.is_err());
    }

    #[test]
    fn similarity_ignores_stopwords() {
        assert_eq!(token_similarity("the and for", "the and for"), 0.0);
        assert_eq!(token_similarity("rust book", "Rust book draft"), 1.0);
    }
}
