//! The seven background task handlers. Every read is capped; side effects stay in the
//! handler's own domain.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{ExecutionContext, RECENT_ITEM_CAP, SMALL_READ_CAP};
use crate::collaborators::local::content_tokens;
use crate::collaborators::{CollaboratorResult, KbEntity, MemoryItem, NewEntity};
use crate::error::CollaboratorError;

/// Per-cycle ceiling on progress credited by research.
const RESEARCH_PROGRESS_CAP: f64 = 0.1;
const RESEARCH_STEP_PER_HIT: f64 = 0.02;
const RESEARCH_SEARCH_LIMIT: usize = 10;
const RESEARCH_MIN_SIMILARITY: f64 = 0.5;

/// Minimum confidence for a memory to feed consolidation.
const CONSOLIDATION_MIN_CONFIDENCE: f64 = 0.6;
const CONSOLIDATION_MIN_OCCURRENCES: usize = 3;
const CONSOLIDATION_MAX_INSIGHTS: usize = 5;

static INTEREST_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:i (?:really )?(?:like|love|enjoy)|interested in)\s+([^.,!?;\n]{2,40})").ok()
});
static PREFERENCE_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\bi prefer\s+([^.,!?;\n]{2,40})").ok());
static CAPABILITY_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\bi (?:can|know how to|am good at)\s+([^.,!?;\n]{2,40})").ok()
});

/// What a handler did.
#[derive(Debug, Clone, Default)]
pub struct HandlerReport {
    pub items_processed: usize,
    pub insights: Vec<String>,
    pub summary: Option<String>,
    pub service_calls: u32,
}

async fn recent_memory(
    ctx: &ExecutionContext<'_>,
    cap: usize,
    report: &mut HandlerReport,
) -> CollaboratorResult<Vec<MemoryItem>> {
    report.service_calls += 1;
    let mut items = ctx.collaborators.memory.recent_items(ctx.since).await?;
    items.truncate(cap);
    Ok(items)
}

fn goal_id_of(payload: &serde_json::Value) -> CollaboratorResult<String> {
    payload
        .get("goal_id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| CollaboratorError::Failed("payload is missing goal_id".to_string()))
}

/// Frequency of content tokens across items, most frequent first (ties alphabetical).
fn term_frequencies(items: &[MemoryItem]) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for item in items {
        let mut seen: Vec<String> = Vec::new();
        for token in content_tokens(&item.content) {
            if !seen.contains(&token) {
                *counts.entry(token.clone()).or_insert(0) += 1;
                seen.push(token);
            }
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

// -----------------------------------------------------------------------------
// Maintenance handlers
// -----------------------------------------------------------------------------

/// Recurring themes in confident recent memories become `insight` entities.
pub(super) async fn memory_consolidation(
    ctx: &mut ExecutionContext<'_>,
) -> CollaboratorResult<HandlerReport> {
    let mut report = HandlerReport::default();
    let items = recent_memory(ctx, RECENT_ITEM_CAP, &mut report).await?;
    let confident: Vec<MemoryItem> = items
        .into_iter()
        .filter(|i| i.confidence >= CONSOLIDATION_MIN_CONFIDENCE)
        .collect();
    report.items_processed = confident.len();

    let themes: Vec<(String, usize)> = term_frequencies(&confident)
        .into_iter()
        .filter(|(_, n)| *n >= CONSOLIDATION_MIN_OCCURRENCES)
        .take(CONSOLIDATION_MAX_INSIGHTS)
        .collect();

    for (term, occurrences) in themes {
        report.service_calls += 1;
        let existing = ctx.collaborators.knowledge.search(&term, 1).await?;
        if existing.iter().any(|e| e.name.eq_ignore_ascii_case(&term)) {
            continue;
        }
        report.service_calls += 1;
        ctx.collaborators
            .knowledge
            .add_entity(NewEntity {
                entity_type: "insight".to_string(),
                name: term.clone(),
                description: format!("Recurring theme across {} recent memories", occurrences),
                confidence: (occurrences as f64 / confident.len().max(1) as f64).min(1.0),
                source_tags: vec!["memory_consolidation".to_string()],
            })
            .await?;
        report
            .insights
            .push(format!("Consolidated recurring theme '{}' ({} memories)", term, occurrences));
    }
    report.summary = Some(format!(
        "Consolidated {} of {} confident memories",
        report.insights.len(),
        report.items_processed
    ));
    Ok(report)
}

/// Word-frequency scan over recent memory. Read-only.
pub(super) async fn pattern_analysis(
    ctx: &mut ExecutionContext<'_>,
) -> CollaboratorResult<HandlerReport> {
    let mut report = HandlerReport::default();
    let items = recent_memory(ctx, RECENT_ITEM_CAP, &mut report).await?;
    report.items_processed = items.len();
    report.insights = term_frequencies(&items)
        .into_iter()
        .filter(|(_, n)| *n >= 2)
        .take(3)
        .map(|(term, n)| format!("Frequent topic: {} ({} mentions)", term, n))
        .collect();
    report.summary = Some(format!(
        "Analysed {} recent memories, {} patterns",
        report.items_processed,
        report.insights.len()
    ));
    Ok(report)
}

pub(super) async fn entity_extraction(
    ctx: &mut ExecutionContext<'_>,
) -> CollaboratorResult<HandlerReport> {
    let mut report = HandlerReport::default();
    let items = recent_memory(ctx, SMALL_READ_CAP, &mut report).await?;
    let mut found = 0;
    let mut added = 0;
    for item in &items {
        report.service_calls += 1;
        let extraction = ctx.collaborators.extractor.extract_from_text(&item.content).await?;
        found += extraction.entities_found.len();
        added += extraction.new_entities_added;
    }
    report.items_processed = items.len();
    if added > 0 {
        report.insights.push(format!("Discovered {} new entities", added));
    }
    report.summary = Some(format!(
        "Extracted {} entity mentions from {} memories",
        found,
        items.len()
    ));
    Ok(report)
}

/// Merges knowledge-base entities sharing type and name (case-insensitive) into the oldest.
pub(super) async fn kb_maintenance(
    ctx: &mut ExecutionContext<'_>,
) -> CollaboratorResult<HandlerReport> {
    let mut report = HandlerReport::default();
    report.service_calls += 1;
    let entities = ctx.collaborators.knowledge.search("", RECENT_ITEM_CAP).await?;
    report.items_processed = entities.len();

    let mut canonical: HashMap<(String, String), &KbEntity> = HashMap::new();
    let mut merges: Vec<(String, String)> = Vec::new();
    for entity in &entities {
        let key = (entity.entity_type.to_lowercase(), entity.name.to_lowercase());
        match canonical.get(&key) {
            Some(target) => merges.push((entity.id.clone(), target.id.clone())),
            None => {
                canonical.insert(key, entity);
            }
        }
    }

    let mut merged = 0;
    for (source, target) in merges {
        report.service_calls += 1;
        ctx.collaborators.knowledge.merge_entities(&source, &target).await?;
        merged += 1;
    }
    if merged > 0 {
        report.insights.push(format!("Merged {} duplicate entities", merged));
    }
    report.summary = Some(format!(
        "Checked {} entities, merged {} duplicates",
        entities.len(),
        merged
    ));
    Ok(report)
}

/// Picks up stated interests, preferences and capabilities from recent memory.
pub(super) async fn user_model_update(
    ctx: &mut ExecutionContext<'_>,
) -> CollaboratorResult<HandlerReport> {
    let mut report = HandlerReport::default();
    let items = recent_memory(ctx, SMALL_READ_CAP, &mut report).await?;
    report.items_processed = items.len();

    let model = &ctx.collaborators.user_model;
    for item in &items {
        for topic in captures(&INTEREST_PATTERN, &item.content) {
            report.service_calls += 1;
            model.add_interest(&topic, item.confidence).await?;
            report.insights.push(format!("Interest: {}", topic));
        }
        for choice in captures(&PREFERENCE_PATTERN, &item.content) {
            report.service_calls += 1;
            model.add_preference(&choice, "preferred").await?;
            report.insights.push(format!("Preference: {}", choice));
        }
        for skill in captures(&CAPABILITY_PATTERN, &item.content) {
            report.service_calls += 1;
            model.add_capability(&skill, item.confidence).await?;
            report.insights.push(format!("Capability: {}", skill));
        }
    }
    report.summary = Some(format!(
        "Updated user model with {} observations from {} memories",
        report.insights.len(),
        items.len()
    ));
    Ok(report)
}

fn captures(pattern: &Lazy<Option<Regex>>, text: &str) -> Vec<String> {
    let Some(re) = pattern.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

// -----------------------------------------------------------------------------
// Goal-directed handlers
// -----------------------------------------------------------------------------

/// Searches memory for evidence on a goal, links the hits and credits up to +0.1 progress.
pub(super) async fn goal_research(
    ctx: &mut ExecutionContext<'_>,
    payload: &serde_json::Value,
) -> CollaboratorResult<HandlerReport> {
    let goal_id = goal_id_of(payload)?;
    let goal = ctx
        .goals
        .get(&goal_id)
        .cloned()
        .ok_or_else(|| CollaboratorError::Failed(format!("goal not found: {}", goal_id)))?;

    let mut report = HandlerReport::default();
    let query = format!("{} {}", goal.title, goal.description);
    report.service_calls += 1;
    let hits = ctx
        .collaborators
        .memory
        .search_semantic(&query, RESEARCH_SEARCH_LIMIT, RESEARCH_MIN_SIMILARITY)
        .await?;
    report.items_processed = hits.len();

    let fresh: Vec<_> = hits
        .iter()
        .filter(|h| !goal.linked_memories.contains(&h.id))
        .collect();
    let credit: f64 = fresh
        .iter()
        .map(|h| h.similarity * h.confidence * RESEARCH_STEP_PER_HIT)
        .sum::<f64>()
        .min(RESEARCH_PROGRESS_CAP);

    let linked = ctx
        .goals
        .link_memories(&goal_id, fresh.iter().map(|h| h.id.clone()).collect())
        .map_err(|e| CollaboratorError::Failed(e.to_string()))?;

    if credit > 0.0 && !goal.status.is_terminal() {
        let note = format!("research found {} new supporting memories", fresh.len());
        let updated = ctx
            .goals
            .update_progress(&goal_id, goal.progress + credit, Some(&note))
            .map_err(|e| CollaboratorError::Failed(e.to_string()))?;
        report.insights.push(format!(
            "Goal '{}' advanced to {:.0}%",
            updated.title,
            updated.progress * 100.0
        ));
    }
    report.summary = Some(format!(
        "Research on '{}': {} hits, {} newly linked",
        goal.title,
        hits.len(),
        linked
    ));
    Ok(report)
}

/// Links the most-mentioned entities that appear in the goal's wording.
pub(super) async fn goal_analysis(
    ctx: &mut ExecutionContext<'_>,
    payload: &serde_json::Value,
) -> CollaboratorResult<HandlerReport> {
    let goal_id = goal_id_of(payload)?;
    let goal = ctx
        .goals
        .get(&goal_id)
        .cloned()
        .ok_or_else(|| CollaboratorError::Failed(format!("goal not found: {}", goal_id)))?;

    let mut report = HandlerReport::default();
    report.service_calls += 1;
    let top = ctx.collaborators.extractor.top_entities(SMALL_READ_CAP).await?;
    report.items_processed = top.len();

    let wording = format!("{} {}", goal.title, goal.description).to_lowercase();
    let related: Vec<String> = top
        .into_iter()
        .filter(|m| wording.contains(&m.name.to_lowercase()))
        .map(|m| m.name)
        .collect();
    let linked = ctx
        .goals
        .link_entities(&goal_id, related.clone())
        .map_err(|e| CollaboratorError::Failed(e.to_string()))?;

    if linked > 0 {
        report
            .insights
            .push(format!("Linked {} related entities to '{}'", linked, goal.title));
    } else if goal.linked_entities.is_empty() && related.is_empty() {
        report.insights.push(format!(
            "Goal '{}' has no related entities in recent context",
            goal.title
        ));
    }
    report.summary = Some(format!(
        "Analysed '{}' against {} known entities",
        goal.title, report.items_processed
    ));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Collaborators;
    use crate::executor::TaskExecutor;
    use crate::goals::{GoalOptions, GoalSource, GoalStore};
    use crate::task::TaskType;
    use serde_json::json;

    #[tokio::test]
    async fn research_links_memories_and_caps_progress() {
        let (collaborators, memory) = Collaborators::in_process();
        for i in 0..8 {
            memory.remember(format!("Rust book chapter {} drafted", i), 1.0);
        }
        let mut goals = GoalStore::new();
        let goal = goals
            .create("Rust book chapter", "", GoalSource::User, GoalOptions::default())
            .unwrap();

        let mut ctx = ExecutionContext::new(&mut goals, &collaborators);
        let outcome = TaskExecutor::new()
            .execute_task("t", TaskType::GoalResearch, &json!({"goal_id": goal.id}), &mut ctx)
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.items_processed, 8);
        let after = goals.get(&goal.id).unwrap();
        assert_eq!(after.linked_memories.len(), 8);
        assert!(after.progress > 0.0 && after.progress <= 0.1 + 1e-9);
    }

    #[tokio::test]
    async fn missing_goal_fails_without_panicking() {
        let (collaborators, _) = Collaborators::in_process();
        let mut goals = GoalStore::new();
        let mut ctx = ExecutionContext::new(&mut goals, &collaborators);
        let outcome = TaskExecutor::new()
            .execute_task("t", TaskType::GoalAnalysis, &json!({}), &mut ctx)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[tokio::test]
    async fn kb_maintenance_merges_duplicates() {
        let (collaborators, _) = Collaborators::in_process();
        for name in ["Phoenix", "phoenix", "Mimir"] {
            collaborators
                .knowledge
                .add_entity(NewEntity {
                    entity_type: "project".into(),
                    name: name.into(),
                    description: String::new(),
                    confidence: 0.5,
                    source_tags: Vec::new(),
                })
                .await
                .unwrap();
        }
        let mut goals = GoalStore::new();
        let mut ctx = ExecutionContext::new(&mut goals, &collaborators);
        let outcome = TaskExecutor::new()
            .execute_task("t", TaskType::KbMaintenance, &json!(null), &mut ctx)
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.items_processed, 3);
        assert_eq!(outcome.service_calls, 2);
        assert_eq!(collaborators.knowledge.search("", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn user_model_update_reads_stated_preferences() {
        let (collaborators, memory) = Collaborators::in_process();
        memory.remember("I really like trail running. I prefer dark mode", 0.8);
        let mut goals = GoalStore::new();
        let mut ctx = ExecutionContext::new(&mut goals, &collaborators);
        let outcome = TaskExecutor::new()
            .execute_task("t", TaskType::UserModelUpdate, &json!(null), &mut ctx)
            .await;
        assert!(outcome.success);
        assert!(outcome.insights_generated.contains(&"Interest: trail running".to_string()));
        assert_eq!(
            collaborators.user_model.get_preference("dark mode").await.unwrap().as_deref(),
            Some("preferred")
        );
    }

    #[tokio::test]
    async fn goal_analysis_links_mentioned_entities() {
        let (collaborators, _) = Collaborators::in_process();
        collaborators
            .extractor
            .extract_from_text("Phoenix release notes mention Mimir")
            .await
            .unwrap();
        let mut goals = GoalStore::new();
        let goal = goals
            .create("Ship Phoenix", "", GoalSource::User, GoalOptions::default())
            .unwrap();
        let mut ctx = ExecutionContext::new(&mut goals, &collaborators);
        let outcome = TaskExecutor::new()
            .execute_task("t", TaskType::GoalAnalysis, &json!({"goal_id": goal.id}), &mut ctx)
            .await;
        assert!(outcome.success);
        assert_eq!(goals.get(&goal.id).unwrap().linked_entities, vec!["Phoenix"]);
    }

    #[tokio::test]
    async fn recent_memory_reads_start_at_since() {
        let (collaborators, memory) = Collaborators::in_process();
        memory.remember_at(
            "Phoenix kickoff notes",
            0.8,
            chrono::Utc::now() - chrono::Duration::hours(2),
        );
        let mut goals = GoalStore::new();
        let mut ctx = ExecutionContext::new(&mut goals, &collaborators)
            .with_since(chrono::Utc::now() - chrono::Duration::hours(1));
        let outcome = TaskExecutor::new()
            .execute_task("e", TaskType::EntityExtraction, &json!(null), &mut ctx)
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.items_processed, 0);
        assert!(collaborators.extractor.top_entities(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn consolidation_and_patterns_report_themes() {
        let (collaborators, memory) = Collaborators::in_process();
        for _ in 0..3 {
            memory.remember("budget review meeting", 0.9);
        }
        let mut goals = GoalStore::new();
        let mut ctx = ExecutionContext::new(&mut goals, &collaborators);
        let executor = TaskExecutor::new();
        let consolidation = executor
            .execute_task("c", TaskType::MemoryConsolidation, &json!(null), &mut ctx)
            .await;
        assert!(consolidation.success);
        assert_eq!(consolidation.insights_generated.len(), 3);
        let patterns = executor
            .execute_task("p", TaskType::PatternAnalysis, &json!(null), &mut ctx)
            .await;
        assert_eq!(patterns.items_processed, 3);
        assert_eq!(patterns.insights_generated.len(), 3);
    }
}
