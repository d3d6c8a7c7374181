//! Task Executor: dispatches a task type to its handler and folds failures into the outcome.
//!
//! Handlers never panic or propagate past this boundary. A failed handler yields
//! `TaskOutcome { success: false, errors }`; recording that failure with the risk assessor is
//! the orchestrator's job.

mod handlers;

use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::collaborators::Collaborators;
use crate::goals::GoalStore;
use crate::task::TaskType;

pub use handlers::HandlerReport;

/// Reads capped per handler invocation.
pub const RECENT_ITEM_CAP: usize = 50;
pub const SMALL_READ_CAP: usize = 30;

/// Recent-memory window when no previous cycle bounds it.
pub const DEFAULT_RECENT_WINDOW_HOURS: i64 = 24;

/// What a task borrows for the duration of one execution.
pub struct ExecutionContext<'a> {
    pub goals: &'a mut GoalStore,
    pub collaborators: &'a Collaborators,
    /// Recent-memory handlers only read items stamped at or after this instant.
    pub since: DateTime<Utc>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(goals: &'a mut GoalStore, collaborators: &'a Collaborators) -> Self {
        Self {
            goals,
            collaborators,
            since: Utc::now() - Duration::hours(DEFAULT_RECENT_WINDOW_HOURS),
        }
    }

    /// Restricts recent-memory reads to items newer than the previous cycle.
    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = since;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub task_type: Option<TaskType>,
    pub success: bool,
    pub items_processed: usize,
    pub insights_generated: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_summary: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub execution_time_ms: u64,
    pub service_calls: u32,
}

#[derive(Debug, Default)]
pub struct TaskExecutor;

impl TaskExecutor {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute_task(
        &self,
        task_id: &str,
        task_type: TaskType,
        payload: &serde_json::Value,
        ctx: &mut ExecutionContext<'_>,
    ) -> TaskOutcome {
        let started = Instant::now();
        let result = match task_type {
            TaskType::MemoryConsolidation => handlers::memory_consolidation(ctx).await,
            TaskType::PatternAnalysis => handlers::pattern_analysis(ctx).await,
            TaskType::EntityExtraction => handlers::entity_extraction(ctx).await,
            TaskType::GoalResearch => handlers::goal_research(ctx, payload).await,
            TaskType::GoalAnalysis => handlers::goal_analysis(ctx, payload).await,
            TaskType::KbMaintenance => handlers::kb_maintenance(ctx).await,
            TaskType::UserModelUpdate => handlers::user_model_update(ctx).await,
        };
        let execution_time_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(report) => {
                debug!(
                    target: "pagi::executor",
                    task_id = %task_id,
                    task_type = %task_type,
                    items = report.items_processed,
                    insights = report.insights.len(),
                    execution_time_ms,
                    "Task completed"
                );
                TaskOutcome {
                    task_id: task_id.to_string(),
                    task_type: Some(task_type),
                    success: true,
                    items_processed: report.items_processed,
                    insights_generated: report.insights,
                    results_summary: report.summary,
                    errors: Vec::new(),
                    execution_time_ms,
                    service_calls: report.service_calls,
                }
            }
            Err(err) => {
                warn!(
                    target: "pagi::executor",
                    task_id = %task_id,
                    task_type = %task_type,
                    error = %err,
                    "Task failed"
                );
                TaskOutcome {
                    task_id: task_id.to_string(),
                    task_type: Some(task_type),
                    success: false,
                    errors: vec![err.to_string()],
                    execution_time_ms,
                    ..Default::default()
                }
            }
        }
    }
}
