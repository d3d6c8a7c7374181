//! Cycle Orchestrator: one evaluate-then-execute pass over goals, risk, budget and tasks.
//!
//! ## Cycle steps
//!
//! 1. Fetch active goals.
//! 2. Gather evidence per goal (semantic hits + entity mentions in recent memory), apply a
//!    progress delta capped at 0.15, complete on confidence ≥ 0.9 and progress ≥ 0.95.
//! 3. Stall sweep.
//! 4. Autonomy adjustment per goal.
//! 5. Budget allocation.
//! 6. Candidate generation from urgent / low-progress goals with enough autonomy, plus
//!    maintenance work.
//! 7. Risk assessment per candidate type. A type skipped by risk for more than
//!    `risk_retry_after_cycles` consecutive cycles gets one throttled retry.
//! 8. Scoring and queue building.
//! 9. Sequential execution while the budget allows.
//! 10. Budget close.
//! 11. Aggregate [`CycleResult`].
//!
//! `evaluate_cycle` never fails: unexpected errors are recorded on the result and the state
//! folds back to `Idle`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::budget::{BudgetAllocator, CycleStats, TaskCost};
use crate::collaborators::{Collaborators, MemoryHit, MemoryItem};
use crate::config::CognitionConfig;
use crate::error::CognitionResult;
use crate::executor::{ExecutionContext, TaskExecutor, TaskOutcome, RECENT_ITEM_CAP};
use crate::goals::{Goal, GoalStatus, GoalStore};
use crate::persistence::CycleJournal;
use crate::risk::{MitigationStrategy, RiskAssessment, RiskAssessor, SystemHealth};
use crate::scheduler::{PriorityScheduler, SchedulingContext, SkipReason};
use crate::task::{CandidateTask, TaskType};

/// Largest progress change evidence may cause in one cycle.
pub const MAX_EVIDENCE_DELTA: f64 = 0.15;
pub const COMPLETION_CONFIDENCE: f64 = 0.9;
pub const COMPLETION_PROGRESS: f64 = 0.95;

/// Goals below this progress get tasks even when not urgent.
const LOW_PROGRESS: f64 = 0.5;
const DELTA_PER_HIT: f64 = 0.03;
const DELTA_PER_MENTION: f64 = 0.01;
/// Confidence assigned to evidence made only of entity mentions.
const MENTION_ONLY_CONFIDENCE: f64 = 0.5;
/// Window for the first cycle's recent-memory scan.
const INITIAL_EVIDENCE_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Evaluating,
    Executing,
}

/// One evidence-driven progress change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub goal_id: String,
    pub title: String,
    pub previous_progress: f64,
    pub new_progress: f64,
    pub confidence: f64,
    pub evidence_hits: usize,
    pub entity_mentions: usize,
    pub completed: bool,
}

/// Aggregate outcome of one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,

    pub goals_evaluated: usize,
    pub goals_completed: usize,
    pub goals_stalled: usize,
    pub progress_updates: Vec<ProgressUpdate>,
    pub autonomy_adjustments: usize,

    pub tasks_candidate: usize,
    pub tasks_executed: usize,
    pub tasks_failed: usize,
    pub tasks_skipped_due_to_risk: usize,
    pub tasks_skipped_due_to_budget: usize,
    pub tasks_throttled: usize,
    /// Task types admitted for a retry despite a `skip` assessment.
    #[serde(default)]
    pub risk_retries: usize,
    #[serde(default)]
    pub task_outcomes: Vec<TaskOutcome>,

    pub budget_allocated: f64,
    pub budget_used: f64,
    pub budget_utilization_percent: f64,

    pub risk_summary: String,
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CycleResult {
    fn empty(cycle_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id,
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            goals_evaluated: 0,
            goals_completed: 0,
            goals_stalled: 0,
            progress_updates: Vec::new(),
            autonomy_adjustments: 0,
            tasks_candidate: 0,
            tasks_executed: 0,
            tasks_failed: 0,
            tasks_skipped_due_to_risk: 0,
            tasks_skipped_due_to_budget: 0,
            tasks_throttled: 0,
            risk_retries: 0,
            task_outcomes: Vec::new(),
            budget_allocated: 0.0,
            budget_used: 0.0,
            budget_utilization_percent: 0.0,
            risk_summary: String::new(),
            recommendations: Vec::new(),
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub cycles_run: u64,
    pub cycles_with_errors: u64,
    pub total_tasks_executed: u64,
    pub total_tasks_failed: u64,
    pub total_goals_completed: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// Evidence gathered for one goal.
struct Evidence {
    hits: Vec<MemoryHit>,
    mentions: usize,
}

pub struct CycleOrchestrator {
    config: CognitionConfig,
    state: CycleState,
    goals: GoalStore,
    risk: RiskAssessor,
    budget: BudgetAllocator,
    scheduler: PriorityScheduler,
    executor: TaskExecutor,
    collaborators: Collaborators,
    journal: Option<Arc<dyn CycleJournal>>,
    history: VecDeque<CycleResult>,
    stats: OrchestratorStats,
    /// Start of the previous cycle; recent-memory scans begin here.
    evidence_since: Option<DateTime<Utc>>,
    /// Consecutive cycles each task type has been assessed `skip`.
    risk_skip_streak: HashMap<TaskType, u32>,
}

impl CycleOrchestrator {
    pub fn new(config: CognitionConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            state: CycleState::Idle,
            goals: GoalStore::new(),
            risk: RiskAssessor::new(),
            budget: BudgetAllocator::new(),
            scheduler: PriorityScheduler::new(),
            executor: TaskExecutor::new(),
            collaborators,
            journal: None,
            history: VecDeque::new(),
            stats: OrchestratorStats::default(),
            evidence_since: None,
            risk_skip_streak: HashMap::new(),
        }
    }

    pub fn with_journal(mut self, journal: Arc<dyn CycleJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_goals(mut self, goals: GoalStore) -> Self {
        self.goals = goals;
        self
    }

    // -------------------------------------------------------------------------
    // Read-only accessors
    // -------------------------------------------------------------------------

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn config(&self) -> &CognitionConfig {
        &self.config
    }

    pub fn goals(&self) -> &GoalStore {
        &self.goals
    }

    /// Mutable goal access between cycles (creating goals, manual transitions).
    pub fn goals_mut(&mut self) -> &mut GoalStore {
        &mut self.goals
    }

    pub fn risk(&self) -> &RiskAssessor {
        &self.risk
    }

    pub fn budget(&self) -> &BudgetAllocator {
        &self.budget
    }

    pub fn scheduler(&self) -> &PriorityScheduler {
        &self.scheduler
    }

    pub fn last_evaluation(&self) -> Option<&CycleResult> {
        self.history.back()
    }

    /// Most recent cycle results, newest first.
    pub fn evaluation_history(&self, limit: usize) -> Vec<CycleResult> {
        self.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.stats.clone()
    }

    pub fn system_health(&self) -> SystemHealth {
        self.risk.get_system_health()
    }

    pub fn cycle_stats(&self, cycle_id: &str) -> Option<CycleStats> {
        self.budget.get_cycle_stats(cycle_id)
    }

    // -------------------------------------------------------------------------
    // Cycle
    // -------------------------------------------------------------------------

    /// Runs one full cycle. Never fails; see [`CycleResult::error`].
    pub async fn evaluate_cycle(&mut self) -> CycleResult {
        let started_at = Utc::now();
        let cycle_id = format!("cycle-{}", Uuid::new_v4().simple());
        let mut result = CycleResult::empty(cycle_id.clone(), started_at);

        let before: HashMap<String, (DateTime<Utc>, GoalStatus)> = self
            .goals
            .list()
            .into_iter()
            .map(|g| (g.id, (g.updated_at, g.status)))
            .collect();

        info!(target: "pagi::cycle", cycle_id = %cycle_id, "Cognitive cycle started");
        if let Err(err) = self.run_cycle(&cycle_id, started_at, &mut result).await {
            error!(target: "pagi::cycle", cycle_id = %cycle_id, error = %err, "Cycle aborted");
            result.error = Some(err.to_string());
            // Keep the ledger bounded even when the cycle stopped early.
            if self.budget.allocation(&cycle_id).is_some() {
                let _ = self.budget.close_cycle(&cycle_id);
            }
        }
        self.state = CycleState::Idle;
        self.evidence_since = Some(started_at);

        let touched: Vec<Goal> = self
            .goals
            .list()
            .into_iter()
            .filter(|g| before.get(&g.id).map(|(t, _)| *t) != Some(g.updated_at))
            .collect();
        result.goals_completed = touched
            .iter()
            .filter(|g| {
                g.status == GoalStatus::Completed
                    && before.get(&g.id).map(|(_, s)| *s) != Some(GoalStatus::Completed)
            })
            .count();

        let finished_at = Utc::now();
        result.finished_at = finished_at;
        result.duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        self.record(&result, &touched);

        info!(
            target: "pagi::cycle",
            cycle_id = %cycle_id,
            goals_evaluated = result.goals_evaluated,
            goals_completed = result.goals_completed,
            goals_stalled = result.goals_stalled,
            tasks_executed = result.tasks_executed,
            tasks_failed = result.tasks_failed,
            skipped_risk = result.tasks_skipped_due_to_risk,
            utilization = result.budget_utilization_percent,
            duration_ms = result.duration_ms,
            "Cognitive cycle finished"
        );
        result
    }

    async fn run_cycle(
        &mut self,
        cycle_id: &str,
        now: DateTime<Utc>,
        result: &mut CycleResult,
    ) -> CognitionResult<()> {
        // 1–2: evidence and progress
        self.state = CycleState::Evaluating;
        let active = self.goals.active_goals();
        result.goals_evaluated = active.len();
        let since = self
            .evidence_since
            .unwrap_or_else(|| now - Duration::hours(INITIAL_EVIDENCE_WINDOW_HOURS));
        let recent = self.recent_memory(since).await;
        for goal in &active {
            let evidence = self.gather_evidence(goal, &recent).await;
            if let Some(update) = self.apply_evidence(goal, evidence)? {
                result.progress_updates.push(update);
            }
        }

        // 3: stall sweep
        let stall = self.goals.evaluate_all_at(now);
        result.goals_stalled = stall.stalled.len();
        result.recommendations.extend(stall.recommendations);

        // 4: autonomy
        for goal in self.goals.list() {
            if goal.status.is_terminal() {
                continue;
            }
            if self.goals.adjust_autonomy(&goal.id)? != 0.0 {
                result.autonomy_adjustments += 1;
            }
        }

        // 5: budget
        let allocation = self.budget.allocate_budget(cycle_id);
        result.budget_allocated = allocation.available_budget;

        // 6–8: candidates, risk, queue
        let candidates = self.generate_candidates(cycle_id, now);
        result.tasks_candidate = candidates.len();

        let mut context = SchedulingContext {
            active_goal_count: self.goals.goals_with_status(GoalStatus::Active).len(),
            stalled_goal_count: self.goals.goals_with_status(GoalStatus::Stalled).len(),
            budget_available: self.budget.get_remaining_budget(cycle_id),
            risk_assessments: HashMap::new(),
        };
        for candidate in &candidates {
            if !context.risk_assessments.contains_key(&candidate.task_type) {
                let mut assessment = self.risk.assess_task(candidate.task_type);
                if self.admit_risk_retry(cycle_id, &mut assessment) {
                    result.risk_retries += 1;
                }
                context.risk_assessments.insert(candidate.task_type, assessment);
            }
        }
        let scored = self.scheduler.score_tasks(&candidates, &context);
        let queue = self
            .scheduler
            .build_execution_queue(scored, context.budget_available);
        result.tasks_skipped_due_to_risk = queue.skipped_for(SkipReason::Risk);
        result.tasks_skipped_due_to_budget = queue.skipped_for(SkipReason::Budget);
        result.tasks_throttled = queue.skipped_for(SkipReason::Throttled);
        result.risk_summary = queue.risk_summary.clone();

        // 9: execution
        self.state = CycleState::Executing;
        let total = queue.tasks.len();
        for (index, task) in queue.tasks.into_iter().enumerate() {
            if !self.budget.should_continue_executing(cycle_id) {
                let left = total - index;
                result.tasks_skipped_due_to_budget += left;
                info!(
                    target: "pagi::cycle",
                    cycle_id = %cycle_id,
                    remaining_tasks = left,
                    "Budget exhausted; no further tasks admitted"
                );
                break;
            }
            if self.budget.is_selective(cycle_id) && task.score < self.config.selective_min_score {
                debug!(
                    target: "pagi::cycle",
                    task_id = %task.task_id,
                    score = task.score,
                    "Budget selective; low-value task deferred"
                );
                result.tasks_skipped_due_to_budget += 1;
                continue;
            }
            if matches!(
                task.mitigation,
                MitigationStrategy::Timeout | MitigationStrategy::Isolation
            ) {
                debug!(
                    target: "pagi::cycle",
                    task_id = %task.task_id,
                    mitigation = task.mitigation.as_str(),
                    "Running task under mitigation"
                );
            }

            let mut ctx =
                ExecutionContext::new(&mut self.goals, &self.collaborators).with_since(since);
            let outcome = self
                .executor
                .execute_task(&task.task_id, task.task_type, &task.payload, &mut ctx)
                .await;

            self.budget.record_task_cost(
                cycle_id,
                TaskCost {
                    task_id: task.task_id.clone(),
                    task_type: task.task_type,
                    execution_time_ms: outcome.execution_time_ms,
                    memory_peak_mb: 0.0,
                    db_queries_count: 0,
                    service_calls_count: outcome.service_calls,
                    success: outcome.success,
                },
            )?;
            if outcome.success {
                self.risk.record_success(task.task_type);
            } else {
                let reason = outcome.errors.join("; ");
                self.risk.record_failure(task.task_type, reason);
                result.tasks_failed += 1;
            }
            self.scheduler
                .update_success_rate(task.task_type, outcome.success);
            result.tasks_executed += 1;
            result.task_outcomes.push(outcome);
        }

        // 10: close
        let stats = self.budget.close_cycle(cycle_id)?;
        result.budget_used = stats.budget_used;
        result.budget_utilization_percent = stats.utilization_percent;
        self.budget.clear_old_cycles(self.config.keep_cycle_ledgers);

        // 11: recommendations
        let health = self.risk.get_system_health();
        result.recommendations.extend(health.recommendations);
        Ok(())
    }

    /// Tracks consecutive `skip` assessments per type. Once a type has been skipped for more
    /// than `risk_retry_after_cycles` cycles, downgrades this cycle's mitigation to `throttle`
    /// so a single attempt can refresh its failure rate. Returns true when a retry was admitted.
    fn admit_risk_retry(&mut self, cycle_id: &str, assessment: &mut RiskAssessment) -> bool {
        let task_type = assessment.task_type;
        if assessment.mitigation.strategy != MitigationStrategy::Skip {
            self.risk_skip_streak.remove(&task_type);
            return false;
        }
        let streak = self.risk_skip_streak.entry(task_type).or_insert(0);
        *streak += 1;
        let limit = self.config.risk_retry_after_cycles;
        if limit == 0 || *streak <= limit {
            return false;
        }
        *streak = 0;
        assessment.mitigation.strategy = MitigationStrategy::Throttle;
        assessment.mitigation.description = format!(
            "retry after {} skipped cycles (failure rate {:.0}%)",
            limit, assessment.failure_rate
        );
        info!(
            target: "pagi::cycle",
            cycle_id = %cycle_id,
            task_type = %task_type,
            failure_rate = assessment.failure_rate,
            "Admitting one retry for a risk-skipped task type"
        );
        true
    }

    /// Recent working memory, capped. A failing memory service degrades to no items.
    async fn recent_memory(&self, since: DateTime<Utc>) -> Vec<MemoryItem> {
        match self.collaborators.memory.recent_items(since).await {
            Ok(mut items) => {
                items.truncate(RECENT_ITEM_CAP);
                items
            }
            Err(err) => {
                warn!(target: "pagi::cycle", error = %err, "Recent memory unavailable; evidence degraded");
                Vec::new()
            }
        }
    }

    async fn gather_evidence(&self, goal: &Goal, recent: &[MemoryItem]) -> Evidence {
        let query = format!("{} {}", goal.title, goal.description);
        let hits = match self
            .collaborators
            .memory
            .search_semantic(
                query.trim(),
                self.config.evidence_search_limit,
                self.config.evidence_min_similarity,
            )
            .await
        {
            Ok(hits) => hits
                .into_iter()
                .filter(|h| !goal.linked_memories.contains(&h.id))
                .collect(),
            Err(err) => {
                warn!(
                    target: "pagi::cycle",
                    goal_id = %goal.id,
                    error = %err,
                    "Semantic search failed; goal evidence empty"
                );
                Vec::new()
            }
        };

        let entities: Vec<String> = goal
            .linked_entities
            .iter()
            .map(|e| e.to_lowercase())
            .collect();
        let mentions = recent
            .iter()
            .map(|item| {
                let content = item.content.to_lowercase();
                entities.iter().filter(|e| content.contains(e.as_str())).count()
            })
            .sum();

        Evidence { hits, mentions }
    }

    fn apply_evidence(
        &mut self,
        goal: &Goal,
        evidence: Evidence,
    ) -> CognitionResult<Option<ProgressUpdate>> {
        if evidence.hits.is_empty() && evidence.mentions == 0 {
            return Ok(None);
        }
        let confidence = if evidence.hits.is_empty() {
            MENTION_ONLY_CONFIDENCE
        } else {
            evidence.hits.iter().map(|h| h.confidence).sum::<f64>() / evidence.hits.len() as f64
        };
        let delta = (evidence.hits.len() as f64 * DELTA_PER_HIT * confidence
            + evidence.mentions as f64 * DELTA_PER_MENTION)
            .min(MAX_EVIDENCE_DELTA);

        self.goals
            .link_memories(&goal.id, evidence.hits.iter().map(|h| h.id.clone()).collect())?;
        let note = format!(
            "evidence: {} memories, {} entity mentions (confidence {:.2})",
            evidence.hits.len(),
            evidence.mentions,
            confidence
        );
        let mut updated = self
            .goals
            .update_progress(&goal.id, goal.progress + delta, Some(&note))?;

        if updated.status != GoalStatus::Completed
            && confidence >= COMPLETION_CONFIDENCE
            && updated.progress >= COMPLETION_PROGRESS
        {
            updated = self
                .goals
                .complete(&goal.id, Some("completed on high-confidence evidence"))?;
        }
        debug!(
            target: "pagi::cycle",
            goal_id = %goal.id,
            previous = goal.progress,
            current = updated.progress,
            confidence,
            "Evidence applied"
        );

        Ok(Some(ProgressUpdate {
            goal_id: goal.id.clone(),
            title: goal.title.clone(),
            previous_progress: goal.progress,
            new_progress: updated.progress,
            confidence,
            evidence_hits: evidence.hits.len(),
            entity_mentions: evidence.mentions,
            completed: updated.status == GoalStatus::Completed,
        }))
    }

    /// Goal-directed tasks for urgent or low-progress goals with enough autonomy, then
    /// maintenance tasks, capped at `max_candidates_per_cycle`.
    fn generate_candidates(&self, cycle_id: &str, now: DateTime<Utc>) -> Vec<CandidateTask> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut targets: Vec<Goal> = Vec::new();
        let mut low_progress: Vec<Goal> = self
            .goals
            .active_goals()
            .into_iter()
            .filter(|g| g.progress < LOW_PROGRESS)
            .collect();
        low_progress.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        for goal in self.goals.urgent_goals_at(now).into_iter().chain(low_progress) {
            if goal.autonomy_level < self.config.min_autonomy_for_tasks {
                continue;
            }
            if seen.insert(goal.id.clone()) {
                targets.push(goal);
            }
        }

        let mut candidates = Vec::new();
        for goal in targets {
            for task_type in [TaskType::GoalResearch, TaskType::GoalAnalysis] {
                candidates.push(
                    CandidateTask::new(format!("{}:{}", task_type, goal.id), task_type)
                        .with_payload(json!({ "goal_id": goal.id }))
                        .with_priority(goal.priority),
                );
            }
        }
        if self.config.maintenance_tasks_enabled {
            for task_type in TaskType::MAINTENANCE {
                candidates.push(CandidateTask::new(format!("{}:{}", task_type, cycle_id), task_type));
            }
        }
        candidates.truncate(self.config.max_candidates_per_cycle);
        candidates
    }

    fn record(&mut self, result: &CycleResult, touched: &[Goal]) {
        self.stats.cycles_run += 1;
        if result.error.is_some() {
            self.stats.cycles_with_errors += 1;
        }
        self.stats.total_tasks_executed += result.tasks_executed as u64;
        self.stats.total_tasks_failed += result.tasks_failed as u64;
        self.stats.total_goals_completed += result.goals_completed as u64;
        self.stats.last_cycle_at = Some(result.finished_at);

        self.history.push_back(result.clone());
        while self.history.len() > self.config.history_limit.max(1) {
            self.history.pop_front();
        }

        if let Some(journal) = &self.journal {
            for goal in touched {
                if let Err(err) = journal.record_goal(goal) {
                    warn!(target: "pagi::journal", goal_id = %goal.id, error = %err, "Goal journal write failed");
                }
            }
            if let Err(err) = journal.record_cycle(result) {
                warn!(target: "pagi::journal", cycle_id = %result.cycle_id, error = %err, "Cycle journal write failed");
            }
        }
    }
}
