//! Priority Scheduler: scores candidate tasks and packs them into a budgeted queue.
//!
//! `score = clamp01(0.4·impact + 0.3·urgency + 0.2·success_rate − 0.3·risk)`
//!
//! Success rate is an exponential running estimate per task type
//! (`new = old × 0.8 + outcome × 0.2`, seeded at 0.5).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::risk::{MitigationStrategy, RiskAssessment};
use crate::task::{CandidateTask, TaskType};

pub const IMPACT_WEIGHT: f64 = 0.4;
pub const URGENCY_WEIGHT: f64 = 0.3;
pub const SUCCESS_WEIGHT: f64 = 0.2;
pub const RISK_WEIGHT: f64 = 0.3;

const BASE_URGENCY: f64 = 0.3;
const STALLED_URGENCY_STEP: f64 = 0.15;
const STALLED_URGENCY_CAP: f64 = 0.5;

const EMA_RETAIN: f64 = 0.8;
const INITIAL_SUCCESS_RATE: f64 = 0.5;

/// Inputs shared by every candidate in one scoring pass.
#[derive(Debug, Clone, Default)]
pub struct SchedulingContext {
    pub active_goal_count: usize,
    pub stalled_goal_count: usize,
    pub budget_available: f64,
    pub risk_assessments: HashMap<TaskType, RiskAssessment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredTask {
    pub task_id: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub score: f64,
    pub impact: f64,
    pub urgency: f64,
    pub risk_score: f64,
    pub success_rate: f64,
    pub estimated_duration_ms: f64,
    pub mitigation: MitigationStrategy,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Mitigation strategy was `skip`.
    Risk,
    /// Would overflow the remaining budget.
    Budget,
    /// A task of the same throttled type was already admitted.
    Throttled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedTask {
    pub task: ScoredTask,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionQueue {
    /// Admitted tasks, highest score first.
    pub tasks: Vec<ScoredTask>,
    pub tasks_skipped: Vec<SkippedTask>,
    pub estimated_total_time_ms: f64,
    pub risk_summary: String,
}

impl ExecutionQueue {
    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.tasks_skipped.iter().filter(|s| s.reason == reason).count()
    }
}

/// Running per-type estimate exposed by [`PriorityScheduler::get_task_stats`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskTypeStats {
    pub success_rate: f64,
    pub observations: u64,
}

#[derive(Debug, Default)]
pub struct PriorityScheduler {
    running: HashMap<TaskType, TaskTypeStats>,
}

impl PriorityScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success_rate(&self, task_type: TaskType) -> f64 {
        self.running
            .get(&task_type)
            .map(|s| s.success_rate)
            .unwrap_or(INITIAL_SUCCESS_RATE)
    }

    /// Nudges the running estimate toward 1 (success) or 0 (failure).
    pub fn update_success_rate(&mut self, task_type: TaskType, success: bool) {
        let entry = self.running.entry(task_type).or_insert(TaskTypeStats {
            success_rate: INITIAL_SUCCESS_RATE,
            observations: 0,
        });
        let outcome = if success { 1.0 } else { 0.0 };
        entry.success_rate = entry.success_rate * EMA_RETAIN + outcome * (1.0 - EMA_RETAIN);
        entry.observations += 1;
    }

    pub fn score_tasks(
        &self,
        candidates: &[CandidateTask],
        context: &SchedulingContext,
    ) -> Vec<ScoredTask> {
        candidates
            .iter()
            .map(|candidate| self.score_one(candidate, context))
            .collect()
    }

    fn score_one(&self, candidate: &CandidateTask, context: &SchedulingContext) -> ScoredTask {
        let task_type = candidate.task_type;
        let impact = task_type.impact();

        let mut urgency = BASE_URGENCY;
        if task_type.is_goal_directed() {
            urgency += (context.stalled_goal_count as f64 * STALLED_URGENCY_STEP)
                .min(STALLED_URGENCY_CAP);
        }
        if let Some(priority) = candidate.priority {
            urgency += priority.urgency_boost();
        }
        let urgency = urgency.clamp(0.0, 1.0);

        let assessment = context.risk_assessments.get(&task_type);
        let risk_score = assessment.map(|a| a.risk_score).unwrap_or(0.0);
        let mitigation = assessment
            .map(|a| a.mitigation.strategy)
            .unwrap_or(MitigationStrategy::None);
        let success_rate = self.success_rate(task_type);

        let weighted_impact = IMPACT_WEIGHT * impact;
        let weighted_urgency = URGENCY_WEIGHT * urgency;
        let weighted_success = SUCCESS_WEIGHT * success_rate;
        let weighted_risk = RISK_WEIGHT * risk_score;
        let score =
            (weighted_impact + weighted_urgency + weighted_success - weighted_risk).clamp(0.0, 1.0);

        let reason = if weighted_risk > weighted_impact {
            format!("high risk ({:.2}) outweighs impact", risk_score)
        } else if weighted_urgency >= weighted_impact && weighted_urgency >= weighted_success {
            format!("urgent ({:.2})", urgency)
        } else if weighted_success > weighted_impact {
            format!("reliable ({:.0}% success)", success_rate * 100.0)
        } else {
            format!("high impact ({:.2})", impact)
        };

        debug!(
            target: "pagi::scheduler",
            task_id = %candidate.task_id,
            task_type = %task_type,
            score,
            impact,
            urgency,
            risk_score,
            success_rate,
            "Task scored"
        );

        ScoredTask {
            task_id: candidate.task_id.clone(),
            task_type,
            payload: candidate.payload.clone(),
            score,
            impact,
            urgency,
            risk_score,
            success_rate,
            estimated_duration_ms: candidate.estimated_duration_ms,
            mitigation,
            reason,
        }
    }

    /// Excludes `skip` tasks, sorts by score and greedily admits within `budget_available`.
    /// A task that would overflow is skipped so later, smaller tasks can still fit.
    pub fn build_execution_queue(
        &self,
        scored: Vec<ScoredTask>,
        budget_available: f64,
    ) -> ExecutionQueue {
        let mut queue = ExecutionQueue::default();

        let (mut eligible, risky): (Vec<ScoredTask>, Vec<ScoredTask>) = scored
            .into_iter()
            .partition(|t| t.mitigation != MitigationStrategy::Skip);
        for task in risky {
            queue.tasks_skipped.push(SkippedTask {
                task,
                reason: SkipReason::Risk,
            });
        }

        eligible.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut throttled_admitted: Vec<TaskType> = Vec::new();
        for task in eligible {
            if task.mitigation == MitigationStrategy::Throttle
                && throttled_admitted.contains(&task.task_type)
            {
                queue.tasks_skipped.push(SkippedTask {
                    task,
                    reason: SkipReason::Throttled,
                });
                continue;
            }
            if queue.estimated_total_time_ms + task.estimated_duration_ms > budget_available {
                queue.tasks_skipped.push(SkippedTask {
                    task,
                    reason: SkipReason::Budget,
                });
                continue;
            }
            if task.mitigation == MitigationStrategy::Throttle {
                throttled_admitted.push(task.task_type);
            }
            queue.estimated_total_time_ms += task.estimated_duration_ms;
            queue.tasks.push(task);
        }

        queue.risk_summary = risk_summary(&queue);
        info!(
            target: "pagi::scheduler",
            admitted = queue.tasks.len(),
            skipped = queue.tasks_skipped.len(),
            estimated_ms = queue.estimated_total_time_ms,
            budget_available,
            "Execution queue built"
        );
        queue
    }

    pub fn get_task_stats(&self) -> HashMap<TaskType, TaskTypeStats> {
        self.running.clone()
    }

    pub fn reset(&mut self) {
        self.running.clear();
    }
}

fn risk_summary(queue: &ExecutionQueue) -> String {
    let risk = queue.skipped_for(SkipReason::Risk);
    let throttled = queue.skipped_for(SkipReason::Throttled);
    let mitigated = queue
        .tasks
        .iter()
        .filter(|t| t.mitigation != MitigationStrategy::None)
        .count();

    if risk == 0 && throttled == 0 && mitigated == 0 {
        return "No elevated risk in queue".to_string();
    }
    let mut parts = Vec::new();
    if risk > 0 {
        let mut types: Vec<&str> = queue
            .tasks_skipped
            .iter()
            .filter(|s| s.reason == SkipReason::Risk)
            .map(|s| s.task.task_type.as_str())
            .collect();
        types.sort_unstable();
        types.dedup();
        parts.push(format!("{} skipped due to risk ({})", risk, types.join(", ")));
    }
    if throttled > 0 {
        parts.push(format!("{} throttled", throttled));
    }
    if mitigated > 0 {
        parts.push(format!("{} admitted with mitigation", mitigated));
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goals::GoalPriority;
    use crate::risk::RiskAssessor;

    fn scored(id: &str, score: f64, estimate: f64) -> ScoredTask {
        ScoredTask {
            task_id: id.to_string(),
            task_type: TaskType::PatternAnalysis,
            payload: serde_json::Value::Null,
            score,
            impact: 0.5,
            urgency: 0.3,
            risk_score: 0.0,
            success_rate: 0.5,
            estimated_duration_ms: estimate,
            mitigation: MitigationStrategy::None,
            reason: String::new(),
        }
    }

    #[test]
    fn success_rate_is_exponential_average() {
        let mut scheduler = PriorityScheduler::new();
        assert_eq!(scheduler.success_rate(TaskType::GoalResearch), 0.5);
        scheduler.update_success_rate(TaskType::GoalResearch, true);
        assert!((scheduler.success_rate(TaskType::GoalResearch) - 0.6).abs() < 1e-9);
        scheduler.update_success_rate(TaskType::GoalResearch, false);
        assert!((scheduler.success_rate(TaskType::GoalResearch) - 0.48).abs() < 1e-9);
        assert_eq!(scheduler.get_task_stats()[&TaskType::GoalResearch].observations, 2);
        scheduler.reset();
        assert!(scheduler.get_task_stats().is_empty());
    }

    #[test]
    fn stalled_goals_raise_goal_directed_urgency_only() {
        let scheduler = PriorityScheduler::new();
        let candidates = vec![
            CandidateTask::new("r", TaskType::GoalResearch),
            CandidateTask::new("m", TaskType::MemoryConsolidation),
        ];
        let calm = scheduler.score_tasks(&candidates, &SchedulingContext::default());
        let stalled = scheduler.score_tasks(
            &candidates,
            &SchedulingContext {
                stalled_goal_count: 2,
                ..Default::default()
            },
        );
        assert!(stalled[0].urgency > calm[0].urgency);
        assert_eq!(stalled[1].urgency, calm[1].urgency);
        assert!(stalled[0].score > stalled[1].score);
    }

    #[test]
    fn priority_boosts_urgency() {
        let scheduler = PriorityScheduler::new();
        let candidates = vec![
            CandidateTask::new("a", TaskType::GoalAnalysis).with_priority(GoalPriority::Critical),
            CandidateTask::new("b", TaskType::GoalAnalysis).with_priority(GoalPriority::Low),
        ];
        let scored = scheduler.score_tasks(&candidates, &SchedulingContext::default());
        assert!(scored[0].urgency > scored[1].urgency);
    }

    #[test]
    fn risk_lowers_score_and_skip_is_excluded() {
        let scheduler = PriorityScheduler::new();
        let mut risk = RiskAssessor::new();
        for _ in 0..10 {
            risk.record_failure(TaskType::KbMaintenance, "merge conflict");
        }
        let mut context = SchedulingContext {
            budget_available: 400.0,
            ..Default::default()
        };
        context.risk_assessments.insert(
            TaskType::KbMaintenance,
            risk.assess_task(TaskType::KbMaintenance),
        );
        let candidates = vec![
            CandidateTask::new("kb", TaskType::KbMaintenance),
            CandidateTask::new("pa", TaskType::PatternAnalysis),
        ];
        let scored = scheduler.score_tasks(&candidates, &context);
        assert!(scored[0].risk_score > 0.7);
        assert_eq!(scored[0].mitigation, MitigationStrategy::Skip);

        let queue = scheduler.build_execution_queue(scored, 400.0);
        assert_eq!(queue.tasks.len(), 1);
        assert_eq!(queue.tasks[0].task_id, "pa");
        assert_eq!(queue.skipped_for(SkipReason::Risk), 1);
        assert!(queue.risk_summary.contains("kb_maintenance"));
    }

    #[test]
    fn overflow_skips_without_aborting() {
        let scheduler = PriorityScheduler::new();
        let queue = scheduler.build_execution_queue(
            vec![
                scored("a", 0.9, 60.0),
                scored("big", 0.8, 80.0),
                scored("small", 0.7, 30.0),
            ],
            100.0,
        );
        let ids: Vec<&str> = queue.tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "small"]);
        assert_eq!(queue.estimated_total_time_ms, 90.0);
        assert_eq!(queue.skipped_for(SkipReason::Budget), 1);
    }

    #[test]
    fn throttle_admits_one_per_type() {
        let scheduler = PriorityScheduler::new();
        let mut a = scored("a", 0.9, 10.0);
        let mut b = scored("b", 0.8, 10.0);
        a.mitigation = MitigationStrategy::Throttle;
        b.mitigation = MitigationStrategy::Throttle;
        let queue = scheduler.build_execution_queue(vec![b, a], 100.0);
        assert_eq!(queue.tasks.len(), 1);
        assert_eq!(queue.tasks[0].task_id, "a");
        assert_eq!(queue.skipped_for(SkipReason::Throttled), 1);
    }

    #[test]
    fn empty_queue_has_clean_summary() {
        let scheduler = PriorityScheduler::new();
        let queue = scheduler.build_execution_queue(Vec::new(), 400.0);
        assert!(queue.tasks.is_empty());
        assert_eq!(queue.risk_summary, "No elevated risk in queue");
    }
}
