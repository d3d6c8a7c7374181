//! pagi-cognition: autonomous cognitive cycle (goals, risk, budget, scheduling, execution).
//!
//! A [`CycleOrchestrator`] owns one instance of every service; a [`CycleHeartbeat`] wakes it
//! on a fixed interval. Memory, knowledge base, extractor and user model are consumed through
//! the traits in [`collaborators`].

mod budget;
mod config;
mod error;
mod executor;
mod goals;
mod heartbeat;
mod orchestrator;
mod persistence;
mod risk;
mod scheduler;
mod task;
pub mod collaborators;

// Errors + configuration
pub use config::CognitionConfig;
pub use error::{CognitionError, CognitionResult, CollaboratorError};

// Goal Store
pub use goals::{
    Goal, GoalEvaluation, GoalOptions, GoalPriority, GoalSeed, GoalSource, GoalStats, GoalStatus,
    GoalStore, ProgressNote, StallReport, AUTONOMY_STEP, EVALUATION_DELTA, MAX_CHILD_GOALS,
    MAX_EVALUATIONS_PER_GOAL, MAX_PROGRESS_NOTES, STALL_WINDOW_DAYS, URGENT_WINDOW_DAYS,
};

// Tasks
pub use task::{CandidateTask, TaskHazard, TaskType};

// Risk Assessor
pub use risk::{
    FailurePattern, FailureRecord, FailureTrend, Mitigation, MitigationStrategy, RiskAssessment,
    RiskAssessor, RiskFactor, RiskLevel, RiskStats, SystemHealth, FAILURE_RING_CAPACITY,
};

// Budget Allocator
pub use budget::{
    BudgetAllocation, BudgetAllocator, BudgetStats, CycleStats, TaskCost, HARD_STOP_PERCENT,
    PER_TASK_LIMIT, RESERVED_FRACTION, SELECTIVE_PERCENT, TOTAL_BUDGET,
};

// Priority Scheduler
pub use scheduler::{
    ExecutionQueue, PriorityScheduler, SchedulingContext, ScoredTask, SkipReason, SkippedTask,
    TaskTypeStats,
};

// Task Executor
pub use executor::{ExecutionContext, HandlerReport, TaskExecutor, TaskOutcome};

// Orchestrator + heartbeat + journal
pub use heartbeat::{CycleHeartbeat, SharedOrchestrator, WakeHandle};
pub use orchestrator::{
    CycleOrchestrator, CycleResult, CycleState, OrchestratorStats, ProgressUpdate,
    COMPLETION_CONFIDENCE, COMPLETION_PROGRESS, MAX_EVIDENCE_DELTA,
};
pub use persistence::{CycleJournal, SledJournal, CYCLE_TREE, GOAL_TREE};
