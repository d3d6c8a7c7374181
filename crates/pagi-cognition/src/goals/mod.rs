//! Goal Store: hierarchical goals, lifecycle transitions and the evaluation audit trail.

mod store;
mod types;

pub use store::{
    GoalStore, AUTONOMY_STEP, EVALUATION_DELTA, MAX_EVALUATIONS_PER_GOAL, STALL_WINDOW_DAYS,
    URGENT_WINDOW_DAYS,
};
pub use types::{
    Goal, GoalEvaluation, GoalOptions, GoalPriority, GoalSeed, GoalSource, GoalStats, GoalStatus,
    ProgressNote, StallReport, MAX_CHILD_GOALS, MAX_PROGRESS_NOTES,
};
