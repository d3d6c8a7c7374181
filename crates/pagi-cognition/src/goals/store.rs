//! Goal Store: an arena of goals addressed by id, plus the evaluation audit trail.
//!
//! The store holds no scheduling knowledge. It owns lifecycle transitions, progress
//! bookkeeping, stall detection and autonomy adjustment; everything else reads snapshots.
//!
//! ## Rules
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | `update_progress` | clamps to [0,1]; evaluation recorded once progress has moved `>= 0.1` from the last evaluated value; `>= 1` completes |
//! | `pause` / `resume` | only `active → paused` / `paused → active` |
//! | `evaluate_all` | active goals with no progress change for 7 days, or a missed deadline, become `stalled` |
//! | `adjust_autonomy` | 3 fresh non-decreasing evaluations → +0.05, any fresh decrease → −0.05 |

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{
    Goal, GoalEvaluation, GoalOptions, GoalPriority, GoalSeed, GoalSource, GoalStats,
    GoalStatus, StallReport, MAX_CHILD_GOALS,
};
use crate::error::{CognitionError, CognitionResult};

/// Minimum progress movement, measured from the last evaluated value, that produces a
/// [`GoalEvaluation`].
pub const EVALUATION_DELTA: f64 = 0.1;

/// Evaluations retained per goal; older ones are dropped.
pub const MAX_EVALUATIONS_PER_GOAL: usize = 50;

/// Days without a progress change before an active goal counts as stalled.
pub const STALL_WINDOW_DAYS: i64 = 7;

/// Goals due within this many days are considered urgent.
pub const URGENT_WINDOW_DAYS: f64 = 7.0;

/// Autonomy change per adjustment.
pub const AUTONOMY_STEP: f64 = 0.05;

/// Fresh non-decreasing evaluations required for an autonomy increase.
const AUTONOMY_STREAK: usize = 3;

/// Float slack so that 0.9 → 1.0 still counts as a 0.1 move.
const DELTA_EPSILON: f64 = 1e-9;

/// Bounded evaluation history of one goal.
#[derive(Debug, Default)]
struct EvaluationLog {
    entries: VecDeque<GoalEvaluation>,
    /// Trailing entries not yet consumed by `adjust_autonomy`.
    unconsumed: usize,
}

impl EvaluationLog {
    fn push(&mut self, evaluation: GoalEvaluation) {
        self.entries.push_back(evaluation);
        while self.entries.len() > MAX_EVALUATIONS_PER_GOAL {
            self.entries.pop_front();
        }
        self.unconsumed = (self.unconsumed + 1).min(self.entries.len());
    }

    fn fresh(&self) -> impl Iterator<Item = &GoalEvaluation> {
        self.entries.iter().skip(self.entries.len() - self.unconsumed)
    }
}

/// Arena of goals plus a bounded per-goal evaluation log.
#[derive(Debug, Default)]
pub struct GoalStore {
    goals: HashMap<String, Goal>,
    evaluations: HashMap<String, EvaluationLog>,
    /// Lifetime count of recorded evaluations.
    evaluations_recorded: usize,
    /// Goal whose evaluation was recorded most recently.
    last_evaluated: Option<String>,
    /// Per goal: progress at the last recorded evaluation.
    evaluated_progress: HashMap<String, f64>,
    /// Per goal: when progress last moved by at least `EVALUATION_DELTA`.
    last_progress_change: HashMap<String, DateTime<Utc>>,
}

impl GoalStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Creation & lookup
    // -------------------------------------------------------------------------

    /// Creates a new active goal with zero progress.
    pub fn create(
        &mut self,
        title: impl Into<String>,
        description: impl Into<String>,
        source: GoalSource,
        options: GoalOptions,
    ) -> CognitionResult<Goal> {
        let now = Utc::now();
        if let Some(parent_id) = &options.parent_id {
            let parent = self
                .goals
                .get(parent_id)
                .ok_or_else(|| CognitionError::GoalNotFound(parent_id.clone()))?;
            if parent.child_ids.len() >= MAX_CHILD_GOALS {
                return Err(CognitionError::ChildLimitExceeded {
                    parent: parent_id.clone(),
                    limit: MAX_CHILD_GOALS,
                });
            }
        }

        let mut linked_entities = Vec::new();
        push_unique(&mut linked_entities, options.linked_entities);

        let goal = Goal {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            source,
            status: GoalStatus::Active,
            priority: options.priority,
            progress: 0.0,
            autonomy_level: options.autonomy_level.clamp(0.0, 1.0),
            parent_id: options.parent_id.clone(),
            child_ids: Vec::new(),
            linked_entities,
            linked_memories: Vec::new(),
            progress_notes: Vec::new(),
            deadline: options.deadline,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        if let Some(parent) = options.parent_id.as_ref().and_then(|p| self.goals.get_mut(p)) {
            parent.child_ids.push(goal.id.clone());
            parent.updated_at = now;
        }

        info!(
            target: "pagi::goals",
            goal_id = %goal.id,
            title = %goal.title,
            source = goal.source.as_str(),
            priority = goal.priority.as_str(),
            "Goal created"
        );
        self.goals.insert(goal.id.clone(), goal.clone());
        Ok(goal)
    }

    /// Creates a user goal for every seed whose title (case-insensitive) no goal holds yet,
    /// whatever that goal's status. Returns the goals created.
    pub fn seed(&mut self, seeds: &[GoalSeed]) -> CognitionResult<Vec<Goal>> {
        let mut titles: HashSet<String> = self
            .goals
            .values()
            .map(|g| g.title.trim().to_lowercase())
            .collect();
        let mut created = Vec::new();
        for seed in seeds {
            let key = seed.title.trim().to_lowercase();
            if key.is_empty() {
                warn!(target: "pagi::goals", "Goal seed without a title ignored");
                continue;
            }
            if !titles.insert(key) {
                continue;
            }
            created.push(self.create(
                seed.title.trim(),
                seed.description.clone(),
                GoalSource::User,
                seed.options(),
            )?);
        }
        Ok(created)
    }

    pub fn get(&self, id: &str) -> Option<&Goal> {
        self.goals.get(id)
    }

    /// All goals, oldest first.
    pub fn list(&self) -> Vec<Goal> {
        let mut goals: Vec<Goal> = self.goals.values().cloned().collect();
        goals.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        goals
    }

    /// Active goals, oldest first.
    pub fn active_goals(&self) -> Vec<Goal> {
        self.list()
            .into_iter()
            .filter(|g| g.status == GoalStatus::Active)
            .collect()
    }

    pub fn goals_with_status(&self, status: GoalStatus) -> Vec<Goal> {
        self.list().into_iter().filter(|g| g.status == status).collect()
    }

    /// Direct children of `id`, in insertion order.
    pub fn children(&self, id: &str) -> CognitionResult<Vec<Goal>> {
        let goal = self.lookup(id)?;
        Ok(goal
            .child_ids
            .iter()
            .filter_map(|c| self.goals.get(c).cloned())
            .collect())
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    // -------------------------------------------------------------------------
    // Progress
    // -------------------------------------------------------------------------

    pub fn update_progress(
        &mut self,
        id: &str,
        value: f64,
        note: Option<&str>,
    ) -> CognitionResult<Goal> {
        self.update_progress_at(id, value, note, Utc::now())
    }

    /// Sets progress to `value` (clamped). See module docs for the transition rules.
    pub fn update_progress_at(
        &mut self,
        id: &str,
        value: f64,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> CognitionResult<Goal> {
        let goal = self
            .goals
            .get_mut(id)
            .ok_or_else(|| CognitionError::GoalNotFound(id.to_string()))?;

        match goal.status {
            GoalStatus::Abandoned => {
                return Err(CognitionError::InvalidTransition {
                    id: id.to_string(),
                    from: goal.status.to_string(),
                    action: "update progress",
                })
            }
            GoalStatus::Completed => return Ok(goal.clone()),
            _ => {}
        }

        let previous = goal.progress;
        let current = if value.is_nan() {
            previous
        } else {
            value.clamp(0.0, 1.0)
        };
        let delta = current - previous;
        let baseline = self.evaluated_progress.get(id).copied().unwrap_or(0.0);

        goal.progress = current;
        goal.updated_at = now;
        match note {
            Some(text) => goal.push_note(now, text),
            None if delta != 0.0 => {
                goal.push_note(now, format!("progress {:.2} -> {:.2}", previous, current))
            }
            None => {}
        }

        if (current - baseline).abs() + DELTA_EPSILON >= EVALUATION_DELTA {
            self.last_progress_change.insert(id.to_string(), now);
            self.evaluated_progress.insert(id.to_string(), current);
            self.evaluations
                .entry(id.to_string())
                .or_default()
                .push(GoalEvaluation {
                    goal_id: id.to_string(),
                    timestamp: now,
                    previous_progress: baseline,
                    current_progress: current,
                    notes: note.unwrap_or_default().to_string(),
                });
            self.evaluations_recorded += 1;
            self.last_evaluated = Some(id.to_string());
        }

        if current >= 1.0 {
            goal.status = GoalStatus::Completed;
            goal.completed_at = Some(now);
            info!(target: "pagi::goals", goal_id = %id, "Goal completed (progress reached 1.0)");
        } else if goal.status == GoalStatus::Stalled && delta > 0.0 {
            goal.status = GoalStatus::Active;
            info!(target: "pagi::goals", goal_id = %id, "Stalled goal re-activated by new progress");
        }

        debug!(
            target: "pagi::goals",
            goal_id = %id,
            previous,
            current,
            "Progress updated"
        );
        Ok(goal.clone())
    }

    // -------------------------------------------------------------------------
    // Status transitions
    // -------------------------------------------------------------------------

    /// Completes a goal (progress forced to 1.0). Completing a completed goal is a no-op.
    pub fn complete(&mut self, id: &str, note: Option<&str>) -> CognitionResult<Goal> {
        let status = self.lookup(id)?.status;
        match status {
            GoalStatus::Completed => Ok(self.lookup(id)?.clone()),
            GoalStatus::Abandoned => Err(self.invalid(id, "complete")),
            _ => {
                let note = note.unwrap_or("marked complete");
                self.update_progress_at(id, 1.0, Some(note), Utc::now())
            }
        }
    }

    pub fn abandon(&mut self, id: &str, reason: Option<&str>) -> CognitionResult<Goal> {
        let status = self.lookup(id)?.status;
        if status.is_terminal() {
            return Err(self.invalid(id, "abandon"));
        }
        let now = Utc::now();
        let goal = self.goal_mut(id)?;
        goal.status = GoalStatus::Abandoned;
        goal.updated_at = now;
        goal.push_note(now, format!("abandoned: {}", reason.unwrap_or("no reason given")));
        info!(target: "pagi::goals", goal_id = %id, "Goal abandoned");
        Ok(goal.clone())
    }

    /// Only `active → paused`.
    pub fn pause(&mut self, id: &str) -> CognitionResult<Goal> {
        self.transition(id, GoalStatus::Active, GoalStatus::Paused, "pause")
    }

    /// Only `paused → active`.
    pub fn resume(&mut self, id: &str) -> CognitionResult<Goal> {
        self.transition(id, GoalStatus::Paused, GoalStatus::Active, "resume")
    }

    /// Only `active → blocked`.
    pub fn block(&mut self, id: &str, reason: Option<&str>) -> CognitionResult<Goal> {
        let goal = self.transition(id, GoalStatus::Active, GoalStatus::Blocked, "block")?;
        if let Some(reason) = reason {
            let now = Utc::now();
            let goal = self.goal_mut(id)?;
            goal.push_note(now, format!("blocked: {}", reason));
            return Ok(goal.clone());
        }
        Ok(goal)
    }

    /// Only `blocked → active`.
    pub fn unblock(&mut self, id: &str) -> CognitionResult<Goal> {
        self.transition(id, GoalStatus::Blocked, GoalStatus::Active, "unblock")
    }

    fn transition(
        &mut self,
        id: &str,
        from: GoalStatus,
        to: GoalStatus,
        action: &'static str,
    ) -> CognitionResult<Goal> {
        if self.lookup(id)?.status != from {
            return Err(self.invalid(id, action));
        }
        let now = Utc::now();
        let goal = self.goal_mut(id)?;
        goal.status = to;
        goal.updated_at = now;
        goal.push_note(now, format!("{} -> {}", from, to));
        debug!(target: "pagi::goals", goal_id = %id, from = %from, to = %to, "Goal transition");
        Ok(goal.clone())
    }

    // -------------------------------------------------------------------------
    // Stall sweep, urgency, autonomy
    // -------------------------------------------------------------------------

    pub fn evaluate_all(&mut self) -> StallReport {
        self.evaluate_all_at(Utc::now())
    }

    /// Marks active goals `stalled` on a missed deadline or a week without progress change.
    pub fn evaluate_all_at(&mut self, now: DateTime<Utc>) -> StallReport {
        let mut report = StallReport::default();
        let window = Duration::days(STALL_WINDOW_DAYS);

        for goal in self.active_goals() {
            let last_change = self
                .last_progress_change
                .get(&goal.id)
                .copied()
                .unwrap_or(goal.created_at);

            let recommendation = if goal.deadline_missed(now) {
                Some(format!(
                    "Goal '{}' missed its deadline at {:.0}% progress; renegotiate the deadline or split it into sub-goals.",
                    goal.title,
                    goal.progress * 100.0
                ))
            } else if now - last_change >= window {
                Some(format!(
                    "Goal '{}' has shown no measurable progress for {} days; break it down or lower its priority.",
                    goal.title, STALL_WINDOW_DAYS
                ))
            } else {
                None
            };

            if let Some(rec) = recommendation {
                if let Some(g) = self.goals.get_mut(&goal.id) {
                    g.status = GoalStatus::Stalled;
                    g.updated_at = now;
                    g.push_note(now, "marked stalled by evaluation sweep");
                }
                info!(target: "pagi::goals", goal_id = %goal.id, title = %goal.title, "Goal stalled");
                report.stalled.push(goal.id.clone());
                report.recommendations.push(rec);
            }
        }
        report
    }

    pub fn urgent_goals(&self) -> Vec<Goal> {
        self.urgent_goals_at(Utc::now())
    }

    /// Active goals that are critical or due within 7 days; priority first, then nearest deadline.
    pub fn urgent_goals_at(&self, now: DateTime<Utc>) -> Vec<Goal> {
        let mut urgent: Vec<Goal> = self
            .active_goals()
            .into_iter()
            .filter(|g| {
                g.priority == GoalPriority::Critical
                    || g
                        .days_until_deadline(now)
                        .map(|d| d <= URGENT_WINDOW_DAYS)
                        .unwrap_or(false)
            })
            .collect();
        urgent.sort_by(|a, b| {
            a.priority.cmp(&b.priority).then_with(|| match (a.deadline, b.deadline) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
        });
        urgent
    }

    /// Applies the autonomy rule to evaluations not yet consumed. Returns the applied change.
    pub fn adjust_autonomy(&mut self, id: &str) -> CognitionResult<f64> {
        self.lookup(id)?;
        let Some(log) = self.evaluations.get_mut(id) else {
            return Ok(0.0);
        };
        if log.unconsumed == 0 {
            return Ok(0.0);
        }

        let step = if log.fresh().any(|e| e.is_decrease()) {
            -AUTONOMY_STEP
        } else if log.unconsumed >= AUTONOMY_STREAK {
            AUTONOMY_STEP
        } else {
            return Ok(0.0);
        };
        log.unconsumed = 0;

        let goal = self.goal_mut(id)?;
        let before = goal.autonomy_level;
        goal.autonomy_level = (before + step).clamp(0.0, 1.0);
        let applied = goal.autonomy_level - before;
        debug!(
            target: "pagi::goals",
            goal_id = %id,
            before,
            after = goal.autonomy_level,
            "Autonomy adjusted"
        );
        Ok(applied)
    }

    // -------------------------------------------------------------------------
    // Linking
    // -------------------------------------------------------------------------

    /// Appends entity ids (deduplicated). Returns how many were new.
    pub fn link_entities(&mut self, id: &str, entity_ids: Vec<String>) -> CognitionResult<usize> {
        let goal = self.goal_mut(id)?;
        let added = push_unique(&mut goal.linked_entities, entity_ids);
        if added > 0 {
            goal.updated_at = Utc::now();
        }
        Ok(added)
    }

    /// Appends memory ids (deduplicated). Returns how many were new.
    pub fn link_memories(&mut self, id: &str, memory_ids: Vec<String>) -> CognitionResult<usize> {
        let goal = self.goal_mut(id)?;
        let added = push_unique(&mut goal.linked_memories, memory_ids);
        if added > 0 {
            goal.updated_at = Utc::now();
        }
        Ok(added)
    }

    // -------------------------------------------------------------------------
    // Evaluations & stats
    // -------------------------------------------------------------------------

    /// Retained evaluations for one goal, oldest first.
    pub fn evaluations_for(&self, id: &str) -> Vec<GoalEvaluation> {
        self.evaluations
            .get(id)
            .map(|log| log.entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Most recent retained evaluations across all goals, newest first.
    pub fn recent_evaluations(&self, limit: usize) -> Vec<GoalEvaluation> {
        let mut all: Vec<GoalEvaluation> = self
            .evaluations
            .values()
            .flat_map(|log| log.entries.iter().cloned())
            .collect();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all.truncate(limit);
        all
    }

    pub fn last_evaluation(&self) -> Option<&GoalEvaluation> {
        let id = self.last_evaluated.as_ref()?;
        self.evaluations.get(id)?.entries.back()
    }

    pub fn stats(&self) -> GoalStats {
        let mut stats = GoalStats {
            total: self.goals.len(),
            evaluations_recorded: self.evaluations_recorded,
            ..Default::default()
        };
        let mut progress_sum = 0.0;
        for goal in self.goals.values() {
            *stats.by_status.entry(goal.status.as_str().to_string()).or_insert(0) += 1;
            *stats.by_source.entry(goal.source.as_str().to_string()).or_insert(0) += 1;
            *stats.by_priority.entry(goal.priority.as_str().to_string()).or_insert(0) += 1;
            progress_sum += goal.progress;
        }
        if stats.total > 0 {
            stats.average_progress = progress_sum / stats.total as f64;
        }
        stats
    }

    /// Removes every goal and evaluation.
    pub fn clear(&mut self) {
        self.goals.clear();
        self.evaluations.clear();
        self.evaluations_recorded = 0;
        self.last_evaluated = None;
        self.evaluated_progress.clear();
        self.last_progress_change.clear();
        info!(target: "pagi::goals", "Goal store cleared");
    }

    /// Replaces the arena with previously journaled snapshots (cross-session continuity).
    /// The evaluation log starts empty and each goal's current progress becomes its evaluation
    /// baseline; stall windows count from each goal's `updated_at`.
    pub fn restore(&mut self, goals: Vec<Goal>) -> usize {
        self.clear();
        for mut goal in goals {
            goal.trim_notes();
            self.evaluated_progress.insert(goal.id.clone(), goal.progress);
            self.last_progress_change.insert(goal.id.clone(), goal.updated_at);
            self.goals.insert(goal.id.clone(), goal);
        }
        info!(target: "pagi::goals", count = self.goals.len(), "Goals restored");
        self.goals.len()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn lookup(&self, id: &str) -> CognitionResult<&Goal> {
        self.goals
            .get(id)
            .ok_or_else(|| CognitionError::GoalNotFound(id.to_string()))
    }

    fn goal_mut(&mut self, id: &str) -> CognitionResult<&mut Goal> {
        self.goals
            .get_mut(id)
            .ok_or_else(|| CognitionError::GoalNotFound(id.to_string()))
    }

    fn invalid(&self, id: &str, action: &'static str) -> CognitionError {
        CognitionError::InvalidTransition {
            id: id.to_string(),
            from: self
                .goals
                .get(id)
                .map(|g| g.status.to_string())
                .unwrap_or_default(),
            action,
        }
    }
}

fn push_unique(target: &mut Vec<String>, items: Vec<String>) -> usize {
    let mut seen: HashSet<String> = target.iter().cloned().collect();
    let mut added = 0;
    for item in items {
        let item = item.trim().to_string();
        if item.is_empty() {
            continue;
        }
        if seen.insert(item.clone()) {
            target.push(item);
            added += 1;
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_goal() -> (GoalStore, String) {
        let mut store = GoalStore::new();
        let goal = store
            .create("Learn Rust", "Ship a crate", GoalSource::User, GoalOptions::default())
            .unwrap();
        (store, goal.id)
    }

    #[test]
    fn same_value_never_records_evaluation() {
        let (mut store, id) = store_with_goal();
        store.update_progress(&id, 0.3, None).unwrap();
        assert_eq!(store.evaluations_for(&id).len(), 1);
        store.update_progress(&id, 0.3, None).unwrap();
        store.update_progress(&id, 0.3, Some("still here")).unwrap();
        assert_eq!(store.evaluations_for(&id).len(), 1);
    }

    #[test]
    fn small_moves_do_not_record_evaluation() {
        let (mut store, id) = store_with_goal();
        store.update_progress(&id, 0.05, None).unwrap();
        assert!(store.evaluations_for(&id).is_empty());
        // 0.9 -> 1.0 is a 0.1 move despite float rounding
        store.update_progress(&id, 0.9, None).unwrap();
        store.update_progress(&id, 1.0, None).unwrap();
        assert_eq!(store.evaluations_for(&id).len(), 2);
    }

    #[test]
    fn small_steps_accumulate_into_an_evaluation() {
        let (mut store, id) = store_with_goal();
        let start = store.get(&id).unwrap().created_at;
        for day in 1..=7 {
            store
                .update_progress_at(&id, 0.05 * day as f64, None, start + Duration::days(day))
                .unwrap();
        }
        let evals = store.evaluations_for(&id);
        assert_eq!(evals.len(), 3);
        assert!((evals[0].previous_progress - 0.0).abs() < 1e-9);
        assert!((evals[1].previous_progress - 0.1).abs() < 1e-9);

        let report = store.evaluate_all_at(start + Duration::days(7) + Duration::hours(1));
        assert!(report.stalled.is_empty());
        assert_eq!(store.get(&id).unwrap().status, GoalStatus::Active);
    }

    #[test]
    fn evaluation_log_and_notes_stay_bounded() {
        let (mut store, id) = store_with_goal();
        for i in 0..(MAX_EVALUATIONS_PER_GOAL * 3) {
            let value = if i % 2 == 0 { 0.6 } else { 0.2 };
            store.update_progress(&id, value, Some("evidence")).unwrap();
        }
        assert_eq!(store.evaluations_for(&id).len(), MAX_EVALUATIONS_PER_GOAL);
        assert_eq!(store.stats().evaluations_recorded, MAX_EVALUATIONS_PER_GOAL * 3);
        assert_eq!(store.get(&id).unwrap().progress_notes.len(), crate::goals::MAX_PROGRESS_NOTES);
        assert_eq!(store.last_evaluation().unwrap().current_progress, 0.2);
    }

    #[test]
    fn seeds_create_each_title_once() {
        let (mut store, _) = store_with_goal();
        let seeds = vec![
            GoalSeed::new("learn rust"),
            GoalSeed {
                priority: GoalPriority::High,
                autonomy_level: Some(0.8),
                entities: vec!["Phoenix".into()],
                ..GoalSeed::new("Ship Phoenix")
            },
            GoalSeed::new("  "),
            GoalSeed::new("ship phoenix"),
        ];
        let created = store.seed(&seeds).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].priority, GoalPriority::High);
        assert_eq!(created[0].autonomy_level, 0.8);
        assert_eq!(created[0].linked_entities, vec!["Phoenix"]);
        assert!(store.seed(&seeds).unwrap().is_empty());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn progress_is_clamped_and_completes() {
        let (mut store, id) = store_with_goal();
        let goal = store.update_progress(&id, 1.7, None).unwrap();
        assert_eq!(goal.progress, 1.0);
        assert_eq!(goal.status, GoalStatus::Completed);
        assert!(goal.completed_at.is_some());

        let (mut store, id) = store_with_goal();
        let goal = store.update_progress(&id, -0.4, None).unwrap();
        assert_eq!(goal.progress, 0.0);
    }

    #[test]
    fn pause_and_resume_only_from_valid_states() {
        let (mut store, id) = store_with_goal();
        assert!(store.resume(&id).is_err());
        store.pause(&id).unwrap();
        assert!(store.pause(&id).is_err());
        assert_eq!(store.resume(&id).unwrap().status, GoalStatus::Active);
    }

    #[test]
    fn unknown_id_is_not_found_and_noop() {
        let (mut store, _) = store_with_goal();
        let before = store.stats();
        assert!(matches!(
            store.update_progress("missing", 0.5, None),
            Err(CognitionError::GoalNotFound(_))
        ));
        assert!(matches!(store.pause("missing"), Err(CognitionError::GoalNotFound(_))));
        assert!(store.link_entities("missing", vec!["e1".into()]).is_err());
        assert_eq!(store.stats().total, before.total);
        assert_eq!(store.stats().evaluations_recorded, before.evaluations_recorded);
    }

    #[test]
    fn child_fan_out_is_capped() {
        let (mut store, parent) = store_with_goal();
        for i in 0..MAX_CHILD_GOALS {
            store
                .create(
                    format!("child {i}"),
                    "",
                    GoalSource::Derived,
                    GoalOptions::default().with_parent(parent.clone()),
                )
                .unwrap();
        }
        let overflow = store.create(
            "one too many",
            "",
            GoalSource::Derived,
            GoalOptions::default().with_parent(parent.clone()),
        );
        assert!(matches!(overflow, Err(CognitionError::ChildLimitExceeded { .. })));
        assert_eq!(store.children(&parent).unwrap().len(), MAX_CHILD_GOALS);
    }

    #[test]
    fn links_are_deduplicated() {
        let (mut store, id) = store_with_goal();
        assert_eq!(store.link_entities(&id, vec!["a".into(), "b".into(), "a".into()]).unwrap(), 2);
        assert_eq!(store.link_entities(&id, vec!["b".into(), "c".into()]).unwrap(), 1);
        assert_eq!(store.get(&id).unwrap().linked_entities, vec!["a", "b", "c"]);
        assert_eq!(store.link_memories(&id, vec!["m1".into(), "m1".into()]).unwrap(), 1);
    }

    #[test]
    fn autonomy_rises_after_three_and_drops_on_decrease() {
        let (mut store, id) = store_with_goal();
        let start = store.get(&id).unwrap().autonomy_level;
        store.update_progress(&id, 0.1, None).unwrap();
        store.update_progress(&id, 0.2, None).unwrap();
        assert_eq!(store.adjust_autonomy(&id).unwrap(), 0.0);
        store.update_progress(&id, 0.3, None).unwrap();
        let delta = store.adjust_autonomy(&id).unwrap();
        assert!((delta - AUTONOMY_STEP).abs() < 1e-9);
        // Already consumed: no double counting.
        assert_eq!(store.adjust_autonomy(&id).unwrap(), 0.0);

        store.update_progress(&id, 0.1, None).unwrap();
        let delta = store.adjust_autonomy(&id).unwrap();
        assert!((delta + AUTONOMY_STEP).abs() < 1e-9);
        assert!((store.get(&id).unwrap().autonomy_level - start).abs() < 1e-9);
    }

    #[test]
    fn urgent_goals_sorted_by_priority_then_deadline() {
        let mut store = GoalStore::new();
        let now = Utc::now();
        let soon = store
            .create(
                "soon",
                "",
                GoalSource::User,
                GoalOptions::default()
                    .with_priority(GoalPriority::Low)
                    .with_deadline(now + Duration::days(2)),
            )
            .unwrap();
        let sooner = store
            .create(
                "sooner",
                "",
                GoalSource::User,
                GoalOptions::default()
                    .with_priority(GoalPriority::Low)
                    .with_deadline(now + Duration::days(1)),
            )
            .unwrap();
        let critical = store
            .create(
                "critical",
                "",
                GoalSource::User,
                GoalOptions::default().with_priority(GoalPriority::Critical),
            )
            .unwrap();
        store
            .create(
                "far",
                "",
                GoalSource::User,
                GoalOptions::default().with_deadline(now + Duration::days(30)),
            )
            .unwrap();

        let ids: Vec<String> = store.urgent_goals_at(now).into_iter().map(|g| g.id).collect();
        assert_eq!(ids, vec![critical.id, sooner.id, soon.id]);
    }

    #[test]
    fn stall_sweep_marks_idle_and_overdue_goals() {
        let mut store = GoalStore::new();
        let now = Utc::now();
        let idle = store
            .create("idle", "", GoalSource::Agent, GoalOptions::default())
            .unwrap();
        let overdue = store
            .create(
                "overdue",
                "",
                GoalSource::User,
                GoalOptions::default().with_deadline(now + Duration::days(1)),
            )
            .unwrap();

        assert!(store.evaluate_all_at(now).stalled.is_empty());

        let report = store.evaluate_all_at(now + Duration::days(STALL_WINDOW_DAYS + 1));
        assert_eq!(report.stalled.len(), 2);
        assert_eq!(report.recommendations.len(), 2);
        assert_eq!(store.get(&idle.id).unwrap().status, GoalStatus::Stalled);
        assert_eq!(store.get(&overdue.id).unwrap().status, GoalStatus::Stalled);

        // Stalled goals are no longer active, so a second sweep reports nothing new.
        assert!(store
            .evaluate_all_at(now + Duration::days(STALL_WINDOW_DAYS + 2))
            .stalled
            .is_empty());
    }

    #[test]
    fn progress_on_stalled_goal_reactivates_it() {
        let (mut store, id) = store_with_goal();
        store.evaluate_all_at(Utc::now() + Duration::days(STALL_WINDOW_DAYS + 1));
        assert_eq!(store.get(&id).unwrap().status, GoalStatus::Stalled);
        let goal = store.update_progress(&id, 0.2, Some("fresh evidence")).unwrap();
        assert_eq!(goal.status, GoalStatus::Active);
    }

    #[test]
    fn abandoned_goals_reject_progress_and_completion() {
        let (mut store, id) = store_with_goal();
        store.abandon(&id, Some("obsolete")).unwrap();
        assert!(store.update_progress(&id, 0.5, None).is_err());
        assert!(store.complete(&id, None).is_err());
        assert!(store.abandon(&id, None).is_err());
    }

    #[test]
    fn stats_count_by_dimension() {
        let mut store = GoalStore::new();
        let a = store
            .create("a", "", GoalSource::User, GoalOptions::default())
            .unwrap();
        store
            .create("b", "", GoalSource::Inferred, GoalOptions::default().with_priority(GoalPriority::High))
            .unwrap();
        store.update_progress(&a.id, 0.5, None).unwrap();
        let stats = store.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status.get("active"), Some(&2));
        assert_eq!(stats.by_source.get("inferred"), Some(&1));
        assert_eq!(stats.by_priority.get("high"), Some(&1));
        assert!((stats.average_progress - 0.25).abs() < 1e-9);
    }
}
