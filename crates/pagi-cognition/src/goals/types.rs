//! Goal records, lifecycle enums and the evaluation audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of direct children a goal may hold.
pub const MAX_CHILD_GOALS: usize = 10;

/// Progress notes retained per goal; the oldest are dropped first.
pub const MAX_PROGRESS_NOTES: usize = 50;

/// Who asked for the goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalSource {
    User,
    Agent,
    Derived,
    Inferred,
}

impl GoalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Derived => "derived",
            Self::Inferred => "inferred",
        }
    }
}

/// Lifecycle state of a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Active,
    Paused,
    Completed,
    Abandoned,
    /// No recent progress, or deadline missed with progress < 1.
    Stalled,
    Blocked,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
            Self::Stalled => "stalled",
            Self::Blocked => "blocked",
        }
    }

    /// Completed and abandoned goals never change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }
}

impl std::fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Goal priority. Ordering follows urgency: `Critical < High < Medium < Low`,
/// so an ascending sort puts critical goals first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl Default for GoalPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl GoalPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Urgency boost contributed to candidate tasks generated from a goal of this priority.
    pub fn urgency_boost(&self) -> f64 {
        match self {
            Self::Critical => 0.3,
            Self::High => 0.2,
            Self::Medium => 0.1,
            Self::Low => 0.0,
        }
    }
}

/// Free-text note appended on progress updates and state transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressNote {
    pub timestamp: DateTime<Utc>,
    pub note: String,
}

/// A unit of pursuit.
///
/// Parent/child links are stored as ids; the [`GoalStore`](super::GoalStore) is the arena
/// that resolves them. Linked entity and memory ids are weak lookup-only references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub source: GoalSource,
    pub status: GoalStatus,
    #[serde(default)]
    pub priority: GoalPriority,
    /// Completion fraction, always within [0, 1].
    pub progress: f64,
    /// How much the scheduler may act on this goal without confirmation (0–1).
    pub autonomy_level: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub child_ids: Vec<String>,
    #[serde(default)]
    pub linked_entities: Vec<String>,
    #[serde(default)]
    pub linked_memories: Vec<String>,
    #[serde(default)]
    pub progress_notes: Vec<ProgressNote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Goal {
    /// True when the deadline lies before `now` and the goal is unfinished.
    pub fn deadline_missed(&self, now: DateTime<Utc>) -> bool {
        match self.deadline {
            Some(deadline) => deadline < now && self.progress < 1.0,
            None => false,
        }
    }

    /// Days until the deadline (negative when passed). `None` without a deadline.
    pub fn days_until_deadline(&self, now: DateTime<Utc>) -> Option<f64> {
        self.deadline
            .map(|d| (d - now).num_seconds() as f64 / 86_400.0)
    }

    pub(crate) fn push_note(&mut self, now: DateTime<Utc>, note: impl Into<String>) {
        self.progress_notes.push(ProgressNote {
            timestamp: now,
            note: note.into(),
        });
        self.trim_notes();
    }

    pub(crate) fn trim_notes(&mut self) {
        let excess = self.progress_notes.len().saturating_sub(MAX_PROGRESS_NOTES);
        if excess > 0 {
            self.progress_notes.drain(..excess);
        }
    }
}

/// Creation options for [`GoalStore::create`](super::GoalStore::create).
#[derive(Debug, Clone)]
pub struct GoalOptions {
    pub priority: GoalPriority,
    pub autonomy_level: f64,
    pub parent_id: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub linked_entities: Vec<String>,
}

impl Default for GoalOptions {
    fn default() -> Self {
        Self {
            priority: GoalPriority::Medium,
            autonomy_level: 0.5,
            parent_id: None,
            deadline: None,
            linked_entities: Vec::new(),
        }
    }
}

impl GoalOptions {
    pub fn with_priority(mut self, priority: GoalPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the autonomy level (clamped to [0.0, 1.0]).
    pub fn with_autonomy(mut self, level: f64) -> Self {
        self.autonomy_level = level.clamp(0.0, 1.0);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.linked_entities = entities;
        self
    }
}

/// A goal declared in configuration, created at startup unless a goal with the same title
/// already exists.
///
/// ```toml
/// [[goals]]
/// title = "Ship the Phoenix release"
/// priority = "high"
/// deadline = "2026-12-01T00:00:00Z"
/// entities = ["Phoenix"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalSeed {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: GoalPriority,
    #[serde(default)]
    pub autonomy_level: Option<f64>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entities: Vec<String>,
}

impl GoalSeed {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub(crate) fn options(&self) -> GoalOptions {
        let mut options = GoalOptions::default()
            .with_priority(self.priority)
            .with_entities(self.entities.clone());
        if let Some(level) = self.autonomy_level {
            options = options.with_autonomy(level);
        }
        if let Some(deadline) = self.deadline {
            options = options.with_deadline(deadline);
        }
        options
    }
}

/// Immutable audit record appended once progress has moved by at least
/// [`EVALUATION_DELTA`](super::store::EVALUATION_DELTA) since the previous evaluation.
/// `previous_progress` is that previous evaluated value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalEvaluation {
    pub goal_id: String,
    pub timestamp: DateTime<Utc>,
    pub previous_progress: f64,
    pub current_progress: f64,
    #[serde(default)]
    pub notes: String,
}

impl GoalEvaluation {
    pub fn is_decrease(&self) -> bool {
        self.current_progress < self.previous_progress
    }
}

/// Result of a stall sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StallReport {
    /// Goals moved to `stalled` by this sweep.
    pub stalled: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Aggregate counts for the dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoalStats {
    pub total: usize,
    pub by_status: std::collections::HashMap<String, usize>,
    pub by_source: std::collections::HashMap<String, usize>,
    pub by_priority: std::collections::HashMap<String, usize>,
    pub average_progress: f64,
    pub evaluations_recorded: usize,
}
