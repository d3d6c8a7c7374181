//! Background task types and candidate tasks.
//!
//! The handler set is fixed, so task types are a closed enum: risk hazards, scheduling
//! impact and default cost estimates are all exhaustive matches on [`TaskType`].

use serde::{Deserialize, Serialize};

use crate::goals::GoalPriority;

/// Every kind of background work the cycle can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    MemoryConsolidation,
    PatternAnalysis,
    EntityExtraction,
    GoalResearch,
    GoalAnalysis,
    KbMaintenance,
    UserModelUpdate,
}

/// Intrinsic hazard carried by a task type regardless of its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskHazard {
    /// Mutates shared knowledge-base or memory state.
    DataMutation,
    /// Depends on a slow or flaky collaborator (semantic search).
    ExternalDependency,
}

impl TaskHazard {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataMutation => "data_mutation",
            Self::ExternalDependency => "external_dependency",
        }
    }
}

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        TaskType::MemoryConsolidation,
        TaskType::PatternAnalysis,
        TaskType::EntityExtraction,
        TaskType::GoalResearch,
        TaskType::GoalAnalysis,
        TaskType::KbMaintenance,
        TaskType::UserModelUpdate,
    ];

    /// Task types generated every cycle independent of goals.
    pub const MAINTENANCE: [TaskType; 5] = [
        TaskType::MemoryConsolidation,
        TaskType::PatternAnalysis,
        TaskType::EntityExtraction,
        TaskType::KbMaintenance,
        TaskType::UserModelUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemoryConsolidation => "memory_consolidation",
            Self::PatternAnalysis => "pattern_analysis",
            Self::EntityExtraction => "entity_extraction",
            Self::GoalResearch => "goal_research",
            Self::GoalAnalysis => "goal_analysis",
            Self::KbMaintenance => "kb_maintenance",
            Self::UserModelUpdate => "user_model_update",
        }
    }

    /// Research and analysis work directly on goals.
    pub fn is_goal_directed(&self) -> bool {
        matches!(self, Self::GoalResearch | Self::GoalAnalysis)
    }

    /// Fixed impact weight used by the scheduler (0–1).
    pub fn impact(&self) -> f64 {
        match self {
            Self::GoalResearch => 0.9,
            Self::GoalAnalysis => 0.85,
            Self::PatternAnalysis => 0.6,
            Self::EntityExtraction => 0.5,
            Self::UserModelUpdate => 0.45,
            Self::MemoryConsolidation => 0.35,
            Self::KbMaintenance => 0.3,
        }
    }

    /// Intrinsic hazard and its fixed risk contribution.
    pub fn hazard(&self) -> Option<(TaskHazard, f64)> {
        match self {
            Self::KbMaintenance => Some((TaskHazard::DataMutation, 0.15)),
            Self::MemoryConsolidation => Some((TaskHazard::DataMutation, 0.1)),
            Self::EntityExtraction | Self::UserModelUpdate => {
                Some((TaskHazard::DataMutation, 0.05))
            }
            Self::GoalResearch => Some((TaskHazard::ExternalDependency, 0.05)),
            Self::PatternAnalysis | Self::GoalAnalysis => None,
        }
    }

    /// Default cost estimate in budget units (milliseconds).
    pub fn default_estimate_ms(&self) -> f64 {
        match self {
            Self::GoalResearch => 80.0,
            Self::KbMaintenance => 70.0,
            Self::GoalAnalysis => 60.0,
            Self::PatternAnalysis => 50.0,
            Self::MemoryConsolidation => 45.0,
            Self::EntityExtraction => 40.0,
            Self::UserModelUpdate => 30.0,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| format!("unknown task type: {}", s))
    }
}

/// A proposed unit of background work, not yet scored or admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateTask {
    pub task_id: String,
    pub task_type: TaskType,
    /// Handler arguments (e.g. `{"goal_id": "..."}`).
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Priority of the originating goal, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<GoalPriority>,
    pub estimated_duration_ms: f64,
}

impl CandidateTask {
    pub fn new(task_id: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            task_id: task_id.into(),
            task_type,
            payload: serde_json::Value::Null,
            priority: None,
            estimated_duration_ms: task_type.default_estimate_ms(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: GoalPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_estimate(mut self, estimated_duration_ms: f64) -> Self {
        self.estimated_duration_ms = estimated_duration_ms.max(0.0);
        self
    }

    /// `goal_id` from the payload, if present.
    pub fn goal_id(&self) -> Option<&str> {
        self.payload.get("goal_id").and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_string_round_trip() {
        for t in TaskType::ALL {
            assert_eq!(t.as_str().parse::<TaskType>().unwrap(), t);
        }
        assert!("telepathy".parse::<TaskType>().is_err());
    }

    #[test]
    fn goal_directed_types_have_highest_impact() {
        let lowest_goal_directed = TaskType::ALL
            .iter()
            .filter(|t| t.is_goal_directed())
            .map(|t| t.impact())
            .fold(f64::MAX, f64::min);
        assert!(TaskType::MAINTENANCE
            .iter()
            .all(|t| t.impact() < lowest_goal_directed));
    }
}
