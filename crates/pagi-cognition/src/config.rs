//! Cycle configuration. Load from TOML or env.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CognitionResult;
use crate::goals::GoalSeed;

/// Tunables for the orchestrator and heartbeat.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | PAGI_COGNITION__WAKE_INTERVAL_SECS | 300 | Heartbeat interval between cycles. |
/// | PAGI_COGNITION__JOURNAL_PATH | ./data/pagi_cognition_journal | Sled journal directory. |
/// | PAGI_COGNITION__MIN_AUTONOMY_FOR_TASKS | 0.4 | Goals below this autonomy get no tasks. |
/// | PAGI_COGNITION__MAX_CANDIDATES_PER_CYCLE | 20 | Cap on generated candidates. |
/// | PAGI_COGNITION__KEEP_CYCLE_LEDGERS | 20 | Budget ledgers retained for inspection. |
/// | PAGI_COGNITION__HISTORY_LIMIT | 50 | Cycle results kept in memory. |
/// | PAGI_COGNITION__EVIDENCE_SEARCH_LIMIT | 10 | Semantic hits fetched per goal. |
/// | PAGI_COGNITION__EVIDENCE_MIN_SIMILARITY | 0.65 | Similarity floor for evidence. |
/// | PAGI_COGNITION__MAINTENANCE_TASKS_ENABLED | true | Generate non-goal maintenance tasks. |
/// | PAGI_COGNITION__SELECTIVE_MIN_SCORE | 0.5 | Score floor once the budget turns selective. |
/// | PAGI_COGNITION__RISK_RETRY_AFTER_CYCLES | 12 | Skipped cycles before a risk-skipped type gets one retry; 0 never retries. |
///
/// Goals to pursue are declared in the file as `[[goals]]` tables (see [`GoalSeed`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CognitionConfig {
    pub wake_interval_secs: u64,
    pub journal_path: String,
    pub min_autonomy_for_tasks: f64,
    pub max_candidates_per_cycle: usize,
    pub keep_cycle_ledgers: usize,
    pub history_limit: usize,
    pub evidence_search_limit: usize,
    pub evidence_min_similarity: f64,
    pub maintenance_tasks_enabled: bool,
    pub selective_min_score: f64,
    pub risk_retry_after_cycles: u32,
    #[serde(default)]
    pub goals: Vec<GoalSeed>,
}

impl Default for CognitionConfig {
    fn default() -> Self {
        Self {
            wake_interval_secs: 300,
            journal_path: "./data/pagi_cognition_journal".to_string(),
            min_autonomy_for_tasks: 0.4,
            max_candidates_per_cycle: 20,
            keep_cycle_ledgers: 20,
            history_limit: 50,
            evidence_search_limit: 10,
            evidence_min_similarity: 0.65,
            maintenance_tasks_enabled: true,
            selective_min_score: 0.5,
            risk_retry_after_cycles: 12,
            goals: Vec::new(),
        }
    }
}

impl CognitionConfig {
    /// Load config from file and environment. Precedence: env vars > file at
    /// `PAGI_COGNITION_CONFIG` (default `config/cognition`, any supported extension) > defaults.
    pub fn load() -> CognitionResult<Self> {
        let config_path = std::env::var("PAGI_COGNITION_CONFIG")
            .unwrap_or_else(|_| "config/cognition".to_string());
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &str) -> CognitionResult<Self> {
        let d = Self::default();
        let built = config::Config::builder()
            .set_default("wake_interval_secs", d.wake_interval_secs)?
            .set_default("journal_path", d.journal_path)?
            .set_default("min_autonomy_for_tasks", d.min_autonomy_for_tasks)?
            .set_default("max_candidates_per_cycle", d.max_candidates_per_cycle as u64)?
            .set_default("keep_cycle_ledgers", d.keep_cycle_ledgers as u64)?
            .set_default("history_limit", d.history_limit as u64)?
            .set_default("evidence_search_limit", d.evidence_search_limit as u64)?
            .set_default("evidence_min_similarity", d.evidence_min_similarity)?
            .set_default("maintenance_tasks_enabled", d.maintenance_tasks_enabled)?
            .set_default("selective_min_score", d.selective_min_score)?
            .set_default("risk_retry_after_cycles", d.risk_retry_after_cycles as u64)?
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("PAGI_COGNITION")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: Self = built.try_deserialize()?;
        cfg.min_autonomy_for_tasks = cfg.min_autonomy_for_tasks.clamp(0.0, 1.0);
        cfg.evidence_min_similarity = cfg.evidence_min_similarity.clamp(0.0, 1.0);
        cfg.wake_interval_secs = cfg.wake_interval_secs.max(1);
        Ok(cfg)
    }

    pub fn wake_interval(&self) -> Duration {
        Duration::from_secs(self.wake_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = CognitionConfig::load_from("definitely/not/here/cognition").unwrap();
        assert_eq!(cfg.wake_interval_secs, 300);
        assert_eq!(cfg.min_autonomy_for_tasks, 0.4);
        assert!(cfg.maintenance_tasks_enabled);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cognition.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "wake_interval_secs = 60\nmaintenance_tasks_enabled = false").unwrap();

        let cfg = CognitionConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.wake_interval(), Duration::from_secs(60));
        assert!(!cfg.maintenance_tasks_enabled);
        assert_eq!(cfg.history_limit, 50);
        assert!(cfg.goals.is_empty());
    }

    #[test]
    fn goal_tables_become_seeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cognition.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[[goals]]
title = "Ship Phoenix"
priority = "high"
autonomy_level = 0.7
deadline = "2026-12-01T00:00:00Z"
entities = ["Phoenix"]

[[goals]]
title = "Read more"
"#
        )
        .unwrap();

        let cfg = CognitionConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.goals.len(), 2);
        assert_eq!(cfg.goals[0].priority, crate::goals::GoalPriority::High);
        assert_eq!(cfg.goals[0].autonomy_level, Some(0.7));
        assert!(cfg.goals[0].deadline.is_some());
        assert_eq!(cfg.goals[1], GoalSeed::new("Read more"));
    }
}
