//! Risk Assessor: per-task-type failure history turned into a risk score, trend and mitigation.
//!
//! ## Scoring
//!
//! `risk_score = 0.7 × failure_fraction + hazard + (0.1 if degrading)`, clamped to [0,1].
//!
//! | Condition | Mitigation |
//! |-----------|------------|
//! | failure rate > 70 % | `skip` |
//! | failure rate 40–70 % | `throttle` |
//! | data-mutation hazard | `isolation` |
//! | external dependency or degrading trend | `timeout` |
//! | otherwise | `none` |
//!
//! Risk level buckets the score (low < 0.25 ≤ medium < 0.5 ≤ high < 0.75 ≤ critical) and is
//! escalated to at least `high` whenever the failure rate exceeds 50 %.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::task::{TaskHazard, TaskType};

/// Errors kept per task type.
pub const FAILURE_RING_CAPACITY: usize = 20;

/// Outcomes considered for trend detection.
const TREND_WINDOW: usize = 8;

const FAILURE_WEIGHT: f64 = 0.7;
const DEGRADING_PENALTY: f64 = 0.1;

/// Attempts needed before a task type's risk counts fully towards system health.
const HEALTH_CONFIDENCE_ATTEMPTS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 0.25 {
            Self::Low
        } else if score < 0.5 {
            Self::Medium
        } else if score < 0.75 {
            Self::High
        } else {
            Self::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationStrategy {
    None,
    Timeout,
    Throttle,
    Isolation,
    Skip,
}

impl MitigationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Timeout => "timeout",
            Self::Throttle => "throttle",
            Self::Isolation => "isolation",
            Self::Skip => "skip",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mitigation {
    pub strategy: MitigationStrategy,
    pub description: String,
}

/// One contributing risk factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

/// Snapshot computed on demand; never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub task_type: TaskType,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    /// Percentage (0–100).
    pub failure_rate: f64,
    pub risks: Vec<RiskFactor>,
    pub mitigation: Mitigation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureTrend {
    Improving,
    Degrading,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub error: String,
}

/// Running history for one task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePattern {
    pub task_type: TaskType,
    pub total_attempts: u64,
    pub total_failures: u64,
    /// Percentage (0–100).
    pub failure_rate: f64,
    pub trend: FailureTrend,
    /// Last [`FAILURE_RING_CAPACITY`] errors, oldest first.
    pub recent_failures: VecDeque<FailureRecord>,
    /// Last 8 outcomes (`true` = success), oldest first.
    pub recent_outcomes: VecDeque<bool>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl FailurePattern {
    fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            total_attempts: 0,
            total_failures: 0,
            failure_rate: 0.0,
            trend: FailureTrend::Stable,
            recent_failures: VecDeque::new(),
            recent_outcomes: VecDeque::new(),
            last_failure_at: None,
        }
    }

    fn record(&mut self, success: bool) {
        self.total_attempts += 1;
        if !success {
            self.total_failures += 1;
        }
        self.failure_rate = self.total_failures as f64 / self.total_attempts as f64 * 100.0;
        self.recent_outcomes.push_back(success);
        while self.recent_outcomes.len() > TREND_WINDOW {
            self.recent_outcomes.pop_front();
        }
        self.trend = trend_of(&self.recent_outcomes);
    }
}

/// Compares the success mean of the earliest quarter of the window with the latest quarter.
fn trend_of(outcomes: &VecDeque<bool>) -> FailureTrend {
    let quarter = outcomes.len() / 4;
    if quarter == 0 {
        return FailureTrend::Stable;
    }
    let early = success_mean(outcomes.iter().take(quarter));
    let late = success_mean(outcomes.iter().skip(outcomes.len() - quarter));
    if early - late >= 0.5 {
        FailureTrend::Degrading
    } else if late - early >= 0.5 {
        FailureTrend::Improving
    } else {
        FailureTrend::Stable
    }
}

fn success_mean<'a>(outcomes: impl Iterator<Item = &'a bool>) -> f64 {
    let (n, ok) = outcomes.fold((0usize, 0usize), |(n, ok), s| (n + 1, ok + usize::from(*s)));
    ok as f64 / n.max(1) as f64
}

/// Cross-type health summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    /// 1 − mean confidence-weighted risk (1.0 when nothing is tracked).
    pub overall_health: f64,
    /// Task types currently at `critical` risk.
    pub critical_issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub tracked_task_types: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskStats {
    pub assessed_types: usize,
    pub average_risk_score: f64,
    pub total_attempts: u64,
    pub total_failures: u64,
}

/// Owns the failure-pattern table. Callers only ever get snapshots.
#[derive(Debug, Default)]
pub struct RiskAssessor {
    patterns: HashMap<TaskType, FailurePattern>,
}

impl RiskAssessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assesses `task_type`, starting an empty history if it has never been seen.
    pub fn assess_task(&mut self, task_type: TaskType) -> RiskAssessment {
        let pattern = self
            .patterns
            .entry(task_type)
            .or_insert_with(|| FailurePattern::new(task_type));
        let assessment = assess(pattern);
        debug!(
            target: "pagi::risk",
            task_type = %task_type,
            score = assessment.risk_score,
            level = assessment.risk_level.as_str(),
            mitigation = assessment.mitigation.strategy.as_str(),
            "Task assessed"
        );
        assessment
    }

    pub fn record_success(&mut self, task_type: TaskType) {
        self.pattern_mut(task_type).record(true);
    }

    pub fn record_failure(&mut self, task_type: TaskType, error: impl Into<String>) {
        let error = error.into();
        let now = Utc::now();
        let pattern = self.pattern_mut(task_type);
        pattern.record(false);
        pattern.recent_failures.push_back(FailureRecord {
            timestamp: now,
            error: error.clone(),
        });
        while pattern.recent_failures.len() > FAILURE_RING_CAPACITY {
            pattern.recent_failures.pop_front();
        }
        pattern.last_failure_at = Some(now);
        warn!(
            target: "pagi::risk",
            task_type = %task_type,
            failure_rate = pattern.failure_rate,
            error = %error,
            "Task failure recorded"
        );
    }

    /// Snapshot of the history for `task_type`.
    pub fn failure_pattern(&self, task_type: TaskType) -> Option<FailurePattern> {
        self.patterns.get(&task_type).cloned()
    }

    pub fn get_system_health(&self) -> SystemHealth {
        let mut patterns: Vec<&FailurePattern> = self.patterns.values().collect();
        patterns.sort_by_key(|p| p.task_type);

        let mut critical_issues = Vec::new();
        let mut recommendations = Vec::new();
        let mut adjusted_sum = 0.0;

        for pattern in &patterns {
            let assessment = assess(pattern);
            let confidence = (pattern.total_attempts as f64 / HEALTH_CONFIDENCE_ATTEMPTS).min(1.0);
            adjusted_sum += assessment.risk_score * confidence;

            if assessment.risk_level == RiskLevel::Critical {
                critical_issues.push(format!(
                    "{}: risk {:.2}, failure rate {:.1}%",
                    pattern.task_type, assessment.risk_score, pattern.failure_rate
                ));
            }
            match assessment.mitigation.strategy {
                MitigationStrategy::Skip => recommendations.push(format!(
                    "Suspend {} until its failures are investigated ({:.0}% failing).",
                    pattern.task_type, pattern.failure_rate
                )),
                MitigationStrategy::Throttle => recommendations.push(format!(
                    "Throttle {} to one run per cycle ({:.0}% failing).",
                    pattern.task_type, pattern.failure_rate
                )),
                _ => {}
            }
            if pattern.trend == FailureTrend::Degrading {
                recommendations.push(format!(
                    "{} is degrading; check its latest error: {}",
                    pattern.task_type,
                    pattern
                        .recent_failures
                        .back()
                        .map(|f| f.error.as_str())
                        .unwrap_or("none recorded")
                ));
            }
        }

        let overall_health = if patterns.is_empty() {
            1.0
        } else {
            (1.0 - adjusted_sum / patterns.len() as f64).clamp(0.0, 1.0)
        };

        SystemHealth {
            overall_health,
            critical_issues,
            recommendations,
            tracked_task_types: patterns.len(),
        }
    }

    pub fn get_stats(&self) -> RiskStats {
        let n = self.patterns.len();
        let score_sum: f64 = self.patterns.values().map(|p| assess(p).risk_score).sum();
        RiskStats {
            assessed_types: n,
            average_risk_score: if n == 0 { 0.0 } else { score_sum / n as f64 },
            total_attempts: self.patterns.values().map(|p| p.total_attempts).sum(),
            total_failures: self.patterns.values().map(|p| p.total_failures).sum(),
        }
    }

    /// Clears all history. Test/debug use only.
    pub fn reset(&mut self) {
        self.patterns.clear();
        info!(target: "pagi::risk", "Risk history reset");
    }

    fn pattern_mut(&mut self, task_type: TaskType) -> &mut FailurePattern {
        self.patterns
            .entry(task_type)
            .or_insert_with(|| FailurePattern::new(task_type))
    }
}

fn assess(pattern: &FailurePattern) -> RiskAssessment {
    let task_type = pattern.task_type;
    let mut risks = Vec::new();
    let mut score = FAILURE_WEIGHT * pattern.failure_rate / 100.0;

    if pattern.total_failures > 0 {
        risks.push(RiskFactor {
            kind: "failure_history".to_string(),
            description: format!(
                "{} of {} attempts failed ({:.1}%)",
                pattern.total_failures, pattern.total_attempts, pattern.failure_rate
            ),
        });
    }

    let hazard = task_type.hazard();
    if let Some((kind, contribution)) = hazard {
        score += contribution;
        let description = match kind {
            TaskHazard::DataMutation => "mutates shared knowledge state",
            TaskHazard::ExternalDependency => "depends on an external search service",
        };
        risks.push(RiskFactor {
            kind: kind.as_str().to_string(),
            description: description.to_string(),
        });
    }

    if pattern.trend == FailureTrend::Degrading {
        score += DEGRADING_PENALTY;
        risks.push(RiskFactor {
            kind: "degrading_trend".to_string(),
            description: "recent attempts fail more often than earlier ones".to_string(),
        });
    }

    let risk_score = score.clamp(0.0, 1.0);
    let mut risk_level = RiskLevel::from_score(risk_score);
    if pattern.failure_rate > 50.0 && risk_level < RiskLevel::High {
        risk_level = RiskLevel::High;
    }

    let rate = pattern.failure_rate;
    let (strategy, description) = if rate > 70.0 {
        (MitigationStrategy::Skip, format!("failure rate {:.0}% exceeds 70%", rate))
    } else if rate >= 40.0 {
        (MitigationStrategy::Throttle, format!("failure rate {:.0}% in 40–70%", rate))
    } else if matches!(hazard, Some((TaskHazard::DataMutation, _))) {
        (MitigationStrategy::Isolation, "run alone; mutates shared state".to_string())
    } else if matches!(hazard, Some((TaskHazard::ExternalDependency, _)))
        || pattern.trend == FailureTrend::Degrading
    {
        (MitigationStrategy::Timeout, "bound by the per-task budget limit".to_string())
    } else {
        (MitigationStrategy::None, "no mitigation needed".to_string())
    };

    RiskAssessment {
        task_type,
        risk_level,
        risk_score,
        failure_rate: rate,
        risks,
        mitigation: Mitigation {
            strategy,
            description,
        },
    }
}
