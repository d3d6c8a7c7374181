//! Budget Allocator: a fixed time envelope per cycle and a cost ledger against it.
//!
//! Budget units are milliseconds of task execution time. Each cycle gets 500 units, 20 % of
//! which is held in reserve; tasks draw from the remaining 80 %. Execution stops being
//! admitted once 90 % of the available budget is used; 70 % only asks the caller to be
//! selective.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{CognitionError, CognitionResult};
use crate::task::TaskType;

pub const TOTAL_BUDGET: f64 = 500.0;
pub const RESERVED_FRACTION: f64 = 0.2;
pub const PER_TASK_LIMIT: f64 = 100.0;

/// Utilization (%) at which no further tasks are admitted.
pub const HARD_STOP_PERCENT: f64 = 90.0;

/// Utilization (%) at which the caller should only run high-value tasks.
pub const SELECTIVE_PERCENT: f64 = 70.0;

/// Per-cycle envelope. Immutable except for `end_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub cycle_id: String,
    pub total_budget: f64,
    pub reserved_budget: f64,
    pub available_budget: f64,
    pub per_task_limit: f64,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Cost reported after a task executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCost {
    pub task_id: String,
    pub task_type: TaskType,
    pub execution_time_ms: u64,
    #[serde(default)]
    pub memory_peak_mb: f64,
    #[serde(default)]
    pub db_queries_count: u32,
    #[serde(default)]
    pub service_calls_count: u32,
    pub success: bool,
}

/// Aggregates for one cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleStats {
    pub cycle_id: String,
    pub tasks_executed: usize,
    pub tasks_failed: usize,
    /// Percentage rounded to 2 decimals.
    pub success_rate: f64,
    pub average_task_time_ms: f64,
    pub max_task_time_ms: u64,
    pub peak_memory_mb: f64,
    pub total_db_queries: u64,
    pub total_service_calls: u64,
    pub budget_allocated: f64,
    pub budget_used: f64,
    pub budget_remaining: f64,
    pub utilization_percent: f64,
    pub closed: bool,
}

/// Cross-cycle totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetStats {
    pub cycles_allocated: u64,
    pub cycles_closed: u64,
    pub total_allocated: f64,
    pub total_used: f64,
    pub peak_utilization_percent: f64,
    /// Tasks whose cost exceeded the per-task limit.
    pub tasks_exceeding_limit: u64,
    pub open_cycles: usize,
}

#[derive(Debug, Clone)]
struct CycleLedger {
    allocation: BudgetAllocation,
    costs: Vec<TaskCost>,
    /// Latched once the hard threshold is reached.
    halted: bool,
}

impl CycleLedger {
    fn used(&self) -> f64 {
        self.costs.iter().map(|c| c.execution_time_ms as f64).sum()
    }

    fn remaining(&self) -> f64 {
        (self.allocation.available_budget - self.used()).max(0.0)
    }

    fn utilization(&self) -> f64 {
        if self.allocation.available_budget <= 0.0 {
            return 100.0;
        }
        (self.used() / self.allocation.available_budget * 100.0).min(100.0)
    }
}

#[derive(Debug, Default)]
pub struct BudgetAllocator {
    ledgers: HashMap<String, CycleLedger>,
    /// Cycle ids in allocation order (for eviction).
    order: VecDeque<String>,
    stats: BudgetStats,
}

impl BudgetAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an envelope for `cycle_id`. Allocating an id that already has a ledger is a
    /// programmer error: it is logged and the existing allocation is returned.
    pub fn allocate_budget(&mut self, cycle_id: &str) -> BudgetAllocation {
        if let Some(existing) = self.ledgers.get(cycle_id) {
            error!(
                target: "pagi::budget",
                cycle_id = %cycle_id,
                "Budget already allocated for cycle; reusing existing ledger"
            );
            return existing.allocation.clone();
        }

        let reserved = TOTAL_BUDGET * RESERVED_FRACTION;
        let allocation = BudgetAllocation {
            cycle_id: cycle_id.to_string(),
            total_budget: TOTAL_BUDGET,
            reserved_budget: reserved,
            available_budget: TOTAL_BUDGET - reserved,
            per_task_limit: PER_TASK_LIMIT,
            start_time: Utc::now(),
            end_time: None,
        };
        self.ledgers.insert(
            cycle_id.to_string(),
            CycleLedger {
                allocation: allocation.clone(),
                costs: Vec::new(),
                halted: false,
            },
        );
        self.order.push_back(cycle_id.to_string());
        self.stats.cycles_allocated += 1;
        self.stats.total_allocated += allocation.available_budget;
        info!(
            target: "pagi::budget",
            cycle_id = %cycle_id,
            available = allocation.available_budget,
            "Budget allocated"
        );
        allocation
    }

    /// Appends a cost to the cycle's ledger. Unknown cycles are logged and ignored.
    pub fn record_task_cost(&mut self, cycle_id: &str, cost: TaskCost) -> CognitionResult<()> {
        let Some(ledger) = self.ledgers.get_mut(cycle_id) else {
            warn!(
                target: "pagi::budget",
                cycle_id = %cycle_id,
                task_id = %cost.task_id,
                "Cost reported for unknown cycle; ignored"
            );
            return Err(CognitionError::UnknownCycle(cycle_id.to_string()));
        };

        if cost.execution_time_ms as f64 > ledger.allocation.per_task_limit {
            self.stats.tasks_exceeding_limit += 1;
            warn!(
                target: "pagi::budget",
                cycle_id = %cycle_id,
                task_id = %cost.task_id,
                task_type = %cost.task_type,
                execution_time_ms = cost.execution_time_ms,
                limit = ledger.allocation.per_task_limit,
                "Task budget exceeded"
            );
        }
        ledger.costs.push(cost);
        let utilization = ledger.utilization();
        if utilization >= HARD_STOP_PERCENT {
            ledger.halted = true;
        }
        if utilization > self.stats.peak_utilization_percent {
            self.stats.peak_utilization_percent = utilization;
        }
        Ok(())
    }

    /// `available − Σ execution time`, floored at 0. Unknown cycles have nothing left.
    pub fn get_remaining_budget(&self, cycle_id: &str) -> f64 {
        self.ledgers.get(cycle_id).map(|l| l.remaining()).unwrap_or(0.0)
    }

    /// Used / available × 100, capped at 100.
    pub fn get_utilization_percent(&self, cycle_id: &str) -> f64 {
        self.ledgers.get(cycle_id).map(|l| l.utilization()).unwrap_or(0.0)
    }

    /// False once utilization has reached 90 %; never flips back within a cycle.
    pub fn should_continue_executing(&self, cycle_id: &str) -> bool {
        match self.ledgers.get(cycle_id) {
            Some(ledger) => {
                !ledger.halted
                    && ledger.allocation.end_time.is_none()
                    && ledger.utilization() < HARD_STOP_PERCENT
            }
            None => false,
        }
    }

    /// True once utilization passes the soft 70 % threshold.
    pub fn is_selective(&self, cycle_id: &str) -> bool {
        self.get_utilization_percent(cycle_id) >= SELECTIVE_PERCENT
    }

    pub fn can_fit_task(&self, cycle_id: &str, estimate: f64) -> bool {
        estimate <= self.get_remaining_budget(cycle_id)
    }

    pub fn allocation(&self, cycle_id: &str) -> Option<&BudgetAllocation> {
        self.ledgers.get(cycle_id).map(|l| &l.allocation)
    }

    pub fn get_cycle_stats(&self, cycle_id: &str) -> Option<CycleStats> {
        let ledger = self.ledgers.get(cycle_id)?;
        let executed = ledger.costs.len();
        let failed = ledger.costs.iter().filter(|c| !c.success).count();
        let used = ledger.used();
        let success_rate = if executed == 0 {
            0.0
        } else {
            round2((executed - failed) as f64 / executed as f64 * 100.0)
        };
        Some(CycleStats {
            cycle_id: cycle_id.to_string(),
            tasks_executed: executed,
            tasks_failed: failed,
            success_rate,
            average_task_time_ms: if executed == 0 { 0.0 } else { used / executed as f64 },
            max_task_time_ms: ledger
                .costs
                .iter()
                .map(|c| c.execution_time_ms)
                .max()
                .unwrap_or(0),
            peak_memory_mb: ledger
                .costs
                .iter()
                .map(|c| c.memory_peak_mb)
                .fold(0.0, f64::max),
            total_db_queries: ledger.costs.iter().map(|c| c.db_queries_count as u64).sum(),
            total_service_calls: ledger.costs.iter().map(|c| c.service_calls_count as u64).sum(),
            budget_allocated: ledger.allocation.available_budget,
            budget_used: used,
            budget_remaining: ledger.remaining(),
            utilization_percent: ledger.utilization(),
            closed: ledger.allocation.end_time.is_some(),
        })
    }

    /// Stamps `end_time` and folds the cycle into the cross-cycle totals.
    pub fn close_cycle(&mut self, cycle_id: &str) -> CognitionResult<CycleStats> {
        let ledger = self
            .ledgers
            .get_mut(cycle_id)
            .ok_or_else(|| CognitionError::UnknownCycle(cycle_id.to_string()))?;
        if ledger.allocation.end_time.is_none() {
            ledger.allocation.end_time = Some(Utc::now());
            ledger.halted = true;
            self.stats.cycles_closed += 1;
            self.stats.total_used += ledger.used();
        }
        let stats = self
            .get_cycle_stats(cycle_id)
            .ok_or_else(|| CognitionError::UnknownCycle(cycle_id.to_string()))?;
        info!(
            target: "pagi::budget",
            cycle_id = %cycle_id,
            used = stats.budget_used,
            utilization = stats.utilization_percent,
            tasks = stats.tasks_executed,
            "Budget cycle closed"
        );
        Ok(stats)
    }

    /// Evicts the oldest ledgers beyond `keep_last_n`. Returns how many were dropped.
    pub fn clear_old_cycles(&mut self, keep_last_n: usize) -> usize {
        let mut removed = 0;
        while self.order.len() > keep_last_n {
            if let Some(oldest) = self.order.pop_front() {
                self.ledgers.remove(&oldest);
                removed += 1;
            }
        }
        removed
    }

    pub fn get_stats(&self) -> BudgetStats {
        BudgetStats {
            open_cycles: self
                .ledgers
                .values()
                .filter(|l| l.allocation.end_time.is_none())
                .count(),
            ..self.stats.clone()
        }
    }

    pub fn reset(&mut self) {
        self.ledgers.clear();
        self.order.clear();
        self.stats = BudgetStats::default();
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cost(id: &str, ms: u64, success: bool) -> TaskCost {
        TaskCost {
            task_id: id.to_string(),
            task_type: TaskType::PatternAnalysis,
            execution_time_ms: ms,
            memory_peak_mb: 12.0,
            db_queries_count: 2,
            service_calls_count: 1,
            success,
        }
    }

    #[test]
    fn allocation_splits_reserve() {
        let mut budget = BudgetAllocator::new();
        let a = budget.allocate_budget("c");
        assert_eq!(a.reserved_budget + a.available_budget, a.total_budget);
        assert_eq!(a.available_budget, 0.8 * a.total_budget);
        assert_eq!(a.per_task_limit, PER_TASK_LIMIT);
    }

    #[test]
    fn duplicate_allocation_reuses_ledger() {
        let mut budget = BudgetAllocator::new();
        budget.allocate_budget("c");
        budget.record_task_cost("c", cost("t1", 100, true)).unwrap();
        budget.allocate_budget("c");
        assert_eq!(budget.get_remaining_budget("c"), 300.0);
        assert_eq!(budget.get_stats().cycles_allocated, 1);
    }

    #[test]
    fn unknown_cycle_is_noop() {
        let mut budget = BudgetAllocator::new();
        assert!(budget.record_task_cost("ghost", cost("t", 10, true)).is_err());
        assert_eq!(budget.get_remaining_budget("ghost"), 0.0);
        assert!(!budget.should_continue_executing("ghost"));
        assert!(budget.get_cycle_stats("ghost").is_none());
        assert!(budget.close_cycle("ghost").is_err());
    }

    #[test]
    fn remaining_floors_at_zero_and_utilization_caps() {
        let mut budget = BudgetAllocator::new();
        budget.allocate_budget("c");
        budget.record_task_cost("c", cost("big", 450, true)).unwrap();
        assert_eq!(budget.get_remaining_budget("c"), 0.0);
        assert_eq!(budget.get_utilization_percent("c"), 100.0);
        assert_eq!(budget.get_stats().tasks_exceeding_limit, 1);
        assert!(!budget.can_fit_task("c", 1.0));
    }

    #[test]
    fn cycle_stats_aggregate_costs() {
        let mut budget = BudgetAllocator::new();
        budget.allocate_budget("c");
        budget.record_task_cost("c", cost("a", 30, true)).unwrap();
        budget.record_task_cost("c", cost("b", 60, false)).unwrap();
        budget.record_task_cost("c", cost("d", 10, true)).unwrap();
        let stats = budget.get_cycle_stats("c").unwrap();
        assert_eq!(stats.tasks_executed, 3);
        assert_eq!(stats.tasks_failed, 1);
        assert_eq!(stats.success_rate, 66.67);
        assert_eq!(stats.max_task_time_ms, 60);
        assert!((stats.average_task_time_ms - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.total_db_queries, 6);
        assert_eq!(stats.total_service_calls, 3);
        assert_eq!(stats.peak_memory_mb, 12.0);
    }

    #[test]
    fn closed_cycle_stops_and_old_cycles_evicted() {
        let mut budget = BudgetAllocator::new();
        for i in 0..5 {
            budget.allocate_budget(&format!("c{i}"));
        }
        budget.close_cycle("c0").unwrap();
        assert!(!budget.should_continue_executing("c0"));
        assert!(budget.get_cycle_stats("c0").unwrap().closed);

        assert_eq!(budget.clear_old_cycles(2), 3);
        assert!(budget.get_cycle_stats("c0").is_none());
        assert!(budget.get_cycle_stats("c4").is_some());
        assert_eq!(budget.get_stats().open_cycles, 2);

        budget.reset();
        assert_eq!(budget.get_stats().cycles_allocated, 0);
    }

    #[test]
    fn selective_threshold_is_softer_than_stop() {
        let mut budget = BudgetAllocator::new();
        budget.allocate_budget("c");
        budget.record_task_cost("c", cost("a", 290, true)).unwrap();
        assert!(budget.is_selective("c"));
        assert!(budget.should_continue_executing("c"));
    }
}
