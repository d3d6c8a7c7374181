//! Integration test: budget envelope and risk assessment scenarios.
//!
//! ## Scenarios
//! 1. Budget envelope: allocate, spend in steps, watch the hard stop latch.
//! 2. Round trip: recorded execution time equals `budget_used` after close.
//! 3. Risky task type: 8 failures then 2 successes ends in `skip`.
//! 4. Unseen task types carry zero failure rate.
//! 5. System health reflects critical task types.

use pagi_cognition::{
    BudgetAllocator, MitigationStrategy, RiskAssessor, RiskLevel, TaskCost, TaskType,
    HARD_STOP_PERCENT,
};

fn cost(id: &str, ms: u64) -> TaskCost {
    TaskCost {
        task_id: id.to_string(),
        task_type: TaskType::PatternAnalysis,
        execution_time_ms: ms,
        memory_peak_mb: 0.0,
        db_queries_count: 1,
        service_calls_count: 1,
        success: true,
    }
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

#[test]
fn budget_envelope_scenario() {
    let mut budget = BudgetAllocator::new();
    let allocation = budget.allocate_budget("cycle-1");
    assert_eq!(allocation.total_budget, 500.0);
    assert_eq!(allocation.available_budget, 400.0);
    assert_eq!(allocation.reserved_budget + allocation.available_budget, allocation.total_budget);

    budget.record_task_cost("cycle-1", cost("t1", 50)).unwrap();
    assert_eq!(budget.get_remaining_budget("cycle-1"), 350.0);
    assert_eq!(budget.get_utilization_percent("cycle-1"), 12.5);

    for i in 0..3 {
        budget.record_task_cost("cycle-1", cost(&format!("t{}", i + 2), 95)).unwrap();
    }
    // 335 / 400
    assert!((budget.get_utilization_percent("cycle-1") - 83.75).abs() < 1e-9);
    assert!(budget.should_continue_executing("cycle-1"));
    assert!(budget.is_selective("cycle-1"));

    budget.record_task_cost("cycle-1", cost("t5", 40)).unwrap();
    // 375 / 400
    assert!((budget.get_utilization_percent("cycle-1") - 93.75).abs() < 1e-9);
    assert!(budget.get_utilization_percent("cycle-1") >= HARD_STOP_PERCENT);
    assert!(!budget.should_continue_executing("cycle-1"));
}

#[test]
fn hard_stop_never_flips_back_within_a_cycle() {
    let mut budget = BudgetAllocator::new();
    budget.allocate_budget("c");
    let mut seen_stop = false;
    for i in 0..12 {
        budget.record_task_cost("c", cost(&format!("t{}", i), 40)).unwrap();
        let go = budget.should_continue_executing("c");
        if seen_stop {
            assert!(!go);
        }
        if !go {
            seen_stop = true;
        }
        assert_eq!(go, budget.get_utilization_percent("c") < 90.0);
    }
    assert!(seen_stop);
}

#[test]
fn budget_round_trip_matches_recorded_time() {
    let mut budget = BudgetAllocator::new();
    budget.allocate_budget("rt");
    let times = [12_u64, 33, 7, 81];
    for (i, ms) in times.iter().enumerate() {
        budget.record_task_cost("rt", cost(&format!("t{}", i), *ms)).unwrap();
    }
    let stats = budget.get_cycle_stats("rt").unwrap();
    let closed = budget.close_cycle("rt").unwrap();
    let expected: u64 = times.iter().sum();
    assert_eq!(stats.budget_used, expected as f64);
    assert_eq!(closed.budget_used, expected as f64);
    assert!(closed.closed);
    assert_eq!(budget.get_stats().total_used, expected as f64);
}

// ---------------------------------------------------------------------------
// Risk
// ---------------------------------------------------------------------------

#[test]
fn repeated_kb_maintenance_failures_are_skipped() {
    let mut risk = RiskAssessor::new();
    for i in 0..8 {
        risk.record_failure(TaskType::KbMaintenance, format!("merge failed #{}", i));
    }
    risk.record_success(TaskType::KbMaintenance);
    risk.record_success(TaskType::KbMaintenance);

    let assessment = risk.assess_task(TaskType::KbMaintenance);
    assert_eq!(assessment.failure_rate, 80.0);
    assert!(matches!(assessment.risk_level, RiskLevel::High | RiskLevel::Critical));
    assert_eq!(assessment.mitigation.strategy, MitigationStrategy::Skip);
}

#[test]
fn unseen_task_type_has_no_failures() {
    let mut risk = RiskAssessor::new();
    for task_type in TaskType::ALL {
        let assessment = risk.assess_task(task_type);
        assert_eq!(assessment.failure_rate, 0.0);
        assert_ne!(assessment.mitigation.strategy, MitigationStrategy::Skip);
    }
    assert_eq!(risk.get_stats().assessed_types, TaskType::ALL.len());
}

#[test]
fn system_health_flags_critical_types() {
    let mut risk = RiskAssessor::new();
    for _ in 0..10 {
        risk.record_failure(TaskType::KbMaintenance, "locked");
        risk.record_success(TaskType::PatternAnalysis);
    }
    let health = risk.get_system_health();
    assert!(health.overall_health < 1.0);
    assert!(health.critical_issues.iter().any(|i| i.contains("kb_maintenance")));
    assert!(!health.recommendations.is_empty());

    risk.reset();
    assert_eq!(risk.get_system_health().overall_health, 1.0);
}
