//! Append-only journal of cycle results and goal mutations.
//!
//! The journal is for cross-session continuity only: a cycle never depends on a write
//! succeeding, and journal failures are logged by the caller and otherwise ignored.

use std::path::Path;

use chrono::Utc;
use sled::Db;
use tracing::{debug, info};

use crate::error::CognitionResult;
use crate::goals::{Goal, GoalSeed, GoalStore};
use crate::orchestrator::CycleResult;

pub const CYCLE_TREE: &str = "cycle_results";
pub const GOAL_TREE: &str = "goal_mutations";

const DEFAULT_JOURNAL_PATH: &str = "./data/pagi_cognition_journal";

/// Durable sink for cycle output.
pub trait CycleJournal: Send + Sync {
    fn record_cycle(&self, result: &CycleResult) -> CognitionResult<()>;
    fn record_goal(&self, goal: &Goal) -> CognitionResult<()>;
}

/// Sled-backed journal. Keys sort in append order; goal mutations are prefixed with
/// `{goal_id}/` so one goal's history is a prefix scan.
pub struct SledJournal {
    db: Db,
}

/// `{timestamp_ms:016x}_{sequence:016x}`. The sled id generator keeps same-millisecond
/// writes in order.
fn append_key(db: &Db) -> CognitionResult<String> {
    let ts = Utc::now().timestamp_millis().max(0) as u64;
    Ok(format!("{:016x}_{:016x}", ts, db.generate_id()?))
}

impl SledJournal {
    pub fn new() -> CognitionResult<Self> {
        Self::open_path(DEFAULT_JOURNAL_PATH)
    }

    pub fn open_path<P: AsRef<Path>>(path: P) -> CognitionResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Most recent cycle results, newest first.
    pub fn recent_cycles(&self, limit: usize) -> CognitionResult<Vec<CycleResult>> {
        let tree = self.db.open_tree(CYCLE_TREE)?;
        let mut out = Vec::new();
        for item in tree.iter().rev() {
            if out.len() >= limit {
                break;
            }
            let (_, bytes) = item?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// Every journaled snapshot of one goal, oldest first.
    pub fn goal_history(&self, goal_id: &str) -> CognitionResult<Vec<Goal>> {
        let tree = self.db.open_tree(GOAL_TREE)?;
        let prefix = format!("{}/", goal_id);
        let mut out = Vec::new();
        for item in tree.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = item?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// The last snapshot of every journaled goal; used to restore a goal store on startup.
    pub fn latest_goal_snapshots(&self) -> CognitionResult<Vec<Goal>> {
        let tree = self.db.open_tree(GOAL_TREE)?;
        let mut latest: Vec<Goal> = Vec::new();
        for item in tree.iter() {
            let (_, bytes) = item?;
            let goal: Goal = serde_json::from_slice(&bytes)?;
            match latest.last_mut() {
                Some(last) if last.id == goal.id => *last = goal,
                _ => latest.push(goal),
            }
        }
        Ok(latest)
    }

    /// Startup path: rebuilds the goal store from the latest snapshots, then creates any
    /// configured seed goals not already present and journals them so they survive a restart.
    pub fn restore_goals(&self, seeds: &[GoalSeed]) -> CognitionResult<GoalStore> {
        let mut goals = GoalStore::new();
        let restored = goals.restore(self.latest_goal_snapshots()?);
        let seeded = goals.seed(seeds)?;
        for goal in &seeded {
            self.record_goal(goal)?;
        }
        info!(
            target: "pagi::journal",
            restored,
            seeded = seeded.len(),
            "Goal store restored"
        );
        Ok(goals)
    }

    pub fn cycle_count(&self) -> CognitionResult<usize> {
        Ok(self.db.open_tree(CYCLE_TREE)?.len())
    }

    pub fn flush(&self) -> CognitionResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl CycleJournal for SledJournal {
    fn record_cycle(&self, result: &CycleResult) -> CognitionResult<()> {
        let tree = self.db.open_tree(CYCLE_TREE)?;
        let key = append_key(&self.db)?;
        tree.insert(key.as_bytes(), serde_json::to_vec(result)?)?;
        debug!(
            target: "pagi::journal",
            key = %key,
            cycle_id = %result.cycle_id,
            "Cycle result journaled"
        );
        Ok(())
    }

    fn record_goal(&self, goal: &Goal) -> CognitionResult<()> {
        let tree = self.db.open_tree(GOAL_TREE)?;
        let key = format!("{}/{}", goal.id, append_key(&self.db)?);
        tree.insert(key.as_bytes(), serde_json::to_vec(goal)?)?;
        debug!(
            target: "pagi::journal",
            goal_id = %goal.id,
            status = %goal.status,
            "Goal mutation journaled"
        );
        Ok(())
    }
}
