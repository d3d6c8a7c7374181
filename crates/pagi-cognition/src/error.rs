//! Error types for the cognitive cycle.
//!
//! Service operations return [`CognitionError`]; collaborator calls (memory, knowledge base,
//! extractor, user model) return [`CollaboratorError`], which the executor and the evidence
//! gatherer fold into degraded results instead of propagating.

use thiserror::Error;

/// Errors surfaced by the Goal Store, Budget Allocator and journal.
#[derive(Error, Debug)]
pub enum CognitionError {
    #[error("goal not found: {0}")]
    GoalNotFound(String),
    #[error("unknown budget cycle: {0}")]
    UnknownCycle(String),
    #[error("goal {id}: cannot {action} while {from}")]
    InvalidTransition {
        id: String,
        from: String,
        action: &'static str,
    },
    #[error("goal {parent} already has {limit} children")]
    ChildLimitExceeded { parent: String, limit: usize },
    #[error("journal error: {0}")]
    Journal(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

/// Failure reported by an external collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The collaborator could not be reached (e.g. search service down).
    #[error("{service} unavailable: {reason}")]
    Unavailable { service: &'static str, reason: String },
    /// The collaborator refused the request (bad input, missing record).
    #[error("{service} rejected request: {reason}")]
    Rejected { service: &'static str, reason: String },
    /// Handler-level failure not attributable to a single service.
    #[error("{0}")]
    Failed(String),
}

impl CollaboratorError {
    pub fn unavailable(service: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            service,
            reason: reason.into(),
        }
    }

    pub fn rejected(service: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            service,
            reason: reason.into(),
        }
    }
}

pub type CognitionResult<T> = Result<T, CognitionError>;
