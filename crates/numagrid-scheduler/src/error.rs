//! Scheduler error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use numagrid_placement::Rejection;

use crate::quota::QuotaDenial;

/// Why one candidate host was passed over.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    #[error("{0}")]
    Topology(Rejection),

    /// Capacity or core race lost at claim time.
    #[error("{detail}")]
    Oversubscribed { detail: String },

    /// The provider is unknown or lacks a class the request needs.
    #[error("{detail}")]
    Unavailable { detail: String },

    /// Every conflict retry against the candidate lost its generation race.
    #[error("generation conflict persisted after {attempts} attempts")]
    Contended { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRejection {
    pub provider_id: String,
    pub reason: RejectionReason,
}

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("quota exceeded: {0}")]
    QuotaDenied(QuotaDenial),

    #[error("no valid host found{}", last_reason(.rejections))]
    NoValidHost { rejections: Vec<CandidateRejection> },

    /// Transient: retrying the whole request later may succeed.
    #[error("scheduling contended on every viable host{}", last_reason(.rejections))]
    Contended { rejections: Vec<CandidateRejection> },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] numagrid_state::LedgerError),

    #[error("runtime error: {0}")]
    Runtime(#[from] anyhow::Error),
}

impl SchedulerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedulerError::Contended { .. })
    }
}

fn last_reason(rejections: &[CandidateRejection]) -> String {
    rejections
        .last()
        .map(|r| format!(": {}: {}", r.provider_id, r.reason))
        .unwrap_or_default()
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
