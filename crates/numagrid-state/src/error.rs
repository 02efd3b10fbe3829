//! Error types for the numagrid resource ledger.

use std::collections::BTreeSet;

use numagrid_core::{ResourceClass, format_cpu_spec};
use thiserror::Error;

/// Result type alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("resource provider not found: {0}")]
    ProviderNotFound(String),

    #[error("provider {provider} has no {class} inventory")]
    ClassNotFound {
        provider: String,
        class: ResourceClass,
    },

    #[error("invalid {class} amount on provider {provider}: {reason}")]
    InvalidAmount {
        provider: String,
        class: ResourceClass,
        reason: String,
    },

    #[error(
        "{class} capacity exceeded on provider {provider}: requested {requested}, used {used} of {capacity}"
    )]
    CapacityExceeded {
        provider: String,
        class: ResourceClass,
        requested: u64,
        used: u64,
        capacity: u64,
    },

    #[error("cores {} already in use on provider {provider}", format_cpu_spec(.cores))]
    CoreConflict {
        provider: String,
        cores: BTreeSet<u32>,
    },

    #[error("generation conflict on provider {provider}: expected {expected}, found {actual}")]
    Conflict {
        provider: String,
        expected: u64,
        actual: u64,
    },

    #[error("consumer {0} is in a migration; confirm or revert it first")]
    TransitionInProgress(String),

    #[error("no migration in progress for workload {0}")]
    NoMigration(String),

    #[error("consumer {consumer} already holds an allocation on provider {provider}")]
    ConsumerExists { consumer: String, provider: String },

    #[error("consumer {consumer} holds no allocation on provider {provider}")]
    AllocationNotFound { consumer: String, provider: String },

    #[error("{class} inventory on provider {provider} is in use ({used} allocated)")]
    InventoryInUse {
        provider: String,
        class: ResourceClass,
        used: u64,
    },

    #[error("invalid claim: {0}")]
    InvalidClaim(String),

    #[error("reshape of provider {provider} failed: {reason}")]
    ReshapeFailure { provider: String, reason: String },
}

impl LedgerError {
    /// Capacity or core races: the candidate is lost, try the next one.
    pub fn is_oversubscription(&self) -> bool {
        matches!(
            self,
            LedgerError::CapacityExceeded { .. } | LedgerError::CoreConflict { .. }
        )
    }
}
