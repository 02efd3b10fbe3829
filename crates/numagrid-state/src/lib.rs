//! numagrid-state: the resource ledger.
//!
//! Backed by [redb](https://docs.rs/redb), tracks each resource provider's
//! inventory, generation and allocations, and reshapes a provider's
//! accounting from one resource class to another.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Allocation rows are keyed `{provider}/{consumer}` with a reverse
//! `{consumer}/{provider}` index, so both per-provider and per-consumer
//! listings are prefix scans.
//!
//! The `ResourceLedger` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across threads and async tasks.

pub mod error;
pub mod ledger;
pub mod reshape;
pub mod tables;
pub mod types;

pub use error::{LedgerError, LedgerResult};
pub use ledger::{AllocationLedger, ResourceLedger};
pub use reshape::ReshapeCoordinator;
pub use types::*;
