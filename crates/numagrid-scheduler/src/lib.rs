//! numagrid-scheduler: quota admission, NUMA-aware claims and migration.
//!
//! Composes the topology matcher (`numagrid-placement`) with the resource
//! ledger (`numagrid-state`). The scheduler:
//!
//! - Checks project quota before touching any host
//! - Fits the request on each ranked candidate in turn
//! - Commits the first fit with a generation-checked ledger claim
//! - Holds both allocations of a migrating workload until confirm/revert
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   ├── QuotaGuard (QuotaLimits + UsageCounter)
//!   ├── Arc<dyn TopologyMatcher>   (pure, per candidate)
//!   └── Arc<dyn AllocationLedger>  (blocking pool, per candidate)
//!
//! CapabilityReporter
//!   ├── build_topology / host_inventory (HostInfo + EffectivePinning)
//!   └── ReshapeCoordinator (VCPU → PCPU on first split-mode report)
//! ```

pub mod capability;
pub mod error;
pub mod quota;
pub mod scheduler;

pub use capability::{CapabilityReporter, HostInfo, ReportOutcome, build_topology, host_inventory};
pub use error::{CandidateRejection, RejectionReason, SchedulerError, SchedulerResult};
pub use quota::{QuotaDenial, QuotaGuard, QuotaLimits, UsageCounter, WorkloadRecords};
pub use scheduler::{Candidate, PlacementRequest, ScheduleOutcome, Scheduler};
