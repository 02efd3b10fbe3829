//! QuotaGuard: project limits checked before any claim is attempted.
//!
//! Requested and used amounts are folded into quota resources first
//! (`VCPU` and `PCPU` both count as `cores`, `MEMORY_MB` as `ram`), so a
//! project's core limit holds whichever core class its hosts expose.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use numagrid_core::Resources;
use numagrid_core::config::QuotaConfig;
use numagrid_state::AllocationLedger;

use crate::error::{SchedulerError, SchedulerResult};

/// Amounts keyed by quota resource name.
pub type QuotaUsage = BTreeMap<String, u64>;

/// Fold class amounts into quota resources.
pub fn by_quota_resource(resources: &Resources) -> QuotaUsage {
    let mut usage = QuotaUsage::new();
    for (class, amount) in resources {
        *usage.entry(class.quota_resource().to_string()).or_insert(0) += amount;
    }
    usage
}

/// The project would exceed `limit` on `resource`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{resource}: limit {limit}, in use {in_use}, requested {requested}")]
pub struct QuotaDenial {
    pub resource: String,
    pub limit: u64,
    pub in_use: u64,
    pub requested: u64,
}

/// Read-only source of per-project limits. `None` means unlimited.
pub trait QuotaLimits: Send + Sync {
    fn limit(&self, project_id: &str, resource: &str) -> Option<u64>;
}

impl QuotaLimits for QuotaConfig {
    fn limit(&self, project_id: &str, resource: &str) -> Option<u64> {
        QuotaConfig::limit(self, project_id, resource)
    }
}

/// External records of a project's live workloads.
pub trait WorkloadRecords: Send + Sync {
    /// Resources held by the project's live workloads, by class.
    fn project_resources(&self, project_id: &str) -> anyhow::Result<Resources>;
}

/// Where current usage comes from.
#[derive(Clone)]
pub enum UsageCounter {
    /// Sum of the ledger's allocations held by the project's consumers.
    Ledger(Arc<dyn AllocationLedger>),
    /// Sum of the project's live workload records.
    Workloads(Arc<dyn WorkloadRecords>),
}

impl UsageCounter {
    pub fn usage(&self, project_id: &str) -> SchedulerResult<QuotaUsage> {
        let resources = match self {
            UsageCounter::Ledger(ledger) => ledger.project_usages(project_id)?,
            UsageCounter::Workloads(records) => records.project_resources(project_id)?,
        };
        Ok(by_quota_resource(&resources))
    }
}

#[derive(Clone)]
pub struct QuotaGuard {
    limits: Arc<dyn QuotaLimits>,
    counter: UsageCounter,
}

impl QuotaGuard {
    pub fn new(limits: Arc<dyn QuotaLimits>, counter: UsageCounter) -> Self {
        Self { limits, counter }
    }

    /// Admit or deny `requested` for the project.
    ///
    /// Usage is only read when the request touches a limited resource.
    pub fn check(&self, project_id: &str, requested: &Resources) -> SchedulerResult<()> {
        let requested = by_quota_resource(requested);
        let limited: Vec<(&String, u64, u64)> = requested
            .iter()
            .filter(|&(_, &amount)| amount > 0)
            .filter_map(|(resource, &amount)| {
                self.limits
                    .limit(project_id, resource)
                    .map(|limit| (resource, limit, amount))
            })
            .collect();
        if limited.is_empty() {
            debug!(project = %project_id, "no applicable quota limits");
            return Ok(());
        }

        let usage = self.counter.usage(project_id)?;
        for (resource, limit, amount) in limited {
            let in_use = usage.get(resource).copied().unwrap_or(0);
            if in_use + amount > limit {
                let denial = QuotaDenial {
                    resource: resource.clone(),
                    limit,
                    in_use,
                    requested: amount,
                };
                info!(project = %project_id, %denial, "quota denied");
                return Err(SchedulerError::QuotaDenied(denial));
            }
        }
        Ok(())
    }
}
