//! Scheduler: turns a placement request into exactly one committed claim.
//!
//! For each ranked candidate the scheduler:
//! - Reads a ledger snapshot (generation, inventories, pinned cores)
//! - Picks the core class the host exposes for the request's CPU policy
//! - Runs the topology matcher against the snapshot's usage
//! - Claims the result conditioned on the snapshot generation
//!
//! The first successful claim wins and no further candidates are tried.
//! Ledger calls run on the blocking pool; they are the only points at which
//! a scheduling attempt suspends.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use numagrid_core::{
    CpuPolicy, HostNumaTopology, InstanceNumaRequest, NetworkAffinity, NumagridConfig, Placement,
    ResourceClass, Resources,
};
use numagrid_placement::{TopologyMatcher, matcher_for};
use numagrid_state::{Allocation, AllocationLedger, LedgerError, LedgerResult, ProviderSnapshot};

use crate::error::{CandidateRejection, RejectionReason, SchedulerError, SchedulerResult};
use crate::quota::{QuotaGuard, UsageCounter};

/// A workload to place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlacementRequest {
    pub project_id: String,
    /// Workload id; the consumer of the resulting allocation.
    pub consumer_id: String,
    pub numa: InstanceNumaRequest,
    #[serde(default)]
    pub disk_gb: u64,
}

impl PlacementRequest {
    /// Resources the request needs, with cores under `cpu_class`.
    pub fn resources(&self, cpu_class: ResourceClass) -> Resources {
        let mut resources = Resources::from([
            (cpu_class, self.numa.total_vcpus()),
            (ResourceClass::MemoryMb, self.numa.total_memory_mb()),
        ]);
        if self.disk_gb > 0 {
            resources.insert(ResourceClass::DiskGb, self.disk_gb);
        }
        resources
    }

    fn validate(&self) -> SchedulerResult<()> {
        if self.numa.cells.is_empty() {
            return Err(SchedulerError::InvalidRequest(
                "request has no guest NUMA cells".to_string(),
            ));
        }
        if let Some(idx) = self.numa.cells.iter().position(|c| c.vcpus == 0) {
            return Err(SchedulerError::InvalidRequest(format!(
                "guest cell {idx} has no vCPUs"
            )));
        }
        let total = self
            .numa
            .cells
            .iter()
            .try_fold(0u32, |total, cell| total.checked_add(cell.vcpus));
        if total.is_none() {
            return Err(SchedulerError::InvalidRequest(
                "guest vCPU count does not fit in u32".to_string(),
            ));
        }
        Ok(())
    }
}

/// One host offered by the external ranking, with its current topology.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub provider_id: String,
    pub topology: HostNumaTopology,
}

/// The committed result of a scheduling attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleOutcome {
    pub provider_id: String,
    /// Provider generation after the claim.
    pub generation: u64,
    pub placement: Placement,
    pub allocation: Allocation,
}

/// How a migration's destination row is keyed.
struct MigrationTarget<'a> {
    migration_id: &'a str,
    source_provider: &'a str,
}

enum Attempt {
    Committed(ScheduleOutcome),
    Rejected(RejectionReason),
}

pub struct Scheduler {
    matcher: Arc<dyn TopologyMatcher>,
    ledger: Arc<dyn AllocationLedger>,
    quota: QuotaGuard,
    networks: NetworkAffinity,
    max_conflict_retries: u32,
}

impl Scheduler {
    pub fn new(
        matcher: Arc<dyn TopologyMatcher>,
        ledger: Arc<dyn AllocationLedger>,
        quota: QuotaGuard,
    ) -> Self {
        Self {
            matcher,
            ledger,
            quota,
            networks: NetworkAffinity::new(),
            max_conflict_retries: 3,
        }
    }

    /// Scheduler wired from the resolved configuration.
    pub fn from_config(
        config: &NumagridConfig,
        ledger: Arc<dyn AllocationLedger>,
        counter: UsageCounter,
    ) -> Self {
        let quota = QuotaGuard::new(Arc::new(config.quota.clone()), counter);
        Self::new(matcher_for(config.scheduler.matcher), ledger, quota)
            .with_networks(config.network_affinity())
            .with_max_conflict_retries(config.scheduler.max_conflict_retries)
    }

    pub fn with_networks(mut self, networks: NetworkAffinity) -> Self {
        self.networks = networks;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Place `request` on the first candidate that accepts it.
    pub async fn schedule(
        &self,
        request: &PlacementRequest,
        candidates: &[Candidate],
    ) -> SchedulerResult<ScheduleOutcome> {
        request.validate()?;
        self.check_quota(request, request.resources(ResourceClass::Vcpu))
            .await?;

        let mut rejections = Vec::new();
        for candidate in candidates {
            match self.try_candidate(request, candidate, None).await? {
                Attempt::Committed(outcome) => return Ok(outcome),
                Attempt::Rejected(reason) => {
                    debug!(provider = %candidate.provider_id, %reason, "candidate rejected");
                    rejections.push(CandidateRejection {
                        provider_id: candidate.provider_id.clone(),
                        reason,
                    });
                }
            }
        }
        Err(exhausted(rejections))
    }

    /// Place a running workload on a new host while its source allocation
    /// stays in place. The destination row is keyed by `migration_id`;
    /// `confirm` or `revert` on the ledger ends the migration.
    pub async fn migrate(
        &self,
        request: &PlacementRequest,
        migration_id: &str,
        source_provider: &str,
        candidates: &[Candidate],
    ) -> SchedulerResult<ScheduleOutcome> {
        request.validate()?;

        // Only growth counts against quota: the workload already holds its
        // current allocation.
        let workload = request.consumer_id.clone();
        let held = self
            .on_ledger(move |ledger| ledger.allocations_for_consumer(&workload))
            .await??;
        let mut increase = request.resources(ResourceClass::Vcpu);
        let current = held
            .iter()
            .filter(|a| a.provider_id == source_provider)
            .flat_map(|a| a.resources.iter())
            .fold(Resources::new(), |mut acc, (class, amount)| {
                let class = match class {
                    ResourceClass::Pcpu => ResourceClass::Vcpu,
                    other => other.clone(),
                };
                *acc.entry(class).or_insert(0) += amount;
                acc
            });
        for (class, amount) in increase.iter_mut() {
            *amount = amount.saturating_sub(current.get(class).copied().unwrap_or(0));
        }
        increase.retain(|_, amount| *amount > 0);
        if !increase.is_empty() {
            self.check_quota(request, increase).await?;
        }

        let target = MigrationTarget {
            migration_id,
            source_provider,
        };
        let mut rejections = Vec::new();
        for candidate in candidates
            .iter()
            .filter(|c| c.provider_id != source_provider)
        {
            match self.try_candidate(request, candidate, Some(&target)).await? {
                Attempt::Committed(outcome) => return Ok(outcome),
                Attempt::Rejected(reason) => {
                    debug!(provider = %candidate.provider_id, %reason, "migration candidate rejected");
                    rejections.push(CandidateRejection {
                        provider_id: candidate.provider_id.clone(),
                        reason,
                    });
                }
            }
        }
        Err(exhausted(rejections))
    }

    async fn check_quota(&self, request: &PlacementRequest, requested: Resources) -> SchedulerResult<()> {
        let quota = self.quota.clone();
        let project = request.project_id.clone();
        tokio::task::spawn_blocking(move || quota.check(&project, &requested))
            .await
            .map_err(anyhow::Error::from)?
    }

    /// Run a ledger call on the blocking pool.
    async fn on_ledger<T, F>(&self, f: F) -> SchedulerResult<LedgerResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&dyn AllocationLedger) -> LedgerResult<T> + Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        let result = tokio::task::spawn_blocking(move || f(ledger.as_ref()))
            .await
            .map_err(anyhow::Error::from)?;
        Ok(result)
    }

    async fn try_candidate(
        &self,
        request: &PlacementRequest,
        candidate: &Candidate,
        migration: Option<&MigrationTarget<'_>>,
    ) -> SchedulerResult<Attempt> {
        let provider_id = candidate.provider_id.clone();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let id = provider_id.clone();
            let snapshot = match self.on_ledger(move |ledger| ledger.snapshot(&id)).await? {
                Ok(snapshot) => snapshot,
                Err(LedgerError::ProviderNotFound(_)) => {
                    return Ok(Attempt::Rejected(RejectionReason::Unavailable {
                        detail: format!("provider {provider_id} is not registered"),
                    }));
                }
                Err(e) => return Err(e.into()),
            };

            let Some(cpu_class) = cpu_class_for(&snapshot, request.numa.cpu_policy) else {
                return Ok(Attempt::Rejected(RejectionReason::Unavailable {
                    detail: format!("provider {provider_id} exposes no usable core class"),
                }));
            };

            let placement = match self.matcher.fit(
                &candidate.topology,
                &snapshot.host_usage,
                &request.numa,
                &self.networks,
            ) {
                Ok(placement) => placement,
                Err(rejection) => return Ok(Attempt::Rejected(RejectionReason::Topology(rejection))),
            };

            let consumer_id = migration.map_or(request.consumer_id.as_str(), |m| m.migration_id);
            let allocation = Allocation {
                consumer_id: consumer_id.to_string(),
                project_id: request.project_id.clone(),
                provider_id: provider_id.clone(),
                resources: request.resources(cpu_class),
                cores: placement.pinned_cores(),
                reserved_cores: placement.reserved_cores(),
                cells: placement.cell_claims(),
            };

            let generation = snapshot.generation;
            let committed = match migration {
                None => {
                    let claim = allocation.clone();
                    self.on_ledger(move |ledger| ledger.claim_at(&claim, generation))
                        .await?
                }
                Some(target) => {
                    let claim = allocation.clone();
                    let workload = request.consumer_id.clone();
                    let source = target.source_provider.to_string();
                    self.on_ledger(move |ledger| ledger.move_at(&workload, &source, &claim, generation))
                        .await?
                }
            };

            match committed {
                Ok(generation) => {
                    info!(
                        provider = %provider_id,
                        consumer = %allocation.consumer_id,
                        generation,
                        cells = ?placement.host_cells(),
                        "placement committed"
                    );
                    return Ok(Attempt::Committed(ScheduleOutcome {
                        provider_id,
                        generation,
                        placement,
                        allocation,
                    }));
                }
                Err(LedgerError::Conflict { actual, .. }) => {
                    if attempt > self.max_conflict_retries {
                        warn!(provider = %provider_id, attempts = attempt, "giving up after repeated generation conflicts");
                        return Ok(Attempt::Rejected(RejectionReason::Contended { attempts: attempt }));
                    }
                    debug!(provider = %provider_id, seen = generation, actual, "generation conflict, re-reading");
                }
                Err(e) if e.is_oversubscription() => {
                    return Ok(Attempt::Rejected(RejectionReason::Oversubscribed {
                        detail: e.to_string(),
                    }));
                }
                Err(e @ (LedgerError::ClassNotFound { .. }
                | LedgerError::InvalidAmount { .. }
                | LedgerError::ProviderNotFound(_))) => {
                    return Ok(Attempt::Rejected(RejectionReason::Unavailable {
                        detail: e.to_string(),
                    }));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Core class a host exposes for the given policy.
///
/// Dedicated guests use `PCPU` when the host reports it; otherwise the
/// host is still on generic core accounting and both policies use `VCPU`.
fn cpu_class_for(snapshot: &ProviderSnapshot, policy: CpuPolicy) -> Option<ResourceClass> {
    if policy == CpuPolicy::Dedicated && snapshot.has_class(&ResourceClass::Pcpu) {
        return Some(ResourceClass::Pcpu);
    }
    snapshot
        .has_class(&ResourceClass::Vcpu)
        .then_some(ResourceClass::Vcpu)
}

fn exhausted(rejections: Vec<CandidateRejection>) -> SchedulerError {
    let contended = rejections
        .iter()
        .any(|r| matches!(r.reason, RejectionReason::Contended { .. }));
    if contended {
        SchedulerError::Contended { rejections }
    } else {
        SchedulerError::NoValidHost { rejections }
    }
}
