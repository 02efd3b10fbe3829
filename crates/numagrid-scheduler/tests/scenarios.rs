//! End-to-end scheduling scenarios.
//!
//! Drives the scheduler against an in-memory ledger with host topologies
//! built the same way capability reporting builds them. Matcher and ledger
//! doubles are injected through the constructor to observe call counts and
//! to script generation conflicts.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use numagrid_core::config::{ComputeConfig, QuotaConfig};
use numagrid_core::{
    CpuPolicy, EffectivePinning, GuestCell, HostNumaTopology, HostUsage, InstanceNumaRequest,
    Inventory, MatcherKind, NetworkAffinity, NetworkAttachment, Placement, ResourceClass,
    Resources, ThreadPolicy,
};
use numagrid_placement::{NumaMatcher, Rejection, TopologyMatcher};
use numagrid_scheduler::*;
use numagrid_state::{
    Allocation, AllocationLedger, LedgerError, LedgerResult, ProviderSnapshot, ReshapeOutcome,
    ResourceLedger,
};

// ── Fixtures ───────────────────────────────────────────────────────

fn host_info(nodes: u32, cores_per_node: u32) -> HostInfo {
    HostInfo {
        nodes,
        cores_per_node,
        threads_per_core: 2,
        memory_mb_per_node: 4096,
        disk_gb: 0,
    }
}

/// Register `provider` with the inventory its pinning layout implies and
/// return the topology the scheduler should see for it.
fn register(
    ledger: &ResourceLedger,
    provider: &str,
    info: &HostInfo,
    compute: &ComputeConfig,
) -> HostNumaTopology {
    let pinning = EffectivePinning::resolve(compute).unwrap();
    let topology = build_topology(info, &pinning, compute.cpu_allocation_ratio);
    let inventories = host_inventory(info, &topology, &pinning, compute);
    CapabilityReporter::new(ledger.clone())
        .report(provider, inventories)
        .unwrap();
    topology
}

fn legacy() -> ComputeConfig {
    ComputeConfig::default()
}

fn dedicated_only(cpus: &str) -> ComputeConfig {
    ComputeConfig {
        cpu_dedicated_set: Some(cpus.to_string()),
        ..ComputeConfig::default()
    }
}

fn candidate(provider: &str, topology: &HostNumaTopology) -> Candidate {
    Candidate {
        provider_id: provider.to_string(),
        topology: topology.clone(),
    }
}

fn request(consumer: &str, policy: CpuPolicy, cells: &[(u32, u64)]) -> PlacementRequest {
    PlacementRequest {
        project_id: "proj".to_string(),
        consumer_id: consumer.to_string(),
        numa: InstanceNumaRequest {
            cells: cells
                .iter()
                .map(|&(vcpus, memory_mb)| GuestCell { vcpus, memory_mb })
                .collect(),
            cpu_policy: policy,
            thread_policy: ThreadPolicy::Prefer,
            networks: Vec::new(),
        },
        disk_gb: 0,
    }
}

fn unlimited(ledger: &ResourceLedger) -> QuotaGuard {
    QuotaGuard::new(
        Arc::new(QuotaConfig::default()),
        UsageCounter::Ledger(Arc::new(ledger.clone())),
    )
}

fn scheduler(ledger: &ResourceLedger) -> Scheduler {
    Scheduler::new(
        Arc::new(NumaMatcher::new(MatcherKind::FirstFit)),
        Arc::new(ledger.clone()),
        unlimited(ledger),
    )
}

// ── Doubles ────────────────────────────────────────────────────────

/// Counts matcher runs before delegating to the real matcher.
#[derive(Default)]
struct CountingMatcher {
    inner: NumaMatcher,
    calls: AtomicUsize,
}

impl CountingMatcher {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TopologyMatcher for CountingMatcher {
    fn fit(
        &self,
        host: &HostNumaTopology,
        usage: &HostUsage,
        request: &InstanceNumaRequest,
        networks: &NetworkAffinity,
    ) -> Result<Placement, Rejection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fit(host, usage, request, networks)
    }
}

/// Loses the next `conflicts` claims with a generation conflict, as if a
/// concurrent writer always got there first.
struct ConflictingLedger {
    inner: ResourceLedger,
    conflicts: AtomicU32,
    snapshots: AtomicU32,
}

impl ConflictingLedger {
    fn new(inner: ResourceLedger, conflicts: u32) -> Self {
        Self {
            inner,
            conflicts: AtomicU32::new(conflicts),
            snapshots: AtomicU32::new(0),
        }
    }

    fn lose(&self, provider_id: &str, generation: u64) -> LedgerResult<()> {
        let left = self.conflicts.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(());
        }
        self.conflicts.store(left - 1, Ordering::SeqCst);
        Err(LedgerError::Conflict {
            provider: provider_id.to_string(),
            expected: generation,
            actual: generation + 1,
        })
    }
}

impl AllocationLedger for ConflictingLedger {
    fn snapshot(&self, provider_id: &str) -> LedgerResult<ProviderSnapshot> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        self.inner.snapshot(provider_id)
    }

    fn claim_at(&self, allocation: &Allocation, generation: u64) -> LedgerResult<u64> {
        self.lose(&allocation.provider_id, generation)?;
        self.inner.claim_at(allocation, generation)
    }

    fn move_at(
        &self,
        workload_id: &str,
        source_provider: &str,
        allocation: &Allocation,
        generation: u64,
    ) -> LedgerResult<u64> {
        self.lose(&allocation.provider_id, generation)?;
        self.inner
            .move_at(workload_id, source_provider, allocation, generation)
    }

    fn allocations_for_consumer(&self, consumer_id: &str) -> LedgerResult<Vec<Allocation>> {
        self.inner.allocations_for_consumer(consumer_id)
    }

    fn project_usages(&self, project_id: &str) -> LedgerResult<Resources> {
        self.inner.project_usages(project_id)
    }
}

// ── Admission scenarios ────────────────────────────────────────────

#[tokio::test]
async fn dedicated_guest_spans_two_cells_with_full_sibling_pairs() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let topology = register(&ledger, "host-a", &host_info(2, 2), &dedicated_only("0-7"));
    let req = request("vm-1", CpuPolicy::Dedicated, &[(2, 1024), (2, 1024)]);

    let outcome = scheduler(&ledger)
        .schedule(&req, &[candidate("host-a", &topology)])
        .await
        .unwrap();

    let cells = outcome.placement.host_cells();
    assert_eq!(cells.len(), 2);
    assert_ne!(cells[0], cells[1]);
    for cell in &outcome.placement.cells {
        let pinned: BTreeSet<u32> = cell.pinning.values().copied().collect();
        let first = *pinned.iter().next().unwrap();
        let host_cell = topology.cell(cell.host_cell).unwrap();
        assert_eq!(pinned, host_cell.sibling_group(first));
    }

    assert_eq!(outcome.allocation.resources[&ResourceClass::Pcpu], 4);
    assert_eq!(outcome.allocation.cores.len(), 4);
    let snap = ledger.snapshot("host-a").unwrap();
    assert_eq!(snap.generation, outcome.generation);
    assert_eq!(snap.usages[&ResourceClass::Pcpu], 4);
    assert_eq!(snap.host_usage.pinned, outcome.allocation.cores);
}

#[tokio::test]
async fn single_cell_host_cannot_take_two_guest_cells() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let topology = register(&ledger, "host-a", &host_info(1, 16), &legacy());
    let req = request("vm-1", CpuPolicy::Shared, &[(1, 256), (1, 256)]);

    let err = scheduler(&ledger)
        .schedule(&req, &[candidate("host-a", &topology)])
        .await
        .unwrap_err();

    match err {
        SchedulerError::NoValidHost { rejections } => {
            assert_eq!(rejections.len(), 1);
            assert_eq!(
                rejections[0].reason,
                RejectionReason::Topology(Rejection::InsufficientCells {
                    requested: 2,
                    available: 1,
                })
            );
        }
        other => panic!("expected NoValidHost, got {other:?}"),
    }
    assert!(ledger.allocations_for_provider("host-a").unwrap().is_empty());
}

#[tokio::test]
async fn network_affinity_picks_the_common_node() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let topology = register(&ledger, "host-a", &host_info(2, 2), &legacy());
    let networks = NetworkAffinity::new()
        .restrict("net-x", [1])
        .restrict("net-y", [0])
        .restrict("net-z", [0, 1]);
    let sched = scheduler(&ledger).with_networks(networks);
    let hosts = [candidate("host-a", &topology)];

    let mut req = request("vm-1", CpuPolicy::Shared, &[(1, 256)]);
    req.numa.networks = vec![NetworkAttachment::new("net-x"), NetworkAttachment::new("net-y")];
    let err = sched.schedule(&req, &hosts).await.unwrap_err();
    match err {
        SchedulerError::NoValidHost { rejections } => assert!(matches!(
            rejections[0].reason,
            RejectionReason::Topology(Rejection::NetworkAffinity { .. })
        )),
        other => panic!("expected NoValidHost, got {other:?}"),
    }

    req.numa.networks = vec![NetworkAttachment::new("net-x"), NetworkAttachment::new("net-z")];
    let outcome = sched.schedule(&req, &hosts).await.unwrap();
    assert_eq!(outcome.placement.host_cells(), vec![1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_schedules_for_the_last_headroom_admit_one() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    ledger
        .set_inventories(
            "host-a",
            BTreeMap::from([
                (ResourceClass::Vcpu, Inventory::new(8)),
                (ResourceClass::MemoryMb, Inventory::new(8192)),
            ]),
            None,
        )
        .unwrap();
    ledger
        .claim(&Allocation::new("vm-0", "proj", "host-a").with_resource(ResourceClass::Vcpu, 6))
        .unwrap();
    let pinning = EffectivePinning::Legacy { pin_set: None };
    let topology = build_topology(&host_info(1, 4), &pinning, 1.0);
    let hosts = [candidate("host-a", &topology)];

    let sched = scheduler(&ledger);
    let first = request("vm-1", CpuPolicy::Shared, &[(2, 256)]);
    let second = request("vm-2", CpuPolicy::Shared, &[(2, 256)]);
    let (a, b) = tokio::join!(sched.schedule(&first, &hosts), sched.schedule(&second, &hosts));

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.into_iter().find_map(Result::err).unwrap();
    assert!(matches!(loser, SchedulerError::NoValidHost { .. }), "{loser:?}");
    assert_eq!(ledger.usages("host-a").unwrap()[&ResourceClass::Vcpu], 8);
}

#[tokio::test]
async fn legacy_host_report_switch_reshapes_running_guests() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let info = host_info(2, 2);
    let topology = register(&ledger, "host-a", &info, &legacy());

    let req = request("vm-1", CpuPolicy::Dedicated, &[(2, 1024), (2, 1024)]);
    let outcome = scheduler(&ledger)
        .schedule(&req, &[candidate("host-a", &topology)])
        .await
        .unwrap();
    assert_eq!(outcome.allocation.resources[&ResourceClass::Vcpu], 4);
    assert_eq!(outcome.allocation.cores.len(), 4);

    let compute = dedicated_only("0-7");
    let pinning = EffectivePinning::resolve(&compute).unwrap();
    let split = build_topology(&info, &pinning, compute.cpu_allocation_ratio);
    let report = CapabilityReporter::new(ledger.clone())
        .report("host-a", host_inventory(&info, &split, &pinning, &compute))
        .unwrap();
    assert_eq!(
        report.reshaped,
        Some(ReshapeOutcome::Reshaped { allocations_moved: 1 })
    );

    let snap = ledger.snapshot("host-a").unwrap();
    assert_eq!(snap.inventories[&ResourceClass::Pcpu].total, 8);
    assert_eq!(snap.usages[&ResourceClass::Pcpu], 4);
    assert!(!snap.has_class(&ResourceClass::Vcpu));
    let rows = ledger.allocations_for_consumer("vm-1").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].resources[&ResourceClass::Pcpu], 4);
    assert!(!rows[0].resources.contains_key(&ResourceClass::Vcpu));
}

#[tokio::test]
async fn legacy_host_accounts_dedicated_guests_as_vcpu() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let topology = register(&ledger, "host-a", &host_info(1, 4), &legacy());
    let req = request("vm-1", CpuPolicy::Dedicated, &[(2, 512)]);

    let outcome = scheduler(&ledger)
        .schedule(&req, &[candidate("host-a", &topology)])
        .await
        .unwrap();

    assert!(outcome.allocation.resources.contains_key(&ResourceClass::Vcpu));
    assert!(!outcome.allocation.resources.contains_key(&ResourceClass::Pcpu));
    assert_eq!(outcome.allocation.cores, BTreeSet::from([0, 1]));

    // The pinned cores are no longer offered to the next dedicated guest.
    let next = request("vm-2", CpuPolicy::Dedicated, &[(2, 512)]);
    let outcome = scheduler(&ledger)
        .schedule(&next, &[candidate("host-a", &topology)])
        .await
        .unwrap();
    assert_eq!(outcome.allocation.cores, BTreeSet::from([2, 3]));
}

// ── Candidate handling ─────────────────────────────────────────────

#[tokio::test]
async fn first_commit_wins_and_later_candidates_are_untouched() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let small = register(&ledger, "host-a", &host_info(1, 1), &legacy());
    let big_b = register(&ledger, "host-b", &host_info(2, 2), &legacy());
    let big_c = register(&ledger, "host-c", &host_info(2, 2), &legacy());
    let before_c = ledger.snapshot("host-c").unwrap();

    let matcher = Arc::new(CountingMatcher::default());
    let sched = Scheduler::new(matcher.clone(), Arc::new(ledger.clone()), unlimited(&ledger));
    let req = request("vm-1", CpuPolicy::Dedicated, &[(4, 512)]);
    let hosts = [
        candidate("host-a", &small),
        candidate("host-b", &big_b),
        candidate("host-c", &big_c),
    ];

    let outcome = sched.schedule(&req, &hosts).await.unwrap();
    assert_eq!(outcome.provider_id, "host-b");
    assert_eq!(matcher.calls(), 2);
    assert_eq!(ledger.snapshot("host-c").unwrap(), before_c);
    assert!(ledger.allocations_for_provider("host-a").unwrap().is_empty());
}

#[tokio::test]
async fn unregistered_candidate_is_skipped() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let topology = register(&ledger, "host-b", &host_info(1, 2), &legacy());
    let req = request("vm-1", CpuPolicy::Shared, &[(1, 256)]);

    let outcome = scheduler(&ledger)
        .schedule(
            &req,
            &[candidate("host-ghost", &topology), candidate("host-b", &topology)],
        )
        .await
        .unwrap();
    assert_eq!(outcome.provider_id, "host-b");
}

#[tokio::test]
async fn shared_guest_skips_host_without_vcpu() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let topology = register(&ledger, "host-a", &host_info(1, 2), &dedicated_only("0-3"));
    let req = request("vm-1", CpuPolicy::Shared, &[(1, 256)]);

    let err = scheduler(&ledger)
        .schedule(&req, &[candidate("host-a", &topology)])
        .await
        .unwrap_err();
    match err {
        SchedulerError::NoValidHost { rejections } => {
            assert!(matches!(rejections[0].reason, RejectionReason::Unavailable { .. }))
        }
        other => panic!("expected NoValidHost, got {other:?}"),
    }
}

#[tokio::test]
async fn conflicts_are_retried_against_a_fresh_snapshot() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let topology = register(&ledger, "host-a", &host_info(1, 4), &legacy());
    let scripted = Arc::new(ConflictingLedger::new(ledger.clone(), 2));
    let sched = Scheduler::new(
        Arc::new(NumaMatcher::default()),
        scripted.clone(),
        unlimited(&ledger),
    );

    let req = request("vm-1", CpuPolicy::Shared, &[(2, 256)]);
    let outcome = sched
        .schedule(&req, &[candidate("host-a", &topology)])
        .await
        .unwrap();
    assert_eq!(outcome.provider_id, "host-a");
    assert_eq!(scripted.snapshots.load(Ordering::SeqCst), 3);
    assert_eq!(ledger.allocations_for_consumer("vm-1").unwrap().len(), 1);
}

#[tokio::test]
async fn persistent_conflicts_surface_as_transient_contention() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let topology = register(&ledger, "host-a", &host_info(1, 4), &legacy());
    let scripted = Arc::new(ConflictingLedger::new(ledger.clone(), u32::MAX));
    let sched = Scheduler::new(
        Arc::new(NumaMatcher::default()),
        scripted.clone(),
        unlimited(&ledger),
    )
    .with_max_conflict_retries(2);

    let req = request("vm-1", CpuPolicy::Shared, &[(2, 256)]);
    let err = sched
        .schedule(&req, &[candidate("host-a", &topology)])
        .await
        .unwrap_err();

    assert!(err.is_transient());
    match err {
        SchedulerError::Contended { rejections } => assert_eq!(
            rejections[0].reason,
            RejectionReason::Contended { attempts: 3 }
        ),
        other => panic!("expected Contended, got {other:?}"),
    }
    assert_eq!(scripted.snapshots.load(Ordering::SeqCst), 3);
    assert!(ledger.allocations_for_consumer("vm-1").unwrap().is_empty());
}

// ── Quota ──────────────────────────────────────────────────────────

#[tokio::test]
async fn quota_denial_happens_before_any_matching() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let topology = register(&ledger, "host-a", &host_info(2, 4), &legacy());
    let mut limits = QuotaConfig::default();
    limits.defaults.insert("cores".to_string(), 4);
    let quota = QuotaGuard::new(
        Arc::new(limits),
        UsageCounter::Ledger(Arc::new(ledger.clone())),
    );
    let matcher = Arc::new(CountingMatcher::default());
    let sched = Scheduler::new(matcher.clone(), Arc::new(ledger.clone()), quota);
    let hosts = [candidate("host-a", &topology)];

    sched
        .schedule(&request("vm-1", CpuPolicy::Dedicated, &[(3, 256)]), &hosts)
        .await
        .unwrap();
    assert_eq!(matcher.calls(), 1);

    let err = sched
        .schedule(&request("vm-2", CpuPolicy::Shared, &[(2, 256)]), &hosts)
        .await
        .unwrap_err();
    match err {
        SchedulerError::QuotaDenied(denial) => {
            assert_eq!(denial.resource, "cores");
            assert_eq!(denial.in_use, 3);
            assert_eq!(denial.requested, 2);
        }
        other => panic!("expected QuotaDenied, got {other:?}"),
    }
    assert_eq!(matcher.calls(), 1);
    assert!(ledger.allocations_for_consumer("vm-2").unwrap().is_empty());
}

#[tokio::test]
async fn invalid_request_is_refused_up_front() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let err = scheduler(&ledger)
        .schedule(&request("vm-1", CpuPolicy::Shared, &[]), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidRequest(_)));
}

#[tokio::test]
async fn oversized_vcpu_count_is_refused_up_front() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let matcher = Arc::new(CountingMatcher::default());
    let topology = register(&ledger, "host-a", &host_info(2, 2), &legacy());
    let sched = Scheduler::new(matcher.clone(), Arc::new(ledger.clone()), unlimited(&ledger));

    let req = request("vm-1", CpuPolicy::Shared, &[(u32::MAX, 256), (2, 256)]);
    let err = sched
        .schedule(&req, &[candidate("host-a", &topology)])
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidRequest(_)));
    assert_eq!(matcher.calls(), 0);
}

// ── Migration ──────────────────────────────────────────────────────

async fn migrating(ledger: &ResourceLedger) -> (Scheduler, PlacementRequest, Vec<Candidate>) {
    let a = register(ledger, "host-a", &host_info(1, 4), &legacy());
    let b = register(ledger, "host-b", &host_info(1, 4), &legacy());
    let hosts = vec![candidate("host-a", &a), candidate("host-b", &b)];
    let sched = scheduler(ledger);
    let req = request("vm-1", CpuPolicy::Dedicated, &[(2, 512)]);
    let placed = sched.schedule(&req, &hosts).await.unwrap();
    assert_eq!(placed.provider_id, "host-a");
    (sched, req, hosts)
}

#[tokio::test]
async fn migration_holds_both_rows_until_confirmed() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let (sched, req, hosts) = migrating(&ledger).await;

    let outcome = sched.migrate(&req, "mig-1", "host-a", &hosts).await.unwrap();
    assert_eq!(outcome.provider_id, "host-b");
    assert_eq!(outcome.allocation.consumer_id, "mig-1");
    assert_eq!(ledger.usages("host-a").unwrap()[&ResourceClass::Vcpu], 2);
    assert_eq!(ledger.usages("host-b").unwrap()[&ResourceClass::Vcpu], 2);
    assert!(matches!(
        ledger.delete("vm-1", "host-a"),
        Err(LedgerError::TransitionInProgress(_))
    ));

    ledger.confirm("vm-1").unwrap();
    let rows = ledger.allocations_for_consumer("vm-1").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].provider_id, "host-b");
    assert_eq!(rows[0].cores, outcome.allocation.cores);
    assert_eq!(ledger.usages("host-a").unwrap()[&ResourceClass::Vcpu], 0);
    assert!(ledger.migration("vm-1").unwrap().is_none());
}

#[tokio::test]
async fn reverted_migration_leaves_only_the_source_row() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let (sched, req, hosts) = migrating(&ledger).await;

    sched.migrate(&req, "mig-1", "host-a", &hosts).await.unwrap();
    ledger.revert("vm-1").unwrap();

    let rows = ledger.allocations_for_consumer("vm-1").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].provider_id, "host-a");
    assert!(ledger.allocations_for_provider("host-b").unwrap().is_empty());
}

#[tokio::test]
async fn second_migration_of_a_locked_workload_fails() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let (sched, req, mut hosts) = migrating(&ledger).await;
    hosts.push(candidate("host-c", &register(&ledger, "host-c", &host_info(1, 4), &legacy())));

    sched.migrate(&req, "mig-1", "host-a", &hosts).await.unwrap();
    let err = sched
        .migrate(&req, "mig-2", "host-a", &hosts)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Ledger(LedgerError::TransitionInProgress(_))
    ));
    assert!(ledger.allocations_for_provider("host-c").unwrap().is_empty());
}

#[tokio::test]
async fn migration_quota_counts_only_growth() {
    let ledger = ResourceLedger::open_in_memory().unwrap();
    let a = register(&ledger, "host-a", &host_info(1, 4), &legacy());
    let b = register(&ledger, "host-b", &host_info(1, 4), &legacy());
    let hosts = [candidate("host-a", &a), candidate("host-b", &b)];
    let mut limits = QuotaConfig::default();
    limits.defaults.insert("cores".to_string(), 2);
    let quota = QuotaGuard::new(
        Arc::new(limits),
        UsageCounter::Ledger(Arc::new(ledger.clone())),
    );
    let sched = Scheduler::new(
        Arc::new(NumaMatcher::default()),
        Arc::new(ledger.clone()),
        quota,
    );

    let req = request("vm-1", CpuPolicy::Shared, &[(2, 256)]);
    sched.schedule(&req, &hosts).await.unwrap();

    // Same size: nothing new to admit.
    sched.migrate(&req, "mig-1", "host-a", &hosts).await.unwrap();
    ledger.revert("vm-1").unwrap();

    let bigger = request("vm-1", CpuPolicy::Shared, &[(3, 256)]);
    let err = sched
        .migrate(&bigger, "mig-2", "host-a", &hosts)
        .await
        .unwrap_err();
    match err {
        SchedulerError::QuotaDenied(denial) => assert_eq!(denial.requested, 1),
        other => panic!("expected QuotaDenied, got {other:?}"),
    }
}

// ── Persistence ────────────────────────────────────────────────────

#[tokio::test]
async fn committed_claims_survive_reopening_the_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.redb");
    let topology = {
        let ledger = ResourceLedger::open(&path).unwrap();
        let topology = register(&ledger, "host-a", &host_info(2, 2), &dedicated_only("0-7"));
        let req = request("vm-1", CpuPolicy::Dedicated, &[(2, 512)]);
        scheduler(&ledger)
            .schedule(&req, &[candidate("host-a", &topology)])
            .await
            .unwrap();
        topology
    };

    let ledger = ResourceLedger::open(&path).unwrap();
    let snap = ledger.snapshot("host-a").unwrap();
    assert_eq!(snap.usages[&ResourceClass::Pcpu], 2);
    assert_eq!(snap.host_usage.pinned, BTreeSet::from([0, 1]));

    // The reopened ledger still steers the next guest off the pinned cores.
    let next = request("vm-2", CpuPolicy::Dedicated, &[(2, 512)]);
    let outcome = scheduler(&ledger)
        .schedule(&next, &[candidate("host-a", &topology)])
        .await
        .unwrap();
    assert_eq!(outcome.allocation.cores, BTreeSet::from([2, 3]));
}
