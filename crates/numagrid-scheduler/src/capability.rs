//! Capability reporting: turns a raw host description into the NUMA
//! topology the matcher reads and the inventory the ledger accounts.
//!
//! Logical CPU ids are numbered node-major with hyperthread siblings
//! adjacent: `node * cores * threads + core * threads + thread`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use numagrid_core::config::ComputeConfig;
use numagrid_core::{EffectivePinning, HostCell, HostNumaTopology, Inventory, ResourceClass};
use numagrid_state::{ReshapeOutcome, ResourceLedger};

use crate::error::SchedulerResult;

/// Raw host shape supplied by the capability feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostInfo {
    pub nodes: u32,
    pub cores_per_node: u32,
    pub threads_per_core: u32,
    pub memory_mb_per_node: u64,
    #[serde(default)]
    pub disk_gb: u64,
}

impl HostInfo {
    pub fn cpu_count(&self) -> u32 {
        self.nodes * self.cores_per_node * self.threads_per_core
    }

    fn node_cpus(&self, node: u32) -> BTreeSet<u32> {
        let per_node = self.cores_per_node * self.threads_per_core;
        (node * per_node..(node + 1) * per_node).collect()
    }

    fn node_siblings(&self, node: u32) -> Vec<BTreeSet<u32>> {
        let per_node = self.cores_per_node * self.threads_per_core;
        (0..self.cores_per_node)
            .map(|core| {
                let first = node * per_node + core * self.threads_per_core;
                (first..first + self.threads_per_core).collect()
            })
            .collect()
    }
}

/// Host topology under the effective pinning layout.
///
/// In split mode dedicated CPUs land in each cell's `pcpuset` and shared
/// CPUs in its `cpuset`; an unset option contributes no CPUs. In legacy
/// mode both sets are the pin set (or every CPU), since pinned and floating
/// guests draw from the same pool.
pub fn build_topology(
    info: &HostInfo,
    pinning: &EffectivePinning,
    cpu_allocation_ratio: f64,
) -> HostNumaTopology {
    let restrict = |cpus: &BTreeSet<u32>, set: &Option<BTreeSet<u32>>| -> BTreeSet<u32> {
        set.as_ref()
            .map(|set| cpus.intersection(set).copied().collect())
            .unwrap_or_default()
    };

    let cells = (0..info.nodes)
        .map(|node| {
            let cpus = info.node_cpus(node);
            let (cpuset, pcpuset) = match pinning {
                EffectivePinning::Split { dedicated, shared } => {
                    (restrict(&cpus, shared), restrict(&cpus, dedicated))
                }
                EffectivePinning::Legacy { pin_set: None } => (cpus.clone(), cpus.clone()),
                EffectivePinning::Legacy { pin_set } => {
                    let usable = restrict(&cpus, pin_set);
                    (usable.clone(), usable)
                }
            };
            HostCell {
                id: node,
                cpuset,
                pcpuset,
                siblings: info.node_siblings(node),
                memory_mb: info.memory_mb_per_node,
            }
        })
        .collect();

    let topology = HostNumaTopology {
        cells,
        cpu_allocation_ratio,
    };
    let known: BTreeSet<u32> = (0..info.cpu_count()).collect();
    let configured = match pinning {
        EffectivePinning::Split { dedicated, shared } => dedicated
            .iter()
            .chain(shared.iter())
            .flatten()
            .copied()
            .collect::<BTreeSet<u32>>(),
        EffectivePinning::Legacy { pin_set } => pin_set.clone().unwrap_or_default(),
    };
    let missing: Vec<u32> = configured.difference(&known).copied().collect();
    if !missing.is_empty() {
        warn!(?missing, "configured CPUs do not exist on this host");
    }
    topology
}

/// Inventories a host reports for the given topology.
///
/// `PCPU` is only reported in split mode and never overcommits; in legacy
/// mode every guest CPU is accounted as `VCPU`.
pub fn host_inventory(
    info: &HostInfo,
    topology: &HostNumaTopology,
    pinning: &EffectivePinning,
    compute: &ComputeConfig,
) -> BTreeMap<ResourceClass, Inventory> {
    let mut inventories = BTreeMap::new();

    let shared: u64 = topology.cells.iter().map(|c| c.cpuset.len() as u64).sum();
    if shared > 0 {
        inventories.insert(
            ResourceClass::Vcpu,
            Inventory::new(shared)
                .with_reserved(compute.reserved_host_cpus.min(shared))
                .with_allocation_ratio(compute.cpu_allocation_ratio),
        );
    }

    if !pinning.is_legacy() {
        let dedicated: u64 = topology.cells.iter().map(|c| c.pcpuset.len() as u64).sum();
        if dedicated > 0 {
            inventories.insert(ResourceClass::Pcpu, Inventory::new(dedicated));
        }
    }

    let memory = u64::from(info.nodes) * info.memory_mb_per_node;
    if memory > 0 {
        inventories.insert(
            ResourceClass::MemoryMb,
            Inventory::new(memory)
                .with_reserved(compute.reserved_host_memory_mb.min(memory))
                .with_allocation_ratio(compute.ram_allocation_ratio),
        );
    }

    if info.disk_gb > 0 {
        inventories.insert(
            ResourceClass::DiskGb,
            Inventory::new(info.disk_gb)
                .with_reserved(compute.reserved_host_disk_gb.min(info.disk_gb))
                .with_allocation_ratio(compute.disk_allocation_ratio),
        );
    }

    inventories
}

/// What a capability report changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportOutcome {
    pub generation: u64,
    pub reshaped: Option<ReshapeOutcome>,
}

/// Writes reported inventories into the ledger. A host that switches from
/// generic to dedicated core accounting has its pinned guests moved to
/// `PCPU` in the same write.
#[derive(Clone)]
pub struct CapabilityReporter {
    ledger: ResourceLedger,
}

impl CapabilityReporter {
    pub fn new(ledger: ResourceLedger) -> Self {
        Self { ledger }
    }

    pub fn report(
        &self,
        provider_id: &str,
        inventories: BTreeMap<ResourceClass, Inventory>,
    ) -> SchedulerResult<ReportOutcome> {
        let (generation, reshaped) = self.ledger.report_inventories(provider_id, inventories)?;
        Ok(ReportOutcome {
            generation,
            reshaped,
        })
    }
}
