//! Records stored in the ledger.

use std::collections::{BTreeMap, BTreeSet};

use numagrid_core::{CellClaim, HostUsage, Inventory, ResourceClass, Resources};
use serde::{Deserialize, Serialize};

use crate::tables::{allocation_key, consumer_key};

/// A resource provider (typically one host) and its generation counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderRecord {
    pub id: String,
    /// Bumped by every committed write that touches the provider.
    pub generation: u64,
    pub inventories: BTreeMap<ResourceClass, Inventory>,
}

impl ProviderRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            generation: 0,
            inventories: BTreeMap::new(),
        }
    }
}

/// One consumer's commitment against one provider.
///
/// The same shape is used to request a claim and to store the committed row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Allocation {
    /// Workload id, or a migration id for the destination row of a migration.
    pub consumer_id: String,
    pub project_id: String,
    pub provider_id: String,
    pub resources: Resources,
    /// Host CPUs pinned to guest vCPUs.
    #[serde(default)]
    pub cores: BTreeSet<u32>,
    /// Host CPUs withheld from every other consumer.
    #[serde(default)]
    pub reserved_cores: BTreeSet<u32>,
    /// Per host cell consumption.
    #[serde(default)]
    pub cells: Vec<CellClaim>,
}

impl Allocation {
    pub fn new(
        consumer_id: impl Into<String>,
        project_id: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            project_id: project_id.into(),
            provider_id: provider_id.into(),
            resources: Resources::new(),
            cores: BTreeSet::new(),
            reserved_cores: BTreeSet::new(),
            cells: Vec::new(),
        }
    }

    pub fn with_resource(mut self, class: ResourceClass, amount: u64) -> Self {
        self.resources.insert(class, amount);
        self
    }

    pub fn with_cores(mut self, cores: impl IntoIterator<Item = u32>) -> Self {
        self.cores.extend(cores);
        self
    }

    pub fn table_key(&self) -> String {
        allocation_key(&self.provider_id, &self.consumer_id)
    }

    pub fn index_key(&self) -> String {
        consumer_key(&self.consumer_id, &self.provider_id)
    }

    /// Every host CPU this allocation keeps away from other consumers.
    pub fn held_cores(&self) -> BTreeSet<u32> {
        self.cores.union(&self.reserved_cores).copied().collect()
    }
}

/// Read-only view of one provider at one generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSnapshot {
    pub provider_id: String,
    pub generation: u64,
    pub inventories: BTreeMap<ResourceClass, Inventory>,
    /// Allocated amount per class; every inventoried class is present.
    pub usages: Resources,
    /// Pinned cores and per-cell consumption, for the topology matcher.
    pub host_usage: HostUsage,
}

impl ProviderSnapshot {
    pub(crate) fn build(record: ProviderRecord, allocations: &[Allocation]) -> Self {
        let usages = sum_usages(&record.inventories, allocations);
        let mut host_usage = HostUsage::default();
        for allocation in allocations {
            host_usage.absorb(&allocation.cells, allocation.held_cores());
        }
        Self {
            provider_id: record.id,
            generation: record.generation,
            inventories: record.inventories,
            usages,
            host_usage,
        }
    }

    pub fn has_class(&self, class: &ResourceClass) -> bool {
        self.inventories.contains_key(class)
    }

    /// Capacity still unallocated for `class`, zero if not inventoried.
    pub fn headroom(&self, class: &ResourceClass) -> u64 {
        let capacity = self.inventories.get(class).map_or(0, Inventory::capacity);
        capacity.saturating_sub(self.usages.get(class).copied().unwrap_or(0))
    }
}

pub(crate) fn sum_usages(
    inventories: &BTreeMap<ResourceClass, Inventory>,
    allocations: &[Allocation],
) -> Resources {
    let mut usages: Resources = inventories.keys().map(|c| (c.clone(), 0)).collect();
    for allocation in allocations {
        for (class, amount) in &allocation.resources {
            let used = usages.entry(class.clone()).or_insert(0);
            *used = used.saturating_add(*amount);
        }
    }
    usages
}

/// Transition lock held by a workload while it is being migrated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationRecord {
    pub workload_id: String,
    /// Consumer id of the destination row.
    pub migration_id: String,
    pub source_provider: String,
    pub dest_provider: String,
}

impl MigrationRecord {
    pub fn holds(&self, consumer_id: &str) -> bool {
        self.workload_id == consumer_id || self.migration_id == consumer_id
    }
}

/// Result of a reshape that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReshapeOutcome {
    /// Inventory and allocations were moved to the new class.
    Reshaped { allocations_moved: usize },
    /// Only the new class exists; nothing to do.
    AlreadyReshaped,
}
