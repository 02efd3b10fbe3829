//! Shared types used across numagrid crates.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Resource classes ───────────────────────────────────────────────

/// A named unit of capacity reported by a resource provider.
///
/// Serialized as its canonical upper-case name (`"VCPU"`, `"CUSTOM_GPU"`)
/// so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ResourceClass {
    /// Generic (floating) core count.
    Vcpu,
    /// Dedicated core count, one unit per pinnable host CPU.
    Pcpu,
    MemoryMb,
    DiskGb,
    /// Operator-defined class; the stored name includes the `CUSTOM_` prefix.
    Custom(String),
}

impl ResourceClass {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceClass::Vcpu => "VCPU",
            ResourceClass::Pcpu => "PCPU",
            ResourceClass::MemoryMb => "MEMORY_MB",
            ResourceClass::DiskGb => "DISK_GB",
            ResourceClass::Custom(name) => name,
        }
    }

    /// The quota resource this class is counted against.
    ///
    /// Both core classes share the `cores` quota so that a project's core
    /// limit holds no matter which class its hosts expose.
    pub fn quota_resource(&self) -> &str {
        match self {
            ResourceClass::Vcpu | ResourceClass::Pcpu => "cores",
            ResourceClass::MemoryMb => "ram",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VCPU" => Ok(ResourceClass::Vcpu),
            "PCPU" => Ok(ResourceClass::Pcpu),
            "MEMORY_MB" => Ok(ResourceClass::MemoryMb),
            "DISK_GB" => Ok(ResourceClass::DiskGb),
            custom if custom.starts_with("CUSTOM_") && custom.len() > "CUSTOM_".len() => {
                Ok(ResourceClass::Custom(custom.to_string()))
            }
            other => Err(format!("unknown resource class: {other}")),
        }
    }
}

impl From<ResourceClass> for String {
    fn from(class: ResourceClass) -> Self {
        class.as_str().to_string()
    }
}

impl TryFrom<String> for ResourceClass {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Amount requested or consumed per resource class.
pub type Resources = BTreeMap<ResourceClass, u64>;

// ── Inventory ──────────────────────────────────────────────────────

/// Capacity record for one resource class on one provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Inventory {
    pub total: u64,
    pub reserved: u64,
    pub allocation_ratio: f64,
    /// Smallest amount a single allocation may request.
    pub min_unit: u64,
    /// Largest amount a single allocation may request.
    pub max_unit: u64,
    /// Allocations must be a multiple of this.
    pub step_size: u64,
}

impl Inventory {
    /// Inventory with no reservation, ratio 1.0 and unit limits spanning the total.
    pub fn new(total: u64) -> Self {
        Self {
            total,
            reserved: 0,
            allocation_ratio: 1.0,
            min_unit: 1,
            max_unit: total.max(1),
            step_size: 1,
        }
    }

    pub fn with_reserved(mut self, reserved: u64) -> Self {
        self.reserved = reserved;
        self
    }

    pub fn with_allocation_ratio(mut self, ratio: f64) -> Self {
        self.allocation_ratio = ratio;
        self
    }

    /// Usable capacity: `(total - reserved) * allocation_ratio`, rounded down.
    pub fn capacity(&self) -> u64 {
        let base = self.total.saturating_sub(self.reserved) as f64;
        (base * self.allocation_ratio).floor() as u64
    }

    /// Check an allocation amount against the unit constraints.
    pub fn check_unit(&self, amount: u64) -> Result<(), String> {
        if amount < self.min_unit {
            return Err(format!("amount {amount} is below min_unit {}", self.min_unit));
        }
        if amount > self.max_unit {
            return Err(format!("amount {amount} is above max_unit {}", self.max_unit));
        }
        if self.step_size > 1 && amount % self.step_size != 0 {
            return Err(format!(
                "amount {amount} is not a multiple of step_size {}",
                self.step_size
            ));
        }
        Ok(())
    }
}

// ── Host topology ──────────────────────────────────────────────────

/// One NUMA cell of a host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostCell {
    pub id: u32,
    /// CPUs that floating (shared-policy) vCPUs may run on.
    pub cpuset: BTreeSet<u32>,
    /// CPUs that may be pinned to dedicated-policy vCPUs.
    pub pcpuset: BTreeSet<u32>,
    /// Hyperthread sibling groups covering this cell's CPUs.
    pub siblings: Vec<BTreeSet<u32>>,
    pub memory_mb: u64,
}

impl HostCell {
    /// Sibling group containing `cpu`, or a singleton group if it has none.
    pub fn sibling_group(&self, cpu: u32) -> BTreeSet<u32> {
        self.siblings
            .iter()
            .find(|group| group.contains(&cpu))
            .cloned()
            .unwrap_or_else(|| BTreeSet::from([cpu]))
    }

    /// Whether any sibling group holds more than one thread.
    pub fn has_smt(&self) -> bool {
        self.siblings.iter().any(|group| group.len() > 1)
    }
}

/// Immutable snapshot of a host's NUMA layout, supplied per scheduling attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostNumaTopology {
    pub cells: Vec<HostCell>,
    /// Overcommit ratio applied to floating vCPUs.
    #[serde(default = "default_ratio")]
    pub cpu_allocation_ratio: f64,
}

fn default_ratio() -> f64 {
    1.0
}

impl HostNumaTopology {
    pub fn cell(&self, id: u32) -> Option<&HostCell> {
        self.cells.iter().find(|c| c.id == id)
    }

    /// Host cell containing the given CPU.
    pub fn cell_of_cpu(&self, cpu: u32) -> Option<u32> {
        self.cells
            .iter()
            .find(|c| c.cpuset.contains(&cpu) || c.pcpuset.contains(&cpu))
            .map(|c| c.id)
    }
}

// ── Instance request ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuPolicy {
    #[default]
    Shared,
    Dedicated,
}

/// How hyperthread siblings may be used by a dedicated guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPolicy {
    #[default]
    Prefer,
    Isolate,
    Require,
}

/// One guest NUMA cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuestCell {
    pub vcpus: u32,
    pub memory_mb: u64,
}

/// A network attached to the guest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkAttachment {
    pub network: String,
    /// Guest cells the network is attached to; `None` means the whole guest.
    #[serde(default)]
    pub guest_cells: Option<BTreeSet<usize>>,
}

impl NetworkAttachment {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            guest_cells: None,
        }
    }

    pub fn applies_to(&self, guest_cell: usize) -> bool {
        self.guest_cells
            .as_ref()
            .is_none_or(|cells| cells.contains(&guest_cell))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceNumaRequest {
    pub cells: Vec<GuestCell>,
    #[serde(default)]
    pub cpu_policy: CpuPolicy,
    #[serde(default)]
    pub thread_policy: ThreadPolicy,
    #[serde(default)]
    pub networks: Vec<NetworkAttachment>,
}

impl InstanceNumaRequest {
    pub fn total_vcpus(&self) -> u64 {
        self.cells.iter().map(|c| u64::from(c.vcpus)).sum()
    }

    pub fn total_memory_mb(&self) -> u64 {
        self.cells.iter().fold(0u64, |total, c| total.saturating_add(c.memory_mb))
    }
}

/// External mapping of network id → host NUMA nodes the network can reach.
/// Networks without an entry may use any node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct NetworkAffinity(BTreeMap<String, BTreeSet<u32>>);

impl NetworkAffinity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restrict(mut self, network: impl Into<String>, nodes: impl IntoIterator<Item = u32>) -> Self {
        self.0.insert(network.into(), nodes.into_iter().collect());
        self
    }

    pub fn allowed_nodes(&self, network: &str) -> Option<&BTreeSet<u32>> {
        self.0.get(network)
    }

    pub fn permits(&self, network: &str, node: u32) -> bool {
        self.allowed_nodes(network).is_none_or(|nodes| nodes.contains(&node))
    }
}

// ── Usage ──────────────────────────────────────────────────────────

/// Consumption of one host cell.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellUsage {
    /// Floating vCPUs placed on the cell.
    pub floating_vcpus: u64,
    pub memory_mb: u64,
}

/// What an allocation consumes on one host cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellClaim {
    pub host_cell: u32,
    pub floating_vcpus: u64,
    pub memory_mb: u64,
}

/// Per-host usage derived from the ledger, fed to the matcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostUsage {
    /// CPUs pinned or reserved by existing allocations.
    pub pinned: BTreeSet<u32>,
    pub cells: BTreeMap<u32, CellUsage>,
}

impl HostUsage {
    pub fn cell(&self, id: u32) -> CellUsage {
        self.cells.get(&id).copied().unwrap_or_default()
    }

    /// Fold one allocation's consumption into the totals.
    pub fn absorb(&mut self, cells: &[CellClaim], pinned: impl IntoIterator<Item = u32>) {
        for claim in cells {
            let usage = self.cells.entry(claim.host_cell).or_default();
            usage.floating_vcpus += claim.floating_vcpus;
            usage.memory_mb += claim.memory_mb;
        }
        self.pinned.extend(pinned);
    }
}

// ── Placement ──────────────────────────────────────────────────────

/// Guest CPU topology implied by a pinned cell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuestCpuTopology {
    pub cores: u32,
    pub threads: u32,
}

/// Placement of one guest cell onto a host cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CellPlacement {
    pub guest_cell: usize,
    pub host_cell: u32,
    pub vcpus: u32,
    pub memory_mb: u64,
    /// Guest vCPU id → host CPU, for dedicated cells.
    pub pinning: BTreeMap<u32, u32>,
    /// Sibling CPUs withheld from everyone else (isolate / require leftovers).
    pub reserved: BTreeSet<u32>,
    /// Host CPUs floating vCPUs may run on, for shared cells.
    pub cpuset: BTreeSet<u32>,
    pub cpu_topology: Option<GuestCpuTopology>,
}

impl CellPlacement {
    pub fn is_pinned(&self) -> bool {
        !self.pinning.is_empty()
    }
}

/// A proposed mapping of a guest onto a host; nothing is reserved until the
/// ledger commits a claim for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Placement {
    pub cells: Vec<CellPlacement>,
}

impl Placement {
    pub fn pinned_cores(&self) -> BTreeSet<u32> {
        self.cells
            .iter()
            .flat_map(|c| c.pinning.values().copied())
            .collect()
    }

    pub fn reserved_cores(&self) -> BTreeSet<u32> {
        self.cells.iter().flat_map(|c| c.reserved.iter().copied()).collect()
    }

    pub fn host_cells(&self) -> Vec<u32> {
        self.cells.iter().map(|c| c.host_cell).collect()
    }

    /// Per-cell consumption to record alongside the allocation.
    pub fn cell_claims(&self) -> Vec<CellClaim> {
        self.cells
            .iter()
            .map(|c| CellClaim {
                host_cell: c.host_cell,
                floating_vcpus: if c.is_pinned() { 0 } else { u64::from(c.vcpus) },
                memory_mb: c.memory_mb,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_class_round_trips_through_strings() {
        for name in ["VCPU", "PCPU", "MEMORY_MB", "DISK_GB", "CUSTOM_FPGA"] {
            let class: ResourceClass = name.parse().unwrap();
            assert_eq!(class.to_string(), name);
        }
        assert!("GPU".parse::<ResourceClass>().is_err());
        assert!("CUSTOM_".parse::<ResourceClass>().is_err());
    }

    #[test]
    fn resource_class_keys_json_maps() {
        let mut resources = Resources::new();
        resources.insert(ResourceClass::Pcpu, 2);
        resources.insert(ResourceClass::MemoryMb, 2048);

        let json = serde_json::to_string(&resources).unwrap();
        assert_eq!(json, r#"{"PCPU":2,"MEMORY_MB":2048}"#);
        let back: Resources = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resources);
    }

    #[test]
    fn core_classes_share_the_cores_quota() {
        assert_eq!(ResourceClass::Vcpu.quota_resource(), "cores");
        assert_eq!(ResourceClass::Pcpu.quota_resource(), "cores");
        assert_eq!(ResourceClass::MemoryMb.quota_resource(), "ram");
        assert_eq!(ResourceClass::DiskGb.quota_resource(), "DISK_GB");
    }

    #[test]
    fn inventory_capacity_applies_reserved_and_ratio() {
        let inv = Inventory::new(8).with_reserved(2).with_allocation_ratio(1.5);
        assert_eq!(inv.capacity(), 9);
        assert_eq!(Inventory::new(8).capacity(), 8);
    }

    #[test]
    fn inventory_unit_checks() {
        let mut inv = Inventory::new(16);
        inv.step_size = 2;
        inv.max_unit = 8;
        assert!(inv.check_unit(4).is_ok());
        assert!(inv.check_unit(3).is_err());
        assert!(inv.check_unit(10).is_err());
        assert!(inv.check_unit(0).is_err());
    }

    #[test]
    fn network_affinity_defaults_to_unrestricted() {
        let affinity = NetworkAffinity::new().restrict("physnet-a", [1]);
        assert!(affinity.permits("physnet-a", 1));
        assert!(!affinity.permits("physnet-a", 0));
        assert!(affinity.permits("tenant-vxlan", 0));
    }

    #[test]
    fn placement_cell_claims_only_count_floating_vcpus() {
        let placement = Placement {
            cells: vec![CellPlacement {
                guest_cell: 0,
                host_cell: 1,
                vcpus: 2,
                memory_mb: 1024,
                pinning: BTreeMap::from([(0, 4), (1, 5)]),
                reserved: BTreeSet::new(),
                cpuset: BTreeSet::new(),
                cpu_topology: None,
            }],
        };
        let claims = placement.cell_claims();
        assert_eq!(claims[0].floating_vcpus, 0);
        assert_eq!(claims[0].memory_mb, 1024);
        assert_eq!(placement.pinned_cores(), BTreeSet::from([4, 5]));
    }
}
