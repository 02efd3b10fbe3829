//! Dedicated core selection within one host cell.
//!
//! Candidate CPUs are the cell's `pcpuset` minus everything already pinned
//! or reserved on the host. Sibling groups are restricted to the `pcpuset`,
//! and are visited in ascending order of their lowest CPU id.

use std::collections::BTreeSet;

use numagrid_core::{GuestCpuTopology, HostCell, ThreadPolicy};

/// Cores chosen for one guest cell, in vCPU order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSelection {
    pub cores: Vec<u32>,
    /// Siblings withheld so that no other guest can use them.
    pub reserved: BTreeSet<u32>,
    pub topology: GuestCpuTopology,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinningFailure {
    InsufficientCores { available: u64 },
    NoFreeSiblings,
}

/// Sibling groups of the cell's pinnable CPUs.
fn pinnable_groups(cell: &HostCell) -> Vec<BTreeSet<u32>> {
    let mut groups: Vec<BTreeSet<u32>> = Vec::new();
    for &cpu in &cell.pcpuset {
        if groups.iter().any(|g| g.contains(&cpu)) {
            continue;
        }
        let group: BTreeSet<u32> = cell
            .sibling_group(cpu)
            .intersection(&cell.pcpuset)
            .copied()
            .collect();
        groups.push(group);
    }
    groups
}

/// Groups whose every thread is unpinned.
fn free_groups(cell: &HostCell, pinned: &BTreeSet<u32>) -> Vec<BTreeSet<u32>> {
    pinnable_groups(cell)
        .into_iter()
        .filter(|g| g.is_disjoint(pinned))
        .collect()
}

/// How many vCPUs could still be pinned on this cell under `policy`.
pub fn free_capacity(cell: &HostCell, pinned: &BTreeSet<u32>, policy: ThreadPolicy) -> u64 {
    match policy {
        ThreadPolicy::Prefer => cell.pcpuset.difference(pinned).count() as u64,
        ThreadPolicy::Isolate => free_groups(cell, pinned).len() as u64,
        ThreadPolicy::Require => free_groups(cell, pinned)
            .iter()
            .filter(|g| g.len() > 1)
            .map(|g| g.len() as u64)
            .sum(),
    }
}

/// Pick host CPUs for `vcpus` guest vCPUs.
pub fn select_cores(
    cell: &HostCell,
    pinned: &BTreeSet<u32>,
    vcpus: u32,
    policy: ThreadPolicy,
) -> Result<CoreSelection, PinningFailure> {
    let wanted = vcpus as usize;
    match policy {
        ThreadPolicy::Prefer => {
            let full = free_groups(cell, pinned);
            let mut order: Vec<u32> = full.iter().flatten().copied().collect();
            let partial: BTreeSet<u32> = cell
                .pcpuset
                .difference(pinned)
                .filter(|cpu| !order.contains(cpu))
                .copied()
                .collect();
            order.extend(partial);
            if order.len() < wanted {
                return Err(PinningFailure::InsufficientCores {
                    available: order.len() as u64,
                });
            }
            let cores: Vec<u32> = order.into_iter().take(wanted).collect();
            let topology = guest_topology(cell, &cores);
            Ok(CoreSelection {
                cores,
                reserved: BTreeSet::new(),
                topology,
            })
        }
        ThreadPolicy::Isolate => {
            let full = free_groups(cell, pinned);
            if full.len() < wanted {
                return Err(PinningFailure::InsufficientCores {
                    available: full.len() as u64,
                });
            }
            let mut cores = Vec::with_capacity(wanted);
            let mut reserved = BTreeSet::new();
            for group in full.into_iter().take(wanted) {
                let mut threads = group.into_iter();
                if let Some(first) = threads.next() {
                    cores.push(first);
                }
                reserved.extend(threads);
            }
            Ok(CoreSelection {
                cores,
                reserved,
                topology: GuestCpuTopology {
                    cores: vcpus,
                    threads: 1,
                },
            })
        }
        ThreadPolicy::Require => {
            if !cell.has_smt() {
                return Err(PinningFailure::NoFreeSiblings);
            }
            let full: Vec<BTreeSet<u32>> = free_groups(cell, pinned)
                .into_iter()
                .filter(|g| g.len() > 1)
                .collect();
            if full.is_empty() && wanted > 0 {
                return Err(PinningFailure::NoFreeSiblings);
            }
            let available: usize = full.iter().map(BTreeSet::len).sum();
            if available < wanted {
                return Err(PinningFailure::InsufficientCores {
                    available: available as u64,
                });
            }
            let mut cores = Vec::with_capacity(wanted);
            let mut reserved = BTreeSet::new();
            for group in full {
                if cores.len() == wanted {
                    break;
                }
                for cpu in group {
                    if cores.len() < wanted {
                        cores.push(cpu);
                    } else {
                        reserved.insert(cpu);
                    }
                }
            }
            let topology = guest_topology(cell, &cores);
            Ok(CoreSelection {
                cores,
                reserved,
                topology,
            })
        }
    }
}

/// Threads per core seen by the guest: the number of siblings it got from
/// each host core, when that number is the same for every core used.
fn guest_topology(cell: &HostCell, cores: &[u32]) -> GuestCpuTopology {
    let vcpus = cores.len() as u32;
    let mut per_group: Vec<u32> = Vec::new();
    for group in pinnable_groups(cell) {
        let used = cores.iter().filter(|c| group.contains(c)).count() as u32;
        if used > 0 {
            per_group.push(used);
        }
    }
    match per_group.first() {
        Some(&threads) if threads > 1 && per_group.iter().all(|&n| n == threads) => {
            GuestCpuTopology {
                cores: vcpus / threads,
                threads,
            }
        }
        _ => GuestCpuTopology {
            cores: vcpus,
            threads: 1,
        },
    }
}
