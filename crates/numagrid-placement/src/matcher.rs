//! NUMA topology matcher: decides whether a host can take a guest and
//! proposes the concrete cell and core assignment.
//!
//! The search walks guest cells in order and tries every unused host cell
//! for each, backtracking when a later guest cell or a network constraint
//! cannot be satisfied. Host cells are tried in the order given by the
//! configured [`MatcherKind`]; cores inside a cell are chosen by
//! [`crate::pinning`]. The first complete assignment found is returned, so
//! identical inputs always yield identical placements.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use numagrid_core::{
    CellPlacement, CpuPolicy, HostCell, HostNumaTopology, HostUsage, InstanceNumaRequest,
    MatcherKind, NetworkAffinity, Placement,
};

use crate::network::unsatisfied_network;
use crate::pinning::{PinningFailure, free_capacity, select_cores};

/// Why a host cannot take a guest.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    #[error("request has no guest NUMA cells")]
    EmptyRequest,

    #[error("guest needs {requested} distinct NUMA cells but host has {available}")]
    InsufficientCells { requested: usize, available: usize },

    #[error("no host cell has {requested} free cores for guest cell {guest_cell} (most free: {available})")]
    InsufficientCores {
        guest_cell: usize,
        requested: u64,
        available: u64,
    },

    #[error("no host cell has {requested} MB free for guest cell {guest_cell} (most free: {available} MB)")]
    InsufficientMemory {
        guest_cell: usize,
        requested: u64,
        available: u64,
    },

    #[error("no fully free sibling cores for guest cell {guest_cell}")]
    NoFreeSiblings { guest_cell: usize },

    #[error("no host cell satisfies the NUMA affinity of network {network}")]
    NetworkAffinity { network: String },

    #[error("guest asks for {requested} vCPUs, more than guest vCPU ids can number")]
    TooManyVcpus { requested: u64 },
}

/// Pure host/guest fitting. Implementations must not touch shared state.
pub trait TopologyMatcher: Send + Sync {
    fn fit(
        &self,
        host: &HostNumaTopology,
        usage: &HostUsage,
        request: &InstanceNumaRequest,
        networks: &NetworkAffinity,
    ) -> Result<Placement, Rejection>;
}

/// The built-in matcher; the variant only changes host cell order.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumaMatcher {
    kind: MatcherKind,
}

impl NumaMatcher {
    pub fn new(kind: MatcherKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> MatcherKind {
        self.kind
    }

    fn cell_order<'h>(
        &self,
        host: &'h HostNumaTopology,
        usage: &HostUsage,
        request: &InstanceNumaRequest,
    ) -> Vec<&'h HostCell> {
        let mut cells: Vec<&HostCell> = host.cells.iter().collect();
        match self.kind {
            MatcherKind::FirstFit => cells.sort_by_key(|c| c.id),
            MatcherKind::BestFit => cells.sort_by_key(|c| {
                let cores = free_cores(host, c, usage, request);
                let memory = c.memory_mb.saturating_sub(usage.cell(c.id).memory_mb);
                (cores, memory, c.id)
            }),
        }
        cells
    }
}

impl TopologyMatcher for NumaMatcher {
    fn fit(
        &self,
        host: &HostNumaTopology,
        usage: &HostUsage,
        request: &InstanceNumaRequest,
        networks: &NetworkAffinity,
    ) -> Result<Placement, Rejection> {
        if request.cells.is_empty() {
            return Err(Rejection::EmptyRequest);
        }
        if request.cells.len() > host.cells.len() {
            return Err(Rejection::InsufficientCells {
                requested: request.cells.len(),
                available: host.cells.len(),
            });
        }

        let mut offsets = Vec::with_capacity(request.cells.len());
        let mut next = 0u32;
        for cell in &request.cells {
            offsets.push(next);
            next = next
                .checked_add(cell.vcpus)
                .ok_or_else(|| Rejection::TooManyVcpus {
                    requested: request.total_vcpus(),
                })?;
        }

        let mut search = Search {
            host,
            usage,
            request,
            networks,
            order: self.cell_order(host, usage, request),
            offsets,
            taken: Vec::new(),
            chosen: Vec::new(),
            failure: None,
        };

        if search.assign(0) {
            debug!(cells = ?search.taken, "guest fits host");
            Ok(Placement {
                cells: search.chosen,
            })
        } else {
            let rejection = search
                .failure
                .map(|(_, r)| r)
                .unwrap_or(Rejection::InsufficientCells {
                    requested: request.cells.len(),
                    available: host.cells.len(),
                });
            debug!(%rejection, "guest does not fit host");
            Err(rejection)
        }
    }
}

/// Cores a guest cell of this request could still get on `cell`.
fn free_cores(
    host: &HostNumaTopology,
    cell: &HostCell,
    usage: &HostUsage,
    request: &InstanceNumaRequest,
) -> u64 {
    match request.cpu_policy {
        CpuPolicy::Dedicated => free_capacity(cell, &usage.pinned, request.thread_policy),
        CpuPolicy::Shared => {
            let usable = cell.cpuset.difference(&usage.pinned).count() as f64;
            let limit = (usable * host.cpu_allocation_ratio).floor() as u64;
            limit.saturating_sub(usage.cell(cell.id).floating_vcpus)
        }
    }
}

struct Search<'a> {
    host: &'a HostNumaTopology,
    usage: &'a HostUsage,
    request: &'a InstanceNumaRequest,
    networks: &'a NetworkAffinity,
    order: Vec<&'a HostCell>,
    /// First guest vCPU id of each guest cell.
    offsets: Vec<u32>,
    /// Host cell id per assigned guest cell.
    taken: Vec<u32>,
    chosen: Vec<CellPlacement>,
    /// Most specific failure seen, with the guest cell depth it occurred at.
    failure: Option<(usize, Rejection)>,
}

impl Search<'_> {
    fn assign(&mut self, guest: usize) -> bool {
        if guest == self.request.cells.len() {
            return true;
        }
        for idx in 0..self.order.len() {
            let cell = self.order[idx];
            if self.taken.contains(&cell.id) {
                continue;
            }
            let placement = match self.fit_cell(guest, cell) {
                Ok(p) => p,
                Err(rejection) => {
                    self.record(guest, rejection);
                    continue;
                }
            };
            self.taken.push(cell.id);
            if let Some(network) = unsatisfied_network(self.request, self.networks, &self.taken) {
                let rejection = Rejection::NetworkAffinity {
                    network: network.to_string(),
                };
                self.record(guest, rejection);
                self.taken.pop();
                continue;
            }
            self.chosen.push(placement);
            if self.assign(guest + 1) {
                return true;
            }
            self.chosen.pop();
            self.taken.pop();
        }
        false
    }

    /// Deeper failures explain more than shallow ones; at equal depth the
    /// first one wins.
    fn record(&mut self, depth: usize, rejection: Rejection) {
        let replace = match &self.failure {
            None => true,
            Some((seen, _)) => depth > *seen,
        };
        if replace {
            self.failure = Some((depth, rejection));
        }
    }

    fn fit_cell(&self, guest: usize, cell: &HostCell) -> Result<CellPlacement, Rejection> {
        let want = &self.request.cells[guest];
        let used = self.usage.cell(cell.id);
        let free_memory = cell.memory_mb.saturating_sub(used.memory_mb);
        if want.memory_mb > free_memory {
            return Err(Rejection::InsufficientMemory {
                guest_cell: guest,
                requested: want.memory_mb,
                available: free_memory,
            });
        }

        match self.request.cpu_policy {
            CpuPolicy::Shared => {
                let available = free_cores(self.host, cell, self.usage, self.request);
                if u64::from(want.vcpus) > available {
                    return Err(Rejection::InsufficientCores {
                        guest_cell: guest,
                        requested: u64::from(want.vcpus),
                        available,
                    });
                }
                Ok(CellPlacement {
                    guest_cell: guest,
                    host_cell: cell.id,
                    vcpus: want.vcpus,
                    memory_mb: want.memory_mb,
                    pinning: BTreeMap::new(),
                    reserved: Default::default(),
                    cpuset: cell.cpuset.difference(&self.usage.pinned).copied().collect(),
                    cpu_topology: None,
                })
            }
            CpuPolicy::Dedicated => {
                let selection = select_cores(
                    cell,
                    &self.usage.pinned,
                    want.vcpus,
                    self.request.thread_policy,
                )
                .map_err(|failure| match failure {
                    PinningFailure::InsufficientCores { available } => Rejection::InsufficientCores {
                        guest_cell: guest,
                        requested: u64::from(want.vcpus),
                        available,
                    },
                    PinningFailure::NoFreeSiblings => Rejection::NoFreeSiblings { guest_cell: guest },
                })?;
                let first = self.offsets[guest];
                let pinning = selection
                    .cores
                    .iter()
                    .enumerate()
                    .map(|(i, &core)| (first + i as u32, core))
                    .collect();
                Ok(CellPlacement {
                    guest_cell: guest,
                    host_cell: cell.id,
                    vcpus: want.vcpus,
                    memory_mb: want.memory_mb,
                    pinning,
                    reserved: selection.reserved,
                    cpuset: Default::default(),
                    cpu_topology: Some(selection.topology),
                })
            }
        }
    }
}
