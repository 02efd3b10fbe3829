//! Network → NUMA node affinity checks.
//!
//! A network attached to a single-cell guest must reach the host cell the
//! guest lands on. When the guest spans several cells, each network only
//! has to reach one of the host cells chosen for the guest cells it is
//! attached to.

use numagrid_core::{InstanceNumaRequest, NetworkAffinity};

/// First network whose constraint is violated by `assigned`, where
/// `assigned[i]` is the host cell chosen for guest cell `i`.
///
/// Networks attached to guest cells that have not been assigned yet are
/// skipped, so the check can prune a partial assignment.
pub fn unsatisfied_network<'a>(
    request: &'a InstanceNumaRequest,
    networks: &NetworkAffinity,
    assigned: &[u32],
) -> Option<&'a str> {
    let guest_cells = request.cells.len();
    for attachment in &request.networks {
        let Some(allowed) = networks.allowed_nodes(&attachment.network) else {
            continue;
        };
        let attached: Vec<usize> = (0..guest_cells)
            .filter(|&cell| attachment.applies_to(cell))
            .collect();
        if attached.is_empty() || attached.iter().any(|&cell| cell >= assigned.len()) {
            continue;
        }
        let reachable = attached
            .iter()
            .any(|&cell| allowed.contains(&assigned[cell]));
        if !reachable {
            return Some(attachment.network.as_str());
        }
    }
    None
}
