//! numagrid topology matcher: NUMA cell fitting, core pinning, network affinity.
//!
//! Everything here is a pure function of its inputs: a host topology, the
//! usage already committed on that host, and the guest's request. Nothing
//! is reserved by a successful fit; the scheduler commits the returned
//! placement through the ledger.
//!
//! # Components
//!
//! - **`matcher`**: Guest cell → host cell search (`TopologyMatcher`)
//! - **`pinning`**: Dedicated core selection under a thread policy
//! - **`network`**: Network → NUMA node affinity checks

pub mod matcher;
pub mod network;
pub mod pinning;

use std::sync::Arc;

use numagrid_core::MatcherKind;

pub use matcher::{NumaMatcher, Rejection, TopologyMatcher};
pub use network::unsatisfied_network;
pub use pinning::{CoreSelection, PinningFailure, free_capacity, select_cores};

/// Build the configured matcher behind the trait object the scheduler holds.
pub fn matcher_for(kind: MatcherKind) -> Arc<dyn TopologyMatcher> {
    Arc::new(NumaMatcher::new(kind))
}
