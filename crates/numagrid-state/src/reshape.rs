//! ReshapeCoordinator: moves a provider's accounting from one resource
//! class to another.
//!
//! The whole move is one ledger write: inventory and every allocation row
//! referencing the old class are rewritten together and the provider's
//! generation is bumped, so a reshape competes with claims through the same
//! generation check. A provider that reports both classes is a reshape in
//! progress and is completed on the next call; one that only reports the new
//! class is already done.
//!
//! A capability report that introduces `PCPU` is narrower: only pinned
//! allocations move to `PCPU`, floating ones keep drawing on `VCPU`, and the
//! moves land in the same write as the reported inventory.

use std::collections::BTreeMap;

use numagrid_core::{Inventory, ResourceClass, Resources};
use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{ResourceLedger, Rows, check_generation, check_inventory_fits, validate_id};
use crate::types::{Allocation, ProviderRecord, ReshapeOutcome, sum_usages};

impl ResourceLedger {
    /// Reshape in one write, optionally conditioned on the provider
    /// generation.
    pub fn reshape_at(
        &self,
        provider_id: &str,
        from: &ResourceClass,
        to: &ResourceClass,
        expected_generation: Option<u64>,
    ) -> LedgerResult<ReshapeOutcome> {
        if from == to {
            return Err(LedgerError::ReshapeFailure {
                provider: provider_id.to_string(),
                reason: format!("cannot reshape {from} into itself"),
            });
        }
        self.write(|rows| reshape_rows(rows, provider_id, from, to, expected_generation))
    }

    /// Replace a provider's inventories from a capability report,
    /// registering the provider if needed.
    ///
    /// When the report adds `PCPU` to a provider that did not have it,
    /// allocations holding pinned or reserved cores are moved from `VCPU` to
    /// `PCPU` in the same write. Either the moves and the new inventory are
    /// committed together under one generation bump, or nothing is.
    /// Returns the new generation and the reshape, if any rows moved.
    pub fn report_inventories(
        &self,
        provider_id: &str,
        inventories: BTreeMap<ResourceClass, Inventory>,
    ) -> LedgerResult<(u64, Option<ReshapeOutcome>)> {
        validate_id("provider", provider_id)?;
        let (generation, moved) = self.write(|rows| {
            let mut record = rows
                .get_provider(provider_id)?
                .unwrap_or_else(|| ProviderRecord::new(provider_id));
            let mut allocations = rows.provider_allocations(provider_id)?;

            let mut moved = 0;
            let gains_pcpu = inventories.contains_key(&ResourceClass::Pcpu)
                && !record.inventories.contains_key(&ResourceClass::Pcpu);
            if gains_pcpu {
                for allocation in allocations.iter_mut() {
                    if allocation.held_cores().is_empty() {
                        continue;
                    }
                    let Some(amount) = allocation.resources.remove(&ResourceClass::Vcpu) else {
                        continue;
                    };
                    *allocation.resources.entry(ResourceClass::Pcpu).or_insert(0) += amount;
                    rows.put_allocation(allocation)?;
                    moved += 1;
                }
            }

            check_inventory_fits(&record, &allocations, &inventories)?;
            record.inventories = inventories;
            Ok((rows.bump(record)?, moved))
        })?;

        if moved > 0 {
            info!(provider = %provider_id, allocations = moved, generation, "pinned VCPU usage moved to PCPU");
        }
        info!(provider = %provider_id, generation, "inventory reported");
        let reshaped = (moved > 0).then_some(ReshapeOutcome::Reshaped {
            allocations_moved: moved,
        });
        Ok((generation, reshaped))
    }
}

fn reshape_rows(
    rows: &mut Rows<'_>,
    provider_id: &str,
    from: &ResourceClass,
    to: &ResourceClass,
    expected: Option<u64>,
) -> LedgerResult<ReshapeOutcome> {
    let mut record = rows.provider(provider_id)?;
    check_generation(&record, expected)?;

    let allocations = rows.provider_allocations(provider_id)?;
    let pending: Vec<Allocation> = allocations
        .iter()
        .filter(|a| a.resources.contains_key(from))
        .cloned()
        .collect();

    let from_inventory = record.inventories.get(from).cloned();
    let to_inventory = match (from_inventory, record.inventories.get(to).cloned()) {
        (None, Some(_)) if pending.is_empty() => return Ok(ReshapeOutcome::AlreadyReshaped),
        // Resuming: the target inventory already reported wins.
        (_, Some(existing)) => existing,
        (Some(old), None) => old,
        (None, None) => {
            return Err(LedgerError::ReshapeFailure {
                provider: provider_id.to_string(),
                reason: format!("provider reports neither {from} nor {to}"),
            });
        }
    };

    let usages: Resources = sum_usages(&record.inventories, &allocations);
    let after = usages.get(to).copied().unwrap_or(0) + usages.get(from).copied().unwrap_or(0);
    if after > to_inventory.capacity() {
        return Err(LedgerError::ReshapeFailure {
            provider: provider_id.to_string(),
            reason: format!(
                "{to} capacity {} cannot hold {after} after folding in {from}",
                to_inventory.capacity()
            ),
        });
    }

    for mut allocation in pending.iter().cloned() {
        let amount = allocation.resources.remove(from).unwrap_or(0);
        *allocation.resources.entry(to.clone()).or_insert(0) += amount;
        rows.put_allocation(&allocation)?;
    }
    record.inventories.remove(from);
    record.inventories.insert(to.clone(), to_inventory);
    let generation = rows.bump(record)?;

    info!(
        provider = %provider_id,
        from = %from,
        to = %to,
        allocations = pending.len(),
        generation,
        "provider reshaped"
    );
    Ok(ReshapeOutcome::Reshaped {
        allocations_moved: pending.len(),
    })
}

/// Drives [`ResourceLedger::reshape_at`] with bounded retries on
/// generation conflicts.
#[derive(Clone)]
pub struct ReshapeCoordinator {
    ledger: ResourceLedger,
    max_retries: u32,
}

impl ReshapeCoordinator {
    pub fn new(ledger: ResourceLedger) -> Self {
        Self {
            ledger,
            max_retries: 3,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn reshape(
        &self,
        provider_id: &str,
        from: &ResourceClass,
        to: &ResourceClass,
    ) -> LedgerResult<ReshapeOutcome> {
        let mut attempt = 0;
        loop {
            let generation = self.ledger.snapshot(provider_id)?.generation;
            match self.ledger.reshape_at(provider_id, from, to, Some(generation)) {
                Err(LedgerError::Conflict { actual, .. }) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(provider = %provider_id, attempt, actual, "reshape lost a generation race, retrying");
                }
                result => return result,
            }
        }
    }
}
