//! ResourceLedger: redb-backed inventory and allocation accounting.
//!
//! Every mutation runs inside one redb write transaction: the checks and the
//! writes see the same data, and a failed check aborts the transaction so
//! nothing partial is ever visible. redb serializes write transactions, so
//! concurrent claims against one provider are ordered at the write step.
//! Each provider carries a generation that every committed write bumps;
//! `claim_at` and friends fail with `Conflict` when the caller's snapshot
//! generation is stale.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use numagrid_core::{Inventory, ResourceClass, Resources};
use redb::{Database, ReadableDatabase, ReadableTable, Table, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{LedgerError, LedgerResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `LedgerError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| LedgerError::$variant(e.to_string())
    };
}

/// The ledger operations the scheduler depends on.
///
/// Held as `Arc<dyn AllocationLedger>` so tests can observe or script the
/// ledger through a constructor-supplied double.
pub trait AllocationLedger: Send + Sync {
    fn snapshot(&self, provider_id: &str) -> LedgerResult<ProviderSnapshot>;

    /// Commit `allocation` if the provider is still at `generation`.
    /// Returns the provider's new generation.
    fn claim_at(&self, allocation: &Allocation, generation: u64) -> LedgerResult<u64>;

    /// Add the destination row of a migration (consumer = migration id) and
    /// take the workload's transition lock.
    fn move_at(
        &self,
        workload_id: &str,
        source_provider: &str,
        allocation: &Allocation,
        generation: u64,
    ) -> LedgerResult<u64>;

    fn allocations_for_consumer(&self, consumer_id: &str) -> LedgerResult<Vec<Allocation>>;

    fn project_usages(&self, project_id: &str) -> LedgerResult<Resources>;
}

/// Thread-safe resource ledger backed by redb.
#[derive(Clone)]
pub struct ResourceLedger {
    db: Arc<Database>,
}

impl ResourceLedger {
    /// Open (or create) a persistent ledger at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let ledger = Self { db: Arc::new(db) };
        ledger.ensure_tables()?;
        debug!(?path, "ledger opened");
        Ok(ledger)
    }

    /// Create an ephemeral in-memory ledger (for testing).
    pub fn open_in_memory() -> LedgerResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let ledger = Self { db: Arc::new(db) };
        ledger.ensure_tables()?;
        debug!("in-memory ledger opened");
        Ok(ledger)
    }

    fn ensure_tables(&self) -> LedgerResult<()> {
        self.write(|_| Ok(()))
    }

    /// Run `f` against the ledger tables in one write transaction and
    /// commit only if it succeeds.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&mut Rows<'_>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let out = {
            let mut rows = Rows::open(&txn)?;
            f(&mut rows)?
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(out)
    }

    // ── Providers ──────────────────────────────────────────────────

    /// Register a provider with no inventory, or return the existing one.
    pub fn ensure_provider(&self, provider_id: &str) -> LedgerResult<ProviderRecord> {
        validate_id("provider", provider_id)?;
        self.write(|rows| match rows.get_provider(provider_id)? {
            Some(record) => Ok(record),
            None => {
                let record = ProviderRecord::new(provider_id);
                rows.put_provider(&record)?;
                info!(provider = %provider_id, "provider registered");
                Ok(record)
            }
        })
    }

    pub fn provider(&self, provider_id: &str) -> LedgerResult<Option<ProviderRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
        get_row(&table, provider_id)
    }

    pub fn providers(&self) -> LedgerResult<Vec<ProviderRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
        scan_prefix(&table, "")
    }

    /// Replace a provider's inventories, creating the provider if needed.
    ///
    /// Fails with `InventoryInUse` if a class with allocations would be
    /// removed or shrunk below its current usage. Returns the new generation.
    pub fn set_inventories(
        &self,
        provider_id: &str,
        inventories: BTreeMap<ResourceClass, Inventory>,
        expected_generation: Option<u64>,
    ) -> LedgerResult<u64> {
        validate_id("provider", provider_id)?;
        let generation = self.write(|rows| {
            let mut record = rows
                .get_provider(provider_id)?
                .unwrap_or_else(|| ProviderRecord::new(provider_id));
            check_generation(&record, expected_generation)?;

            let allocations = rows.provider_allocations(provider_id)?;
            check_inventory_fits(&record, &allocations, &inventories)?;
            record.inventories = inventories;
            rows.bump(record)
        })?;
        info!(provider = %provider_id, generation, "inventory updated");
        Ok(generation)
    }

    pub fn inventories(&self, provider_id: &str) -> LedgerResult<BTreeMap<ResourceClass, Inventory>> {
        self.provider(provider_id)?
            .map(|record| record.inventories)
            .ok_or_else(|| LedgerError::ProviderNotFound(provider_id.to_string()))
    }

    pub fn usages(&self, provider_id: &str) -> LedgerResult<Resources> {
        Ok(self.snapshot(provider_id)?.usages)
    }

    /// Generation, inventories and usage of one provider, read in one
    /// transaction.
    pub fn snapshot(&self, provider_id: &str) -> LedgerResult<ProviderSnapshot> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let providers = txn.open_table(PROVIDERS).map_err(map_err!(Table))?;
        let allocations = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let record: ProviderRecord = get_row(&providers, provider_id)?
            .ok_or_else(|| LedgerError::ProviderNotFound(provider_id.to_string()))?;
        let rows: Vec<Allocation> = scan_prefix(&allocations, &provider_prefix(provider_id))?;
        Ok(ProviderSnapshot::build(record, &rows))
    }

    // ── Allocations ────────────────────────────────────────────────

    pub fn allocations_for_provider(&self, provider_id: &str) -> LedgerResult<Vec<Allocation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        scan_prefix(&table, &provider_prefix(provider_id))
    }

    pub fn allocations_for_consumer(&self, consumer_id: &str) -> LedgerResult<Vec<Allocation>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let consumers = txn.open_table(CONSUMERS).map_err(map_err!(Table))?;
        let allocations = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let keys: Vec<String> = scan_prefix(&consumers, &format!("{consumer_id}/"))?;
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(allocation) = get_row(&allocations, &key)? {
                results.push(allocation);
            }
        }
        Ok(results)
    }

    /// Sum of every allocation held by the project's consumers.
    pub fn project_usages(&self, project_id: &str) -> LedgerResult<Resources> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?;
        let all: Vec<Allocation> = scan_prefix(&table, "")?;
        let mut usages = Resources::new();
        for allocation in all.iter().filter(|a| a.project_id == project_id) {
            for (class, amount) in &allocation.resources {
                *usages.entry(class.clone()).or_insert(0) += amount;
            }
        }
        Ok(usages)
    }

    /// Commit an allocation against the provider's current state.
    pub fn claim(&self, allocation: &Allocation) -> LedgerResult<u64> {
        self.commit_claim(allocation, None)
    }

    /// Commit an allocation only if the provider is still at `generation`.
    pub fn claim_at(&self, allocation: &Allocation, generation: u64) -> LedgerResult<u64> {
        self.commit_claim(allocation, Some(generation))
    }

    fn commit_claim(&self, allocation: &Allocation, expected: Option<u64>) -> LedgerResult<u64> {
        let generation = self.write(|rows| rows.commit(allocation, expected))?;
        info!(
            provider = %allocation.provider_id,
            consumer = %allocation.consumer_id,
            generation,
            "claim committed"
        );
        Ok(generation)
    }

    /// Start a migration: add `allocation` (keyed by its migration id) on the
    /// destination and lock the workload until `confirm` or `revert`.
    pub fn move_allocation(
        &self,
        workload_id: &str,
        source_provider: &str,
        allocation: &Allocation,
    ) -> LedgerResult<u64> {
        self.commit_move(workload_id, source_provider, allocation, None)
    }

    pub fn move_at(
        &self,
        workload_id: &str,
        source_provider: &str,
        allocation: &Allocation,
        generation: u64,
    ) -> LedgerResult<u64> {
        self.commit_move(workload_id, source_provider, allocation, Some(generation))
    }

    fn commit_move(
        &self,
        workload_id: &str,
        source_provider: &str,
        allocation: &Allocation,
        expected: Option<u64>,
    ) -> LedgerResult<u64> {
        validate_id("workload", workload_id)?;
        let generation = self.write(|rows| {
            if let Some(lock) = rows.lock_for(workload_id)? {
                return Err(LedgerError::TransitionInProgress(lock.workload_id));
            }
            if allocation.consumer_id == workload_id {
                return Err(LedgerError::InvalidClaim(
                    "the destination row needs its own migration id".to_string(),
                ));
            }
            if allocation.provider_id == source_provider {
                return Err(LedgerError::InvalidClaim(format!(
                    "workload {workload_id} cannot migrate onto its source provider"
                )));
            }
            if rows.allocation(source_provider, workload_id)?.is_none() {
                return Err(LedgerError::AllocationNotFound {
                    consumer: workload_id.to_string(),
                    provider: source_provider.to_string(),
                });
            }
            if rows.allocation(&allocation.provider_id, workload_id)?.is_some() {
                return Err(LedgerError::ConsumerExists {
                    consumer: workload_id.to_string(),
                    provider: allocation.provider_id.clone(),
                });
            }
            let generation = rows.commit(allocation, expected)?;
            rows.put_transition(&MigrationRecord {
                workload_id: workload_id.to_string(),
                migration_id: allocation.consumer_id.clone(),
                source_provider: source_provider.to_string(),
                dest_provider: allocation.provider_id.clone(),
            })?;
            Ok(generation)
        })?;
        info!(
            workload = %workload_id,
            source = %source_provider,
            dest = %allocation.provider_id,
            generation,
            "migration allocation committed"
        );
        Ok(generation)
    }

    /// The migration currently locking `workload_id`, if any.
    pub fn migration(&self, workload_id: &str) -> LedgerResult<Option<MigrationRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TRANSITIONS).map_err(map_err!(Table))?;
        get_row(&table, workload_id)
    }

    /// Finish a migration on the destination: drop the source row and keep
    /// the destination row as the workload's own allocation.
    pub fn confirm(&self, workload_id: &str) -> LedgerResult<()> {
        let record = self.write(|rows| {
            let record = rows
                .transition(workload_id)?
                .ok_or_else(|| LedgerError::NoMigration(workload_id.to_string()))?;
            let mut kept = rows
                .allocation(&record.dest_provider, &record.migration_id)?
                .ok_or_else(|| LedgerError::AllocationNotFound {
                    consumer: record.migration_id.clone(),
                    provider: record.dest_provider.clone(),
                })?;
            rows.remove_allocation(&record.source_provider, workload_id)?;
            rows.remove_allocation(&record.dest_provider, &record.migration_id)?;
            kept.consumer_id = workload_id.to_string();
            rows.put_allocation(&kept)?;
            rows.remove_transition(workload_id)?;
            rows.bump_if_present(&record.source_provider)?;
            rows.bump_if_present(&record.dest_provider)?;
            Ok(record)
        })?;
        info!(workload = %workload_id, provider = %record.dest_provider, "migration confirmed");
        Ok(())
    }

    /// Abandon a migration: drop the destination row, keep the source row.
    pub fn revert(&self, workload_id: &str) -> LedgerResult<()> {
        let record = self.write(|rows| {
            let record = rows
                .transition(workload_id)?
                .ok_or_else(|| LedgerError::NoMigration(workload_id.to_string()))?;
            rows.remove_allocation(&record.dest_provider, &record.migration_id)?;
            rows.remove_transition(workload_id)?;
            rows.bump_if_present(&record.dest_provider)?;
            Ok(record)
        })?;
        info!(workload = %workload_id, provider = %record.source_provider, "migration reverted");
        Ok(())
    }

    /// Remove a consumer's allocation on one provider. Returns true if it
    /// existed; deleting a missing row is not an error.
    pub fn delete(&self, consumer_id: &str, provider_id: &str) -> LedgerResult<bool> {
        let existed = self.write(|rows| {
            if let Some(lock) = rows.lock_for(consumer_id)? {
                return Err(LedgerError::TransitionInProgress(lock.workload_id));
            }
            let existed = rows.remove_allocation(provider_id, consumer_id)?;
            if existed {
                rows.bump_if_present(provider_id)?;
            }
            Ok(existed)
        })?;
        debug!(consumer = %consumer_id, provider = %provider_id, existed, "allocation deleted");
        Ok(existed)
    }

    /// Remove every allocation of a consumer. Returns how many rows went away.
    pub fn delete_consumer(&self, consumer_id: &str) -> LedgerResult<usize> {
        let removed = self.write(|rows| {
            if let Some(lock) = rows.lock_for(consumer_id)? {
                return Err(LedgerError::TransitionInProgress(lock.workload_id));
            }
            let held = rows.consumer_allocations(consumer_id)?;
            for allocation in &held {
                rows.remove_allocation(&allocation.provider_id, consumer_id)?;
                rows.bump_if_present(&allocation.provider_id)?;
            }
            Ok(held.len())
        })?;
        debug!(consumer = %consumer_id, removed, "consumer allocations deleted");
        Ok(removed)
    }
}

impl AllocationLedger for ResourceLedger {
    fn snapshot(&self, provider_id: &str) -> LedgerResult<ProviderSnapshot> {
        ResourceLedger::snapshot(self, provider_id)
    }

    fn claim_at(&self, allocation: &Allocation, generation: u64) -> LedgerResult<u64> {
        ResourceLedger::claim_at(self, allocation, generation)
    }

    fn move_at(
        &self,
        workload_id: &str,
        source_provider: &str,
        allocation: &Allocation,
        generation: u64,
    ) -> LedgerResult<u64> {
        ResourceLedger::move_at(self, workload_id, source_provider, allocation, generation)
    }

    fn allocations_for_consumer(&self, consumer_id: &str) -> LedgerResult<Vec<Allocation>> {
        ResourceLedger::allocations_for_consumer(self, consumer_id)
    }

    fn project_usages(&self, project_id: &str) -> LedgerResult<Resources> {
        ResourceLedger::project_usages(self, project_id)
    }
}

// ── Write-transaction rows ─────────────────────────────────────────

type RowTable<'t> = Table<'t, &'static str, &'static [u8]>;

/// The ledger tables opened inside one write transaction.
pub(crate) struct Rows<'t> {
    providers: RowTable<'t>,
    allocations: RowTable<'t>,
    consumers: RowTable<'t>,
    transitions: RowTable<'t>,
}

impl<'t> Rows<'t> {
    fn open(txn: &'t WriteTransaction) -> LedgerResult<Self> {
        Ok(Self {
            providers: txn.open_table(PROVIDERS).map_err(map_err!(Table))?,
            allocations: txn.open_table(ALLOCATIONS).map_err(map_err!(Table))?,
            consumers: txn.open_table(CONSUMERS).map_err(map_err!(Table))?,
            transitions: txn.open_table(TRANSITIONS).map_err(map_err!(Table))?,
        })
    }

    pub(crate) fn get_provider(&self, provider_id: &str) -> LedgerResult<Option<ProviderRecord>> {
        get_row(&self.providers, provider_id)
    }

    pub(crate) fn provider(&self, provider_id: &str) -> LedgerResult<ProviderRecord> {
        self.get_provider(provider_id)?
            .ok_or_else(|| LedgerError::ProviderNotFound(provider_id.to_string()))
    }

    fn put_provider(&mut self, record: &ProviderRecord) -> LedgerResult<()> {
        put_row(&mut self.providers, &record.id, record)
    }

    /// Store `record` with its generation advanced by one.
    pub(crate) fn bump(&mut self, mut record: ProviderRecord) -> LedgerResult<u64> {
        record.generation += 1;
        self.put_provider(&record)?;
        Ok(record.generation)
    }

    fn bump_if_present(&mut self, provider_id: &str) -> LedgerResult<()> {
        if let Some(record) = self.get_provider(provider_id)? {
            self.bump(record)?;
        }
        Ok(())
    }

    pub(crate) fn provider_allocations(&self, provider_id: &str) -> LedgerResult<Vec<Allocation>> {
        scan_prefix(&self.allocations, &provider_prefix(provider_id))
    }

    fn consumer_allocations(&self, consumer_id: &str) -> LedgerResult<Vec<Allocation>> {
        let keys: Vec<String> = scan_prefix(&self.consumers, &format!("{consumer_id}/"))?;
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(allocation) = get_row(&self.allocations, &key)? {
                results.push(allocation);
            }
        }
        Ok(results)
    }

    fn allocation(&self, provider_id: &str, consumer_id: &str) -> LedgerResult<Option<Allocation>> {
        get_row(&self.allocations, &allocation_key(provider_id, consumer_id))
    }

    pub(crate) fn put_allocation(&mut self, allocation: &Allocation) -> LedgerResult<()> {
        let key = allocation.table_key();
        put_row(&mut self.allocations, &key, allocation)?;
        put_row(&mut self.consumers, &allocation.index_key(), &key)
    }

    fn remove_allocation(&mut self, provider_id: &str, consumer_id: &str) -> LedgerResult<bool> {
        let existed = remove_row(&mut self.allocations, &allocation_key(provider_id, consumer_id))?;
        remove_row(&mut self.consumers, &consumer_key(consumer_id, provider_id))?;
        Ok(existed)
    }

    fn transition(&self, workload_id: &str) -> LedgerResult<Option<MigrationRecord>> {
        get_row(&self.transitions, workload_id)
    }

    /// The migration holding `consumer_id`, as workload or as migration id.
    fn lock_for(&self, consumer_id: &str) -> LedgerResult<Option<MigrationRecord>> {
        if let Some(record) = self.transition(consumer_id)? {
            return Ok(Some(record));
        }
        let all: Vec<MigrationRecord> = scan_prefix(&self.transitions, "")?;
        Ok(all.into_iter().find(|record| record.holds(consumer_id)))
    }

    fn put_transition(&mut self, record: &MigrationRecord) -> LedgerResult<()> {
        put_row(&mut self.transitions, &record.workload_id, record)
    }

    fn remove_transition(&mut self, workload_id: &str) -> LedgerResult<bool> {
        remove_row(&mut self.transitions, workload_id)
    }

    /// Check and write one allocation row, bumping the provider generation.
    ///
    /// Checks run in a fixed order so the outcome does not depend on which
    /// writer commits first: capacity and core races are reported as such
    /// even when the caller's generation is also stale.
    fn commit(&mut self, allocation: &Allocation, expected: Option<u64>) -> LedgerResult<u64> {
        validate_claim(allocation)?;
        let provider_id = &allocation.provider_id;
        let record = self.provider(provider_id)?;

        if let Some(lock) = self.lock_for(&allocation.consumer_id)? {
            return Err(LedgerError::TransitionInProgress(lock.workload_id));
        }
        if self.allocation(provider_id, &allocation.consumer_id)?.is_some() {
            return Err(LedgerError::ConsumerExists {
                consumer: allocation.consumer_id.clone(),
                provider: provider_id.clone(),
            });
        }

        let existing = self.provider_allocations(provider_id)?;
        let usages = sum_usages(&record.inventories, &existing);
        for (class, &amount) in &allocation.resources {
            let inventory =
                record
                    .inventories
                    .get(class)
                    .ok_or_else(|| LedgerError::ClassNotFound {
                        provider: provider_id.clone(),
                        class: class.clone(),
                    })?;
            inventory
                .check_unit(amount)
                .map_err(|reason| LedgerError::InvalidAmount {
                    provider: provider_id.clone(),
                    class: class.clone(),
                    reason,
                })?;
            let used = usages.get(class).copied().unwrap_or(0);
            let capacity = inventory.capacity();
            if used.checked_add(amount).is_none_or(|after| after > capacity) {
                return Err(LedgerError::CapacityExceeded {
                    provider: provider_id.clone(),
                    class: class.clone(),
                    requested: amount,
                    used,
                    capacity,
                });
            }
        }

        let held: BTreeSet<u32> = existing.iter().flat_map(Allocation::held_cores).collect();
        let clash: BTreeSet<u32> = allocation
            .held_cores()
            .intersection(&held)
            .copied()
            .collect();
        if !clash.is_empty() {
            return Err(LedgerError::CoreConflict {
                provider: provider_id.clone(),
                cores: clash,
            });
        }

        check_generation(&record, expected)?;
        self.put_allocation(allocation)?;
        self.bump(record)
    }
}

pub(crate) fn check_generation(record: &ProviderRecord, expected: Option<u64>) -> LedgerResult<()> {
    match expected {
        Some(expected) if expected != record.generation => Err(LedgerError::Conflict {
            provider: record.id.clone(),
            expected,
            actual: record.generation,
        }),
        _ => Ok(()),
    }
}

/// Fail with `InventoryInUse` if `inventories` cannot hold what the
/// provider's allocations already use.
pub(crate) fn check_inventory_fits(
    record: &ProviderRecord,
    allocations: &[Allocation],
    inventories: &BTreeMap<ResourceClass, Inventory>,
) -> LedgerResult<()> {
    for (class, used) in sum_usages(&record.inventories, allocations) {
        if used == 0 {
            continue;
        }
        let fits = inventories
            .get(&class)
            .is_some_and(|inv| inv.capacity() >= used);
        if !fits {
            return Err(LedgerError::InventoryInUse {
                provider: record.id.clone(),
                class,
                used,
            });
        }
    }
    Ok(())
}

pub(crate) fn validate_id(what: &str, id: &str) -> LedgerResult<()> {
    if id.is_empty() || id.contains('/') {
        return Err(LedgerError::InvalidClaim(format!(
            "{what} id {id:?} must be non-empty and must not contain '/'"
        )));
    }
    Ok(())
}

fn validate_claim(allocation: &Allocation) -> LedgerResult<()> {
    validate_id("consumer", &allocation.consumer_id)?;
    validate_id("provider", &allocation.provider_id)?;
    if allocation.resources.is_empty() {
        return Err(LedgerError::InvalidClaim(format!(
            "claim for {} requests no resources",
            allocation.consumer_id
        )));
    }
    if !allocation.cores.is_disjoint(&allocation.reserved_cores) {
        return Err(LedgerError::InvalidClaim(
            "a core cannot be both pinned and reserved".to_string(),
        ));
    }
    Ok(())
}

fn provider_prefix(provider_id: &str) -> String {
    format!("{provider_id}/")
}

// ── Row codec ──────────────────────────────────────────────────────

fn get_row<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> LedgerResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn scan_prefix<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    prefix: &str,
) -> LedgerResult<Vec<T>> {
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        if key.value().starts_with(prefix) {
            let row = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(row);
        }
    }
    Ok(results)
}

fn put_row<T: Serialize>(table: &mut RowTable<'_>, key: &str, value: &T) -> LedgerResult<()> {
    let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
    table
        .insert(key, bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

fn remove_row(table: &mut RowTable<'_>, key: &str) -> LedgerResult<bool> {
    let existed = table.remove(key).map_err(map_err!(Write))?.is_some();
    Ok(existed)
}
