//! redb table definitions for the resource ledger.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).
//! Provider and consumer ids never contain `/`, so composite keys can be
//! scanned by prefix.

use redb::TableDefinition;

/// Provider records (generation + inventories) keyed by `{provider_id}`.
pub const PROVIDERS: TableDefinition<&str, &[u8]> = TableDefinition::new("providers");

/// Allocation rows keyed by `{provider_id}/{consumer_id}`.
pub const ALLOCATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("allocations");

/// Reverse index keyed by `{consumer_id}/{provider_id}`; the value is the
/// allocation key.
pub const CONSUMERS: TableDefinition<&str, &[u8]> = TableDefinition::new("consumers");

/// Migration transition locks keyed by `{workload_id}`.
pub const TRANSITIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transitions");

/// Key of the allocation row for `consumer` on `provider`.
pub fn allocation_key(provider_id: &str, consumer_id: &str) -> String {
    format!("{provider_id}/{consumer_id}")
}

/// Key of the reverse index entry for `consumer` on `provider`.
pub fn consumer_key(consumer_id: &str, provider_id: &str) -> String {
    format!("{consumer_id}/{provider_id}")
}
