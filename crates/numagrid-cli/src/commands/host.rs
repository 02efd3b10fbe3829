//! `numagrid inventory` / `numagrid report`: capability reporting by hand.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use numagrid_core::{EffectivePinning, HostNumaTopology, Inventory, NumagridConfig, ResourceClass};
use numagrid_scheduler::{CapabilityReporter, HostInfo, ReportOutcome, build_topology, host_inventory};
use numagrid_state::ResourceLedger;

use super::read_json;

/// What a host reports under the configured pinning layout.
#[derive(Debug, Serialize, Deserialize)]
pub struct HostReport {
    pub pinning: String,
    pub topology: HostNumaTopology,
    pub inventories: BTreeMap<ResourceClass, Inventory>,
}

pub fn describe(config: &NumagridConfig, info: &HostInfo) -> anyhow::Result<HostReport> {
    let pinning = EffectivePinning::resolve(&config.compute)?;
    let topology = build_topology(info, &pinning, config.compute.cpu_allocation_ratio);
    let inventories = host_inventory(info, &topology, &pinning, &config.compute);
    Ok(HostReport {
        pinning: if pinning.is_legacy() { "legacy" } else { "split" }.to_string(),
        topology,
        inventories,
    })
}

pub fn inventory(config: &NumagridConfig, host: &Path) -> anyhow::Result<HostReport> {
    let info: HostInfo = read_json(host)?;
    describe(config, &info)
}

pub fn report(
    config: &NumagridConfig,
    db: &Path,
    provider: &str,
    host: &Path,
) -> anyhow::Result<ReportOutcome> {
    let info: HostInfo = read_json(host)?;
    let described = describe(config, &info)?;
    let ledger = ResourceLedger::open(db)?;
    let outcome = CapabilityReporter::new(ledger).report(provider, described.inventories)?;
    info!(provider = %provider, generation = outcome.generation, "host reported");
    Ok(outcome)
}
