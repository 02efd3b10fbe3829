//! `numagrid schedule` / `numagrid migrate`: one placement attempt against
//! a ledger database.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use numagrid_core::config::UsageSourceKind;
use numagrid_core::{NumagridConfig, Resources};
use numagrid_scheduler::{
    Candidate, HostInfo, PlacementRequest, ScheduleOutcome, Scheduler, UsageCounter,
    WorkloadRecords,
};
use numagrid_state::ResourceLedger;

use super::host::describe;
use super::read_json;

/// One entry of the ranked hosts file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    pub provider_id: String,
    #[serde(flatten)]
    pub host: HostInfo,
}

/// Live workload totals per project, read from a JSON file.
struct WorkloadFile(BTreeMap<String, Resources>);

impl WorkloadRecords for WorkloadFile {
    fn project_resources(&self, project_id: &str) -> anyhow::Result<Resources> {
        Ok(self.0.get(project_id).cloned().unwrap_or_default())
    }
}

pub struct MigrationArgs<'a> {
    pub source: &'a str,
    pub migration_id: &'a str,
}

fn usage_counter(
    config: &NumagridConfig,
    ledger: &ResourceLedger,
    workloads: Option<&Path>,
) -> anyhow::Result<UsageCounter> {
    match config.quota.usage_source {
        UsageSourceKind::Ledger => Ok(UsageCounter::Ledger(Arc::new(ledger.clone()))),
        UsageSourceKind::Workloads => {
            let path = workloads.context("quota usage_source = \"workloads\" needs --workloads")?;
            let records: BTreeMap<String, Resources> = read_json(path)?;
            Ok(UsageCounter::Workloads(Arc::new(WorkloadFile(records))))
        }
    }
}

fn candidates(config: &NumagridConfig, hosts: &Path) -> anyhow::Result<Vec<Candidate>> {
    let entries: Vec<HostEntry> = read_json(hosts)?;
    entries
        .into_iter()
        .map(|entry| {
            Ok(Candidate {
                topology: describe(config, &entry.host)?.topology,
                provider_id: entry.provider_id,
            })
        })
        .collect()
}

fn prepare(
    config: &NumagridConfig,
    db: &Path,
    request: &Path,
    hosts: &Path,
    workloads: Option<&Path>,
) -> anyhow::Result<(Scheduler, PlacementRequest, Vec<Candidate>)> {
    let request: PlacementRequest = read_json(request)?;
    let candidates = candidates(config, hosts)?;
    let ledger = ResourceLedger::open(db)?;
    let counter = usage_counter(config, &ledger, workloads)?;
    let scheduler = Scheduler::from_config(config, Arc::new(ledger), counter);
    Ok((scheduler, request, candidates))
}

pub async fn schedule(
    config: &NumagridConfig,
    db: &Path,
    request: &Path,
    hosts: &Path,
    workloads: Option<&Path>,
) -> anyhow::Result<ScheduleOutcome> {
    let (scheduler, request, candidates) = prepare(config, db, request, hosts, workloads)?;
    Ok(scheduler.schedule(&request, &candidates).await?)
}

pub async fn migrate(
    config: &NumagridConfig,
    db: &Path,
    request: &Path,
    hosts: &Path,
    workloads: Option<&Path>,
    target: MigrationArgs<'_>,
) -> anyhow::Result<ScheduleOutcome> {
    let (scheduler, request, candidates) = prepare(config, db, request, hosts, workloads)?;
    Ok(scheduler
        .migrate(&request, target.migration_id, target.source, &candidates)
        .await?)
}
