//! Ledger inspection and maintenance commands.

use std::path::Path;

use serde::Serialize;

use numagrid_core::{ResourceClass, Resources};
use numagrid_state::{
    MigrationRecord, ProviderSnapshot, ReshapeCoordinator, ReshapeOutcome, ResourceLedger,
};

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UsageReport {
    Provider(ProviderSnapshot),
    Project { project_id: String, usages: Resources },
    All(Vec<ProviderSnapshot>),
}

pub fn usages(
    db: &Path,
    provider: Option<&str>,
    project: Option<&str>,
) -> anyhow::Result<UsageReport> {
    let ledger = ResourceLedger::open(db)?;
    if let Some(provider) = provider {
        return Ok(UsageReport::Provider(ledger.snapshot(provider)?));
    }
    if let Some(project) = project {
        return Ok(UsageReport::Project {
            project_id: project.to_string(),
            usages: ledger.project_usages(project)?,
        });
    }
    let snapshots = ledger
        .providers()?
        .iter()
        .map(|record| ledger.snapshot(&record.id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(UsageReport::All(snapshots))
}

pub fn reshape(
    db: &Path,
    provider: &str,
    from: &ResourceClass,
    to: &ResourceClass,
) -> anyhow::Result<ReshapeOutcome> {
    let ledger = ResourceLedger::open(db)?;
    Ok(ReshapeCoordinator::new(ledger).reshape(provider, from, to)?)
}

pub fn confirm(db: &Path, workload: &str) -> anyhow::Result<MigrationRecord> {
    finish(db, workload, ResourceLedger::confirm)
}

pub fn revert(db: &Path, workload: &str) -> anyhow::Result<MigrationRecord> {
    finish(db, workload, ResourceLedger::revert)
}

fn finish(
    db: &Path,
    workload: &str,
    op: fn(&ResourceLedger, &str) -> numagrid_state::LedgerResult<()>,
) -> anyhow::Result<MigrationRecord> {
    let ledger = ResourceLedger::open(db)?;
    let record = ledger
        .migration(workload)?
        .ok_or_else(|| numagrid_state::LedgerError::NoMigration(workload.to_string()))?;
    op(&ledger, workload)?;
    Ok(record)
}
