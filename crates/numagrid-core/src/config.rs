//! numagrid.toml configuration parser.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::cpuset::{CpuSetError, parse_cpu_spec};
use crate::types::NetworkAffinity;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid [compute] {option}: {source}")]
    CpuSet {
        option: &'static str,
        #[source]
        source: CpuSetError,
    },

    #[error("conflicting pinning options: {0}")]
    Conflict(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NumagridConfig {
    pub compute: ComputeConfig,
    pub scheduler: SchedulerConfig,
    pub quota: QuotaConfig,
    /// Network id → NUMA nodes the network is reachable from.
    pub networks: BTreeMap<String, NetworkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub cpu_dedicated_set: Option<String>,
    pub cpu_shared_set: Option<String>,
    /// Legacy single pin set, superseded by the two options above.
    pub vcpu_pin_set: Option<String>,
    pub cpu_allocation_ratio: f64,
    pub ram_allocation_ratio: f64,
    pub disk_allocation_ratio: f64,
    pub reserved_host_cpus: u64,
    pub reserved_host_memory_mb: u64,
    pub reserved_host_disk_gb: u64,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            cpu_dedicated_set: None,
            cpu_shared_set: None,
            vcpu_pin_set: None,
            cpu_allocation_ratio: 16.0,
            ram_allocation_ratio: 1.5,
            disk_allocation_ratio: 1.0,
            reserved_host_cpus: 0,
            reserved_host_memory_mb: 512,
            reserved_host_disk_gb: 0,
        }
    }
}

/// Closed set of NUMA fitting strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherKind {
    /// Lowest host cell id first.
    #[default]
    FirstFit,
    /// Host cells with the least remaining capacity first, ties by id.
    BestFit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub matcher: MatcherKind,
    /// Re-read-and-retry attempts against one candidate after a generation
    /// conflict.
    pub max_conflict_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            matcher: MatcherKind::default(),
            max_conflict_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSourceKind {
    /// Sum the ledger's allocations for the project's consumers.
    #[default]
    Ledger,
    /// Sum the project's live workload records.
    Workloads,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub usage_source: UsageSourceKind,
    /// Limits applied to every project, keyed by quota resource
    /// (`cores`, `ram`, or a class name).
    pub defaults: BTreeMap<String, u64>,
    /// Per-project overrides of `defaults`.
    pub projects: BTreeMap<String, BTreeMap<String, u64>>,
}

impl QuotaConfig {
    /// Effective limit for a project; `None` means unlimited.
    pub fn limit(&self, project_id: &str, resource: &str) -> Option<u64> {
        self.projects
            .get(project_id)
            .and_then(|limits| limits.get(resource))
            .or_else(|| self.defaults.get(resource))
            .copied()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub numa_nodes: BTreeSet<u32>,
}

impl NumagridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NumagridConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.compute;
        for (name, ratio) in [
            ("cpu_allocation_ratio", c.cpu_allocation_ratio),
            ("ram_allocation_ratio", c.ram_allocation_ratio),
            ("disk_allocation_ratio", c.disk_allocation_ratio),
        ] {
            if !(ratio.is_finite() && ratio > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must be positive, got {ratio}")));
            }
        }
        EffectivePinning::resolve(c)?;
        Ok(())
    }

    pub fn network_affinity(&self) -> NetworkAffinity {
        self.networks
            .iter()
            .fold(NetworkAffinity::new(), |acc, (id, net)| {
                acc.restrict(id.clone(), net.numa_nodes.iter().copied())
            })
    }
}

// ── Pinning precedence ─────────────────────────────────────────────

/// The one pinning layout in force for the process, resolved at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectivePinning {
    /// Dedicated CPUs are reported as `PCPU`, shared CPUs as `VCPU`.
    Split {
        dedicated: Option<BTreeSet<u32>>,
        shared: Option<BTreeSet<u32>>,
    },
    /// Everything is reported as `VCPU`; pinned guests draw from the same
    /// CPUs as floating ones. `None` selects every host CPU.
    Legacy { pin_set: Option<BTreeSet<u32>> },
}

impl EffectivePinning {
    pub fn resolve(compute: &ComputeConfig) -> Result<Self, ConfigError> {
        let dedicated = parse_option("cpu_dedicated_set", compute.cpu_dedicated_set.as_deref())?;
        let shared = parse_option("cpu_shared_set", compute.cpu_shared_set.as_deref())?;
        let pin_set = parse_option("vcpu_pin_set", compute.vcpu_pin_set.as_deref())?;

        if pin_set.is_some() && dedicated.is_some() {
            return Err(ConfigError::Conflict(
                "vcpu_pin_set cannot be combined with cpu_dedicated_set".to_string(),
            ));
        }
        if let (Some(d), Some(s)) = (&dedicated, &shared) {
            let overlap: Vec<u32> = d.intersection(s).copied().collect();
            if !overlap.is_empty() {
                return Err(ConfigError::Conflict(format!(
                    "cpu_dedicated_set and cpu_shared_set overlap on {overlap:?}"
                )));
            }
        }

        if dedicated.is_some() {
            return Ok(EffectivePinning::Split { dedicated, shared });
        }
        if pin_set.is_some() {
            if shared.is_some() {
                warn!("cpu_shared_set is ignored for guest CPUs while vcpu_pin_set is in use");
            }
            return Ok(EffectivePinning::Legacy { pin_set });
        }
        if shared.is_some() {
            return Ok(EffectivePinning::Split { dedicated: None, shared });
        }
        Ok(EffectivePinning::Legacy { pin_set: None })
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, EffectivePinning::Legacy { .. })
    }
}

fn parse_option(
    option: &'static str,
    value: Option<&str>,
) -> Result<Option<BTreeSet<u32>>, ConfigError> {
    value
        .map(|spec| parse_cpu_spec(spec).map_err(|source| ConfigError::CpuSet { option, source }))
        .transpose()
}
