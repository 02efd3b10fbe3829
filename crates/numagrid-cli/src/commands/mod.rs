pub mod host;
pub mod ledger;
pub mod schedule;

use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;

use numagrid_core::NumagridConfig;

/// Read numagrid.toml, or fall back to defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<NumagridConfig> {
    match path {
        Some(path) => NumagridConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => {
            let config = NumagridConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.scheduler.max_conflict_retries, 3);
    }

    #[test]
    fn load_config_rejects_overlapping_sets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numagrid.toml");
        std::fs::write(
            &path,
            "[compute]\ncpu_dedicated_set = \"0-3\"\ncpu_shared_set = \"3-7\"\n",
        )
        .unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn read_json_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_json::<serde_json::Value>(&path).unwrap_err();
        assert!(err.to_string().contains("host.json"));
    }
}
