// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration file discovery and environment overrides.
//!
//! Search order:
//! 1. `--config` flag (must exist and parse)
//! 2. `HIVE_CONFIG_PATH`
//! 3. `./hive-config.yaml`
//! 4. `~/.hive/config.yaml`
//! 5. `/etc/hive/config.yaml`
//!
//! With nothing found the built-in defaults are used.

use anyhow::{Context, Result};
use std::fmt;
use std::path::PathBuf;

use hive_core::domain::node_config::NodeConfigManifest;

pub const CONFIG_PATH_ENV: &str = "HIVE_CONFIG_PATH";
pub const NODE_ID_ENV: &str = "HIVE_NODE_ID";
pub const LOG_LEVEL_ENV: &str = "HIVE_LOG_LEVEL";

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Flag(PathBuf),
    Discovered(PathBuf),
    Defaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(path) => write!(f, "{} (--config)", path.display()),
            Self::Discovered(path) => write!(f, "{}", path.display()),
            Self::Defaults => f.write_str("built-in defaults"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub manifest: NodeConfigManifest,
    pub source: ConfigSource,
    /// Environment overrides that were applied, as `NAME=value`
    pub overrides: Vec<String>,
}

/// Candidate paths in discovery order, excluding the `--config` flag.
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        paths.push(PathBuf::from(path));
    }
    paths.push(PathBuf::from("./hive-config.yaml"));
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".hive").join("config.yaml"));
    }
    #[cfg(unix)]
    paths.push(PathBuf::from("/etc/hive/config.yaml"));
    #[cfg(windows)]
    paths.push(PathBuf::from("C:\\ProgramData\\Hive\\config.yaml"));
    paths
}

pub fn discover_config() -> Option<PathBuf> {
    candidate_paths().into_iter().find(|path| path.exists())
}

/// Load the manifest (explicit path, discovery, then defaults) and apply env overrides.
pub fn load(cli_path: Option<PathBuf>) -> Result<LoadedConfig> {
    let (mut manifest, source) = match cli_path {
        Some(path) => {
            let manifest = NodeConfigManifest::from_yaml_file(&path)
                .with_context(|| format!("Failed to load config at {:?}", path))?;
            (manifest, ConfigSource::Flag(path))
        }
        None => match discover_config() {
            Some(path) => {
                let manifest = NodeConfigManifest::from_yaml_file(&path)
                    .with_context(|| format!("Failed to load discovered config at {:?}", path))?;
                (manifest, ConfigSource::Discovered(path))
            }
            None => (NodeConfigManifest::default(), ConfigSource::Defaults),
        },
    };

    let overrides = apply_overrides(&mut manifest, |name| std::env::var(name).ok());
    Ok(LoadedConfig {
        manifest,
        source,
        overrides,
    })
}

/// Apply `HIVE_NODE_ID` and `HIVE_LOG_LEVEL` from `lookup`. Blank values are ignored.
pub fn apply_overrides<F>(manifest: &mut NodeConfigManifest, lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut applied = Vec::new();
    let value = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(node_id) = value(NODE_ID_ENV) {
        applied.push(format!("{}={}", NODE_ID_ENV, node_id));
        manifest.spec.node.id = node_id;
    }
    if let Some(level) = value(LOG_LEVEL_ENV) {
        applied.push(format!("{}={}", LOG_LEVEL_ENV, level));
        manifest.spec.observability.log_level = level;
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_explicit_path_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "apiVersion: 100monkeys.ai/v1\nkind: SwarmNodeConfig\nmetadata:\n  name: edge\nspec:\n  node:\n    id: edge-coordinator\n"
        )
        .unwrap();

        let loaded = load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(loaded.manifest.metadata.name, "edge");
        assert!(matches!(loaded.source, ConfigSource::Flag(_)));
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(dir.path().join("absent.yaml"))).is_err());
    }

    #[test]
    fn test_overrides_apply_and_skip_blanks() {
        let env: HashMap<&str, &str> = [(NODE_ID_ENV, "node-7"), (LOG_LEVEL_ENV, "  ")].into_iter().collect();
        let mut manifest = NodeConfigManifest::default();

        let applied = apply_overrides(&mut manifest, |name| env.get(name).map(|v| v.to_string()));

        assert_eq!(manifest.spec.node.id, "node-7");
        assert_eq!(manifest.spec.observability.log_level, "info");
        assert_eq!(applied, vec!["HIVE_NODE_ID=node-7".to_string()]);
    }

    #[test]
    fn test_bundled_template_is_valid() {
        let manifest =
            NodeConfigManifest::from_yaml_str(include_str!("../templates/hive-config.yaml")).unwrap();
        manifest.validate().unwrap();
        assert_eq!(manifest.spec.node.id, "hive-coordinator");
    }
}
