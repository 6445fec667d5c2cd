//! Tasks declared in a `package.json` manifest
//!
//! `scripts` load into the `npm` namespace as shell commands, and a
//! `taskstack` object holding task definitions loads into `pkg`.

use crate::config::load::{load_tasks, Loaded};
use crate::config::parse::MANIFEST_FILE_NAME;
use crate::config::types::TaskDef;
use crate::error::{ConfigError, ConfigResult};
use crate::runner::Orchestrator;
use indexmap::IndexMap;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const NPM_NAMESPACE: &str = "npm";
pub const PKG_NAMESPACE: &str = "pkg";

#[derive(Debug, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub scripts: IndexMap<String, String>,

    #[serde(default)]
    pub taskstack: IndexMap<String, TaskDef>,
}

/// Read `package.json` from `dir`, `None` when there is none
pub fn read_manifest(dir: &Path) -> ConfigResult<Option<Manifest>> {
    let path = dir.join(MANIFEST_FILE_NAME);
    if !path.is_file() {
        return Ok(None);
    }
    let manifest_err = |error: String| ConfigError::Manifest {
        path: path.clone(),
        error,
    };
    let contents = fs::read_to_string(&path).map_err(|e| manifest_err(e.to_string()))?;
    let manifest = serde_json::from_str(&contents).map_err(|e| manifest_err(e.to_string()))?;
    Ok(Some(manifest))
}

/// Load the manifest in `dir`, skipping `scripts` unless `npm` is set
pub fn load_manifest(orc: &Orchestrator, dir: &Path, npm: bool) -> ConfigResult<Vec<Loaded>> {
    let Some(manifest) = read_manifest(dir)? else {
        return Ok(Vec::new());
    };

    let mut loaded = Vec::new();
    if npm && !manifest.scripts.is_empty() {
        let scripts: IndexMap<String, TaskDef> = manifest
            .scripts
            .into_iter()
            .map(|(name, cmd)| (name, TaskDef::Command(cmd)))
            .collect();
        loaded.push(load_tasks(orc, NPM_NAMESPACE, &[], &scripts)?);
    }
    if !manifest.taskstack.is_empty() {
        loaded.push(load_tasks(orc, PKG_NAMESPACE, &[], &manifest.taskstack)?);
    }
    Ok(loaded)
}
