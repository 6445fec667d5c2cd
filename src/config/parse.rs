//! Task file parsing and discovery

use crate::config::types::{IncludedTasks, TaskFile};
use crate::error::{ConfigError, ConfigResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Task file names to search for, in order
pub const CONFIG_FILE_NAMES: &[&str] = &["taskstack.yml", "taskstack.yaml"];

/// The directory holding this file marks the top of a project
pub const MANIFEST_FILE_NAME: &str = "package.json";

/// Find the task file starting from a specific directory.
///
/// The search goes up one directory at a time and stops at the first
/// directory that contains a task file or a `package.json`.
pub fn find_config_file_from(start_dir: PathBuf) -> ConfigResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched_paths = Vec::new();

    loop {
        if let Some(found) = config_file_in(&current_dir, &mut searched_paths) {
            return Ok(found);
        }
        if current_dir.join(MANIFEST_FILE_NAME).is_file() {
            return Err(ConfigError::NotFound(searched_paths.join(", ")));
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ConfigError::NotFound(searched_paths.join(", "))),
        }
    }
}

/// Look for a task file in `dir` only
pub fn find_config_file_in(dir: &Path) -> ConfigResult<PathBuf> {
    let mut searched_paths = Vec::new();
    config_file_in(dir, &mut searched_paths)
        .ok_or_else(|| ConfigError::NotFound(searched_paths.join(", ")))
}

fn config_file_in(dir: &Path, searched: &mut Vec<String>) -> Option<PathBuf> {
    CONFIG_FILE_NAMES.iter().find_map(|file_name| {
        let config_path = dir.join(file_name);
        searched.push(config_path.display().to_string());
        config_path.is_file().then_some(config_path)
    })
}

/// Parse a task file from a path
pub fn parse_config_file(path: &Path) -> ConfigResult<TaskFile> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read {}: {}", path.display(), e)))?;

    parse_config(&contents, Some(path))
}

/// Parse a task file from a string.
///
/// Includes are resolved relative to `config_path` when given.
pub fn parse_config(yaml: &str, config_path: Option<&Path>) -> ConfigResult<TaskFile> {
    let mut config: TaskFile = serde_yaml::from_str(yaml)?;

    if let Some(base_path) = config_path {
        process_includes(&mut config, base_path)?;
    }

    Ok(config)
}

/// Read the tasks of every included file
fn process_includes(config: &mut TaskFile, config_path: &Path) -> ConfigResult<()> {
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    for include in &config.include {
        let path = base_dir.join(&include.file);
        debug!(path = %path.display(), namespace = %include.namespace, "including task file");
        let included = load_included_file(&path)?;
        config.included.push(IncludedTasks {
            namespace: include.namespace.clone(),
            overrides: include.overrides.clone(),
            tasks: included.tasks,
        });
    }

    Ok(())
}

fn load_included_file(path: &Path) -> ConfigResult<TaskFile> {
    let include_err = |error: String| ConfigError::IncludeFile {
        path: path.to_path_buf(),
        error,
    };
    let contents = fs::read_to_string(path).map_err(|e| include_err(e.to_string()))?;
    let included: TaskFile =
        serde_yaml::from_str(&contents).map_err(|e| include_err(e.to_string()))?;
    if !included.include.is_empty() {
        return Err(include_err("included files cannot include other files".to_string()));
    }
    Ok(included)
}
