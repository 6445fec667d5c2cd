//! Common test utilities

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use taskstack::{TaskFn, TaskValue};
use tempfile::TempDir;

/// Create a temporary directory with a taskstack.yml file
pub fn create_test_config(content: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("taskstack.yml");
    fs::write(&config_path, content).unwrap();
    (temp_dir, config_path)
}

/// Create a test config with an empty subdirectory next to it
pub fn create_test_config_in_subdir(content: &str) -> (TempDir, PathBuf, PathBuf) {
    let (temp_dir, config_path) = create_test_config(content);
    let sub_dir = temp_dir.path().join("subdir");
    fs::create_dir(&sub_dir).unwrap();
    (temp_dir, config_path, sub_dir)
}

/// Labels recorded by task functions in the order they ran
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub fn new() -> Self {
        Log::default()
    }

    pub fn push(&self, label: impl Into<String>) {
        self.0.borrow_mut().push(label.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    /// A function task that records `label`
    pub fn task(&self, label: &str) -> TaskValue {
        let log = self.clone();
        let label = label.to_string();
        TaskFn::sync(move |_ctx| {
            log.push(label.clone());
            Ok(())
        })
        .into()
    }
}
