//! Task file parsing, validation and loading
//!
//! This module handles taskstack.yml files and the tasks a package.json
//! manifest declares.

pub mod load;
pub mod manifest;
pub mod parse;
pub mod schema;
pub mod types;

// Re-export main types
pub use load::*;
pub use manifest::*;
pub use parse::*;
pub use schema::*;
pub use types::*;

pub use crate::error::{ConfigError, ConfigResult};
