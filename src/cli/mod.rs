//! CLI interface and argument parsing
//!
//! This module handles command-line parsing, task listing, progress
//! output and shell completion.

pub mod app;
pub mod reporter;

// Re-export main types
pub use app::*;
pub use reporter::{ConsoleReporter, Verbosity};
