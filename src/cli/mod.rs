//! CLI subcommands for the `completion-dispatch` binary.
//!
//! ## Usage
//!
//! ```bash
//! completion-dispatch serve            # JSON lines in on stdin, records out on stdout
//! completion-dispatch check            # Verify provider connectivity and credential
//! completion-dispatch config show      # Effective configuration
//! completion-dispatch config defaults  # Built-in defaults
//! completion-dispatch config validate  # Warn on unusable settings
//! ```

pub mod check;
pub mod config_cmd;

pub use check::{credential_from_env, run_check, run_check_with};
