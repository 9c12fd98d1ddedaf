//! Command-line front end
//!
//! Each command handler builds its own tokio runtime and returns
//! [`CliError`]; the binary prints the error and exits non-zero.

pub mod commands;
pub mod error;

pub use error::CliError;
