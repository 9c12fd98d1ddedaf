//! CLI command implementations

pub mod calendar;
pub mod init;
pub mod load;

use std::path::Path;

use crate::cli::error::CliError;
use crate::store::StoreConfig;

/// Load the workspace store configuration, failing if the workspace is missing
pub(crate) fn load_config(workspace: &Path) -> Result<StoreConfig, CliError> {
    if !workspace.is_dir() {
        return Err(CliError::FileNotFound(workspace.to_path_buf()));
    }
    Ok(StoreConfig::load(workspace)?)
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::IoError(format!("Failed to create runtime: {}", e)))
}
