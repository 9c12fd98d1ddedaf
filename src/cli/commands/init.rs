//! Init command: write a sample store configuration

use std::path::PathBuf;

use crate::cli::error::CliError;
use crate::store::config::{CONFIG_FILENAME, sample_config};

/// Init command arguments
#[derive(Debug, Clone)]
pub struct InitArgs {
    pub workspace: PathBuf,
    /// Overwrite an existing configuration
    pub force: bool,
}

/// Write `.dwh-loader.toml` into the workspace
pub fn handle_init(args: &InitArgs) -> Result<(), CliError> {
    let path = args.workspace.join(CONFIG_FILENAME);
    if path.exists() && !args.force {
        return Err(CliError::InvalidArgument(format!(
            "{} already exists. Use --force to overwrite.",
            path.display()
        )));
    }

    std::fs::create_dir_all(&args.workspace)
        .map_err(|e| CliError::FileWriteError(args.workspace.clone(), e.to_string()))?;
    std::fs::write(&path, sample_config())
        .map_err(|e| CliError::FileWriteError(path.clone(), e.to_string()))?;

    println!("Wrote {}", path.display());
    Ok(())
}
