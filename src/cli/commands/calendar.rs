//! Calendar command: populate a date dimension

use chrono::NaiveDate;
use std::path::PathBuf;

use super::{load_config, runtime};
use crate::cli::error::CliError;
use crate::engine::load_calendar;

/// Calendar command arguments
#[derive(Debug, Clone)]
pub struct CalendarArgs {
    pub table: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub workspace: PathBuf,
}

/// Write the missing days between `from` and `to`
pub fn handle_calendar(args: &CalendarArgs) -> Result<(), CliError> {
    let config = load_config(&args.workspace)?;

    let rt = runtime()?;
    let written = rt.block_on(async {
        let store = config.open(&args.workspace).await?;
        let written = load_calendar(&*store, &args.table, args.from, args.to).await?;
        Ok::<_, CliError>(written)
    })?;

    println!("Wrote {} days to {}", written, args.table);
    Ok(())
}
