//! Load command: run one activity over a JSON records file

use std::io::Read;
use std::path::{Path, PathBuf};

use super::{load_config, runtime};
use crate::cli::error::CliError;
use crate::config::WarehouseCatalog;
use crate::models::TabularBatch;
use crate::pipeline::{LoadContext, SourceDocument};

/// Load command arguments
#[derive(Debug, Clone)]
pub struct LoadArgs {
    pub schema: PathBuf,
    pub mapping: PathBuf,
    /// Activity name or code
    pub activity: String,
    /// JSON array of records, or '-' for stdin
    pub input: String,
    pub workspace: PathBuf,
    /// Document id reported in the output; defaults to the input name
    pub document_id: Option<String>,
}

fn read_input(input: &str) -> Result<String, CliError> {
    if input == "-" {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .map_err(|e| CliError::InvalidArgument(format!("Failed to read stdin: {}", e)))?;
        Ok(content)
    } else {
        let path = PathBuf::from(input);
        if !path.exists() {
            return Err(CliError::FileNotFound(path));
        }
        std::fs::read_to_string(&path).map_err(|e| CliError::FileReadError(path, e.to_string()))
    }
}

/// Map headers and type the records of one input file
pub fn prepare_batch(
    catalog: &WarehouseCatalog,
    content: &str,
    threshold: f64,
) -> Result<TabularBatch, CliError> {
    let records: Vec<serde_json::Value> = serde_json::from_str(content)
        .map_err(|e| CliError::InvalidArgument(format!("Input is not a JSON array: {}", e)))?;
    let mapper = catalog.mapper(threshold)?;
    let records = mapper.rename_records(records)?;
    Ok(catalog.batch_from_records(&records)?)
}

fn document_id(args: &LoadArgs) -> String {
    args.document_id.clone().unwrap_or_else(|| {
        Path::new(&args.input)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| args.input.clone())
    })
}

/// Load the input file and print the document status records as JSON
pub fn handle_load(args: &LoadArgs) -> Result<(), CliError> {
    let config = load_config(&args.workspace)?;
    let catalog = WarehouseCatalog::load(&args.schema, &args.mapping)?;
    let content = read_input(&args.input)?;
    let batch = prepare_batch(&catalog, &content, config.mapping.fuzzy_threshold)?;
    let document = SourceDocument::new(document_id(args), args.activity.clone(), batch);

    let rt = runtime()?;
    let report = rt.block_on(async {
        let store = config.open(&args.workspace).await?;
        let context = LoadContext::new(&*store, &catalog);
        let report = context.process_group(&args.activity, vec![document]).await?;
        Ok::<_, CliError>(report)
    })?;

    let output = serde_json::to_string_pretty(&report.meta)
        .map_err(|e| CliError::IoError(format!("Failed to serialize output: {}", e)))?;
    println!("{}", output);
    eprintln!(
        "activity {}: {:?}, {} fact rows",
        report.activity,
        report.dispatch,
        report.fact_keys.len()
    );
    Ok(())
}
