//! CLI-specific error types

use crate::config::{CatalogError, MappingError};
use crate::engine::LoadError;
use crate::pipeline::PipelineError;
use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read file {0}: {1}")]
    FileReadError(PathBuf, String),

    #[error("Failed to write file {0}: {1}")]
    FileWriteError(PathBuf, String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Catalog error: {0}")]
    CatalogError(#[from] CatalogError),

    #[error("Mapping error: {0}")]
    MappingError(#[from] MappingError),

    #[error("Load error: {0}")]
    LoadError(#[from] LoadError),

    #[error("Pipeline error: {0}")]
    PipelineError(#[from] PipelineError),
}
