//! Source document status records

use serde::{Deserialize, Serialize};

/// Processing status of a source document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Claimed but not yet loaded
    #[default]
    New,
    /// Contributed to a fully loaded batch
    Processed,
    /// Failed; see the reason
    Error,
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentStatus::New => write!(f, "new"),
            DocumentStatus::Processed => write!(f, "processed"),
            DocumentStatus::Error => write!(f, "error"),
        }
    }
}

/// File-tracking record handed to the status store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub document_id: String,
    pub status: DocumentStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Meta {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            status: DocumentStatus::New,
            reason: None,
        }
    }

    pub fn processed(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            status: DocumentStatus::Processed,
            reason: None,
        }
    }

    pub fn error(document_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            status: DocumentStatus::Error,
            reason: Some(reason.into()),
        }
    }
}

impl std::fmt::Display for Meta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "document_id: {}, status: {}, reason: {}",
            self.document_id,
            self.status,
            self.reason.as_deref().unwrap_or("-")
        )
    }
}

/// Lifecycle of one processed row set
///
/// `Loaded` and `Error` are terminal. Retrying a failed row set is the
/// caller's job and starts from a fresh state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RowSetState {
    #[default]
    New,
    Processing,
    Loaded,
    Error(String),
}

/// Rejected state transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid transition from {from} to {to}")]
pub struct TransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

impl RowSetState {
    fn name(&self) -> &'static str {
        match self {
            RowSetState::New => "new",
            RowSetState::Processing => "processing",
            RowSetState::Loaded => "loaded",
            RowSetState::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RowSetState::Loaded | RowSetState::Error(_))
    }

    /// `New -> Processing`
    pub fn begin(&mut self) -> Result<(), TransitionError> {
        match self {
            RowSetState::New => {
                *self = RowSetState::Processing;
                Ok(())
            }
            other => Err(TransitionError {
                from: other.name(),
                to: "processing",
            }),
        }
    }

    /// `Processing -> Loaded`
    pub fn finish(&mut self) -> Result<(), TransitionError> {
        match self {
            RowSetState::Processing => {
                *self = RowSetState::Loaded;
                Ok(())
            }
            other => Err(TransitionError {
                from: other.name(),
                to: "loaded",
            }),
        }
    }

    /// `New | Processing -> Error`
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError {
                from: self.name(),
                to: "error",
            });
        }
        *self = RowSetState::Error(reason.into());
        Ok(())
    }

    /// Document status matching this state
    pub fn document_status(&self) -> DocumentStatus {
        match self {
            RowSetState::New | RowSetState::Processing => DocumentStatus::New,
            RowSetState::Loaded => DocumentStatus::Processed,
            RowSetState::Error(_) => DocumentStatus::Error,
        }
    }
}
