//! Error taxonomy for the ingestion pipeline.
//!
//! Each variant maps onto one failure class a caller can act on: a bad input
//! file ([`IngestError::Format`], [`IngestError::EmptyInput`]), header drift
//! ([`IngestError::SchemaMismatch`]), a single bad cell
//! ([`IngestError::RowCoercion`]), or a storage-side failure
//! ([`IngestError::Persistence`], [`IngestError::Source`]).

use std::fmt;

use thiserror::Error;

use crate::layouts::FileType;

pub type IngestResult<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Unsupported or corrupt input: {0}")]
    Format(String),

    #[error("{0} contains no data rows")]
    EmptyInput(String),

    #[error(
        "Column mismatch for {file_type} file (closest revision '{revision}'): missing {missing:?}; present {present:?}"
    )]
    SchemaMismatch {
        file_type: FileType,
        revision: String,
        missing: Vec<String>,
        present: Vec<String>,
    },

    /// `row` counts decoded data rows from 0; blank worksheet rows and
    /// deleted DBF records are not counted.
    #[error(
        "Data row {row} (0-based, not counting skipped blank rows or deleted records), column '{column}': cannot store {value} as {expected}"
    )]
    RowCoercion {
        row: usize,
        column: String,
        value: String,
        expected: String,
    },

    #[error("{operation} failed: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Cannot read '{location}': {source}")]
    Source {
        location: String,
        #[source]
        source: ObjectStoreError,
    },
}

impl IngestError {
    pub fn persistence<E>(operation: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        IngestError::Persistence {
            operation,
            source: Box::new(source),
        }
    }

    pub fn format(message: impl fmt::Display) -> Self {
        IngestError::Format(message.to_string())
    }

    /// Short machine-friendly label used in reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Format(_) => "format",
            IngestError::EmptyInput(_) => "empty_input",
            IngestError::SchemaMismatch { .. } => "schema_mismatch",
            IngestError::RowCoercion { .. } => "row_coercion",
            IngestError::Persistence { .. } => "persistence",
            IngestError::Source { .. } => "source",
        }
    }
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found")]
    NotFound,

    #[error("invalid object location")]
    InvalidLocation,

    #[error("transfer timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
