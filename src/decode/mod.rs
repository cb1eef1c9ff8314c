//! Source file decoding into a uniform in-memory table.
//!
//! Three formats are accepted, picked by the location's extension
//! (case-insensitive): `.xls`, `.xlsx` and `.dbf`. Every decoder produces a
//! [`DecodedTable`] of named columns and nullable typed cells.

pub mod dbf;
mod spreadsheet;

use std::{fmt, io::BufReader, path::Path};

use encoding_rs::Encoding;
use log::debug;

use crate::{
    data::Cell,
    error::{IngestError, IngestResult},
    io_utils,
};

pub use dbf::DbfField;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Xls,
    Xlsx,
    Dbf,
}

impl SourceFormat {
    pub const ACCEPTED_EXTENSIONS: [&'static str; 3] = [".xls", ".xlsx", ".dbf"];

    pub fn from_location(location: &str) -> IngestResult<Self> {
        let extension = Path::new(location)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("xls") => Ok(SourceFormat::Xls),
            Some("xlsx") => Ok(SourceFormat::Xlsx),
            Some("dbf") => Ok(SourceFormat::Dbf),
            _ => Err(IngestError::format(format!(
                "'{location}' is not an accepted file type ({})",
                Self::ACCEPTED_EXTENSIONS.join(", ")
            ))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SourceFormat::Xls => ".xls",
            SourceFormat::Xlsx => ".xlsx",
            SourceFormat::Dbf => ".dbf",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.extension()[1..])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Forces the DBF text encoding; `None` follows the file's language driver.
    pub dbf_encoding: Option<&'static Encoding>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    /// Field descriptors when the source was a DBF table.
    pub dbf_fields: Option<Vec<DbfField>>,
}

impl DecodedTable {
    /// Position of the first column named exactly `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Decodes `bytes` as `format`. `label` names the source in error messages.
pub fn decode(
    bytes: &[u8],
    format: SourceFormat,
    options: &DecodeOptions,
    label: &str,
) -> IngestResult<DecodedTable> {
    let table = match format {
        SourceFormat::Xls | SourceFormat::Xlsx => spreadsheet::decode_workbook(bytes, format)?,
        SourceFormat::Dbf => decode_dbf(bytes, options)?,
    };
    if table.columns.is_empty() || table.rows.is_empty() {
        return Err(IngestError::EmptyInput(label.to_string()));
    }
    debug!(
        "Decoded {} row(s) from {label}; columns: {:?}",
        table.row_count(),
        table.columns
    );
    Ok(table)
}

fn decode_dbf(bytes: &[u8], options: &DecodeOptions) -> IngestResult<DecodedTable> {
    let spool = io_utils::spool_to_tempfile(bytes, ".dbf").map_err(|e| {
        IngestError::format(format!("cannot spool DBF stream to a local file: {e}"))
    })?;
    let file = spool
        .reopen()
        .map_err(|e| IngestError::format(format!("cannot reopen spooled DBF file: {e}")))?;
    let table = dbf::read_table(BufReader::new(file), options.dbf_encoding)?;
    Ok(DecodedTable {
        columns: table.fields.iter().map(|f| f.name.clone()).collect(),
        rows: table.rows,
        dbf_fields: Some(table.fields),
    })
}
