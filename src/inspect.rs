//! Local diagnostics for a source file before it is uploaded.
//!
//! Shows what the decoder sees (column names, DBF field descriptors), which
//! layout revision would accept the columns, and the first rows.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use log::info;

use crate::{
    data::display_cell,
    decode::{self, DecodeOptions, DecodedTable, SourceFormat},
    error::IngestError,
    layouts::{FileType, Layouts},
    mapper,
    table::TextTable,
};

pub struct InspectOptions<'a> {
    pub file_type: Option<FileType>,
    pub preview_rows: usize,
    pub decode: DecodeOptions,
    pub layouts: &'a Layouts,
}

pub fn execute(path: &Path, options: &InspectOptions<'_>) -> Result<()> {
    let label = path.display().to_string();
    let format = SourceFormat::from_location(&label)?;
    let bytes = fs::read(path).with_context(|| format!("Reading {path:?}"))?;
    let table = decode::decode(&bytes, format, &options.decode, &label)?;
    info!(
        "{label}: {format} file with {} column(s) and {} row(s)",
        table.columns.len(),
        table.row_count()
    );

    print_columns(&table);
    println!();
    print_matches(&table, options);
    if options.preview_rows > 0 {
        println!();
        print_preview(&table, options.preview_rows);
    }
    Ok(())
}

fn print_columns(table: &DecodedTable) {
    match &table.dbf_fields {
        Some(fields) => {
            let mut out = TextTable::new(["#", "name", "type", "length", "decimals", "export name"]);
            for (idx, field) in fields.iter().enumerate() {
                out.push_row(vec![
                    (idx + 1).to_string(),
                    field.name.clone(),
                    field.field_type.to_string(),
                    field.length.to_string(),
                    field.decimal_count.to_string(),
                    field.annotated_name(),
                ]);
            }
            out.print();
        }
        None => {
            let mut out = TextTable::new(["#", "name"]);
            for (idx, name) in table.columns.iter().enumerate() {
                out.push_row(vec![(idx + 1).to_string(), name.clone()]);
            }
            out.print();
        }
    }
}

/// One line per file type checked: the accepting revision or what is missing.
pub fn match_report(table: &DecodedTable, file_type: FileType, layouts: &Layouts) -> String {
    let columns = match &table.dbf_fields {
        // A DBF may match either by plain or by annotated names.
        Some(fields) => match mapper::match_revision(&table.columns, file_type, layouts) {
            Ok(found) => return format!("{file_type}: matches revision '{}'", found.revision.revision),
            Err(_) => fields.iter().map(|f| f.annotated_name()).collect(),
        },
        None => table.columns.clone(),
    };
    match mapper::match_revision(&columns, file_type, layouts) {
        Ok(found) => match table.dbf_fields {
            Some(_) => format!(
                "{file_type}: matches revision '{}' once exported with typed headers",
                found.revision.revision
            ),
            None => format!("{file_type}: matches revision '{}'", found.revision.revision),
        },
        Err(IngestError::SchemaMismatch {
            revision, missing, ..
        }) => format!(
            "{file_type}: no match (closest revision '{revision}' is missing {})",
            missing.join(", ")
        ),
        Err(err) => format!("{file_type}: {err}"),
    }
}

fn print_matches(table: &DecodedTable, options: &InspectOptions<'_>) {
    let candidates = match options.file_type {
        Some(file_type) => vec![file_type],
        None => FileType::ALL.to_vec(),
    };
    for file_type in candidates {
        println!("{}", match_report(table, file_type, options.layouts));
    }
}

fn print_preview(table: &DecodedTable, limit: usize) {
    let mut out = TextTable::new(table.columns.iter().cloned());
    for row in table.rows.iter().take(limit) {
        out.push_row(row.iter().map(display_cell).collect());
    }
    out.print();
    if table.row_count() > limit {
        println!("… {} more row(s)", table.row_count() - limit);
    }
}
