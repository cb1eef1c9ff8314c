//! Column selection against the expected-header revisions.
//!
//! Matching is exact and case-sensitive. Revisions are tried in the order
//! the layouts list them and the first one whose headers are all present
//! wins. Header drift is never guessed at: when nothing matches, the caller
//! gets the missing and present names and fixes the file or adds a revision.

use std::collections::HashMap;

use log::debug;

use crate::{
    data::Cell,
    decode::DecodedTable,
    error::{IngestError, IngestResult},
    layouts::{FileType, Layouts, Revision},
};

/// A decoded table reduced to the target columns, in target order.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedTable {
    pub file_type: FileType,
    pub revision: String,
    /// External header for each selected column.
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionMatch<'a> {
    pub revision: &'a Revision,
    /// Source column index for each target column.
    pub indices: Vec<usize>,
}

pub fn match_revision<'a>(
    columns: &[String],
    file_type: FileType,
    layouts: &'a Layouts,
) -> IngestResult<RevisionMatch<'a>> {
    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(columns.len());
    for (idx, name) in columns.iter().enumerate() {
        positions.entry(name.as_str()).or_insert(idx);
    }

    let mut closest: Option<(&Revision, Vec<String>)> = None;
    for revision in layouts.revisions(file_type) {
        let mut indices = Vec::with_capacity(revision.headers.len());
        let mut missing = Vec::new();
        for header in &revision.headers {
            match positions.get(header.as_str()) {
                Some(idx) => indices.push(*idx),
                None => missing.push(header.clone()),
            }
        }
        if missing.is_empty() {
            debug!(
                "{file_type} columns match revision '{}'",
                revision.revision
            );
            return Ok(RevisionMatch { revision, indices });
        }
        debug!(
            "{file_type} revision '{}' is missing {:?}",
            revision.revision, missing
        );
        let closer = closest
            .as_ref()
            .is_none_or(|(_, best)| missing.len() < best.len());
        if closer {
            closest = Some((revision, missing));
        }
    }

    let (revision, missing) = closest.ok_or_else(|| {
        IngestError::format(format!("no layout revisions configured for {file_type}"))
    })?;
    Err(IngestError::SchemaMismatch {
        file_type,
        revision: revision.revision.clone(),
        missing,
        present: columns.to_vec(),
    })
}

/// Selects and reorders the target columns of `table`.
pub fn select_columns(
    mut table: DecodedTable,
    file_type: FileType,
    layouts: &Layouts,
) -> IngestResult<MappedTable> {
    let RevisionMatch { revision, indices } = match_revision(&table.columns, file_type, layouts)?;
    let rows = table
        .rows
        .iter_mut()
        .map(|row| {
            indices
                .iter()
                .map(|idx| row.get_mut(*idx).and_then(Option::take))
                .collect()
        })
        .collect();
    Ok(MappedTable {
        file_type,
        revision: revision.revision.clone(),
        headers: revision.headers.clone(),
        rows,
    })
}
