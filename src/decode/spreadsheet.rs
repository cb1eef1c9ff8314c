//! `.xls` / `.xlsx` decoding through calamine.
//!
//! The first worksheet is read; its first row supplies the column names.

use std::{
    fmt,
    io::{Cursor, Read, Seek},
};

use calamine::{Data, Range, Reader, Xls, Xlsx, open_workbook_from_rs};
use chrono::{NaiveDateTime, NaiveTime};
use log::debug;

use crate::{
    data::{Cell, Value, parse_naive_date, parse_naive_datetime},
    error::{IngestError, IngestResult},
};

use super::{DecodedTable, SourceFormat};

pub(crate) fn decode_workbook(bytes: &[u8], format: SourceFormat) -> IngestResult<DecodedTable> {
    let cursor = Cursor::new(bytes);
    let range = match format {
        SourceFormat::Xlsx => first_sheet(
            open_workbook_from_rs::<Xlsx<_>, _>(cursor)
                .map_err(|e| IngestError::format(format!("opening XLSX workbook: {e}")))?,
        )?,
        SourceFormat::Xls => first_sheet(
            open_workbook_from_rs::<Xls<_>, _>(cursor)
                .map_err(|e| IngestError::format(format!("opening XLS workbook: {e}")))?,
        )?,
        SourceFormat::Dbf => {
            return Err(IngestError::format("DBF input is not a spreadsheet"));
        }
    };
    Ok(table_from_range(&range))
}

fn first_sheet<R, RS>(mut workbook: R) -> IngestResult<Range<Data>>
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: fmt::Display,
{
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| IngestError::format("workbook contains no worksheets"))?;
    debug!("Reading worksheet '{sheet}'");
    workbook
        .worksheet_range(&sheet)
        .map_err(|e| IngestError::format(format!("reading worksheet '{sheet}': {e}")))
}

fn table_from_range(range: &Range<Data>) -> DecodedTable {
    let mut rows = range.rows();
    let columns = match rows.next() {
        Some(header) => header
            .iter()
            .enumerate()
            .map(|(idx, cell)| match cell_to_value(cell) {
                Some(value) => value.as_display(),
                None => format!("column_{}", idx + 1),
            })
            .collect(),
        None => Vec::new(),
    };

    let mut blank_rows = 0usize;
    let data = rows
        .filter_map(|row| {
            let cells = row.iter().map(cell_to_value).collect::<Vec<Cell>>();
            if cells.iter().all(Option::is_none) {
                blank_rows += 1;
                None
            } else {
                Some(cells)
            }
        })
        .collect::<Vec<_>>();
    if blank_rows > 0 {
        debug!("Skipped {blank_rows} blank worksheet row(s)");
    }

    DecodedTable {
        columns,
        rows: data,
        dbf_fields: None,
    }
}

pub(crate) fn cell_to_value(cell: &Data) -> Cell {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) if s.trim().is_empty() => None,
        Data::String(s) => Some(Value::String(s.clone())),
        Data::Float(f) if f.is_nan() => None,
        Data::Float(f) => Some(Value::Float(*f)),
        Data::Int(i) => Some(Value::Integer(*i)),
        Data::Bool(b) => Some(Value::Boolean(*b)),
        Data::DateTime(dt) => dt.as_datetime().map(datetime_value),
        Data::DateTimeIso(s) => Some(
            parse_naive_datetime(s)
                .map(datetime_value)
                .or_else(|_| parse_naive_date(s).map(Value::Date))
                .unwrap_or_else(|_| Value::String(s.clone())),
        ),
        Data::DurationIso(s) => Some(Value::String(s.clone())),
    }
}

fn datetime_value(dt: NaiveDateTime) -> Value {
    if dt.time() == NaiveTime::MIN {
        Value::Date(dt.date())
    } else {
        Value::DateTime(dt)
    }
}
