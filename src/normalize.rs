//! Row cleaning, type coercion and the derived completion metric.
//!
//! Input is a [`MappedTable`]; output is a [`NormalizedBatch`] whose rows
//! line up with [`TargetTable::insert_columns`]: run id first, source
//! columns in target order, and for tender rows the completion percentage
//! just before the trailing progress remark. Row count is preserved; a single
//! cell that cannot be typed fails the whole batch.

use std::str::FromStr;

use rust_decimal::{Decimal, prelude::FromPrimitive};

use crate::{
    data::{Cell, SqlValue, Value, is_placeholder_token, parse_naive_date},
    error::{IngestError, IngestResult},
    layouts::{ColumnType, FileType, TargetTable},
    mapper::MappedTable,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedBatch {
    pub file_type: FileType,
    pub table: &'static str,
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl NormalizedBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| *c == name)
    }
}

pub fn normalize(mapped: MappedTable, run_id: i64) -> IngestResult<NormalizedBatch> {
    let target = mapped.file_type.target();
    let derived = resolve_derived(target)?;
    let mut rows = Vec::with_capacity(mapped.rows.len());

    for (row_idx, row) in mapped.rows.into_iter().enumerate() {
        let mut values = Vec::with_capacity(target.columns.len() + 2);
        values.push(SqlValue::BigInt(Some(run_id)));
        for (col_idx, (cell, column)) in row.iter().zip(target.columns).enumerate() {
            let value = coerce(cell, column.datatype).ok_or_else(|| IngestError::RowCoercion {
                row: row_idx,
                column: mapped.headers[col_idx].clone(),
                value: describe_cell(cell),
                expected: column.datatype.to_string(),
            })?;
            values.push(value);
        }
        if let Some((numerator, denominator)) = derived {
            // Offsets shift by one for the run id in front.
            let metric = completion_percentage(
                values[numerator + 1].as_decimal(),
                values[denominator + 1].as_decimal(),
            );
            let at = values.len() - 1;
            values.insert(at, SqlValue::Numeric(metric));
        }
        rows.push(values);
    }

    Ok(NormalizedBatch {
        file_type: mapped.file_type,
        table: target.name,
        columns: target.insert_columns(),
        rows,
    })
}

fn resolve_derived(target: &TargetTable) -> IngestResult<Option<(usize, usize)>> {
    let Some(derived) = &target.derived else {
        return Ok(None);
    };
    let numerator = target.column_index(derived.numerator);
    let denominator = target.column_index(derived.denominator);
    match (numerator, denominator) {
        (Some(n), Some(d)) => Ok(Some((n, d))),
        _ => Err(IngestError::format(format!(
            "derived column {} references columns missing from {}",
            derived.name, target.name
        ))),
    }
}

/// `round(wip_total / sanction_cost * 100, 2)` when the cost is positive and
/// the total is present; null otherwise.
pub fn completion_percentage(
    wip_total: Option<Decimal>,
    sanction_cost: Option<Decimal>,
) -> Option<Decimal> {
    let cost = sanction_cost.filter(|cost| *cost > Decimal::ZERO)?;
    let wip = wip_total?;
    wip.checked_div(cost)?
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|pct| pct.round_dp(2))
}

fn describe_cell(cell: &Cell) -> String {
    match cell {
        Some(value) => format!("{} '{}'", value.type_name(), value.as_display()),
        None => "null".to_string(),
    }
}

/// Types one cell for its target column. `None` means the value cannot be
/// represented; absent and sentinel values become typed nulls.
pub fn coerce(cell: &Cell, ty: ColumnType) -> Option<SqlValue> {
    let value = match cell {
        None => return Some(null_of(ty)),
        Some(value) if value.is_missing_sentinel() => return Some(null_of(ty)),
        Some(Value::String(s)) if ty != ColumnType::Text && is_placeholder_token(s) => {
            return Some(null_of(ty));
        }
        Some(value) => value,
    };
    match ty {
        ColumnType::Integer => coerce_integer(value).map(|v| SqlValue::BigInt(Some(v))),
        ColumnType::Numeric => coerce_decimal(value).map(|v| SqlValue::Numeric(Some(v))),
        ColumnType::Text => Some(SqlValue::Text(Some(value.as_display()))),
        ColumnType::Date => match value {
            Value::Date(d) => Some(SqlValue::Date(Some(*d))),
            Value::DateTime(dt) => Some(SqlValue::Date(Some(dt.date()))),
            Value::String(s) => parse_naive_date(s).ok().map(|d| SqlValue::Date(Some(d))),
            _ => None,
        },
    }
}

fn null_of(ty: ColumnType) -> SqlValue {
    match ty {
        ColumnType::Integer => SqlValue::BigInt(None),
        ColumnType::Numeric => SqlValue::Numeric(None),
        ColumnType::Text => SqlValue::Text(None),
        ColumnType::Date => SqlValue::Date(None),
    }
}

fn integral_float(value: f64) -> Option<i64> {
    (value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15).then_some(value as i64)
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Float(f) => integral_float(*f),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().and_then(integral_float))
        }
        _ => None,
    }
}

fn coerce_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Integer(i) => Some(Decimal::from(*i)),
        Value::Float(f) if f.is_finite() => Decimal::from_f64(*f),
        Value::String(s) => {
            let cleaned = s.trim().replace(',', "");
            Decimal::from_str(&cleaned).ok()
        }
        _ => None,
    }
}
