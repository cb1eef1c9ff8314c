use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use rust_decimal::Decimal;

use crate::{
    data::SqlValue,
    error::{IngestError, IngestResult},
    layouts::FileType,
    normalize::NormalizedBatch,
};

use super::{DeletedRows, RunRecord, RunSummary, SourceLocations, TenderStore, average};

/// In-process store with the same transactional contract as [`super::PgStore`].
///
/// A batch is validated in full before anything is appended, so a rejected
/// batch leaves no rows behind.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    last_run_id: i64,
    runs: BTreeMap<i64, RunRecord>,
    tables: HashMap<FileType, Vec<Vec<SqlValue>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> IngestResult<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| {
            IngestError::persistence("lock memory store", io::Error::other("lock poisoned"))
        })
    }

    pub fn run(&self, run_id: i64) -> Option<RunRecord> {
        self.state().ok()?.runs.get(&run_id).cloned()
    }

    /// Stored rows of one table, run id first, across all runs.
    pub fn rows(&self, file_type: FileType) -> Vec<Vec<SqlValue>> {
        self.state()
            .ok()
            .and_then(|state| state.tables.get(&file_type).cloned())
            .unwrap_or_default()
    }

    pub fn run_rows(&self, file_type: FileType, run_id: i64) -> Vec<Vec<SqlValue>> {
        self.rows(file_type)
            .into_iter()
            .filter(|row| belongs_to(row, run_id))
            .collect()
    }
}

fn belongs_to(row: &[SqlValue], run_id: i64) -> bool {
    matches!(row.first(), Some(SqlValue::BigInt(Some(id))) if *id == run_id)
}

fn column(file_type: FileType, name: &str) -> IngestResult<usize> {
    let columns = file_type.target().insert_columns();
    columns.iter().position(|c| *c == name).ok_or_else(|| {
        IngestError::format(format!("{name} is not a column of {}", file_type.target().name))
    })
}

#[async_trait]
impl TenderStore for MemoryStore {
    async fn create_run(&self, locations: &SourceLocations, created_by: &str) -> IngestResult<i64> {
        let mut state = self.state()?;
        state.last_run_id += 1;
        let run_id = state.last_run_id;
        state.runs.insert(
            run_id,
            RunRecord {
                run_id,
                locations: locations.clone(),
                created_by: created_by.to_string(),
                created_at: Utc::now(),
            },
        );
        debug!("Created in-memory run {run_id}");
        Ok(run_id)
    }

    async fn insert_rows(&self, batch: &NormalizedBatch) -> IngestResult<usize> {
        let mut state = self.state()?;
        let width = batch.columns.len();
        for (idx, row) in batch.rows.iter().enumerate() {
            if row.len() != width {
                return Err(IngestError::persistence(
                    "insert rows",
                    io::Error::other(format!(
                        "row {idx} has {} values for {width} columns of {}",
                        row.len(),
                        batch.table
                    )),
                ));
            }
            let known_run = matches!(
                row.first(),
                Some(SqlValue::BigInt(Some(id))) if state.runs.contains_key(id)
            );
            if !known_run {
                return Err(IngestError::persistence(
                    "insert rows",
                    io::Error::other(format!(
                        "row {idx} of {} references no existing run",
                        batch.table
                    )),
                ));
            }
        }
        state
            .tables
            .entry(batch.file_type)
            .or_default()
            .extend(batch.rows.iter().cloned());
        Ok(batch.rows.len())
    }

    async fn delete_run(&self, run_id: i64) -> IngestResult<DeletedRows> {
        let mut state = self.state()?;
        let mut deleted = DeletedRows::default();
        for file_type in FileType::ALL {
            let rows = state.tables.entry(file_type).or_default();
            let before = rows.len();
            rows.retain(|row| !belongs_to(row, run_id));
            let removed = (before - rows.len()) as u64;
            match file_type {
                FileType::Tender => deleted.tender = removed,
                FileType::District => deleted.district = removed,
                FileType::Department => deleted.department = removed,
            }
        }
        if state.runs.remove(&run_id).is_some() {
            deleted.run = 1;
        }
        Ok(deleted)
    }

    async fn run_summary(&self, run_id: i64) -> IngestResult<Option<RunSummary>> {
        let state = self.state()?;
        if !state.runs.contains_key(&run_id) {
            return Ok(None);
        }
        let rows_of = |file_type: FileType| -> Vec<&Vec<SqlValue>> {
            state
                .tables
                .get(&file_type)
                .map(|rows| rows.iter().filter(|row| belongs_to(row, run_id)).collect())
                .unwrap_or_default()
        };
        let tender = rows_of(FileType::Tender);
        let departments = rows_of(FileType::Department);

        let total = |name: &str| -> IngestResult<Option<Decimal>> {
            let idx = column(FileType::Tender, name)?;
            Ok(tender
                .iter()
                .filter_map(|row| row[idx].as_decimal())
                .reduce(|a, b| a + b))
        };
        let progress = column(FileType::Tender, "PHYSICAL_PROGRESS")?;
        let tender_code = column(FileType::Tender, "DEPARTMENT_CODE")?;
        let dept_code = column(FileType::Department, "DEPT_SUB_DEPT_CODE")?;

        let known_codes: BTreeSet<&str> = departments
            .iter()
            .filter_map(|row| row[dept_code].as_text())
            .collect();
        let unmatched: BTreeSet<String> = tender
            .iter()
            .filter_map(|row| row[tender_code].as_text())
            .filter(|code| !known_codes.contains(code))
            .map(str::to_string)
            .collect();

        Ok(Some(RunSummary {
            run_id,
            tender_rows: tender.len() as i64,
            district_rows: rows_of(FileType::District).len() as i64,
            department_rows: departments.len() as i64,
            total_sanction_cost: total("SANCTION_COST")?,
            total_fund_received: total("FUND_RECEIVED")?,
            total_wip: total("WIP_TOTAL")?,
            average_completion: average(tender.iter().filter_map(|row| row[progress].as_decimal())),
            unmatched_department_codes: unmatched.into_iter().collect(),
        }))
    }
}
