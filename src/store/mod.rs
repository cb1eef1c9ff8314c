//! Relational persistence behind one async trait.
//!
//! [`PgStore`] is the production implementation; [`MemoryStore`] keeps the
//! same contract in process for dry runs and tests. Every `insert_rows` call
//! is one transaction: either every chunk of the batch lands or none does.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::{error::IngestResult, layouts::FileType, normalize::NormalizedBatch};

pub use memory::MemoryStore;
pub use postgres::{PgStore, PoolSettings};

pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Object-store keys of the three files a run was created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocations {
    pub tender: String,
    pub district: String,
    pub department: String,
}

impl SourceLocations {
    pub fn get(&self, file_type: FileType) -> &str {
        match file_type {
            FileType::Tender => &self.tender,
            FileType::District => &self.district,
            FileType::Department => &self.department,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: i64,
    pub locations: SourceLocations,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedRows {
    pub run: u64,
    pub tender: u64,
    pub district: u64,
    pub department: u64,
}

impl DeletedRows {
    pub fn total(&self) -> u64 {
        self.run + self.tender + self.district + self.department
    }
}

/// Headline figures for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: i64,
    pub tender_rows: i64,
    pub district_rows: i64,
    pub department_rows: i64,
    pub total_sanction_cost: Option<Decimal>,
    pub total_fund_received: Option<Decimal>,
    pub total_wip: Option<Decimal>,
    pub average_completion: Option<Decimal>,
    /// Tender department codes with no department record in the same run.
    pub unmatched_department_codes: Vec<String>,
}

#[async_trait]
pub trait TenderStore: Send + Sync {
    /// Inserts the run row and returns its generated identifier.
    async fn create_run(&self, locations: &SourceLocations, created_by: &str) -> IngestResult<i64>;

    /// Inserts a whole batch in one transaction; returns the row count.
    async fn insert_rows(&self, batch: &NormalizedBatch) -> IngestResult<usize>;

    async fn delete_run(&self, run_id: i64) -> IngestResult<DeletedRows>;

    /// `None` when the run does not exist.
    async fn run_summary(&self, run_id: i64) -> IngestResult<Option<RunSummary>>;
}

/// Two-decimal mean, rounded the way Postgres `ROUND` does; `None` for no values.
pub(crate) fn average(values: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
    let (sum, count) = values
        .into_iter()
        .fold((Decimal::ZERO, 0i64), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| {
        (sum / Decimal::from(count)).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    })
}
