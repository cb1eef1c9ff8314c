//! Postgres-backed [`TenderStore`].
//!
//! Table and column identifiers come only from the compiled-in target
//! tables and are always double-quoted; every value is a bound parameter.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use itertools::Itertools;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use sqlx::{
    PgPool, Postgres, QueryBuilder, Transaction,
    postgres::{PgConnectOptions, PgPoolOptions},
    query_builder::Separated,
};

use crate::{
    data::SqlValue,
    error::{IngestError, IngestResult},
    layouts::{FileType, RUN_ID_COLUMN, RUN_TABLE},
    normalize::NormalizedBatch,
};

use super::{DeletedRows, RunSummary, SourceLocations, TenderStore};

/// Postgres caps a single statement at this many bind parameters.
const MAX_BIND_PARAMETERS: usize = 65_535;

const INSERT_RUN_SQL: &str = r#"
    INSERT INTO "tender_master"
        ("tndr_source_file", "dst_source_file", "dept_source_file", "crt_dt", "crt_user")
    VALUES ($1, $2, $3, $4, $5)
    RETURNING "tndr_pk"
"#;

const RUN_EXISTS_SQL: &str = r#"SELECT "tndr_pk" FROM "tender_master" WHERE "tndr_pk" = $1"#;

const TENDER_TOTALS_SQL: &str = r#"
    SELECT COUNT(*),
           SUM("SANCTION_COST"),
           SUM("FUND_RECEIVED"),
           SUM("WIP_TOTAL"),
           ROUND(AVG("PHYSICAL_PROGRESS"), 2)
    FROM "TENDER_DATA_DTLS"
    WHERE "tndr_pk" = $1
"#;

const UNMATCHED_DEPARTMENTS_SQL: &str = r#"
    SELECT DISTINCT t."DEPARTMENT_CODE"
    FROM "TENDER_DATA_DTLS" t
    WHERE t."tndr_pk" = $1
      AND t."DEPARTMENT_CODE" IS NOT NULL
      AND NOT EXISTS (
          SELECT 1 FROM "DEPT_DTLS" d
          WHERE d."tndr_pk" = t."tndr_pk"
            AND d."DEPT_SUB_DEPT_CODE" = t."DEPARTMENT_CODE"
      )
    ORDER BY 1
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    chunk_size: usize,
}

impl PgStore {
    /// Builds the pool without connecting; the first query opens a
    /// connection, so an unreachable server surfaces on `create_run`.
    pub fn connect_lazy(
        options: PgConnectOptions,
        settings: &PoolSettings,
        chunk_size: usize,
    ) -> Self {
        info!(
            "Postgres pool configured for {}:{} (min {}, max {} connections)",
            options.get_host(),
            options.get_port(),
            settings.min_connections,
            settings.max_connections
        );
        let pool = PgPoolOptions::new()
            .min_connections(settings.min_connections)
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_lazy_with(options);
        Self::from_pool(pool, chunk_size)
    }

    pub fn from_pool(pool: PgPool, chunk_size: usize) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn rows_per_statement(&self, columns: usize) -> usize {
        self.chunk_size.min(MAX_BIND_PARAMETERS / columns.max(1)).max(1)
    }

    async fn count_rows(&self, file_type: FileType, run_id: i64) -> IngestResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = $1",
            quote_ident(file_type.target().name),
            quote_ident(RUN_ID_COLUMN)
        );
        sqlx::query_scalar::<_, i64>(&sql)
            .bind(run_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| IngestError::persistence("count run rows", e))
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn push_value<'args>(
    row: &mut Separated<'_, 'args, Postgres, &'static str>,
    value: &'args SqlValue,
) {
    match value {
        SqlValue::BigInt(v) => row.push_bind(v),
        SqlValue::Numeric(v) => row.push_bind(v),
        SqlValue::Text(v) => row.push_bind(v),
        SqlValue::Date(v) => row.push_bind(v),
    };
}

async fn rollback(tx: Transaction<'_, Postgres>, operation: &str) {
    if let Err(err) = tx.rollback().await {
        warn!("Rollback after failed {operation} also failed: {err}");
    }
}

/// Destination of one file's chunked insert: a transaction in production.
pub(crate) trait ChunkSink {
    async fn execute_chunk(&mut self, prefix: &str, rows: &[Vec<SqlValue>])
    -> Result<u64, sqlx::Error>;

    async fn finish(self) -> Result<(), sqlx::Error>;

    async fn abort(self) -> Result<(), sqlx::Error>;
}

impl ChunkSink for Transaction<'_, Postgres> {
    async fn execute_chunk(
        &mut self,
        prefix: &str,
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, sqlx::Error> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(prefix);
        builder.push_values(rows, |mut row, values| {
            for value in values {
                push_value(&mut row, value);
            }
        });
        let result = builder.build().execute(&mut **self).await?;
        Ok(result.rows_affected())
    }

    async fn finish(self) -> Result<(), sqlx::Error> {
        self.commit().await
    }

    async fn abort(self) -> Result<(), sqlx::Error> {
        self.rollback().await
    }
}

/// Sends `rows` to `sink` in statements of at most `per_statement` rows.
/// Every chunk lands and the sink commits, or the first failing chunk
/// aborts the sink and the whole batch is discarded.
pub(crate) async fn write_chunks<S: ChunkSink>(
    mut sink: S,
    table: &str,
    prefix: &str,
    rows: &[Vec<SqlValue>],
    per_statement: usize,
) -> IngestResult<usize> {
    let per_statement = per_statement.max(1);
    let mut inserted = 0u64;
    for (chunk_idx, chunk) in rows.chunks(per_statement).enumerate() {
        match sink.execute_chunk(prefix, chunk).await {
            Ok(affected) => inserted += affected,
            Err(err) => {
                warn!(
                    "Chunk {} of {table} failed; rolling back {} row(s)",
                    chunk_idx + 1,
                    rows.len()
                );
                if let Err(rollback_err) = sink.abort().await {
                    warn!("Rollback after failed insert also failed: {rollback_err}");
                }
                return Err(IngestError::persistence("insert rows", err));
            }
        }
    }
    sink.finish()
        .await
        .map_err(|e| IngestError::persistence("commit rows", e))?;
    debug!("Committed {inserted} row(s) into {table} in chunks of {per_statement}");
    Ok(inserted as usize)
}

#[async_trait]
impl TenderStore for PgStore {
    async fn create_run(&self, locations: &SourceLocations, created_by: &str) -> IngestResult<i64> {
        let run_id = sqlx::query_scalar::<_, i64>(INSERT_RUN_SQL)
            .bind(&locations.tender)
            .bind(&locations.district)
            .bind(&locations.department)
            .bind(Utc::now())
            .bind(created_by)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| IngestError::persistence("create run", e))?;
        debug!("Inserted {RUN_TABLE} row {run_id}");
        Ok(run_id)
    }

    async fn insert_rows(&self, batch: &NormalizedBatch) -> IngestResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let prefix = format!(
            "INSERT INTO {} ({}) ",
            quote_ident(batch.table),
            batch.columns.iter().map(|c| quote_ident(c)).join(", ")
        );
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IngestError::persistence("begin transaction", e))?;
        write_chunks(
            tx,
            batch.table,
            &prefix,
            &batch.rows,
            self.rows_per_statement(batch.columns.len()),
        )
        .await
    }

    async fn delete_run(&self, run_id: i64) -> IngestResult<DeletedRows> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IngestError::persistence("begin transaction", e))?;
        let mut deleted = DeletedRows::default();
        for file_type in FileType::ALL {
            let sql = format!(
                "DELETE FROM {} WHERE {} = $1",
                quote_ident(file_type.target().name),
                quote_ident(RUN_ID_COLUMN)
            );
            let result = sqlx::query(&sql).bind(run_id).execute(&mut *tx).await;
            let removed = match result {
                Ok(result) => result.rows_affected(),
                Err(err) => {
                    rollback(tx, "delete").await;
                    return Err(IngestError::persistence("delete run rows", err));
                }
            };
            match file_type {
                FileType::Tender => deleted.tender = removed,
                FileType::District => deleted.district = removed,
                FileType::Department => deleted.department = removed,
            }
        }
        let sql = format!(
            "DELETE FROM {} WHERE {} = $1",
            quote_ident(RUN_TABLE),
            quote_ident(RUN_ID_COLUMN)
        );
        let result = sqlx::query(&sql).bind(run_id).execute(&mut *tx).await;
        match result {
            Ok(result) => deleted.run = result.rows_affected(),
            Err(err) => {
                rollback(tx, "delete").await;
                return Err(IngestError::persistence("delete run", err));
            }
        }
        tx.commit()
            .await
            .map_err(|e| IngestError::persistence("commit delete", e))?;
        Ok(deleted)
    }

    async fn run_summary(&self, run_id: i64) -> IngestResult<Option<RunSummary>> {
        let exists = sqlx::query_scalar::<_, i64>(RUN_EXISTS_SQL)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| IngestError::persistence("load run", e))?;
        if exists.is_none() {
            return Ok(None);
        }
        let (tender_rows, sanction, fund, wip, completion): (
            i64,
            Option<Decimal>,
            Option<Decimal>,
            Option<Decimal>,
            Option<Decimal>,
        ) = sqlx::query_as(TENDER_TOTALS_SQL)
            .bind(run_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| IngestError::persistence("load tender totals", e))?;
        let district_rows = self.count_rows(FileType::District, run_id).await?;
        let department_rows = self.count_rows(FileType::Department, run_id).await?;
        let unmatched = sqlx::query_scalar::<_, String>(UNMATCHED_DEPARTMENTS_SQL)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IngestError::persistence("load unmatched departments", e))?;
        Ok(Some(RunSummary {
            run_id,
            tender_rows,
            district_rows,
            department_rows,
            total_sanction_cost: sanction,
            total_fund_received: fund,
            total_wip: wip,
            average_completion: completion,
            unmatched_department_codes: unmatched,
        }))
    }
}
