mod common;

use std::{
    io,
    str::FromStr,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tender_ingest::{
    data::SqlValue,
    error::{IngestError, IngestResult, ObjectStoreError},
    ingest::{IngestRequest, Ingestor},
    layouts::{FileType, Layouts},
    normalize::NormalizedBatch,
    object_store::{FsObjectStore, ObjectStore},
    store::{DeletedRows, MemoryStore, RunSummary, SourceLocations, TenderStore},
};

use common::{
    Cell, DISTRICT_HEADERS, TestWorkspace, department_xlsx, district_xls, district_xlsx,
    tender_dbf, tender_record, tender_rows, tender_xlsx, text, xlsx_bytes,
};

const TENDER_KEY: &str = "tender/tender/works.dbf";
const DISTRICT_KEY: &str = "tender/district/districts.xlsx";
const DEPARTMENT_KEY: &str = "tender/department/departments.xlsx";

fn request() -> IngestRequest {
    IngestRequest {
        locations: SourceLocations {
            tender: TENDER_KEY.into(),
            district: DISTRICT_KEY.into(),
            department: DEPARTMENT_KEY.into(),
        },
        submitted_by: "analyst@example.org".into(),
    }
}

fn seed(workspace: &TestWorkspace, tender: usize, district: u32, department: u32) {
    workspace.write(TENDER_KEY, &tender_dbf(&tender_rows(tender as u32)));
    workspace.write(DISTRICT_KEY, &district_xlsx(district));
    workspace.write(DEPARTMENT_KEY, &department_xlsx(department));
}

fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

#[tokio::test]
async fn three_valid_files_are_all_inserted_under_one_run() {
    let workspace = TestWorkspace::new();
    seed(&workspace, 10, 5, 20);
    let store = MemoryStore::new();
    let objects = FsObjectStore::new(workspace.path());
    let layouts = Layouts::builtin().unwrap();

    let report = Ingestor::new(&store, &objects, &layouts)
        .ingest(&request())
        .await
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "runId": report.run_id,
            "tenderResult": {"ok": true, "rowsInserted": 10},
            "districtResult": {"ok": true, "rowsInserted": 5},
            "departmentResult": {"ok": true, "rowsInserted": 20},
        })
    );
    for (file_type, expected) in [
        (FileType::Tender, 10),
        (FileType::District, 5),
        (FileType::Department, 20),
    ] {
        let rows = store.run_rows(file_type, report.run_id);
        assert_eq!(rows.len(), expected, "{file_type}");
    }
    let run = store.run(report.run_id).unwrap();
    assert_eq!(run.created_by, "analyst@example.org");
    assert_eq!(run.locations.tender, TENDER_KEY);
}

#[tokio::test]
async fn zero_sanction_cost_leaves_completion_null() {
    let workspace = TestWorkspace::new();
    seed(&workspace, 0, 2, 2);
    workspace.write(
        TENDER_KEY,
        &tender_dbf(&[
            tender_record(1, 101, "D01", "1000.00", "250.00"),
            tender_record(1, 102, "D01", "0.00", "500.00"),
            tender_record(2, 103, "D02", "300.00", "100.00"),
        ]),
    );
    let store = MemoryStore::new();
    let objects = FsObjectStore::new(workspace.path());
    let layouts = Layouts::builtin().unwrap();

    let report = Ingestor::new(&store, &objects, &layouts)
        .ingest(&request())
        .await
        .unwrap();
    assert!(report.tender_result.ok, "{:?}", report.tender_result);
    assert_eq!(report.tender_result.rows_inserted, 3);

    let columns = FileType::Tender.target().insert_columns();
    let progress = columns.iter().position(|c| *c == "PHYSICAL_PROGRESS").unwrap();
    assert_eq!(progress, columns.len() - 2);
    let rows = store.run_rows(FileType::Tender, report.run_id);
    let completion = rows
        .iter()
        .map(|row| row[progress].as_decimal())
        .collect::<Vec<_>>();
    assert_eq!(completion, vec![Some(dec("25")), None, Some(dec("33.33"))]);
    assert_eq!(rows[0][0], SqlValue::BigInt(Some(report.run_id)));
    assert_eq!(
        rows[0].last().unwrap(),
        &SqlValue::Text(Some("In progress".into()))
    );
}

#[tokio::test]
async fn exported_tender_workbook_keeps_excel_dates() {
    const TENDER_XLSX_KEY: &str = "tender/tender/works.xlsx";
    let workspace = TestWorkspace::new();
    seed(&workspace, 0, 2, 2);
    let sanctioned = NaiveDate::from_ymd_opt(2023, 4, 1).unwrap();
    workspace.write(
        TENDER_XLSX_KEY,
        &tender_xlsx(&[(1, 101, 1000.0, 250.0, sanctioned), (2, 102, 400.0, 100.0, sanctioned)]),
    );
    let mut request = request();
    request.locations.tender = TENDER_XLSX_KEY.into();
    let store = MemoryStore::new();
    let objects = FsObjectStore::new(workspace.path());
    let layouts = Layouts::builtin().unwrap();

    let report = Ingestor::new(&store, &objects, &layouts)
        .ingest(&request)
        .await
        .unwrap();
    assert!(report.tender_result.ok, "{:?}", report.tender_result);
    assert_eq!(report.tender_result.rows_inserted, 2);

    let columns = FileType::Tender.target().insert_columns();
    let position = |name: &str| columns.iter().position(|c| *c == name).unwrap();
    let rows = store.run_rows(FileType::Tender, report.run_id);
    for row in &rows {
        assert_eq!(row[position("SANCTION_DATE")], SqlValue::Date(Some(sanctioned)));
        assert_eq!(
            row[position("FUND_RECEIVED_DATE")],
            SqlValue::Date(NaiveDate::from_ymd_opt(2023, 4, 15))
        );
        assert_eq!(row[position("LAND_RECEIVED_DATE")], SqlValue::Date(None));
        assert_eq!(row[position("PHYSICAL_PROGRESS")].as_decimal(), Some(dec("25")));
    }
}

#[tokio::test]
async fn legacy_xls_district_file_is_inserted() {
    const DISTRICT_XLS_KEY: &str = "tender/district/districts.xls";
    let workspace = TestWorkspace::new();
    seed(&workspace, 2, 0, 2);
    workspace.write(DISTRICT_XLS_KEY, &district_xls(3));
    let mut request = request();
    request.locations.district = DISTRICT_XLS_KEY.into();
    let store = MemoryStore::new();
    let objects = FsObjectStore::new(workspace.path());
    let layouts = Layouts::builtin().unwrap();

    let report = Ingestor::new(&store, &objects, &layouts)
        .ingest(&request)
        .await
        .unwrap();
    assert!(report.district_result.ok, "{:?}", report.district_result);
    assert_eq!(report.district_result.rows_inserted, 3);
    let rows = store.run_rows(FileType::District, report.run_id);
    assert_eq!(rows[0][1], SqlValue::BigInt(Some(1)));
    assert_eq!(rows[2][2], SqlValue::Text(Some("District 3".into())));
    assert_eq!(rows[2][3], SqlValue::Text(Some("West".into())));
}

#[tokio::test]
async fn district_without_zone_fails_alone() {
    let workspace = TestWorkspace::new();
    seed(&workspace, 4, 0, 3);
    let rows = vec![vec![Cell::Number(1.0), text("Pune")]];
    workspace.write(DISTRICT_KEY, &xlsx_bytes(&DISTRICT_HEADERS[..2], &rows));
    let store = MemoryStore::new();
    let objects = FsObjectStore::new(workspace.path());
    let layouts = Layouts::builtin().unwrap();

    let report = Ingestor::new(&store, &objects, &layouts)
        .ingest(&request())
        .await
        .unwrap();

    assert!(report.tender_result.ok);
    assert!(report.department_result.ok);
    assert!(!report.district_result.ok);
    assert_eq!(report.district_result.rows_inserted, 0);
    let message = report.district_result.error.as_deref().unwrap();
    assert!(message.contains("missing [\"zone\"]"), "{message}");
    assert!(store.run_rows(FileType::District, report.run_id).is_empty());
}

#[tokio::test]
async fn unsupported_extension_is_rejected_before_any_storage_call() {
    let workspace = TestWorkspace::new();
    seed(&workspace, 1, 1, 1);
    let store = MemoryStore::new();
    let objects = FsObjectStore::new(workspace.path());
    let layouts = Layouts::builtin().unwrap();
    let mut request = request();
    request.locations.department = "tender/department/departments.csv".into();

    let err = Ingestor::new(&store, &objects, &layouts)
        .ingest(&request)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Format(_)), "{err}");
    assert!(store.run(1).is_none());
}

#[tokio::test]
async fn missing_object_is_a_per_file_failure() {
    let workspace = TestWorkspace::new();
    seed(&workspace, 2, 2, 2);
    std::fs::remove_file(workspace.path().join(DEPARTMENT_KEY)).unwrap();
    let store = MemoryStore::new();
    let objects = FsObjectStore::new(workspace.path());
    let layouts = Layouts::builtin().unwrap();

    let report = Ingestor::new(&store, &objects, &layouts)
        .ingest(&request())
        .await
        .unwrap();
    assert!(report.tender_result.ok && report.district_result.ok);
    let message = report.department_result.error.as_deref().unwrap();
    assert!(message.contains(DEPARTMENT_KEY), "{message}");
}

#[tokio::test]
async fn empty_worksheet_is_reported_as_empty_input() {
    let workspace = TestWorkspace::new();
    seed(&workspace, 2, 2, 2);
    workspace.write(DISTRICT_KEY, &xlsx_bytes(&DISTRICT_HEADERS, &[]));
    let store = MemoryStore::new();
    let objects = FsObjectStore::new(workspace.path());
    let layouts = Layouts::builtin().unwrap();

    let report = Ingestor::new(&store, &objects, &layouts)
        .ingest(&request())
        .await
        .unwrap();
    let message = report.district_result.error.as_deref().unwrap();
    assert!(message.contains("contains no data rows"), "{message}");
}

/// Store whose database is unreachable.
#[derive(Default)]
struct UnreachableStore {
    inserts: AtomicUsize,
}

#[async_trait]
impl TenderStore for UnreachableStore {
    async fn create_run(&self, _: &SourceLocations, _: &str) -> IngestResult<i64> {
        Err(IngestError::persistence(
            "create run",
            io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
        ))
    }

    async fn insert_rows(&self, _: &NormalizedBatch) -> IngestResult<usize> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn delete_run(&self, _: i64) -> IngestResult<DeletedRows> {
        Ok(DeletedRows::default())
    }

    async fn run_summary(&self, _: i64) -> IngestResult<Option<RunSummary>> {
        Ok(None)
    }
}

/// Object store that counts reads and never has anything.
#[derive(Default)]
struct CountingObjects {
    reads: AtomicUsize,
}

#[async_trait]
impl ObjectStore for CountingObjects {
    async fn get_stream(&self, _: &str) -> Result<Vec<u8>, ObjectStoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Err(ObjectStoreError::NotFound)
    }

    async fn put_stream(&self, _: &[u8], _: &str) -> Result<(), ObjectStoreError> {
        Ok(())
    }
}

#[tokio::test]
async fn run_creation_failure_aborts_before_any_file_is_read() {
    let store = UnreachableStore::default();
    let objects = CountingObjects::default();
    let layouts = Layouts::builtin().unwrap();

    let err = Ingestor::new(&store, &objects, &layouts)
        .ingest(&request())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Persistence { .. }), "{err}");
    assert_eq!(objects.reads.load(Ordering::SeqCst), 0);
    assert_eq!(store.inserts.load(Ordering::SeqCst), 0);
}

/// Object store that never answers.
struct StalledObjects;

#[async_trait]
impl ObjectStore for StalledObjects {
    async fn get_stream(&self, _: &str) -> Result<Vec<u8>, ObjectStoreError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(ObjectStoreError::NotFound)
    }

    async fn put_stream(&self, _: &[u8], _: &str) -> Result<(), ObjectStoreError> {
        Ok(())
    }
}

#[tokio::test]
async fn slow_fetches_time_out_per_file() {
    let store = MemoryStore::new();
    let layouts = Layouts::builtin().unwrap();

    let report = Ingestor::new(&store, &StalledObjects, &layouts)
        .with_fetch_timeout(Duration::from_millis(20))
        .ingest(&request())
        .await
        .unwrap();

    assert!(!report.all_ok());
    assert_eq!(report.failed_files().len(), 3);
    let message = report.tender_result.error.as_deref().unwrap();
    assert!(message.contains("timed out"), "{message}");
}

#[tokio::test]
async fn summary_reports_totals_and_unmatched_department_codes() {
    let workspace = TestWorkspace::new();
    seed(&workspace, 0, 1, 1);
    workspace.write(
        TENDER_KEY,
        &tender_dbf(&[
            tender_record(1, 1, "D01", "1000.00", "250.00"),
            tender_record(1, 2, "X99", "500.00", "500.00"),
            tender_record(1, 3, "D01", "0.00", "40.00"),
        ]),
    );
    let store = MemoryStore::new();
    let objects = FsObjectStore::new(workspace.path());
    let layouts = Layouts::builtin().unwrap();
    let report = Ingestor::new(&store, &objects, &layouts)
        .ingest(&request())
        .await
        .unwrap();
    assert!(report.all_ok(), "{report:?}");

    let summary = store.run_summary(report.run_id).await.unwrap().unwrap();
    assert_eq!(summary.tender_rows, 3);
    assert_eq!(summary.district_rows, 1);
    assert_eq!(summary.department_rows, 1);
    assert_eq!(summary.total_sanction_cost, Some(dec("1500")));
    assert_eq!(summary.total_wip, Some(dec("790")));
    assert_eq!(summary.average_completion, Some(dec("62.5")));
    assert_eq!(summary.unmatched_department_codes, vec!["X99"]);
}
