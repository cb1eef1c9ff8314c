//! Orchestration of one ingestion request.
//!
//! A request names three object-store locations. All three extensions are
//! checked up front, then one run row is created, then each file runs its
//! own decode → map → normalize → write pipeline. A failed file is recorded
//! in the report and does not stop its siblings; only run creation (or an
//! unsupported extension) fails the request as a whole.

use std::time::Duration;

use log::{error, info};
use serde::Serialize;

use crate::{
    decode::{self, DecodeOptions, SourceFormat},
    error::{IngestError, IngestResult, ObjectStoreError},
    layouts::{FileType, Layouts},
    mapper,
    normalize::{self, NormalizedBatch},
    object_store::ObjectStore,
    store::{SourceLocations, TenderStore},
};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    pub locations: SourceLocations,
    pub submitted_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutcome {
    pub ok: bool,
    pub rows_inserted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileOutcome {
    pub fn inserted(rows: usize) -> Self {
        Self {
            ok: true,
            rows_inserted: rows,
            error: None,
        }
    }

    pub fn failed(err: &IngestError) -> Self {
        Self {
            ok: false,
            rows_inserted: 0,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub run_id: i64,
    pub tender_result: FileOutcome,
    pub district_result: FileOutcome,
    pub department_result: FileOutcome,
}

impl IngestReport {
    pub fn result(&self, file_type: FileType) -> &FileOutcome {
        match file_type {
            FileType::Tender => &self.tender_result,
            FileType::District => &self.district_result,
            FileType::Department => &self.department_result,
        }
    }

    pub fn all_ok(&self) -> bool {
        FileType::ALL.iter().all(|ft| self.result(*ft).ok)
    }

    pub fn failed_files(&self) -> Vec<FileType> {
        FileType::ALL
            .into_iter()
            .filter(|ft| !self.result(*ft).ok)
            .collect()
    }
}

/// Runs the synchronous part of one file's pipeline on bytes already in
/// memory.
pub fn prepare_batch(
    bytes: &[u8],
    file_type: FileType,
    location: &str,
    layouts: &Layouts,
    options: &DecodeOptions,
    run_id: i64,
) -> IngestResult<NormalizedBatch> {
    let format = SourceFormat::from_location(location)?;
    let decoded = decode::decode(bytes, format, options, location)?;
    let mapped = mapper::select_columns(decoded, file_type, layouts)?;
    normalize::normalize(mapped, run_id)
}

pub struct Ingestor<'a> {
    store: &'a dyn TenderStore,
    objects: &'a dyn ObjectStore,
    layouts: &'a Layouts,
    options: DecodeOptions,
    fetch_timeout: Duration,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        store: &'a dyn TenderStore,
        objects: &'a dyn ObjectStore,
        layouts: &'a Layouts,
    ) -> Self {
        Self {
            store,
            objects,
            layouts,
            options: DecodeOptions::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_decode_options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub async fn ingest(&self, request: &IngestRequest) -> IngestResult<IngestReport> {
        for file_type in FileType::ALL {
            SourceFormat::from_location(request.locations.get(file_type))?;
        }

        let run_id = self
            .store
            .create_run(&request.locations, &request.submitted_by)
            .await?;
        info!("Created ingestion run {run_id} for '{}'", request.submitted_by);

        let tender_result = self.ingest_file(FileType::Tender, request, run_id).await;
        let district_result = self.ingest_file(FileType::District, request, run_id).await;
        let department_result = self.ingest_file(FileType::Department, request, run_id).await;

        Ok(IngestReport {
            run_id,
            tender_result,
            district_result,
            department_result,
        })
    }

    async fn ingest_file(
        &self,
        file_type: FileType,
        request: &IngestRequest,
        run_id: i64,
    ) -> FileOutcome {
        let location = request.locations.get(file_type);
        info!("Run {run_id}: processing {file_type} file '{location}'");
        match self.process_file(file_type, location, run_id).await {
            Ok(rows) => {
                info!("Run {run_id}: inserted {rows} {file_type} row(s)");
                FileOutcome::inserted(rows)
            }
            Err(err) => {
                error!(
                    "Run {run_id}: {file_type} file '{location}' failed ({}): {err}",
                    err.kind()
                );
                FileOutcome::failed(&err)
            }
        }
    }

    async fn process_file(
        &self,
        file_type: FileType,
        location: &str,
        run_id: i64,
    ) -> IngestResult<usize> {
        let bytes = self.fetch(location).await?;
        let batch = prepare_batch(
            &bytes,
            file_type,
            location,
            self.layouts,
            &self.options,
            run_id,
        )?;
        drop(bytes);
        self.store.insert_rows(&batch).await
    }

    async fn fetch(&self, location: &str) -> IngestResult<Vec<u8>> {
        match tokio::time::timeout(self.fetch_timeout, self.objects.get_stream(location)).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(source)) => Err(IngestError::Source {
                location: location.to_string(),
                source,
            }),
            Err(_) => Err(IngestError::Source {
                location: location.to_string(),
                source: ObjectStoreError::Timeout(self.fetch_timeout),
            }),
        }
    }
}
