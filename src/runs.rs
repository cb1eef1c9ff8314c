//! Run-level read and maintenance operations, fronted by the cache.

use log::{debug, warn};

use crate::{
    cache::Cache,
    error::IngestResult,
    store::{DeletedRows, RunSummary, TenderStore},
};

pub fn summary_cache_key(run_id: i64) -> String {
    format!("summary:{run_id}")
}

pub async fn run_summary(
    store: &dyn TenderStore,
    cache: &Cache,
    run_id: i64,
) -> IngestResult<Option<RunSummary>> {
    let key = summary_cache_key(run_id);
    if let Some(cached) = cache.get(&key).await {
        match serde_json::from_str::<RunSummary>(&cached) {
            Ok(summary) => {
                debug!("Run {run_id} summary served from cache");
                return Ok(Some(summary));
            }
            Err(err) => warn!("Ignoring unreadable cached summary for run {run_id}: {err}"),
        }
    }

    let summary = store.run_summary(run_id).await?;
    if let Some(summary) = &summary {
        match serde_json::to_string(summary) {
            Ok(json) => cache.set(&key, &json).await,
            Err(err) => warn!("Cannot cache summary for run {run_id}: {err}"),
        }
    }
    Ok(summary)
}

pub async fn delete_run(
    store: &dyn TenderStore,
    cache: &Cache,
    run_id: i64,
) -> IngestResult<DeletedRows> {
    let deleted = store.delete_run(run_id).await?;
    cache.delete(&summary_cache_key(run_id)).await;
    Ok(deleted)
}
