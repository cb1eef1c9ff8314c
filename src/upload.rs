//! Storing user-supplied source files in the object store.

use std::path::Path;

use serde::Serialize;
use uuid::Uuid;

use crate::{
    decode::SourceFormat,
    error::{IngestError, IngestResult},
    layouts::FileType,
    object_store::ObjectStore,
};

pub const MAX_UPLOAD_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub success: bool,
    /// Object-store key to pass to `ingest`.
    pub filename: String,
    pub original_filename: String,
}

/// `tender/<file-type>/<uuid><ext>`, with the extension lower-cased.
pub fn object_key(file_type: FileType, original_name: &str) -> IngestResult<String> {
    let format = SourceFormat::from_location(original_name)?;
    Ok(format!(
        "tender/{}/{}{}",
        file_type.as_str(),
        Uuid::new_v4(),
        format.extension()
    ))
}

pub fn check_size(original_name: &str, size: u64) -> IngestResult<()> {
    if size > MAX_UPLOAD_BYTES {
        return Err(IngestError::format(format!(
            "'{original_name}' is {size} bytes; uploads are limited to {MAX_UPLOAD_BYTES} bytes"
        )));
    }
    Ok(())
}

pub async fn store_upload(
    objects: &dyn ObjectStore,
    file_type: FileType,
    original_name: &str,
    bytes: &[u8],
) -> IngestResult<UploadReceipt> {
    check_size(original_name, bytes.len() as u64)?;
    let key = object_key(file_type, original_name)?;
    objects
        .put_stream(bytes, &key)
        .await
        .map_err(|source| IngestError::Source {
            location: key.clone(),
            source,
        })?;
    Ok(UploadReceipt {
        success: true,
        filename: key,
        original_filename: file_name(original_name),
    })
}

fn file_name(original: &str) -> String {
    Path::new(original)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(original)
        .to_string()
}
