//! Encoding and scratch-file helpers shared by the decoders.
//!
//! - **Encoding**: DBF character fields are decoded via `encoding_rs`,
//!   defaulting to UTF-8 and failing loudly on malformed input.
//! - **Spooling**: the DBF reader works from a transient local file that is
//!   removed when the returned handle drops, on success and on error alike.

use std::io::{self, Write};

use anyhow::{Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use tempfile::NamedTempFile;

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

/// Writes `bytes` to a fresh temporary file carrying `suffix`. The file is
/// deleted when the returned handle is dropped.
pub fn spool_to_tempfile(bytes: &[u8], suffix: &str) -> io::Result<NamedTempFile> {
    let mut spool = tempfile::Builder::new()
        .prefix("tender-ingest-")
        .suffix(suffix)
        .tempfile()?;
    spool.write_all(bytes)?;
    spool.flush()?;
    Ok(spool)
}
