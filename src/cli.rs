use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::layouts::FileType;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Ingest tender, district and department source files into Postgres",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ingest one tender, district and department file under a new run
    Ingest(IngestArgs),
    /// Store a local source file in the object store
    Upload(UploadArgs),
    /// Decode a local file and show its columns, layout match and first rows
    Inspect(InspectArgs),
    /// List the expected-header revisions for each file type
    Layouts(LayoutsArgs),
    /// Delete a run and every row tagged with it
    DeleteRun(RunArgs),
    /// Print headline figures for a run as JSON
    Summary(RunArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct LayoutSource {
    /// YAML file overriding the built-in expected-header revisions
    #[arg(long = "layouts")]
    pub layouts: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Object-store key of the tender file (.dbf, .xls or .xlsx)
    #[arg(long)]
    pub tender: String,
    /// Object-store key of the district file
    #[arg(long)]
    pub district: String,
    /// Object-store key of the department file
    #[arg(long)]
    pub department: String,
    /// Identity recorded as the run's creator
    #[arg(long = "submitted-by", default_value = "cli")]
    pub submitted_by: String,
    #[command(flatten)]
    pub layout_source: LayoutSource,
    /// Character encoding of DBF text fields (defaults to the file's language driver, else utf-8)
    #[arg(long = "dbf-encoding")]
    pub dbf_encoding: Option<String>,
    /// Object-store root directory (overrides OBJECT_STORE_ROOT)
    #[arg(long = "object-root")]
    pub object_root: Option<PathBuf>,
    /// Rows per insert statement (overrides INSERT_CHUNK_SIZE)
    #[arg(long = "chunk-size")]
    pub chunk_size: Option<usize>,
    /// Run the whole pipeline against an in-memory store instead of Postgres
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Exit successfully even when some files failed
    #[arg(long = "allow-partial")]
    pub allow_partial: bool,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Which of the three source files this is
    #[arg(short = 't', long = "file-type", value_enum)]
    pub file_type: FileType,
    /// Local file to upload
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Object-store root directory (overrides OBJECT_STORE_ROOT)
    #[arg(long = "object-root")]
    pub object_root: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Local file to decode
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Only check the layout of this file type
    #[arg(short = 't', long = "file-type", value_enum)]
    pub file_type: Option<FileType>,
    /// Number of data rows to preview (0 disables the preview)
    #[arg(long, default_value_t = 10)]
    pub preview: usize,
    #[command(flatten)]
    pub layout_source: LayoutSource,
    /// Character encoding of DBF text fields (defaults to the file's language driver, else utf-8)
    #[arg(long = "dbf-encoding")]
    pub dbf_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct LayoutsArgs {
    /// Only list this file type
    #[arg(short = 't', long = "file-type", value_enum)]
    pub file_type: Option<FileType>,
    #[command(flatten)]
    pub layout_source: LayoutSource,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Run identifier returned by `ingest`
    #[arg(long = "run-id")]
    pub run_id: i64,
}
