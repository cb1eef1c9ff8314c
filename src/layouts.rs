//! Target tables and the versioned expected-header configuration.
//!
//! The database side of the contract (table names, target columns, their
//! types, and where the derived completion metric goes) is fixed here in
//! code. The spreadsheet side, the literal header spellings each source
//! revision uses, lives in YAML so a new revision can be added without
//! touching the pipeline. A built-in copy of `config/layouts.yaml` is
//! compiled into the binary.

use std::{collections::HashSet, fmt, fs::File, io::BufReader, path::Path, str::FromStr};

use anyhow::{Context, Result, anyhow, ensure};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

const BUILTIN_LAYOUTS: &str = include_str!("../config/layouts.yaml");

pub const RUN_TABLE: &str = "tender_master";
pub const RUN_ID_COLUMN: &str = "tndr_pk";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Tender,
    District,
    Department,
}

impl FileType {
    pub const ALL: [FileType; 3] = [FileType::Tender, FileType::District, FileType::Department];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Tender => "tender",
            FileType::District => "district",
            FileType::Department => "department",
        }
    }

    pub fn target(&self) -> &'static TargetTable {
        match self {
            FileType::Tender => &TENDER_TABLE,
            FileType::District => &DISTRICT_TABLE,
            FileType::Department => &DEPARTMENT_TABLE,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tender" => Ok(FileType::Tender),
            "district" => Ok(FileType::District),
            "department" | "dept" => Ok(FileType::Department),
            other => Err(anyhow!(
                "Unknown file type '{other}'. Supported types: tender, district, department"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Numeric,
    Text,
    Date,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Numeric => "numeric",
            ColumnType::Text => "text",
            ColumnType::Date => "date",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TargetColumn {
    pub name: &'static str,
    pub datatype: ColumnType,
}

/// A metric computed during normalization as `numerator / denominator * 100`
/// and inserted immediately before the last target column.
#[derive(Debug, Clone, Copy)]
pub struct DerivedMetric {
    pub name: &'static str,
    pub numerator: &'static str,
    pub denominator: &'static str,
}

#[derive(Debug)]
pub struct TargetTable {
    pub name: &'static str,
    pub columns: &'static [TargetColumn],
    pub derived: Option<DerivedMetric>,
}

impl TargetTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Column order of an insert statement: run id, source columns, and the
    /// derived metric placed just before the final source column.
    pub fn insert_columns(&self) -> Vec<&'static str> {
        let mut columns = Vec::with_capacity(self.columns.len() + 2);
        columns.push(RUN_ID_COLUMN);
        columns.extend(self.columns.iter().map(|c| c.name));
        if let Some(derived) = &self.derived {
            let at = columns.len() - 1;
            columns.insert(at, derived.name);
        }
        columns
    }
}

const fn col(name: &'static str, datatype: ColumnType) -> TargetColumn {
    TargetColumn { name, datatype }
}

pub static TENDER_TABLE: TargetTable = TargetTable {
    name: "TENDER_DATA_DTLS",
    columns: &[
        col("DISTRICT_CODE", ColumnType::Integer),
        col("WORK_CODE", ColumnType::Integer),
        col("DEPARTMENT_CODE", ColumnType::Text),
        col("PROJECT_NAME", ColumnType::Text),
        col("SANCTION_COST", ColumnType::Numeric),
        col("SANCTION_DATE", ColumnType::Date),
        col("FUND_RECEIVED", ColumnType::Numeric),
        col("FUND_RECEIVED_DATE", ColumnType::Date),
        col("LAND_RECEIVED_DATE", ColumnType::Date),
        col("WIP_PREVIOUS_YEAR", ColumnType::Numeric),
        col("WIP_CURRENT_YEAR", ColumnType::Numeric),
        col("WIP_CURRENT_MONTH", ColumnType::Numeric),
        col("WIP_TOTAL", ColumnType::Numeric),
        col("PHYSICAL_PROGRESS_REMARK", ColumnType::Text),
    ],
    derived: Some(DerivedMetric {
        name: "PHYSICAL_PROGRESS",
        numerator: "WIP_TOTAL",
        denominator: "SANCTION_COST",
    }),
};

pub static DISTRICT_TABLE: TargetTable = TargetTable {
    name: "DISTRICT_DETAILS",
    columns: &[
        col("DIST_CODE", ColumnType::Integer),
        col("DIST_NAME", ColumnType::Text),
        col("ZONE", ColumnType::Text),
    ],
    derived: None,
};

pub static DEPARTMENT_TABLE: TargetTable = TargetTable {
    name: "DEPT_DTLS",
    columns: &[
        col("SR_NO", ColumnType::Text),
        col("DEPT_NAME", ColumnType::Text),
        col("SUB_DEPT_NAME", ColumnType::Text),
        col("DEPT_SUB_DEPT_CODE", ColumnType::Text),
    ],
    derived: None,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Revision {
    pub revision: String,
    pub headers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layouts {
    pub version: u32,
    pub tender: Vec<Revision>,
    pub district: Vec<Revision>,
    pub department: Vec<Revision>,
}

impl Layouts {
    pub fn builtin() -> Result<Self> {
        Self::from_yaml_str(BUILTIN_LAYOUTS).context("Parsing built-in layouts")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening layouts file {path:?}"))?;
        let layouts: Layouts = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing layouts YAML {path:?}"))?;
        layouts.validate()?;
        Ok(layouts)
    }

    /// Loads `path` when given, otherwise the built-in layouts.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let layouts: Layouts = serde_yaml::from_str(yaml).context("Parsing layouts YAML")?;
        layouts.validate()?;
        Ok(layouts)
    }

    pub fn revisions(&self, file_type: FileType) -> &[Revision] {
        match file_type {
            FileType::Tender => &self.tender,
            FileType::District => &self.district,
            FileType::Department => &self.department,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for file_type in FileType::ALL {
            let revisions = self.revisions(file_type);
            let expected = file_type.target().columns.len();
            ensure!(
                !revisions.is_empty(),
                "Layouts define no revision for {file_type} files"
            );
            let mut names = HashSet::new();
            for revision in revisions {
                ensure!(
                    names.insert(revision.revision.as_str()),
                    "Duplicate {file_type} revision '{}'",
                    revision.revision
                );
                ensure!(
                    revision.headers.len() == expected,
                    "{file_type} revision '{}' lists {} header(s) but the target table has {} column(s)",
                    revision.revision,
                    revision.headers.len(),
                    expected
                );
                let mut seen = HashSet::new();
                for header in &revision.headers {
                    ensure!(
                        seen.insert(header.as_str()),
                        "{file_type} revision '{}' repeats header '{header}'",
                        revision.revision
                    );
                }
            }
        }
        Ok(())
    }
}
