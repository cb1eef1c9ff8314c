#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rust_xlsxwriter::{Format, Workbook};
use tempfile::{TempDir, tempdir};

/// Scratch directory that doubles as an object-store root.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `bytes` at `key` (nested directories allowed) and returns the path.
    pub fn write(&self, key: &str, bytes: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create fixture dir");
        }
        fs::write(&path, bytes).expect("write fixture");
        path
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DbfColumn {
    pub name: &'static str,
    pub kind: u8,
    pub length: u8,
    pub decimals: u8,
}

const fn field(name: &'static str, kind: u8, length: u8, decimals: u8) -> DbfColumn {
    DbfColumn {
        name,
        kind,
        length,
        decimals,
    }
}

pub const TENDER_FIELDS: [DbfColumn; 14] = [
    field("DST_CD", b'N', 4, 0),
    field("WRK_CD", b'N', 4, 0),
    field("DPT_CD", b'C', 5, 0),
    field("WRK_NM", b'C', 32, 0),
    field("SAN_COST", b'N', 7, 2),
    field("SAN_DT", b'D', 8, 0),
    field("F_CL", b'N', 7, 2),
    field("F_CL_DT", b'D', 8, 0),
    field("LND_DT", b'D', 8, 0),
    field("WIP_31", b'N', 7, 2),
    field("WIP_1", b'N', 7, 2),
    field("WIP_CM", b'N', 7, 2),
    field("WIP_CR", b'N', 7, 2),
    field("PHY1", b'C', 15, 0),
];

/// dBASE III table with the given fields; numeric values are right-aligned,
/// everything else left-aligned. Records flagged `true` are marked deleted.
pub fn dbf_bytes(fields: &[DbfColumn], records: &[(bool, Vec<String>)]) -> Vec<u8> {
    let record_len = 1 + fields.iter().map(|f| f.length as usize).sum::<usize>();
    let header_len = 32 + fields.len() * 32 + 1;
    let mut out = vec![0u8; 32];
    out[0] = 0x03;
    out[1..4].copy_from_slice(&[124, 1, 15]);
    out[4..8].copy_from_slice(&(records.len() as u32).to_le_bytes());
    out[8..10].copy_from_slice(&(header_len as u16).to_le_bytes());
    out[10..12].copy_from_slice(&(record_len as u16).to_le_bytes());
    for f in fields {
        let mut descriptor = [0u8; 32];
        descriptor[..f.name.len()].copy_from_slice(f.name.as_bytes());
        descriptor[11] = f.kind;
        descriptor[16] = f.length;
        descriptor[17] = f.decimals;
        out.extend_from_slice(&descriptor);
    }
    out.push(0x0D);
    for (deleted, values) in records {
        assert_eq!(values.len(), fields.len(), "one value per field");
        out.push(if *deleted { b'*' } else { b' ' });
        for (f, value) in fields.iter().zip(values) {
            let width = f.length as usize;
            assert!(value.len() <= width, "{value:?} too wide for {}", f.name);
            let padded = if f.kind == b'N' {
                format!("{value:>width$}")
            } else {
                format!("{value:<width$}")
            };
            out.extend_from_slice(padded.as_bytes());
        }
    }
    out.push(0x1A);
    out
}

/// One tender record; money columns are two-decimal strings, `""` is blank.
pub fn tender_record(district: u32, work: u32, dept: &str, cost: &str, wip_total: &str) -> Vec<String> {
    vec![
        district.to_string(),
        work.to_string(),
        dept.to_string(),
        format!("Work {work}"),
        cost.to_string(),
        "20230401".to_string(),
        "100.00".to_string(),
        "20230415".to_string(),
        String::new(),
        "10.00".to_string(),
        "20.00".to_string(),
        "5.00".to_string(),
        wip_total.to_string(),
        "In progress".to_string(),
    ]
}

pub fn tender_dbf(records: &[Vec<String>]) -> Vec<u8> {
    let records = records
        .iter()
        .map(|r| (false, r.clone()))
        .collect::<Vec<_>>();
    dbf_bytes(&TENDER_FIELDS, &records)
}

/// Tender table of `count` rows, all with a positive sanction cost.
pub fn tender_rows(count: u32) -> Vec<Vec<String>> {
    (1..=count)
        .map(|i| tender_record(i % 36 + 1, i, &format!("D{:02}", i % 5), "1000.00", "250.00"))
        .collect()
}

#[derive(Debug, Clone)]
pub enum Cell {
    Text(String),
    Number(f64),
    /// Serial number under a `yyyy-mm-dd` format, the way Excel stores dates.
    Date(NaiveDate),
    Blank,
}

pub fn text(value: &str) -> Cell {
    Cell::Text(value.to_string())
}

/// Single-sheet workbook: `headers` in row 0, then `rows`.
pub fn xlsx_bytes(headers: &[&str], rows: &[Vec<Cell>]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    let date_format = Format::new().set_num_format("yyyy-mm-dd");
    let sheet = workbook.add_worksheet();
    for (col, header) in headers.iter().enumerate() {
        sheet
            .write_string(0, col as u16, *header)
            .expect("write header");
    }
    for (r, row) in rows.iter().enumerate() {
        let r = r as u32 + 1;
        for (col, cell) in row.iter().enumerate() {
            let col = col as u16;
            match cell {
                Cell::Text(value) => {
                    sheet.write_string(r, col, value).expect("write text");
                }
                Cell::Number(value) => {
                    sheet.write_number(r, col, *value).expect("write number");
                }
                Cell::Date(value) => {
                    sheet
                        .write_number_with_format(r, col, excel_serial(*value), &date_format)
                        .expect("write date");
                }
                Cell::Blank => {}
            }
        }
    }
    workbook.save_to_buffer().expect("serialize workbook")
}

/// Days since the 1899-12-30 epoch of the 1900 date system.
pub fn excel_serial(date: NaiveDate) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30).expect("epoch");
    (date - epoch).num_days() as f64
}

pub const DISTRICT_HEADERS: [&str; 3] = ["Dst CD", "Dst _Name", "zone"];

pub const DEPARTMENT_HEADERS: [&str; 4] = [
    "Sr.N.",
    "Dept. Name",
    "Sub. Dept. Name",
    "Dept./Sub. Dept.  Code",
];

pub fn district_xlsx(count: u32) -> Vec<u8> {
    let rows = (1..=count)
        .map(|i| {
            vec![
                Cell::Number(f64::from(i)),
                text(&format!("District {i}")),
                text(if i % 2 == 0 { "East" } else { "West" }),
            ]
        })
        .collect::<Vec<_>>();
    xlsx_bytes(&DISTRICT_HEADERS, &rows)
}

pub fn department_xlsx(count: u32) -> Vec<u8> {
    let rows = (1..=count)
        .map(|i| {
            vec![
                Cell::Number(f64::from(i)),
                text(&format!("Department {}", i % 5)),
                text(&format!("Section {i}")),
                text(&format!("D{:02}", i % 5)),
            ]
        })
        .collect::<Vec<_>>();
    xlsx_bytes(&DEPARTMENT_HEADERS, &rows)
}

/// Headers of a tender sheet exported from the DBF, with the field types
/// still attached.
pub const TENDER_EXPORT_HEADERS: [&str; 14] = [
    "DST_CD,N,4,0",
    "WRK_CD,N,4,0",
    "DPT_CD,C,5",
    "WRK_NM,C,32",
    "SAN_COST,N,7,2",
    "SAN_DT,D",
    "F_CL,N,7,2",
    "F_CL_DT,D",
    "LND_DT,D",
    "WIP_31,N,7,2",
    "WIP_1,N,7,2",
    "WIP_CM,N,7,2",
    "WIP_CR,N,7,2",
    "PHY1,C,15",
];

/// Tender workbook with real date cells; the land date is left blank.
pub fn tender_xlsx(rows: &[(u32, u32, f64, f64, NaiveDate)]) -> Vec<u8> {
    let rows = rows
        .iter()
        .map(|(district, work, cost, wip_total, sanctioned)| {
            vec![
                Cell::Number(f64::from(*district)),
                Cell::Number(f64::from(*work)),
                text(&format!("D{:02}", district % 5)),
                text(&format!("Work {work}")),
                Cell::Number(*cost),
                Cell::Date(*sanctioned),
                Cell::Number(100.0),
                Cell::Date(*sanctioned + chrono::Days::new(14)),
                Cell::Blank,
                Cell::Number(10.0),
                Cell::Number(20.0),
                Cell::Number(5.0),
                Cell::Number(*wip_total),
                text("In progress"),
            ]
        })
        .collect::<Vec<_>>();
    xlsx_bytes(&TENDER_EXPORT_HEADERS, &rows)
}

const SECTOR: usize = 512;
const FREE_SECTOR: u32 = 0xFFFF_FFFF;
const END_OF_CHAIN: u32 = 0xFFFF_FFFE;
const FAT_SECTOR: u32 = 0xFFFF_FFFD;

fn biff_record(out: &mut Vec<u8>, kind: u16, body: &[u8]) {
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.extend_from_slice(body);
}

fn biff_bof(out: &mut Vec<u8>, substream: u16) {
    let mut body = [0u8; 16];
    body[..2].copy_from_slice(&0x0600u16.to_le_bytes());
    body[2..4].copy_from_slice(&substream.to_le_bytes());
    biff_record(out, 0x0809, &body);
}

fn biff_cell_prefix(row: u16, col: u16) -> Vec<u8> {
    let mut body = Vec::with_capacity(14);
    body.extend_from_slice(&row.to_le_bytes());
    body.extend_from_slice(&col.to_le_bytes());
    body.extend_from_slice(&0u16.to_le_bytes());
    body
}

fn biff_label(sheet: &mut Vec<u8>, row: u16, col: u16, value: &str) {
    assert!(value.is_ascii() && !value.is_empty(), "{value:?}");
    let mut body = biff_cell_prefix(row, col);
    body.extend_from_slice(&(value.len() as u16).to_le_bytes());
    body.push(0);
    body.extend_from_slice(value.as_bytes());
    biff_record(sheet, 0x0204, &body);
}

/// BIFF8 workbook stream holding one worksheet named `Sheet1`. Labels use
/// the one-byte-per-character form, so text must be ASCII.
fn biff8_stream(headers: &[&str], rows: &[Vec<Cell>]) -> Vec<u8> {
    const SHEET_NAME: &str = "Sheet1";
    let mut globals = Vec::new();
    biff_bof(&mut globals, 0x0005);
    let bound_sheet_at = globals.len();
    let mut bound_sheet = vec![0u8; 6];
    bound_sheet.push(SHEET_NAME.len() as u8);
    bound_sheet.push(0);
    bound_sheet.extend_from_slice(SHEET_NAME.as_bytes());
    biff_record(&mut globals, 0x0085, &bound_sheet);
    biff_record(&mut globals, 0x000A, &[]);

    let sheet_start = globals.len() as u32;
    // lbPlyPos sits right after the BoundSheet8 record header.
    globals[bound_sheet_at + 4..bound_sheet_at + 8].copy_from_slice(&sheet_start.to_le_bytes());

    let mut sheet = Vec::new();
    biff_bof(&mut sheet, 0x0010);
    for (col, header) in headers.iter().enumerate() {
        biff_label(&mut sheet, 0, col as u16, header);
    }
    for (r, row) in rows.iter().enumerate() {
        let r = r as u16 + 1;
        for (col, cell) in row.iter().enumerate() {
            let col = col as u16;
            match cell {
                Cell::Text(value) => biff_label(&mut sheet, r, col, value),
                Cell::Number(value) => {
                    let mut body = biff_cell_prefix(r, col);
                    body.extend_from_slice(&value.to_le_bytes());
                    biff_record(&mut sheet, 0x0203, &body);
                }
                Cell::Date(_) => panic!("xls fixtures carry no number formats"),
                Cell::Blank => {}
            }
        }
    }
    biff_record(&mut sheet, 0x000A, &[]);

    globals.extend_from_slice(&sheet);
    globals
}

/// Legacy `.xls` workbook: a compound file with one `Workbook` stream,
/// one FAT sector and one directory sector.
pub fn xls_bytes(headers: &[&str], rows: &[Vec<Cell>]) -> Vec<u8> {
    let mut stream = biff8_stream(headers, rows);
    // Streams below 4096 bytes would live in the mini stream.
    let padded = stream.len().max(4096).div_ceil(SECTOR) * SECTOR;
    stream.resize(padded, 0);
    let stream_sectors = padded / SECTOR;
    assert!(stream_sectors + 2 <= SECTOR / 4, "fixture too large for one FAT sector");

    let mut header = vec![0u8; SECTOR];
    header[..8].copy_from_slice(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]);
    header[24..26].copy_from_slice(&0x003Eu16.to_le_bytes());
    header[26..28].copy_from_slice(&3u16.to_le_bytes());
    header[28..30].copy_from_slice(&0xFFFEu16.to_le_bytes());
    header[30..32].copy_from_slice(&9u16.to_le_bytes());
    header[32..34].copy_from_slice(&6u16.to_le_bytes());
    header[44..48].copy_from_slice(&1u32.to_le_bytes());
    header[48..52].copy_from_slice(&1u32.to_le_bytes());
    header[56..60].copy_from_slice(&4096u32.to_le_bytes());
    header[60..64].copy_from_slice(&END_OF_CHAIN.to_le_bytes());
    header[68..72].copy_from_slice(&END_OF_CHAIN.to_le_bytes());
    for slot in header[76..].chunks_mut(4) {
        slot.copy_from_slice(&FREE_SECTOR.to_le_bytes());
    }
    header[76..80].copy_from_slice(&0u32.to_le_bytes());

    let mut fat = vec![FREE_SECTOR; SECTOR / 4];
    fat[0] = FAT_SECTOR;
    fat[1] = END_OF_CHAIN;
    for sector in 2..stream_sectors + 2 {
        fat[sector] = if sector + 1 < stream_sectors + 2 {
            sector as u32 + 1
        } else {
            END_OF_CHAIN
        };
    }

    let mut directory = vec![0u8; SECTOR];
    let mut entry = |index: usize, name: &str, kind: u8, child: u32, start: u32, size: u32| {
        let slot = &mut directory[index * 128..(index + 1) * 128];
        let utf16 = name.encode_utf16().flat_map(u16::to_le_bytes).collect::<Vec<_>>();
        slot[..utf16.len()].copy_from_slice(&utf16);
        slot[64..66].copy_from_slice(&((utf16.len() + 2) as u16).to_le_bytes());
        slot[66] = kind;
        slot[67] = 1;
        slot[68..72].copy_from_slice(&FREE_SECTOR.to_le_bytes());
        slot[72..76].copy_from_slice(&FREE_SECTOR.to_le_bytes());
        slot[76..80].copy_from_slice(&child.to_le_bytes());
        slot[116..120].copy_from_slice(&start.to_le_bytes());
        slot[120..124].copy_from_slice(&size.to_le_bytes());
    };
    entry(0, "Root Entry", 5, 1, END_OF_CHAIN, 0);
    entry(1, "Workbook", 2, FREE_SECTOR, 2, padded as u32);

    let mut out = header;
    out.extend(fat.iter().flat_map(|id| id.to_le_bytes()));
    out.extend_from_slice(&directory);
    out.extend_from_slice(&stream);
    out
}

pub fn district_xls(count: u32) -> Vec<u8> {
    let rows = (1..=count)
        .map(|i| {
            vec![
                Cell::Number(f64::from(i)),
                text(&format!("District {i}")),
                text(if i % 2 == 0 { "East" } else { "West" }),
            ]
        })
        .collect::<Vec<_>>();
    xls_bytes(&DISTRICT_HEADERS, &rows)
}
