//! dBase / FoxPro table reader.
//!
//! A `.dbf` file is a 32-byte header, a table of 32-byte field descriptors
//! closed by `0x0D`, then fixed-width records. Each record starts with a
//! deletion flag (`' '` live, `'*'` deleted) followed by the fields in
//! descriptor order. The whole table is materialized; the format has no
//! streaming story worth having at the sizes these exports come in.

use std::io::{self, Read};

use chrono::{NaiveDate, NaiveTime};
use encoding_rs::{
    BIG5, EUC_KR, Encoding, GBK, IBM866, MACINTOSH, SHIFT_JIS, UTF_8, WINDOWS_874, WINDOWS_1250,
    WINDOWS_1251, WINDOWS_1252, WINDOWS_1253, WINDOWS_1254, WINDOWS_1255, WINDOWS_1256,
    X_MAC_CYRILLIC,
};
use log::{debug, warn};
use serde::Serialize;

use crate::{
    data::{Cell, Value},
    error::{IngestError, IngestResult},
    io_utils,
};

const HEADER_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const DESCRIPTOR_TERMINATOR: u8 = 0x0D;
const END_OF_FILE: u8 = 0x1A;
const DELETED_FLAG: u8 = b'*';
const LIVE_FLAG: u8 = b' ';
// Julian day number of 0000-12-31 in the proleptic Gregorian calendar.
const JULIAN_DAY_OFFSET: i32 = 1_721_425;
const MAX_PREALLOCATED_ROWS: usize = 1 << 16;
const LANGUAGE_DRIVER_OFFSET: usize = 29;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbfField {
    pub name: String,
    pub field_type: char,
    pub length: u8,
    pub decimal_count: u8,
}

impl DbfField {
    /// Header spelling used by DBF-to-spreadsheet exports, e.g.
    /// `SAN_COST,N,7,2`, `DPT_CD,C,5` or `SAN_DT,D`.
    pub fn annotated_name(&self) -> String {
        match self.field_type {
            'N' | 'F' => format!(
                "{},{},{},{}",
                self.name, self.field_type, self.length, self.decimal_count
            ),
            'D' | 'L' | 'T' | 'M' | 'G' | 'P' => format!("{},{}", self.name, self.field_type),
            _ => format!("{},{},{}", self.name, self.field_type, self.length),
        }
    }

    fn is_visible(&self) -> bool {
        self.field_type != '0'
    }

    fn validate(&self) -> IngestResult<()> {
        let fixed_width = match self.field_type {
            'C' | 'N' | 'F' | 'M' | 'G' | 'P' | '0' => None,
            'D' | 'T' | 'Y' => Some(8),
            'L' => Some(1),
            'I' => Some(4),
            'B' => None,
            other => {
                return Err(IngestError::format(format!(
                    "field '{}' uses unsupported DBF type code '{other}'",
                    self.name
                )));
            }
        };
        if self.length == 0 {
            return Err(IngestError::format(format!(
                "field '{}' declares zero length",
                self.name
            )));
        }
        if let Some(width) = fixed_width
            && usize::from(self.length) != width
        {
            return Err(IngestError::format(format!(
                "field '{}' of type {} must be {width} byte(s) wide, found {}",
                self.name, self.field_type, self.length
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DbfTable {
    pub fields: Vec<DbfField>,
    pub rows: Vec<Vec<Cell>>,
    pub deleted_records: usize,
    /// Encoding used for character fields.
    pub encoding: &'static Encoding,
}

/// Code page named by a language driver id (header byte 29).
fn driver_code_page(driver: u8) -> Option<u16> {
    let code_page = match driver {
        0x01 | 0x09 | 0x0B | 0x0D | 0x0F | 0x11 | 0x15 | 0x18 | 0x19 | 0x1B => 437,
        0x02 | 0x0A | 0x0E | 0x10 | 0x12 | 0x14 | 0x16 | 0x1A | 0x1D | 0x25 | 0x37 => 850,
        0x1F | 0x22 | 0x23 | 0x40 | 0x64 => 852,
        0x24 => 860,
        0x67 => 861,
        0x1C => 863,
        0x08 | 0x17 | 0x66 => 865,
        0x26 | 0x65 => 866,
        0x6A => 737,
        0x6B => 857,
        0x50 | 0x7C => 874,
        0x13 | 0x7B => 932,
        0x4D | 0x7A => 936,
        0x4E | 0x79 => 949,
        0x4F | 0x78 => 950,
        0xC8 => 1250,
        0xC9 => 1251,
        0x03 | 0x57 | 0x58 | 0x59 => 1252,
        0xCB => 1253,
        0xCA => 1254,
        0x7D => 1255,
        0x7E => 1256,
        0x04 => 10000,
        0x96 => 10007,
        _ => return None,
    };
    Some(code_page)
}

fn code_page_encoding(code_page: u16) -> Option<&'static Encoding> {
    let encoding = match code_page {
        866 => IBM866,
        874 => WINDOWS_874,
        932 => SHIFT_JIS,
        936 => GBK,
        949 => EUC_KR,
        950 => BIG5,
        1250 => WINDOWS_1250,
        1251 => WINDOWS_1251,
        1252 => WINDOWS_1252,
        1253 => WINDOWS_1253,
        1254 => WINDOWS_1254,
        1255 => WINDOWS_1255,
        1256 => WINDOWS_1256,
        10000 => MACINTOSH,
        10007 => X_MAC_CYRILLIC,
        _ => return None,
    };
    Some(encoding)
}

/// An explicit encoding wins; otherwise the language driver decides, and
/// tables without a usable driver id are read as UTF-8.
fn text_encoding(driver: u8, requested: Option<&'static Encoding>) -> &'static Encoding {
    if let Some(encoding) = requested {
        return encoding;
    }
    let Some(code_page) = driver_code_page(driver) else {
        return UTF_8;
    };
    code_page_encoding(code_page).unwrap_or_else(|| {
        warn!(
            "DBF language driver 0x{driver:02x} declares code page {code_page}, which has no \
             decoder; reading text as UTF-8 (use --dbf-encoding to override)"
        );
        UTF_8
    })
}

/// Reads a whole table. `requested` overrides the encoding named by the
/// file's language driver byte.
pub fn read_table<R: Read>(
    mut reader: R,
    requested: Option<&'static Encoding>,
) -> IngestResult<DbfTable> {
    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .map_err(|e| truncated("header", e))?;

    let record_count = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let header_len = usize::from(u16::from_le_bytes([header[8], header[9]]));
    let record_len = usize::from(u16::from_le_bytes([header[10], header[11]]));
    let language_driver = header[LANGUAGE_DRIVER_OFFSET];
    let encoding = text_encoding(language_driver, requested);
    if header_len <= HEADER_LEN {
        return Err(IngestError::format(format!(
            "DBF header length {header_len} leaves no room for field descriptors"
        )));
    }

    let mut descriptor_block = vec![0u8; header_len - HEADER_LEN];
    reader
        .read_exact(&mut descriptor_block)
        .map_err(|e| truncated("field descriptor table", e))?;
    let descriptors = parse_descriptors(&descriptor_block)?;

    let data_width: usize = 1 + descriptors
        .iter()
        .map(|f| usize::from(f.length))
        .sum::<usize>();
    if data_width > record_len {
        return Err(IngestError::format(format!(
            "DBF fields need {data_width} byte(s) per record but the header declares {record_len}"
        )));
    }
    debug!(
        "DBF header: version 0x{:02x}, {} record(s) of {} byte(s), {} field(s), driver 0x{:02x} ({})",
        header[0],
        record_count,
        record_len,
        descriptors.len(),
        language_driver,
        encoding.name()
    );

    let mut rows = Vec::with_capacity(record_count.min(MAX_PREALLOCATED_ROWS));
    let mut record = vec![0u8; record_len];
    let mut deleted_records = 0usize;
    for index in 0..record_count {
        reader
            .read_exact(&mut record[..1])
            .map_err(|e| truncated(&format!("record {index}"), e))?;
        match record[0] {
            END_OF_FILE => {
                return Err(IngestError::format(format!(
                    "DBF header promises {record_count} record(s) but the table ends after {index}"
                )));
            }
            DELETED_FLAG | LIVE_FLAG => {}
            other => {
                return Err(IngestError::format(format!(
                    "record {index} has invalid deletion flag 0x{other:02x}"
                )));
            }
        }
        reader
            .read_exact(&mut record[1..])
            .map_err(|e| truncated(&format!("record {index}"), e))?;
        if record[0] == DELETED_FLAG {
            deleted_records += 1;
            continue;
        }
        rows.push(parse_record(&descriptors, &record[1..], index, encoding)?);
    }
    if deleted_records > 0 {
        warn!("Skipped {deleted_records} record(s) flagged as deleted");
    }

    let fields = descriptors.into_iter().filter(DbfField::is_visible).collect();
    Ok(DbfTable {
        fields,
        rows,
        deleted_records,
        encoding,
    })
}

fn truncated(what: &str, err: io::Error) -> IngestError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        IngestError::format(format!("DBF {what} is truncated"))
    } else {
        IngestError::format(format!("reading DBF {what}: {err}"))
    }
}

fn parse_descriptors(block: &[u8]) -> IngestResult<Vec<DbfField>> {
    let mut fields = Vec::new();
    let mut offset = 0usize;
    loop {
        match block.get(offset) {
            Some(&DESCRIPTOR_TERMINATOR) => break,
            Some(_) if offset + DESCRIPTOR_LEN <= block.len() => {}
            _ => {
                return Err(IngestError::format(
                    "DBF field descriptor table is not terminated",
                ));
            }
        }
        let descriptor = &block[offset..offset + DESCRIPTOR_LEN];
        let name_bytes = &descriptor[..11];
        let name_end = name_bytes.iter().position(|b| *b == 0).unwrap_or(11);
        let name = String::from_utf8_lossy(&name_bytes[..name_end])
            .trim()
            .to_string();
        let field = DbfField {
            name,
            field_type: (descriptor[11] as char).to_ascii_uppercase(),
            length: descriptor[16],
            decimal_count: descriptor[17],
        };
        field.validate()?;
        fields.push(field);
        offset += DESCRIPTOR_LEN;
    }
    if fields.iter().all(|f| !f.is_visible()) {
        return Err(IngestError::format("DBF table declares no fields"));
    }
    Ok(fields)
}

fn parse_record(
    fields: &[DbfField],
    data: &[u8],
    index: usize,
    encoding: &'static Encoding,
) -> IngestResult<Vec<Cell>> {
    let mut cells = Vec::with_capacity(fields.len());
    let mut offset = 0usize;
    for field in fields {
        let width = usize::from(field.length);
        let raw = &data[offset..offset + width];
        offset += width;
        if !field.is_visible() {
            continue;
        }
        let cell = parse_field(field, raw, encoding).map_err(|reason| {
            IngestError::format(format!(
                "record {index} field '{}': {reason}",
                field.name
            ))
        })?;
        cells.push(cell);
    }
    Ok(cells)
}

fn parse_field(field: &DbfField, raw: &[u8], encoding: &'static Encoding) -> Result<Cell, String> {
    match field.field_type {
        'C' => {
            let end = raw
                .iter()
                .rposition(|b| *b != b' ' && *b != 0)
                .map_or(0, |p| p + 1);
            if end == 0 {
                return Ok(None);
            }
            io_utils::decode_bytes(&raw[..end], encoding)
                .map(|text| Some(Value::String(text)))
                .map_err(|e| e.to_string())
        }
        'N' | 'F' => parse_numeric(raw, field.decimal_count),
        'D' => parse_date(raw),
        'L' => match raw[0] {
            b'T' | b't' | b'Y' | b'y' => Ok(Some(Value::Boolean(true))),
            b'F' | b'f' | b'N' | b'n' => Ok(Some(Value::Boolean(false))),
            b'?' | b' ' | 0 => Ok(None),
            other => Err(format!("invalid logical value 0x{other:02x}")),
        },
        'I' => Ok(Some(Value::Integer(i64::from(i32::from_le_bytes([
            raw[0], raw[1], raw[2], raw[3],
        ]))))),
        'B' if raw.len() == 8 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(raw);
            let value = f64::from_le_bytes(bytes);
            Ok((!value.is_nan()).then_some(Value::Float(value)))
        }
        'Y' => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(raw);
            Ok(Some(Value::Float(i64::from_le_bytes(bytes) as f64 / 10_000.0)))
        }
        'T' => parse_timestamp(raw),
        // Memo blocks live in a companion file that is never fetched.
        'B' | 'M' | 'G' | 'P' => Ok(None),
        other => Err(format!("unsupported type code '{other}'")),
    }
}

fn ascii_trimmed(raw: &[u8]) -> Result<&str, String> {
    std::str::from_utf8(raw)
        .map(str::trim)
        .map_err(|_| "non-ASCII bytes in numeric field".to_string())
}

fn parse_numeric(raw: &[u8], decimal_count: u8) -> Result<Cell, String> {
    let text = ascii_trimmed(raw)?;
    // Overflowed numerics are written as a run of asterisks.
    if text.chars().all(|c| c == '*' || c == '.') {
        return Ok(None);
    }
    if decimal_count == 0
        && !text.contains(['.', ',', 'e', 'E'])
        && let Ok(parsed) = text.parse::<i64>()
    {
        return Ok(Some(Value::Integer(parsed)));
    }
    text.replace(',', ".")
        .parse::<f64>()
        .map(|parsed| Some(Value::Float(parsed)))
        .map_err(|_| format!("'{text}' is not a number"))
}

fn parse_date(raw: &[u8]) -> Result<Cell, String> {
    let text = ascii_trimmed(raw)?;
    if text.is_empty() || text.bytes().all(|b| b == b'0') {
        return Ok(None);
    }
    NaiveDate::parse_from_str(text, "%Y%m%d")
        .map(|date| Some(Value::Date(date)))
        .map_err(|_| format!("'{text}' is not a YYYYMMDD date"))
}

fn parse_timestamp(raw: &[u8]) -> Result<Cell, String> {
    let day = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let millis = i32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
    if day == 0 && millis == 0 {
        return Ok(None);
    }
    let date = day
        .checked_sub(JULIAN_DAY_OFFSET)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| format!("julian day {day} is out of range"))?;
    let millis = u32::try_from(millis).map_err(|_| format!("negative time {millis}"))?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(
        millis / 1_000,
        (millis % 1_000) * 1_000_000,
    )
    .ok_or_else(|| format!("time of day {millis}ms is out of range"))?;
    Ok(Some(Value::DateTime(date.and_time(time))))
}
