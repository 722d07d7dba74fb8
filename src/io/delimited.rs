//! The delimited row format and the row-counting convention.
//!
//! Input files carry one [`Record`] per line: nine `;`-separated fields,
//! `"`-quoted where needed, no header row.
//!
//! # Row counting
//! A row is counted for every `\n` byte, plus one if the data is non-empty and
//! does not end in `\n`. The chunk loader, the direct loader and the
//! reconciliation all use this same rule ([`count_rows`] / [`count_file_rows`]),
//! so their sums are directly comparable.

use crate::error::{IngestError, Result};
use crate::io::compression::Compression;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

pub const DELIMITER: u8 = b';';
pub const QUOTE: u8 = b'"';
pub const FIELD_COUNT: usize = 9;

/// One input row. Every field is opaque text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    pub domain: String,
    pub nameservers: String,
    pub ip: String,
    pub country: String,
    pub server: String,
    pub field5: String,
    pub field6: String,
    pub field7: String,
    pub field8: String,
}

impl Record {
    /// Fields in schema order.
    #[must_use]
    pub fn fields(&self) -> [&str; FIELD_COUNT] {
        [
            &self.domain,
            &self.nameservers,
            &self.ip,
            &self.country,
            &self.server,
            &self.field5,
            &self.field6,
            &self.field7,
            &self.field8,
        ]
    }
}

/// Count rows in a byte buffer using the crate-wide convention.
#[must_use]
pub fn count_rows(data: &[u8]) -> u64 {
    let newlines = data.iter().filter(|&&b| b == b'\n').count() as u64;
    match data.last() {
        Some(b'\n') | None => newlines,
        Some(_) => newlines + 1,
    }
}

/// Count rows of a whole (possibly compressed) file in one streaming pass.
///
/// # Errors
/// Returns [`IngestError::Setup`] if the file cannot be opened and
/// [`IngestError::Io`] if reading fails part-way.
pub fn count_file_rows(path: &Path, compression: Compression) -> Result<u64> {
    let mut reader = compression.open(path)?;
    let mut buf = vec![0u8; 1 << 20];
    let mut newlines = 0u64;
    let mut last = None;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        newlines += buf[..n].iter().filter(|&&b| b == b'\n').count() as u64;
        last = Some(buf[n - 1]);
    }
    Ok(match last {
        Some(b'\n') | None => newlines,
        Some(_) => newlines + 1,
    })
}

/// A `csv` reader configured for the input dialect.
pub fn reader<R: Read>(rdr: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .delimiter(DELIMITER)
        .quote(QUOTE)
        .has_headers(false)
        .flexible(true)
        .from_reader(rdr)
}

/// A `csv` writer producing the input dialect (used for fixtures and exports).
pub fn writer<W: Write>(wtr: W) -> csv::Writer<W> {
    WriterBuilder::new()
        .delimiter(DELIMITER)
        .quote(QUOTE)
        .has_headers(false)
        .from_writer(wtr)
}

/// Check that a parsed record has exactly [`FIELD_COUNT`] fields.
///
/// `row` is the 1-based row number used in the error.
///
/// # Errors
/// Returns [`IngestError::Malformed`] on a field-count mismatch.
pub fn check_arity(record: &csv::ByteRecord, row: u64) -> Result<()> {
    if record.len() == FIELD_COUNT {
        Ok(())
    } else {
        Err(IngestError::Malformed {
            row,
            reason: format!("expected {FIELD_COUNT} fields, found {}", record.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_rows_with_and_without_trailing_newline() {
        assert_eq!(count_rows(b""), 0);
        assert_eq!(count_rows(b"a"), 1);
        assert_eq!(count_rows(b"a\n"), 1);
        assert_eq!(count_rows(b"a\nb"), 2);
        assert_eq!(count_rows(b"a\nb\n"), 2);
        assert_eq!(count_rows(b"\n\n"), 2);
    }

    #[test]
    fn reader_splits_on_semicolons_and_honours_quotes() -> anyhow::Result<()> {
        let data = b"ex.com;\"ns1;ns2\";1.2.3.4;US;nginx;a;b;c;d\n";
        let mut rdr = reader(&data[..]);
        let mut rec = csv::ByteRecord::new();
        assert!(rdr.read_byte_record(&mut rec)?);
        check_arity(&rec, 1)?;
        assert_eq!(&rec[1], b"ns1;ns2");
        Ok(())
    }

    #[test]
    fn arity_mismatch_is_malformed() {
        let rec = csv::ByteRecord::from(vec!["a", "b"]);
        assert!(matches!(
            check_arity(&rec, 7),
            Err(IngestError::Malformed { row: 7, .. })
        ));
    }
}
