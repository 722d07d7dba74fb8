//! Deterministic input datasets.

use crate::io::compression::Compression;
use crate::io::delimited::{self, Record};
use anyhow::Result;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Countries cycled through by [`sample_record`]; every fifth row is `US`.
pub const SAMPLE_COUNTRIES: [&str; 5] = ["US", "DE", "FR", "JP", "BR"];

/// The `i`-th sample record. Fields need no quoting, and records `0..10`
/// all serialize to lines of the same length.
#[must_use]
pub fn sample_record(i: u64) -> Record {
    Record {
        domain: format!("example{i}.com"),
        nameservers: format!("ns1.host{}.net,ns2.host{}.net", i % 7, i % 7),
        ip: format!("10.{}.{}.{}", (i >> 16) & 0xff, (i >> 8) & 0xff, i & 0xff),
        country: SAMPLE_COUNTRIES[(i % 5) as usize].to_string(),
        server: if i % 2 == 0 { "nginx" } else { "httpd" }.to_string(),
        field5: format!("AS{}", 1000 + i % 50),
        field6: (i % 3).to_string(),
        field7: "2024-01-01".to_string(),
        field8: String::new(),
    }
}

#[must_use]
pub fn sample_records(n: u64) -> Vec<Record> {
    (0..n).map(sample_record).collect()
}

/// The `i`-th sample record as one input line, without the newline.
#[must_use]
pub fn domain_line(i: u64) -> String {
    sample_record(i).fields().join(";")
}

/// Raw bytes of `rows` sample lines.
#[must_use]
pub fn sample_bytes(rows: u64, trailing_newline: bool) -> Vec<u8> {
    let mut out = (0..rows).map(domain_line).collect::<Vec<_>>().join("\n");
    if trailing_newline && rows > 0 {
        out.push('\n');
    }
    out.into_bytes()
}

/// How many of the first `rows` sample records have `country`.
#[must_use]
pub fn sample_country_count(rows: u64, country: &str) -> u64 {
    (0..rows)
        .filter(|&i| SAMPLE_COUNTRIES[(i % 5) as usize] == country)
        .count() as u64
}

/// Write `rows` sample lines to `path`, compressed as requested.
///
/// # Errors
/// Returns an error if the file cannot be created or the codec is unavailable.
pub fn write_rows_file(
    path: &Path,
    rows: u64,
    trailing_newline: bool,
    compression: Compression,
) -> Result<()> {
    let file = File::create(path)?;
    let mut out = compression.wrap_writer(Box::new(file))?;
    out.write_all(&sample_bytes(rows, trailing_newline))?;
    out.flush()?;
    Ok(())
}

/// Write records through the crate's own dialect writer (quoting applied).
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_records(path: &Path, records: &[Record]) -> Result<()> {
    let mut wtr = delimited::writer(File::create(path)?);
    for record in records {
        wtr.write_record(record.fields())?;
    }
    wtr.flush()?;
    Ok(())
}
