//! The fixed table layout shared by the target and every intermediate store.

use crate::error::{IngestError, Result};

pub const TABLE: &str = "domains";

pub const COLUMNS: [&str; 9] = [
    "domain",
    "nameservers",
    "ip",
    "country",
    "server",
    "field5",
    "field6",
    "field7",
    "field8",
];

/// Columns indexed when the caller names none.
pub const DEFAULT_INDEX_COLUMNS: [&str; 3] = ["domain", "ip", "country"];

/// Create-if-absent DDL for the table in `schema` (`main`, or an attachment alias).
#[must_use]
pub fn create_table_sql(schema: &str) -> String {
    let cols = COLUMNS
        .iter()
        .map(|c| format!("\"{c}\" TEXT"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE IF NOT EXISTS {schema}.{TABLE} ({cols})")
}

#[must_use]
pub fn insert_sql() -> String {
    let placeholders = (1..=COLUMNS.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO main.{TABLE} VALUES ({placeholders})")
}

/// Resolve a caller-supplied column name to the schema's own spelling.
///
/// Only names returned from here are ever interpolated into SQL.
///
/// # Errors
/// Returns [`IngestError::Config`] for a name that is not a schema column.
pub fn check_column(name: &str) -> Result<&'static str> {
    COLUMNS
        .iter()
        .copied()
        .find(|c| *c == name)
        .ok_or_else(|| {
            IngestError::config(format!(
                "unknown column '{name}' (expected one of: {})",
                COLUMNS.join(", ")
            ))
        })
}

#[must_use]
pub fn index_name(column: &str) -> String {
    format!("idx_{column}")
}

#[must_use]
pub fn sample_table_name(column: &str) -> String {
    format!("sample_{column}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ddl_lists_all_columns_as_text() {
        let ddl = create_table_sql("main");
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS main.domains"));
        assert_eq!(ddl.matches(" TEXT").count(), 9);
        assert!(insert_sql().ends_with("?8, ?9)"));
    }

    #[test]
    fn only_schema_columns_pass() {
        assert_eq!(check_column("country").unwrap(), "country");
        assert!(check_column("country; DROP TABLE domains").is_err());
        assert!(check_column("").is_err());
    }
}
