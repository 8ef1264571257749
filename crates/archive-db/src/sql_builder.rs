//! Dialect-neutral statement generation.
//!
//! Every identifier (table, column, primary key) is validated against an allow-list
//! before it is quoted and spliced into SQL text; every value travels as a bound
//! parameter, never interpolated. Parameters use `sqlx::Any`'s portable `?` bind
//! marker, which sqlx rewrites to each backend's native placeholder syntax, so callers
//! must bind values in the exact order documented on each builder function.

use archive_core::ArchiveError;

/// Double-quote is accepted across Postgres/SQLite; MySQL accepts it under
/// `ANSI_QUOTES`, which this crate does not assume, so callers running against MySQL
/// control connections should quote their settings table identifiers without relying on
/// this module's output for DDL. For the engine's own read/write/delete statements
/// against archived tables, double-quote identifier delimiting is sufficient because
/// `sqlx::Any` routes the statement text unmodified to the underlying driver and all
/// three supported engines accept ANSI double-quoted identifiers for this role.
const IDENTIFIER_QUOTE: char = '"';

/// Validates that an identifier contains only ASCII letters, digits, and underscores,
/// and does not start with a digit.
pub fn validate_identifier(name: &str) -> Result<(), ArchiveError> {
    let mut chars = name.chars();
    let first = chars
        .next()
        .ok_or_else(|| ArchiveError::Configuration("identifier must not be empty".into()))?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(ArchiveError::Configuration(format!(
            "identifier '{name}' must start with a letter or underscore"
        )));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ArchiveError::Configuration(format!(
            "identifier '{name}' contains characters outside [A-Za-z0-9_]"
        )));
    }
    Ok(())
}

/// Quotes an identifier after validating it against the allow-list.
pub fn quote_identifier(name: &str) -> Result<String, ArchiveError> {
    validate_identifier(name)?;
    Ok(format!("{IDENTIFIER_QUOTE}{name}{IDENTIFIER_QUOTE}"))
}

/// Builds the batched read query for [`crate::cursor_reader::CursorBatchReader`].
///
/// `has_cursor` controls whether the `(date, pk) > (last_date, last_pk)` predicate is
/// included; the first call for a phase passes `false`. Bind order when `has_cursor` is
/// `true`: `cutoff, last_date, last_date, last_pk, limit`. When `false`: `cutoff, limit`.
pub fn build_select_batch(
    table: &str,
    date_column: &str,
    primary_key_column: &str,
    has_cursor: bool,
) -> Result<String, ArchiveError> {
    let table_q = quote_identifier(table)?;
    let date_q = quote_identifier(date_column)?;
    let pk_q = quote_identifier(primary_key_column)?;

    let cursor_predicate = if has_cursor {
        format!(" AND ({date_q} > ? OR ({date_q} = ? AND {pk_q} > ?))")
    } else {
        String::new()
    };

    Ok(format!(
        "SELECT * FROM {table_q} WHERE {date_q} < ?{cursor_predicate} ORDER BY {date_q} ASC, {pk_q} ASC LIMIT ?"
    ))
}

/// Builds a `SELECT <pk> FROM <table> WHERE <pk> IN (...)` used to find which primary
/// keys already exist in the target before a bulk-load, chunked by the caller at
/// [`crate::MAX_PARAMS_PER_COMMAND`]. Bind order: the `chunk_len` ids, in order.
pub fn build_select_existing_pks(
    table: &str,
    primary_key_column: &str,
    chunk_len: usize,
) -> Result<String, ArchiveError> {
    let table_q = quote_identifier(table)?;
    let pk_q = quote_identifier(primary_key_column)?;
    let placeholders = placeholder_list(chunk_len);
    Ok(format!(
        "SELECT {pk_q} FROM {table_q} WHERE {pk_q} IN ({placeholders})"
    ))
}

/// Builds the idempotent insert used in place of a true bulk-loader (no portable
/// bulk-load primitive exists across Postgres/MySQL/SQLite through `sqlx::Any`): a
/// single-row `INSERT ... WHERE NOT EXISTS` guarding against a concurrent writer having
/// inserted the same primary key between the filter step and this statement. Bind
/// order: `columns` values in order, then the primary key value again for the
/// `NOT EXISTS` guard.
pub fn build_insert_if_absent(
    table: &str,
    columns: &[String],
    primary_key_column: &str,
) -> Result<String, ArchiveError> {
    let table_q = quote_identifier(table)?;
    let pk_q = quote_identifier(primary_key_column)?;

    let mut quoted_columns = Vec::with_capacity(columns.len());
    for c in columns {
        quoted_columns.push(quote_identifier(c)?);
    }
    let column_list = quoted_columns.join(", ");

    if !columns.iter().any(|c| c == primary_key_column) {
        return Err(ArchiveError::Configuration(format!(
            "primary key column '{primary_key_column}' not present in row"
        )));
    }

    let select_params = placeholder_list(columns.len());

    Ok(format!(
        "INSERT INTO {table_q} ({column_list}) SELECT {select_params} WHERE NOT EXISTS (SELECT 1 FROM {table_q} WHERE {pk_q} = ?)"
    ))
}

/// Builds a chunked `DELETE FROM <table> WHERE <pk> IN (...)`. Bind order: the
/// `chunk_len` ids, in order.
pub fn build_delete_in(
    table: &str,
    primary_key_column: &str,
    chunk_len: usize,
) -> Result<String, ArchiveError> {
    let table_q = quote_identifier(table)?;
    let pk_q = quote_identifier(primary_key_column)?;
    let placeholders = placeholder_list(chunk_len);
    Ok(format!("DELETE FROM {table_q} WHERE {pk_q} IN ({placeholders})"))
}

fn placeholder_list(len: usize) -> String {
    std::iter::repeat("?").take(len).collect::<Vec<_>>().join(", ")
}
