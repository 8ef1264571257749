//! # Archive CSV - Streaming Cold-Tier Export
//!
//! Streams ordered, column-tagged rows into one or more UTF-8 files, splitting by a
//! row-count limit and escaping per a configurable delimiter. Every file starts with a
//! byte-order mark, since the downstream tooling consuming these archives expects one.
//!
//! ## Example Usage
//!
//! ```rust
//! use archive_csv::escape_csv;
//!
//! assert_eq!(escape_csv(Some("plain"), ','), "plain");
//! assert_eq!(escape_csv(Some("a,b"), ','), "\"a,b\"");
//! assert_eq!(escape_csv(None, ','), "");
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use archive_core::{ArchiveError, CsvConfig, Row};
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Escapes a single CSV cell. A `None` value (SQL null) renders as an empty field.
/// Wraps the value in double quotes, doubling any internal quote, when it contains the
/// delimiter, a double quote, or a newline.
pub fn escape_csv(value: Option<&str>, delimiter: char) -> String {
    let raw = match value {
        None => return String::new(),
        Some(s) => s,
    };
    let needs_quoting = raw.contains(delimiter) || raw.contains('"') || raw.contains('\n') || raw.contains('\r');
    if !needs_quoting {
        return raw.to_string();
    }
    let doubled = raw.replace('"', "\"\"");
    format!("\"{doubled}\"")
}

/// Streams `rows` into one or more part files under
/// `<root>/<table>/<yyyyMM of to_date>/`, returning the paths written in order.
///
/// Checks `cancel` once per part file, so a cancellation requested mid-export of a
/// many-file batch is observed between chunks rather than only after the whole batch
/// completes. Refuses to create or write through any path that resolves (following
/// symlinks) outside `root_folder`.
#[allow(clippy::too_many_arguments)]
pub fn write_parts(
    config: &CsvConfig,
    root_folder: &str,
    table: &str,
    from_date: NaiveDate,
    to_date: NaiveDate,
    columns: &[String],
    rows: &[Row],
    cancel: &CancellationToken,
) -> Result<Vec<PathBuf>, ArchiveError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    std::fs::create_dir_all(root_folder)
        .map_err(|e| ArchiveError::Filesystem(format!("creating {root_folder}: {e}")))?;
    let root_canonical = std::fs::canonicalize(root_folder)
        .map_err(|e| ArchiveError::Filesystem(format!("resolving {root_folder}: {e}")))?;

    let folder = Path::new(root_folder).join(table).join(to_date.format("%Y%m").to_string());
    std::fs::create_dir_all(&folder)
        .map_err(|e| ArchiveError::Filesystem(format!("creating {}: {e}", folder.display())))?;
    let folder_canonical = std::fs::canonicalize(&folder)
        .map_err(|e| ArchiveError::Filesystem(format!("resolving {}: {e}", folder.display())))?;
    if !folder_canonical.starts_with(&root_canonical) {
        return Err(ArchiveError::Filesystem(format!(
            "refusing to write outside csv root: {} escapes {}",
            folder_canonical.display(),
            root_canonical.display()
        )));
    }

    let mut paths = Vec::new();
    for (part_index, chunk) in rows.chunks(config.max_rows_per_file).enumerate() {
        if cancel.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        let file_name = render_file_name(
            &config.file_name_template,
            table,
            from_date,
            to_date,
            part_index + 1,
        );
        let path = folder_canonical.join(file_name);
        reject_if_symlink(&path)?;
        write_part_file(&path, columns, chunk, config.delimiter)?;
        paths.push(path);
    }
    Ok(paths)
}

/// Refuses to write through a pre-existing symlink at `path`, so a planted symlink
/// cannot redirect a write outside the already-validated part folder.
fn reject_if_symlink(path: &Path) -> Result<(), ArchiveError> {
    if let Ok(metadata) = std::fs::symlink_metadata(path) {
        if metadata.file_type().is_symlink() {
            return Err(ArchiveError::Filesystem(format!(
                "refusing to write through symlink at {}",
                path.display()
            )));
        }
    }
    Ok(())
}

fn write_part_file(
    path: &Path,
    columns: &[String],
    rows: &[Row],
    delimiter: char,
) -> Result<(), ArchiveError> {
    let file = File::create(path)
        .map_err(|e| ArchiveError::Filesystem(format!("creating {}: {e}", path.display())))?;
    let mut writer = BufWriter::new(file);

    writer
        .write_all(&UTF8_BOM)
        .map_err(|e| ArchiveError::Filesystem(e.to_string()))?;

    let header = columns.join(&delimiter.to_string());
    writeln!(writer, "{header}").map_err(|e| ArchiveError::Filesystem(e.to_string()))?;

    for row in rows {
        let line = columns
            .iter()
            .map(|c| {
                let display = row.get(c).and_then(|v| v.to_display_string());
                escape_csv(display.as_deref(), delimiter)
            })
            .collect::<Vec<_>>()
            .join(&delimiter.to_string());
        writeln!(writer, "{line}").map_err(|e| ArchiveError::Filesystem(e.to_string()))?;
    }

    writer.flush().map_err(|e| ArchiveError::Filesystem(e.to_string()))?;
    Ok(())
}

fn render_file_name(
    template: &str,
    table: &str,
    from_date: NaiveDate,
    to_date: NaiveDate,
    part_index: usize,
) -> String {
    template
        .replace("{TableName}", table)
        .replace("{FromDate:yyyyMMdd}", &from_date.format("%Y%m%d").to_string())
        .replace("{ToDate:yyyyMMdd}", &to_date.format("%Y%m%d").to_string())
        .replace("{PartIndex}", &format!("{part_index:02}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use archive_core::Value;
    use tempfile::tempdir;

    fn make_row(id: i64, note: &str) -> Row {
        let mut row = Row::new();
        row.insert("id".to_string(), Value::Int(id));
        row.insert("note".to_string(), Value::Text(note.to_string()));
        row
    }

    #[test]
    fn escape_csv_quotes_when_field_contains_delimiter_quote_or_newline() {
        let raw = "he said \"hi\", then left\nbye";
        assert_eq!(
            escape_csv(Some(raw), ','),
            "\"he said \"\"hi\"\", then left\nbye\""
        );
    }

    #[test]
    fn escape_csv_leaves_plain_values_unquoted() {
        assert_eq!(escape_csv(Some("plain"), ','), "plain");
    }

    #[test]
    fn escape_csv_renders_null_as_empty_string() {
        assert_eq!(escape_csv(None, ','), "");
    }

    #[test]
    fn render_file_name_zero_pads_part_index() {
        let name = render_file_name(
            "{TableName}_{FromDate:yyyyMMdd}_{ToDate:yyyyMMdd}_Part{PartIndex}.csv",
            "orders",
            NaiveDate::from_ymd_opt(2022, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2022, 3, 31).unwrap(),
            3,
        );
        assert_eq!(name, "orders_20220301_20220331_Part03.csv");
    }

    #[test]
    fn write_parts_splits_by_max_rows_and_writes_bom() {
        let dir = tempdir().unwrap();
        let config = CsvConfig {
            max_rows_per_file: 2,
            ..Default::default()
        };
        let rows: Vec<Row> = (0..5).map(|i| make_row(i, "n")).collect();
        let columns = vec!["id".to_string(), "note".to_string()];
        let from = NaiveDate::from_ymd_opt(2022, 3, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2022, 3, 31).unwrap();

        let paths = write_parts(
            &config,
            dir.path().to_str().unwrap(),
            "orders",
            from,
            to,
            &columns,
            &rows,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(paths.len(), 3);
        let bytes = std::fs::read(&paths[0]).unwrap();
        assert_eq!(&bytes[0..3], &UTF8_BOM);
    }

    #[test]
    fn write_parts_is_noop_for_empty_rows() {
        let dir = tempdir().unwrap();
        let config = CsvConfig::default();
        let paths = write_parts(
            &config,
            dir.path().to_str().unwrap(),
            "orders",
            NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2022, 1, 31).unwrap(),
            &["id".to_string()],
            &[],
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(paths.is_empty());
    }

    #[test]
    fn write_parts_returns_cancelled_between_chunks() {
        let dir = tempdir().unwrap();
        let config = CsvConfig {
            max_rows_per_file: 1,
            ..Default::default()
        };
        let rows: Vec<Row> = (0..3).map(|i| make_row(i, "n")).collect();
        let columns = vec!["id".to_string(), "note".to_string()];
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = write_parts(
            &config,
            dir.path().to_str().unwrap(),
            "orders",
            NaiveDate::from_ymd_opt(2022, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2022, 3, 31).unwrap(),
            &columns,
            &rows,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::Cancelled));
    }

    #[test]
    fn write_parts_rejects_a_planted_symlink_at_the_target_path() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("orders").join("202203");
        std::fs::create_dir_all(&folder).unwrap();
        let target_name = render_file_name(
            &CsvConfig::default().file_name_template,
            "orders",
            NaiveDate::from_ymd_opt(2022, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2022, 3, 31).unwrap(),
            1,
        );
        let outside = tempdir().unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(outside.path().join("escaped.csv"), folder.join(&target_name)).unwrap();

        #[cfg(unix)]
        {
            let rows: Vec<Row> = vec![make_row(1, "n")];
            let columns = vec!["id".to_string(), "note".to_string()];
            let err = write_parts(
                &CsvConfig::default(),
                dir.path().to_str().unwrap(),
                "orders",
                NaiveDate::from_ymd_opt(2022, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2022, 3, 31).unwrap(),
                &columns,
                &rows,
                &CancellationToken::new(),
            )
            .unwrap_err();
            assert!(matches!(err, ArchiveError::Filesystem(_)));
            assert!(!outside.path().join("escaped.csv").exists());
        }
    }
}
