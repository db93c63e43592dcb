use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use super::record::{SpecRecord, COLUMNS};

/// Columns a specification file must declare.
pub const REQUIRED_COLUMNS: [&str; 3] = ["test_name", "test_type", "target"];

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open specification file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Specification is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("Malformed record on line {line}: {source}")]
    Record {
        line: u64,
        #[source]
        source: csv::Error,
    },
    #[error("Specification I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A record together with its 1-based line in the source file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub line: usize,
    pub record: SpecRecord,
}

pub fn read_path(path: &Path) -> Result<Vec<SourceRow>, SourceError> {
    let file = File::open(path).map_err(|source| SourceError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let rows = read_records(file)?;
    info!(path = %path.display(), rows = rows.len(), "Read specification file.");
    Ok(rows)
}

/// Reads every non-blank record. The header must carry all of
/// [`REQUIRED_COLUMNS`]; other columns are optional.
pub fn read_records<R: Read>(mut reader: R) -> Result<Vec<SourceRow>, SourceError> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|h| h == **column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SourceError::MissingColumns(missing));
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let line = record
            .position()
            .map(|p| physical_line(&text, p.byte()))
            .unwrap_or_default();
        if record.iter().all(|field| field.is_empty()) {
            debug!(line, "Skipping blank line.");
            continue;
        }
        let parsed: SpecRecord = record
            .deserialize(Some(&headers))
            .map_err(|source| SourceError::Record {
                line: line as u64,
                source,
            })?;
        rows.push(SourceRow { line, record: parsed });
    }
    Ok(rows)
}

/// 1-based line on which the record starting at `byte` begins. The reader
/// does not count the empty lines it skips, so lines are taken from the
/// text itself.
fn physical_line(text: &str, byte: u64) -> usize {
    let bytes = text.as_bytes();
    let mut start = usize::try_from(byte).unwrap_or(usize::MAX).min(bytes.len());
    while start < bytes.len() && matches!(bytes[start], b'\r' | b'\n') {
        start += 1;
    }
    bytes[..start].iter().filter(|b| **b == b'\n').count() + 1
}

pub fn write_path(path: &Path, records: &[SpecRecord]) -> Result<(), SourceError> {
    let file = File::create(path).map_err(|source| SourceError::Open {
        path: path.display().to_string(),
        source,
    })?;
    write_records(file, records)?;
    info!(path = %path.display(), rows = records.len(), "Wrote specification file.");
    Ok(())
}

pub fn write_records<W: Write>(writer: W, records: &[SpecRecord]) -> Result<(), SourceError> {
    let mut writer = csv::Writer::from_writer(writer);
    if records.is_empty() {
        // serde only emits the header alongside the first record
        writer.write_record(COLUMNS)?;
    }
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_minimal_file_with_line_numbers() {
        let data =
            "test_name,test_type,target\nA,dns,example.com\n\n,,\nB,ip,\"10.0.0.1,10.0.0.2\"\n";
        let rows = read_records(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[0].record.name(), Some("A"));
        assert_eq!(rows[1].line, 5);
        assert_eq!(rows[1].record.target.as_deref(), Some("10.0.0.1,10.0.0.2"));
        assert_eq!(rows[1].record.site_name, None);
    }

    #[test]
    fn test_line_numbers_count_skipped_blank_lines() {
        let data = "test_name,test_type,target\nA,dns,x\nB,dns,y\n\nC,dns,z\n";
        let lines: Vec<(String, usize)> = read_records(data.as_bytes())
            .unwrap()
            .into_iter()
            .map(|r| (r.record.test_name.unwrap(), r.line))
            .collect();
        assert_eq!(
            lines,
            vec![("A".to_string(), 2), ("B".to_string(), 3), ("C".to_string(), 5)]
        );

        let crlf = "test_name,test_type,target\r\n\r\n\r\nA,dns,x\r\nB,dns,y\r\n";
        let rows = read_records(crlf.as_bytes()).unwrap();
        assert_eq!(rows.iter().map(|r| r.line).collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    fn test_missing_required_column_is_fatal() {
        let data = "test_name,target\nA,example.com\n";
        match read_records(data.as_bytes()) {
            Err(SourceError::MissingColumns(columns)) => assert_eq!(columns, vec!["test_type"]),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_written_header_matches_columns() {
        let mut with_rows = Vec::new();
        write_records(&mut with_rows, &[SpecRecord::default()]).unwrap();
        let mut empty = Vec::new();
        write_records(&mut empty, &[]).unwrap();

        let header_of = |bytes: &[u8]| {
            let text = String::from_utf8(bytes.to_vec()).unwrap();
            text.lines().next().unwrap().to_string()
        };
        assert_eq!(header_of(&with_rows), COLUMNS.join(","));
        assert_eq!(header_of(&empty), COLUMNS.join(","));
    }

    #[test]
    fn test_short_records_fill_missing_cells() {
        let data = "test_name,test_type,target,site_name,labels\nA,dns,example.com\n";
        let rows = read_records(data.as_bytes()).unwrap();
        assert_eq!(rows[0].record.site_name, None);
        assert_eq!(rows[0].record.labels, None);
    }
}
