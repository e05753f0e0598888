//! CSV encoding of ingest records and decoding of job results.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, ErrorKind, Result};
use crate::types::{Record, ResultRow};

/// Default upper bound on one upload, in bytes. Uploads are base64 encoded
/// server side, which grows them by up to half.
pub const DEFAULT_MAX_SIZE_BYTES: usize = 100_000_000;

/// Default upper bound on records in one upload: the daily org maximum.
pub const DEFAULT_MAX_RECORDS: usize = 150_000_000;

/// Salesforce creates one internal batch per this many uploaded records.
pub const RECORDS_PER_BATCH: usize = 10_000;

/// Encode records as one or more CSV uploads, each starting with a header.
///
/// Column order follows `fieldnames`; when absent, it is every field in
/// first-seen order. A field missing from a record is written empty, and a
/// field not in `fieldnames` is an error. Values are written as follows:
/// `null` is empty, booleans are `true`/`false`, and numbers and strings are
/// written as-is. A nested object with one entry becomes a relationship
/// column (`Account.Name`).
///
/// A chunk is closed once it reaches `max_size_bytes` or `max_records`. The
/// row that pushed it over either limit moves to the next chunk, unless it is
/// the only row in the chunk.
pub fn serialize_ingest_data(
    records: &[Record],
    fieldnames: Option<&[String]>,
    max_size_bytes: usize,
    max_records: usize,
) -> Result<Vec<Bytes>> {
    if max_size_bytes == 0 || max_records == 0 {
        return Err(Error::new(ErrorKind::InvalidInput(
            "chunk limits must be greater than zero".to_string(),
        )));
    }

    let rows = records
        .iter()
        .map(flatten_record)
        .collect::<Result<Vec<_>>>()?;
    let fieldnames = match fieldnames {
        Some(fieldnames) => fieldnames.to_vec(),
        None => infer_fieldnames(&rows),
    };

    let header = encode_row(fieldnames.iter().map(String::as_str))?;

    let mut chunks = Vec::new();
    let mut buffer: Vec<u8> = Vec::new();
    let mut buffered_rows = 0usize;
    let mut carry_over: Option<Vec<u8>> = None;

    for (index, row) in rows.iter().enumerate() {
        let encoded = encode_row(ordered_values(row, &fieldnames, index)?)?;
        if buffer.is_empty() {
            buffer.extend_from_slice(&header);
            if let Some(carried) = carry_over.take() {
                buffer.extend_from_slice(&carried);
                buffered_rows = 1;
            }
        }
        buffer.extend_from_slice(&encoded);
        buffered_rows += 1;

        if buffer.len() >= max_size_bytes || buffered_rows >= max_records {
            let over = buffer.len() > max_size_bytes || buffered_rows > max_records;
            if over && buffered_rows > 1 {
                buffer.truncate(buffer.len() - encoded.len());
                carry_over = Some(encoded);
            }
            chunks.push(Bytes::from(std::mem::take(&mut buffer)));
            buffered_rows = 0;
        }
    }

    if let Some(carried) = carry_over {
        buffer.extend_from_slice(&header);
        buffer.extend_from_slice(&carried);
    }
    if !buffer.is_empty() {
        chunks.push(Bytes::from(buffer));
    }
    Ok(chunks)
}

/// Parse a job result CSV into rows keyed by column header.
pub fn deserialize_ingest_results(data: &[u8]) -> Result<Vec<ResultRow>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(data);
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            headers
                .iter()
                .zip(record.iter())
                .map(|(header, value)| (header.to_string(), value.to_string()))
                .collect::<HashMap<_, _>>(),
        );
    }
    Ok(rows)
}

/// Internal batches an upload will consume, counting every line after the
/// header as one record.
pub fn estimate_batches(data: &[u8]) -> u32 {
    let start = data.iter().position(|b| *b != b'\n');
    let end = data.iter().rposition(|b| *b != b'\n');
    let lines = match (start, end) {
        (Some(start), Some(end)) => data[start..=end].iter().filter(|b| **b == b'\n').count() + 1,
        _ => 1,
    };
    u32::try_from((lines - 1).div_ceil(RECORDS_PER_BATCH)).unwrap_or(u32::MAX)
}

/// Flattened `(column, value)` pairs of one record, in record order.
fn flatten_record(record: &Record) -> Result<Vec<(String, String)>> {
    record
        .iter()
        .map(|(key, value)| match value {
            Value::Object(nested) => {
                let mut entries = nested.iter();
                let (sub_key, sub_value) = match (entries.next(), entries.next()) {
                    (Some(entry), None) => entry,
                    _ => {
                        return Err(Error::new(ErrorKind::InvalidData(format!(
                            "object for '{key}' must have exactly one entry, got {}",
                            nested.len()
                        ))))
                    }
                };
                let column = if key.to_ascii_lowercase().ends_with("__c") {
                    let corrected = format!("{}r", &key[..key.len() - 1]);
                    warn!(
                        field = %key,
                        corrected = %corrected,
                        "Relationships for custom fields must end with '__r'"
                    );
                    format!("{corrected}.{sub_key}")
                } else {
                    format!("{key}.{sub_key}")
                };
                Ok((column, scalar(key, sub_value)?))
            }
            other => Ok((key.clone(), scalar(key, other)?)),
        })
        .collect()
}

fn scalar(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Bool(true) => Ok("true".to_string()),
        Value::Bool(false) => Ok("false".to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(s.clone()),
        Value::Array(_) | Value::Object(_) => Err(Error::new(ErrorKind::InvalidData(format!(
            "value for '{key}' must be a scalar"
        )))),
    }
}

fn infer_fieldnames(rows: &[Vec<(String, String)>]) -> Vec<String> {
    let mut seen = HashSet::new();
    rows.iter()
        .flatten()
        .filter(|(column, _)| seen.insert(column.as_str()))
        .map(|(column, _)| column.clone())
        .collect()
}

fn ordered_values<'a>(
    row: &'a [(String, String)],
    fieldnames: &'a [String],
    index: usize,
) -> Result<Vec<&'a str>> {
    let values: HashMap<&str, &str> = row
        .iter()
        .map(|(column, value)| (column.as_str(), value.as_str()))
        .collect();
    if let Some(unknown) = values
        .keys()
        .copied()
        .find(|column| !fieldnames.iter().any(|name| name.as_str() == *column))
    {
        return Err(Error::new(ErrorKind::InvalidData(format!(
            "record {index} has field '{unknown}' which is not in fieldnames"
        ))));
    }
    Ok(fieldnames
        .iter()
        .map(|name| values.get(name.as_str()).copied().unwrap_or(""))
        .collect())
}

/// One CSV row, LF terminated, quoting only where needed.
fn encode_row<'a>(fields: impl IntoIterator<Item = &'a str>) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    writer
        .into_inner()
        .map_err(|e| Error::new(ErrorKind::Csv(e.to_string())))
}
