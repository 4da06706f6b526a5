//! Decoding raw record batches from exported files.

use std::io::Read;

use csv::ReaderBuilder;
use serde_json::{Map, Value};

use crate::errors::SourceError;

/// Accepts a bare JSON array or an object with a `records` array.
pub fn records_from_json(content: &str) -> Result<Vec<Value>, SourceError> {
    match serde_json::from_str::<Value>(content)? {
        Value::Array(records) => Ok(records),
        Value::Object(mut envelope) => match envelope.remove("records") {
            Some(Value::Array(records)) => Ok(records),
            _ => Err(SourceError::NotABatch),
        },
        _ => Err(SourceError::NotABatch),
    }
}

/// Reads a CSV export with a header row. Every cell becomes a JSON string,
/// empty cells become null.
pub fn records_from_csv<R: Read>(reader: R) -> Result<Vec<Value>, SourceError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let mut object = Map::with_capacity(headers.len());
        for (header, cell) in headers.iter().zip(row.iter()) {
            let value = if cell.trim().is_empty() {
                Value::Null
            } else {
                Value::String(cell.to_string())
            };
            object.insert(header.clone(), value);
        }
        records.push(Value::Object(object));
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_array_and_envelope() {
        let bare = records_from_json(r#"[{"计划ID":"P1"},{"计划ID":"P2"}]"#).unwrap();
        assert_eq!(bare.len(), 2);

        let wrapped = records_from_json(r#"{"records":[{"计划ID":"P1"}]}"#).unwrap();
        assert_eq!(wrapped, vec![json!({"计划ID": "P1"})]);
    }

    #[test]
    fn json_without_records_is_rejected() {
        assert!(matches!(
            records_from_json(r#"{"rows":[]}"#),
            Err(SourceError::NotABatch)
        ));
        assert!(matches!(records_from_json("42"), Err(SourceError::NotABatch)));
        assert!(matches!(records_from_json("[1,"), Err(SourceError::Json(_))));
    }

    #[test]
    fn csv_cells_become_strings_and_blanks_null() {
        let data = "\u{feff}计划ID,开始时间 ,所属客户\nP1,2025-03-01 09:30:00,Acme\nP2,45658.5,\n";
        let records = records_from_csv(data.as_bytes()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0],
            json!({"计划ID": "P1", "开始时间": "2025-03-01 09:30:00", "所属客户": "Acme"})
        );
        assert_eq!(records[1]["开始时间"], json!("45658.5"));
        assert_eq!(records[1]["所属客户"], Value::Null);
    }
}
