//! Flattening of nested API records into rows and columns
//!
//! Nested mappings expand into dotted column names (`sectors.s1`). Sequences
//! are joined into a single cell with `", "`; sequence items that are
//! themselves mappings or sequences are rendered as compact JSON. Nulls and
//! missing fields become empty cells.

use serde_json::Value;
use std::collections::HashMap;

/// Separator between a parent field and its nested field in a column name
pub const KEY_SEPARATOR: &str = ".";

/// Separator between the items of a sequence inside one cell
pub const SEQUENCE_SEPARATOR: &str = ", ";

/// Column used when a record is a bare scalar or sequence
pub const VALUE_COLUMN: &str = "value";

/// Flattened records ready for tabular output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    /// Union of all flattened keys, in first-seen order
    pub columns: Vec<String>,
    /// One row per record, aligned with `columns`
    pub rows: Vec<Vec<String>>,
}

/// The records of a payload: the items of a list, or the payload itself
pub fn records(payload: &Value) -> Vec<&Value> {
    match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Flattens one record into ordered (column, cell) pairs
pub fn flatten_record(record: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    match record {
        Value::Object(_) => flatten_into("", record, &mut out),
        other => out.push((VALUE_COLUMN.to_string(), cell(other))),
    }
    out
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let column = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}{}{}", prefix, KEY_SEPARATOR, key)
                };
                flatten_into(&column, nested, out);
            }
        }
        other => out.push((prefix.to_string(), cell(other))),
    }
}

/// Text of a non-mapping value
fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(_) | Value::Array(_) => item.to_string(),
                scalar => cell(scalar),
            })
            .collect::<Vec<_>>()
            .join(SEQUENCE_SEPARATOR),
        Value::Object(_) => value.to_string(),
    }
}

/// Flattens all records into a table whose columns are the union of every
/// record's keys
///
/// When two fields of one record flatten to the same name (`{"a.b": 1,
/// "a": {"b": 2}}`), the first one in field order wins.
pub fn to_table(records: &[&Value]) -> Table {
    let flattened: Vec<Vec<(String, String)>> =
        records.iter().map(|record| flatten_record(record)).collect();

    let mut columns: Vec<String> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for row in &flattened {
        for (column, _) in row {
            if !index.contains_key(column) {
                index.insert(column.clone(), columns.len());
                columns.push(column.clone());
            }
        }
    }

    let rows = flattened
        .into_iter()
        .map(|row| {
            let mut cells: Vec<Option<String>> = vec![None; columns.len()];
            for (column, value) in row {
                let slot = &mut cells[index[&column]];
                if slot.is_none() {
                    *slot = Some(value);
                }
            }
            cells.into_iter().map(Option::unwrap_or_default).collect()
        })
        .collect();

    Table { columns, rows }
}
