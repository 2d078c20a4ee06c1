// src/render.rs

use crate::dataset::Record;
use crate::lookup::LookupOutcome;

/// The text shown to the user for one lookup.
pub fn outcome(outcome: &LookupOutcome, json: bool) -> String {
    match outcome {
        LookupOutcome::Found(record) if json => {
            record_json(record).unwrap_or_else(|e| format!("cannot encode record: {}", e))
        }
        LookupOutcome::Found(record) => format!("Information found:\n{}", record_table(record)),
        LookupOutcome::NotFound(key) => format!("No information found for ID {}.", key),
        LookupOutcome::InvalidInput(e) => {
            format!("Please enter a valid ID (a whole number): {}", e)
        }
    }
}

/// Lay a record out as a one-row table: header line, rule, value line.
pub fn record_table(record: &Record) -> String {
    let cells: Vec<(String, String)> = record
        .fields()
        .iter()
        .map(|(name, value)| (name.clone(), value.to_string()))
        .collect();
    let widths: Vec<usize> = cells
        .iter()
        .map(|(h, v)| h.chars().count().max(v.chars().count()))
        .collect();

    let header = padded_line(cells.iter().map(|(h, _)| h.as_str()), &widths);
    let values = padded_line(cells.iter().map(|(_, v)| v.as_str()), &widths);
    let rule = widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>()
        .join("-+-");

    format!("{}\n{}\n{}", header, rule, values)
}

fn padded_line<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    cells
        .zip(widths)
        .map(|(cell, w)| format!("{:<width$}", cell, width = *w))
        .collect::<Vec<_>>()
        .join(" | ")
        .trim_end()
        .to_string()
}

/// One JSON object per record, keys in field order.
pub fn record_json(record: &Record) -> serde_json::Result<String> {
    serde_json::to_string(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Column, ColumnKind, Dataset, Value};

    fn record() -> Record {
        let ds = Dataset::new(
            vec![
                Column::new("NOMBRE", ColumnKind::Text),
                Column::new("CEDULA", ColumnKind::Integer),
                Column::new("SALDO", ColumnKind::Float),
            ],
            vec![vec![
                Value::Text("Ana María".into()),
                Value::Int(100),
                Value::Float(2500.99),
            ]],
        )
        .unwrap();
        Record::from_row(&ds, 0, 1).unwrap()
    }

    #[test]
    fn test_table_layout() {
        let out = record_table(&record());
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], "CEDULA | NOMBRE    | SALDO");
        assert_eq!(lines[1], "-------+-----------+------");
        assert_eq!(lines[2], "100    | Ana María | 2500");
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            outcome(&LookupOutcome::NotFound(300), false),
            "No information found for ID 300."
        );
        let invalid = crate::lookup::parse_key("abc").unwrap_err();
        assert!(outcome(&LookupOutcome::InvalidInput(invalid), false).starts_with("Please enter"));
        let found = outcome(&LookupOutcome::Found(record()), true);
        assert!(found.starts_with(r#"{"CEDULA":100"#));
    }

    #[test]
    fn test_json_output() {
        assert_eq!(
            record_json(&record()).unwrap(),
            r#"{"CEDULA":100,"NOMBRE":"Ana María","SALDO":2500.99}"#
        );
    }
}
