//! Decoding of NOAA SWPC "products" files: JSON arrays whose first row is
//! a header of column names, and whose remaining rows are records holding
//! one cell per column, with most values encoded as strings.

use crate::FetchError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

/// ProductFrame is a decoded products table.
#[derive(Debug)]
pub struct ProductFrame {
    product: &'static str,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl ProductFrame {
    /// Decode a products payload and split off its header row.
    pub fn decode(product: &'static str, bytes: &[u8]) -> Result<Self, FetchError> {
        let mut rows: Vec<Vec<Value>> =
            serde_json::from_slice(bytes).map_err(|err| FetchError::PermanentFormat {
                product,
                reason: format!("not a products table: {err}"),
            })?;

        if rows.is_empty() {
            return Err(FetchError::PermanentFormat {
                product,
                reason: "missing header row".to_string(),
            });
        }

        let columns = rows
            .remove(0)
            .into_iter()
            .map(|cell| match cell {
                Value::String(name) => Ok(name),
                cell => Err(FetchError::PermanentFormat {
                    product,
                    reason: format!("header cell {cell} is not a column name"),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            product,
            columns,
            rows,
        })
    }

    /// Index of the named column. Columns are located by name so that
    /// upstream re-ordering or additions don't break decoding.
    pub fn column(&self, name: &str) -> Result<usize, FetchError> {
        self.columns
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| FetchError::PermanentFormat {
                product: self.product,
                reason: format!("missing column {name:?}"),
            })
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// String content of a row cell, or None if absent or not a string.
    pub fn str_cell<'r>(row: &'r [Value], column: usize) -> Option<&'r str> {
        row.get(column).and_then(Value::as_str)
    }

    /// Numeric content of a row cell. Products files mostly report numbers
    /// as strings, but some carry native JSON numbers.
    pub fn f64_cell(row: &[Value], column: usize) -> Option<f64> {
        match row.get(column)? {
            Value::Number(number) => number.as_f64(),
            Value::String(repr) => repr.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Parse an upstream timestamp into UTC. Products files use naive UTC
/// timestamps with or without a fractional second; JSON products use
/// RFC 3339.
pub fn parse_time_tag(repr: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(repr) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.3f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(repr, format) {
            return Some(parsed.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decode_locates_columns_by_name() {
        let frame = ProductFrame::decode(
            "fixture",
            br#"[
                ["time_tag", "Kp", "station_count"],
                ["2024-01-05 00:00:00.000", "3.67", "8"],
                ["2024-01-05 03:00:00.000", "5.33", "8"]
            ]"#,
        )
        .unwrap();

        let time_tag = frame.column("time_tag").unwrap();
        let kp = frame.column("Kp").unwrap();
        assert_eq!(frame.rows().len(), 2);
        assert_eq!(
            ProductFrame::str_cell(&frame.rows()[0], time_tag),
            Some("2024-01-05 00:00:00.000")
        );
        assert_eq!(ProductFrame::f64_cell(&frame.rows()[1], kp), Some(5.33));
    }

    #[test]
    fn test_decode_errors() {
        let err = ProductFrame::decode("fixture", b"{\"not\": \"a table\"}").unwrap_err();
        assert!(
            matches!(err, FetchError::PermanentFormat { .. }),
            "{err:?}"
        );

        let err = ProductFrame::decode("fixture", b"[]").unwrap_err();
        insta::assert_snapshot!(
            err.to_string(),
            @"malformed fixture payload: missing header row"
        );

        let err = ProductFrame::decode("fixture", b"[[42]]").unwrap_err();
        insta::assert_snapshot!(
            err.to_string(),
            @"malformed fixture payload: header cell 42 is not a column name"
        );

        let frame = ProductFrame::decode("fixture", br#"[["time_tag"]]"#).unwrap();
        let err = frame.column("Kp").unwrap_err();
        insta::assert_snapshot!(
            err.to_string(),
            @r#"malformed fixture payload: missing column "Kp""#
        );
    }

    #[test]
    fn test_parse_time_tag() {
        let table = vec![
            ("2024-01-05 03:00:00.000", Some("2024-01-05T03:00:00Z")),
            ("2024-01-05 03:00:00", Some("2024-01-05T03:00:00Z")),
            ("2024-01-05T03:05:00Z", Some("2024-01-05T03:05:00Z")),
            ("2024-01-05", None),
            ("soon", None),
        ];

        for (input, expect) in table {
            let parsed = parse_time_tag(input);
            assert_eq!(
                parsed,
                expect.map(|repr| repr.parse().unwrap()),
                "input {input:?}"
            );
        }
    }

    #[test]
    fn test_mixed_cell_representations() {
        let frame = ProductFrame::decode(
            "fixture",
            br#"[["v"], ["3.67"], [4], [null], ["  5.0 "], [true]]"#,
        )
        .unwrap();
        let v = frame.column("v").unwrap();

        let values: Vec<Option<f64>> = frame
            .rows()
            .iter()
            .map(|row| ProductFrame::f64_cell(row, v))
            .collect();
        assert_eq!(values, vec![Some(3.67), Some(4.0), None, Some(5.0), None]);
    }
}
