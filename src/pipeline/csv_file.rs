use chrono::NaiveDate;
use std::collections::HashMap;

use crate::errors::AppResult;
use crate::models::CsvPreview;

/// A fully parsed CSV file: header list plus all data rows.
///
/// The whole byte stream is read in one pass at intake so later stages have
/// exact totals for progress percentages. Files are small enough for this
/// (uploads are size-capped by the configuration).
#[derive(Debug, Clone)]
pub struct CsvFile {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvFile {
    pub fn parse(bytes: &[u8]) -> AppResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(|cell| cell.to_string()).collect();
            // Short rows are padded so every row indexes like the header
            while row.len() < headers.len() {
                row.push(String::new());
            }
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    pub fn total_rows(&self) -> u64 {
        self.rows.len() as u64
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// First `limit` data rows plus per-column inferred types.
    pub fn preview(&self, limit: usize) -> CsvPreview {
        let data: Vec<Vec<String>> = self.rows.iter().take(limit).cloned().collect();

        let mut data_types = HashMap::new();
        for (index, header) in self.headers.iter().enumerate() {
            let samples: Vec<&str> = data
                .iter()
                .filter_map(|row| row.get(index).map(|s| s.as_str()))
                .collect();
            data_types.insert(header.clone(), infer_data_type(&samples).to_string());
        }

        CsvPreview {
            headers: self.headers.clone(),
            data,
            data_types,
        }
    }
}

/// Infers a column type from sample values: every non-empty sample must
/// agree on the type, otherwise the column is a string.
fn infer_data_type(samples: &[&str]) -> &'static str {
    let non_empty: Vec<&str> = samples
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    if non_empty.is_empty() {
        return "empty";
    }
    if non_empty.iter().all(|s| s.parse::<f64>().is_ok()) {
        return "number";
    }
    if non_empty.iter().all(|s| is_date(s)) {
        return "date";
    }
    if non_empty
        .iter()
        .all(|s| matches!(s.to_lowercase().as_str(), "true" | "false" | "yes" | "no"))
    {
        return "boolean";
    }
    "string"
}

fn is_date(value: &str) -> bool {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        || NaiveDate::parse_from_str(value, "%d/%m/%Y").is_ok()
        || NaiveDate::parse_from_str(value, "%d-%m-%Y").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] =
        b"postcode,price,date_of_transfer\nLS1 4AP,250000,2024-01-15\nYO1 7HH,180000,2024-02-20\n";

    #[test]
    fn parses_headers_and_rows() {
        let file = CsvFile::parse(SAMPLE).unwrap();
        assert_eq!(
            file.headers,
            vec!["postcode", "price", "date_of_transfer"]
        );
        assert_eq!(file.total_rows(), 2);
        assert_eq!(file.rows[0][0], "LS1 4AP");
        assert_eq!(file.column_index("price"), Some(1));
        assert_eq!(file.column_index("missing"), None);
    }

    #[test]
    fn pads_short_rows() {
        let file = CsvFile::parse(b"a,b,c\n1,2\n").unwrap();
        assert_eq!(file.rows[0], vec!["1", "2", ""]);
    }

    #[test]
    fn header_only_file_has_zero_rows() {
        let file = CsvFile::parse(b"a,b,c\n").unwrap();
        assert_eq!(file.total_rows(), 0);
    }

    #[test]
    fn preview_infers_column_types() {
        let file = CsvFile::parse(SAMPLE).unwrap();
        let preview = file.preview(10);
        assert_eq!(preview.data.len(), 2);
        assert_eq!(preview.data_types["price"], "number");
        assert_eq!(preview.data_types["date_of_transfer"], "date");
        assert_eq!(preview.data_types["postcode"], "string");
    }

    #[test]
    fn preview_limits_rows() {
        let file = CsvFile::parse(SAMPLE).unwrap();
        let preview = file.preview(1);
        assert_eq!(preview.data.len(), 1);
    }
}
