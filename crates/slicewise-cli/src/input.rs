//! CSV input: read a headered CSV file into row batches.
//!
//! Cell types are inferred per value: unsigned integer, then signed integer,
//! then float; an empty cell is null and anything else is a string.

use std::io::Read;

use slicewise_core::types::{Column, RowBatch, Scalar};

pub fn parse_cell(raw: &str) -> Scalar {
    let s = raw.trim();
    if s.is_empty() {
        return Scalar::Null;
    }
    if let Ok(v) = s.parse::<u64>() {
        return Scalar::U64(v);
    }
    if let Ok(v) = s.parse::<i64>() {
        return Scalar::I64(v);
    }
    if let Ok(v) = s.parse::<f64>() {
        return Scalar::F64(v);
    }
    match s {
        "true" => Scalar::Bool(true),
        "false" => Scalar::Bool(false),
        _ => Scalar::Str(s.to_string()),
    }
}

/// Streams batches of at most `batch_rows` rows out of a CSV reader.
pub struct CsvBatches<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    batch_rows: usize,
}

impl<R: Read> CsvBatches<R> {
    pub fn new(input: R, batch_rows: usize) -> Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(input);
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        Ok(Self {
            reader,
            headers,
            batch_rows: batch_rows.max(1),
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Next batch, or `None` at end of input.
    pub fn next_batch(&mut self) -> Result<Option<RowBatch>, csv::Error> {
        let mut columns: Vec<Vec<Scalar>> = vec![Vec::new(); self.headers.len()];
        let mut rows = 0;
        let mut record = csv::StringRecord::new();
        while rows < self.batch_rows && self.reader.read_record(&mut record)? {
            for (i, col) in columns.iter_mut().enumerate() {
                col.push(record.get(i).map_or(Scalar::Null, parse_cell));
            }
            rows += 1;
        }
        if rows == 0 {
            return Ok(None);
        }
        Ok(Some(RowBatch::new(
            self.headers
                .iter()
                .zip(columns)
                .map(|(name, values)| Column::new(name.clone(), values))
                .collect(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_are_typed() {
        assert_eq!(parse_cell("42"), Scalar::U64(42));
        assert_eq!(parse_cell("-3"), Scalar::I64(-3));
        assert_eq!(parse_cell("2.5"), Scalar::F64(2.5));
        assert_eq!(parse_cell(""), Scalar::Null);
        assert_eq!(parse_cell("true"), Scalar::Bool(true));
        assert_eq!(parse_cell("north"), Scalar::Str("north".into()));
    }

    #[test]
    fn batches_are_bounded() {
        let data = "ts,value\n1,10\n2,20\n3,30\n";
        let mut batches = CsvBatches::new(data.as_bytes(), 2).expect("headers");
        assert_eq!(batches.headers(), ["ts".to_string(), "value".to_string()]);
        let first = batches.next_batch().expect("read").expect("batch");
        assert_eq!(first.num_rows(), 2);
        let second = batches.next_batch().expect("read").expect("batch");
        assert_eq!(second.num_rows(), 1);
        assert_eq!(
            second.column("value").expect("column").values,
            vec![Scalar::U64(30)]
        );
        assert!(batches.next_batch().expect("read").is_none());
    }
}
