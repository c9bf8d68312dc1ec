//! Tabular retrieval context handed to the answering model.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Column delimiter used when a table is rendered into a prompt.
pub const COLUMN_DELIMITER: &str = ",\t";

/// A header row plus data rows of the same arity.
///
/// By convention the first column is a 1-based row number (`id`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTable {
    pub header: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

impl ContextTable {
    pub fn new(header: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            header: header.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row with exactly one cell per header column.
    pub fn push_row(&mut self, row: impl IntoIterator<Item = impl Into<String>>) {
        let row: Vec<String> = row.into_iter().map(Into::into).collect();
        debug_assert_eq!(
            row.len(),
            self.header.len(),
            "row arity must match the header"
        );
        self.rows.push(row);
    }

    /// Append a row from loosely shaped input: short rows are padded with
    /// blanks, long rows truncated. Returns whether the row was reshaped.
    pub fn push_row_lenient(&mut self, row: impl IntoIterator<Item = impl Into<String>>) -> bool {
        let mut row: Vec<String> = row.into_iter().map(Into::into).collect();
        let reshaped = row.len() != self.header.len();
        row.resize(self.header.len(), String::new());
        self.rows.push(row);
        reshaped
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render header and rows joined by [`COLUMN_DELIMITER`], one per line.
    pub fn render(&self) -> String {
        if self.header.is_empty() && self.rows.is_empty() {
            return String::new();
        }
        std::iter::once(&self.header)
            .chain(self.rows.iter())
            .map(|row| row.join(COLUMN_DELIMITER))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Encode as CSV (header first), quoting cells that need it.
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(vec![]);
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Decode CSV text produced by [`ContextTable::to_csv`] or a retriever.
    ///
    /// Leading/trailing whitespace in cells (e.g. after `,\t`) is trimmed.
    /// Ragged rows are fitted to the header. Blank input yields an empty
    /// table.
    pub fn parse_csv(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let header = reader.headers()?.clone();
        let mut table = Self::new(header.iter());
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let width = record.len();
            if table.push_row_lenient(record.iter()) {
                debug!(
                    line = line + 2,
                    width,
                    columns = table.header.len(),
                    "Fitted ragged CSV row"
                );
            }
        }
        Ok(table)
    }
}
