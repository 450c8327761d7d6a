use async_trait::async_trait;
use tracing::{debug, trace};
use crate::grid::{infer_cell, CellGrid};
use crate::processor::{AsyncProcessor, Job, ProcessingStep};
use crate::types::{Config, ProcessError, SourceFormat};

/// Loads a delimited text export as a grid. No header row is assumed.
pub struct CsvReader;

#[async_trait]
impl AsyncProcessor for CsvReader {
    async fn process(&self, job: &mut Job, _config: &Config) -> Result<(), ProcessError> {
        let bytes = std::fs::read(&job.path)?;
        if bytes.contains(&0) {
            return Err(ProcessError::ReadFailed("binary content in a text export".to_string()));
        }
        let content = decode(bytes);

        let grid = read_delimited(&content)?;
        if grid.is_empty() {
            return Err(ProcessError::EmptySheet);
        }
        debug!("delimited export: {} rows x {} columns", grid.height(), grid.width());
        job.grid = Some(grid);
        Ok(())
    }
}

impl ProcessingStep for CsvReader {
    fn required_for(&self) -> Vec<SourceFormat> {
        vec![SourceFormat::Delimited]
    }

    fn name(&self) -> &'static str {
        "csv_reader"
    }
}

/// UTF-8 when valid, otherwise Latin-1 as spreadsheet programs write it.
fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            trace!("not UTF-8, decoding as Latin-1");
            e.into_bytes().into_iter().map(char::from).collect()
        }
    }
}

/// `;` when the first line holds more of them than commas.
pub fn detect_delimiter(content: &str) -> u8 {
    let first = content.lines().next().unwrap_or_default();
    let semicolons = first.matches(';').count();
    let commas = first.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

pub fn read_delimited(content: &str) -> Result<CellGrid, ProcessError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(detect_delimiter(content))
        .flexible(true)
        .has_headers(false)
        .from_reader(content.as_bytes());

    let rows = reader
        .records()
        .map(|result| {
            result
                .map(|record| record.iter().map(infer_cell).collect())
                .map_err(|e| ProcessError::ReadFailed(format!("Failed to read CSV record: {e}")))
        })
        .collect::<Result<Vec<_>, ProcessError>>()?;

    Ok(CellGrid::from_rows(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Cell;

    #[test]
    fn test_semicolon_exports() {
        let grid = read_delimited("N°;MUNICIPIO;COMEDOR\n1;CALI;SITIO A;;x\n").unwrap();
        assert_eq!(grid.height(), 2);
        assert_eq!(grid.width(), 5);
        assert_eq!(grid.get(1, 0), &Cell::Number(1.0));
        assert!(grid.is_blank(1, 3));
        assert_eq!(grid.text(0, 0), "N°");
    }

    #[test]
    fn test_comma_exports_keep_quoted_fields() {
        let grid = read_delimited("\"CARNE DE RES, MAGRA / KG\",2\n").unwrap();
        assert_eq!(grid.text(0, 0), "CARNE DE RES, MAGRA / KG");
        assert_eq!(grid.get(0, 1), &Cell::Number(2.0));
    }

    #[test]
    fn test_latin1_fallback() {
        let text = decode(vec![b'D', 0xCD, b'A']);
        assert_eq!(text, "DÍA");
    }
}
