use calamine::{open_workbook_auto, DataType, Range, Reader};
use async_trait::async_trait;
use tracing::debug;
use crate::grid::{Cell, CellGrid};
use crate::processor::{AsyncProcessor, Job, ProcessingStep};
use crate::types::{Config, ProcessError, SourceFormat};

/// Loads the first worksheet of a workbook as a grid.
pub struct SpreadsheetReader;

#[async_trait]
impl AsyncProcessor for SpreadsheetReader {
    async fn process(&self, job: &mut Job, _config: &Config) -> Result<(), ProcessError> {
        let mut workbook = open_workbook_auto(&job.path)
            .map_err(|e| ProcessError::ReadFailed(e.to_string()))?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or(ProcessError::NoWorksheet)?
            .map_err(|e| ProcessError::ReadFailed(e.to_string()))?;

        let grid = grid_from_range(&range);
        if grid.is_empty() {
            return Err(ProcessError::EmptySheet);
        }
        debug!("worksheet 0: {} rows x {} columns", grid.height(), grid.width());
        job.grid = Some(grid);
        Ok(())
    }
}

impl ProcessingStep for SpreadsheetReader {
    fn required_for(&self) -> Vec<SourceFormat> {
        vec![SourceFormat::Spreadsheet]
    }

    fn name(&self) -> &'static str {
        "spreadsheet_reader"
    }
}

/// Ranges start at the first used cell; rows and columns before it are
/// padded so grid coordinates match sheet coordinates.
pub fn grid_from_range(range: &Range<DataType>) -> CellGrid {
    let (start_row, start_col) = match range.start() {
        Some((r, c)) => (r as usize, c as usize),
        None => return CellGrid::default(),
    };

    let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); start_row];
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; start_col];
        cells.extend(row.iter().map(convert_cell));
        rows.push(cells);
    }
    CellGrid::from_rows(rows)
}

fn convert_cell(cell: &DataType) -> Cell {
    match cell {
        DataType::String(s) if s.trim().is_empty() => Cell::Empty,
        DataType::String(s) => Cell::text(s.as_str()),
        DataType::Float(f) => Cell::Number(*f),
        DataType::Int(i) => Cell::Number(*i as f64),
        DataType::Bool(b) => Cell::text(if *b { "TRUE" } else { "FALSE" }),
        DataType::DateTime(serial) => Cell::Number(*serial),
        _ => Cell::Empty,
    }
}
