use std::sync::Arc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;
use crate::grid::CellGrid;
use super::columns::ProductColumnMap;
use super::header::HeaderMetadata;
use super::vocabulary::ProductQuantities;

/// Column-0 literals that open a site table.
pub const TABLE_START_MARKERS: &[&str] = &["N°", "Nº", "NO.", "NUM"];

/// One delivery site of one block. Immutable once extracted.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub header: Arc<HeaderMetadata>,
    pub day: String,
    pub route: String,
    pub sequence_number: i64,
    pub municipality: String,
    pub site_name: String,
    pub beneficiary_count: i64,
    pub address: String,
    pub quantities: ProductQuantities,
}

/// How a non-record row after the first record is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// Skip it and keep reading until a TOTAL row or a new block.
    #[default]
    Lenient,
    /// Stop at it.
    Strict,
}

pub fn is_table_start_marker(text: &str) -> bool {
    let upper = text.trim().to_uppercase();
    TABLE_START_MARKERS.iter().any(|m| upper == *m)
}

pub fn is_total_row(text: &str) -> bool {
    text.to_uppercase().contains("TOTAL")
}

/// Numbered id in column 0 with municipality and site name present.
pub fn is_record_row(grid: &CellGrid, row: usize) -> bool {
    grid.get(row, 0).is_number() && !grid.is_blank(row, 1) && !grid.is_blank(row, 2)
}

pub struct RecordExtractor<'a> {
    grid: &'a CellGrid,
    columns: &'a ProductColumnMap,
    header: &'a Arc<HeaderMetadata>,
    terminators: &'a [&'a Regex],
    mode: ExtractionMode,
}

impl<'a> RecordExtractor<'a> {
    pub fn new(
        grid: &'a CellGrid,
        columns: &'a ProductColumnMap,
        header: &'a Arc<HeaderMetadata>,
        terminators: &'a [&'a Regex],
        mode: ExtractionMode,
    ) -> Self {
        Self { grid, columns, header, terminators, mode }
    }

    /// Reads the rows after `table_row` until a terminator.
    pub fn extract(&self, table_row: usize, day: &str, route: &str) -> Vec<Record> {
        let mut records = Vec::new();

        for row in (table_row + 1)..self.grid.height() {
            if is_record_row(self.grid, row) {
                records.push(self.record_at(row, day, route));
                continue;
            }

            let first = self.grid.text(row, 0);
            if !first.is_empty() && self.starts_new_section(&first) {
                trace!("row {}: block ends at {:?}", row, first);
                break;
            }

            let numeric = self.grid.get(row, 0).is_number();
            if self.mode == ExtractionMode::Strict && !numeric && !records.is_empty() {
                trace!("row {}: block ends at non-record row", row);
                break;
            }

            trace!("row {}: skipped", row);
        }

        records
    }

    fn starts_new_section(&self, text: &str) -> bool {
        is_total_row(text)
            || is_table_start_marker(text)
            || self.terminators.iter().any(|re| re.is_match(text))
    }

    fn record_at(&self, row: usize, day: &str, route: &str) -> Record {
        let grid = self.grid;
        Record {
            header: Arc::clone(self.header),
            day: day.to_string(),
            route: route.to_string(),
            sequence_number: grid.get(row, 0).number_or_zero().trunc() as i64,
            municipality: grid.text(row, 1),
            site_name: grid.text(row, 2),
            beneficiary_count: grid.get(row, 3).number_or_zero().trunc() as i64,
            address: grid.text(row, 4),
            quantities: self.columns.read(grid, row),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::columns::DetectionMethod;
    use crate::inference::dialect::DialectTag;
    use crate::inference::vocabulary::ProductKind;

    fn pork_map() -> ProductColumnMap {
        let mut map = ProductColumnMap::new(0, DetectionMethod::HeaderRow);
        map.insert(ProductKind::PorkMeat, 5);
        map
    }

    fn run(rows: Vec<Vec<&str>>, mode: ExtractionMode) -> Vec<Record> {
        let grid = CellGrid::from_text_rows(rows);
        let map = pork_map();
        let header = Arc::new(HeaderMetadata::default());
        let terminators = [DialectTag::generic_route_pattern()];
        RecordExtractor::new(&grid, &map, &header, &terminators, mode).extract(0, "DIA 1", "RUTA 1")
    }

    #[test]
    fn test_reads_numbered_rows_until_total() {
        let records = run(
            vec![
                vec!["N°", "MUNICIPIO", "COMEDOR", "COBER", "DIRECCION", "CERDO KG"],
                vec!["1", "CALI", "SITIO A", "40", "CL 1", "3.5"],
                vec!["2", "CALI", "SITIO B", "abc", "CL 2", "x"],
                vec!["TOTAL", "", "", "", "", "3.5"],
                vec!["3", "CALI", "SITIO C", "10", "CL 3", "1"],
            ],
            ExtractionMode::Lenient,
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sequence_number, 1);
        assert_eq!(records[0].quantities.get(ProductKind::PorkMeat), 3.5);
        assert_eq!(records[1].beneficiary_count, 0);
        assert_eq!(records[1].quantities.get(ProductKind::PorkMeat), 0.0);
        assert_eq!(records[1].route, "RUTA 1");
    }

    #[test]
    fn test_stops_at_next_route_label() {
        let records = run(
            vec![
                vec!["N°", "MUNICIPIO", "COMEDOR"],
                vec!["1", "CALI", "SITIO A"],
                vec!["DIA 1 - RUTA 2", "", ""],
                vec!["1", "YUMBO", "SITIO Z"],
            ],
            ExtractionMode::Lenient,
        );
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_prose_before_first_record_is_skipped_in_both_modes() {
        for mode in [ExtractionMode::Lenient, ExtractionMode::Strict] {
            let records = run(
                vec![
                    vec!["N°", "MUNICIPIO", "COMEDOR"],
                    vec!["", "", ""],
                    vec!["ver nota", "", ""],
                    vec!["1", "CALI", "SITIO A"],
                ],
                mode,
            );
            assert_eq!(records.len(), 1, "{:?}", mode);
        }
    }

    #[test]
    fn test_strict_mode_stops_at_gap_lenient_skips_it() {
        let rows = || {
            vec![
                vec!["N°", "MUNICIPIO", "COMEDOR"],
                vec!["1", "CALI", "SITIO A"],
                vec!["", "", ""],
                vec!["2", "CALI", "SITIO B"],
            ]
        };
        assert_eq!(run(rows(), ExtractionMode::Strict).len(), 1);
        assert_eq!(run(rows(), ExtractionMode::Lenient).len(), 2);
    }

    #[test]
    fn test_invalid_rows_are_skipped() {
        let records = run(
            vec![
                vec!["N°", "MUNICIPIO", "COMEDOR"],
                vec!["1", "", "SITIO A"],
                vec!["uno", "CALI", "SITIO A"],
                vec!["2", "CALI", "SITIO B"],
            ],
            ExtractionMode::Lenient,
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence_number, 2);
    }

    #[test]
    fn test_marker_helpers() {
        assert!(is_table_start_marker(" N° "));
        assert!(is_table_start_marker("No."));
        assert!(!is_table_start_marker("NUMERO"));
        assert!(is_total_row("Total cobertura ruta"));
    }
}
