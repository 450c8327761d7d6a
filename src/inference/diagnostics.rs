use std::fmt;
use regex::Regex;
use lazy_static::lazy_static;
use serde::Serialize;
use crate::grid::CellGrid;
use super::columns::PRODUCT_COLUMNS;
use super::header::PROGRAM_ROW;

const MIN_ROWS: usize = 10;
const MIN_COLUMNS: usize = 6;
const SMALL_FILE_ROWS: usize = 15;
const DATE_SCAN_ROWS: usize = 15;

lazy_static! {
    static ref ISO_DATE_RE: Regex = Regex::new(r"\d{4}-\d{1,2}-\d{1,2}").unwrap();
}

/// Guidance shown when a file yields nothing usable.
pub const EXPECTED_STRUCTURE: &str = "Expected a report whose first worksheet has: the program line \
(PROGRAMA: <program> - <company> / <modality>) in A4, the supply request in A8, the consumption days \
with a YYYY-MM-DD date in A9, route labels such as \"DIA 1 - RUTA 1\" or \"CONGELADOS RUTA 1\" in \
column A, and below each label a table headed N° | MUNICIPIO | COMEDOR/ESCUELA | COBER | DIRECCION \
with product quantities in columns F to H.";

/// Advisory finding about a grid's shape. Never fatal on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum StructureIssue {
    TooFewRows { rows: usize },
    TooFewColumns { columns: usize },
    MissingProgramLine,
    SmallFile { rows: usize },
    SparseFirstColumn { blank: usize, rows: usize },
    EmptyProductColumn { column: usize },
    NoIsoDate,
}

impl fmt::Display for StructureIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureIssue::TooFewRows { rows } => {
                write!(f, "the sheet has {} rows, at least {} are expected", rows, MIN_ROWS)
            }
            StructureIssue::TooFewColumns { columns } => {
                write!(f, "the sheet has {} columns, at least {} (A-F) are expected", columns, MIN_COLUMNS)
            }
            StructureIssue::MissingProgramLine => write!(f, "row 4 should hold the program line"),
            StructureIssue::SmallFile { rows } => {
                write!(f, "the file looks very small ({} rows)", rows)
            }
            StructureIssue::SparseFirstColumn { blank, rows } => {
                write!(f, "column A is mostly blank ({} of {} rows)", blank, rows)
            }
            StructureIssue::EmptyProductColumn { column } => {
                write!(f, "column {} is completely empty", column_letter(*column))
            }
            StructureIssue::NoIsoDate => {
                write!(f, "no YYYY-MM-DD date in the first {} rows of column A", DATE_SCAN_ROWS)
            }
        }
    }
}

pub fn column_letter(column: usize) -> char {
    (b'A' + (column % 26) as u8) as char
}

/// Minimum shape a report must have to be worth extracting.
pub fn precheck(grid: &CellGrid) -> Vec<StructureIssue> {
    let mut issues = Vec::new();
    if grid.height() < MIN_ROWS {
        issues.push(StructureIssue::TooFewRows { rows: grid.height() });
    }
    if grid.width() < MIN_COLUMNS {
        issues.push(StructureIssue::TooFewColumns { columns: grid.width() });
    }
    if grid.height() > PROGRAM_ROW && grid.is_blank(PROGRAM_ROW, 0) {
        issues.push(StructureIssue::MissingProgramLine);
    }
    issues
}

pub fn common_problems(grid: &CellGrid) -> Vec<StructureIssue> {
    let mut issues = Vec::new();
    let rows = grid.height();

    if rows < SMALL_FILE_ROWS {
        issues.push(StructureIssue::SmallFile { rows });
    }

    let blank = (0..rows).filter(|r| grid.is_blank(*r, 0)).count();
    if blank * 2 > rows {
        issues.push(StructureIssue::SparseFirstColumn { blank, rows });
    }

    if grid.width() >= MIN_COLUMNS {
        for column in PRODUCT_COLUMNS.filter(|c| grid.has_column(*c)) {
            if (0..rows).all(|r| grid.is_blank(r, column)) {
                issues.push(StructureIssue::EmptyProductColumn { column });
            }
        }
    }

    let dated = (0..rows.min(DATE_SCAN_ROWS)).any(|r| ISO_DATE_RE.is_match(&grid.text(r, 0)));
    if !dated {
        issues.push(StructureIssue::NoIsoDate);
    }

    issues
}

/// Pre-check findings followed by the common-problem scan.
pub fn diagnose(grid: &CellGrid) -> Vec<StructureIssue> {
    let mut issues = precheck(grid);
    for issue in common_problems(grid) {
        if !issues.contains(&issue) {
            issues.push(issue);
        }
    }
    issues
}

/// Remediation text for a file that produced no records.
pub fn remediation(issues: &[StructureIssue]) -> String {
    if issues.is_empty() {
        return EXPECTED_STRUCTURE.to_string();
    }
    let found: Vec<String> = issues.iter().map(|i| format!("- {}", i)).collect();
    format!("{}\nProblems found:\n{}", EXPECTED_STRUCTURE, found.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiny_grid_reports_shape_problems() {
        let grid = CellGrid::from_text_rows(vec![vec!["a", "b"], vec!["", ""]]);
        let issues = diagnose(&grid);
        assert!(issues.contains(&StructureIssue::TooFewRows { rows: 2 }));
        assert!(issues.contains(&StructureIssue::TooFewColumns { columns: 2 }));
        assert!(issues.contains(&StructureIssue::SmallFile { rows: 2 }));
        assert!(issues.contains(&StructureIssue::NoIsoDate));
        assert!(!issues.contains(&StructureIssue::MissingProgramLine));
    }

    #[test]
    fn test_well_formed_grid_is_clean() {
        let mut rows: Vec<Vec<String>> = (0..20)
            .map(|i| {
                vec![
                    format!("fila {}", i),
                    "x".into(),
                    "y".into(),
                    "1".into(),
                    "z".into(),
                    "2".into(),
                    "3".into(),
                ]
            })
            .collect();
        rows[8][0] = "Dias de consumo: 2025-07-21".into();
        let grid = CellGrid::from_text_rows(rows);
        assert!(diagnose(&grid).is_empty());
    }

    #[test]
    fn test_empty_product_column_and_missing_program_line() {
        let mut rows: Vec<Vec<&str>> = vec![vec!["x", "a", "b", "c", "d", "", "1"]; 12];
        rows[3][0] = "";
        let grid = CellGrid::from_text_rows(rows);
        let issues = diagnose(&grid);
        assert!(issues.contains(&StructureIssue::MissingProgramLine));
        assert!(issues.contains(&StructureIssue::EmptyProductColumn { column: 5 }));
        assert!(!issues.contains(&StructureIssue::EmptyProductColumn { column: 6 }));
        assert_eq!(column_letter(5), 'F');
    }

    #[test]
    fn test_remediation_lists_problems() {
        let text = remediation(&[StructureIssue::NoIsoDate]);
        assert!(text.starts_with("Expected a report"));
        assert!(text.contains("no YYYY-MM-DD date"));
    }
}
