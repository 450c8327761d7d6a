use std::fmt;

/// A single spreadsheet value after loading. Anything calamine or the CSV
/// reader cannot express as text or number collapses to `Empty`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn text<S: Into<String>>(s: S) -> Self {
        Cell::Text(s.into())
    }

    /// Blank means empty or whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(f) => f.is_nan(),
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Cell::Number(f) if f.is_finite())
    }

    /// Trimmed display text. Integral numbers print without a fraction.
    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(f) => format_number(*f),
        }
    }

    /// Numeric reading of the cell: numbers as-is, text parsed leniently.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Empty => None,
            Cell::Number(f) if f.is_finite() => Some(*f),
            Cell::Number(_) => None,
            Cell::Text(s) => parse_number(s),
        }
    }

    /// Parse-or-zero coercion used for every quantity in a record.
    pub fn number_or_zero(&self) -> f64 {
        self.as_number().unwrap_or(0.0)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        if s.trim().is_empty() {
            Cell::Empty
        } else {
            Cell::Text(s.to_string())
        }
    }
}

impl From<f64> for Cell {
    fn from(f: f64) -> Self {
        Cell::Number(f)
    }
}

impl From<i64> for Cell {
    fn from(i: i64) -> Self {
        Cell::Number(i as f64)
    }
}

fn format_number(f: f64) -> String {
    if f.is_nan() {
        String::new()
    } else if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

/// Accepts `12`, `12.5`, `12,5` and surrounding whitespace.
pub fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(f) = s.parse::<f64>() {
        return f.is_finite().then_some(f);
    }
    if s.contains(',') && !s.contains('.') {
        if let Ok(f) = s.replace(',', ".").parse::<f64>() {
            return f.is_finite().then_some(f);
        }
    }
    None
}

/// Zero-indexed, header-less view of the first worksheet. Row and column
/// indices match the positions in the source file. Never mutated once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellGrid {
    rows: Vec<Vec<Cell>>,
    width: usize,
}

static EMPTY: Cell = Cell::Empty;

impl CellGrid {
    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        Self { rows, width }
    }

    /// Convenience for building grids from string literals. Cells that parse
    /// as numbers become `Cell::Number`, the same inference the CSV reader does.
    pub fn from_text_rows<R, S>(rows: R) -> Self
    where
        R: IntoIterator,
        R::Item: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(|s| infer_cell(s.as_ref())).collect())
            .collect();
        Self::from_rows(rows)
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Widest row, the number of columns a spreadsheet would report.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Out-of-range coordinates read as `Empty`.
    pub fn get(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }

    pub fn text(&self, row: usize, col: usize) -> String {
        self.get(row, col).as_text()
    }

    pub fn upper_text(&self, row: usize, col: usize) -> String {
        self.text(row, col).to_uppercase()
    }

    pub fn is_blank(&self, row: usize, col: usize) -> bool {
        self.get(row, col).is_blank()
    }

    pub fn has_column(&self, col: usize) -> bool {
        col < self.width
    }
}

/// Type inference for textual sources: blank → Empty, numeric → Number.
pub fn infer_cell(raw: &str) -> Cell {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Cell::Empty;
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() => Cell::Number(f),
        _ => Cell::Text(raw.to_string()),
    }
}
