use std::ops::RangeInclusive;
use serde::Serialize;
use tracing::{debug, trace};
use crate::grid::CellGrid;
use crate::processor::normalize_for_match;
use super::vocabulary::{ProductKind, ProductPattern, ProductQuantities, ProductVocabulary};

/// Source reports only ever place product quantities in columns F–H.
pub const PRODUCT_COLUMNS: RangeInclusive<usize> = 5..=7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    HeaderRow,
    Contextual,
    Heuristic,
}

/// Product kind → column index for one table block.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductColumnMap {
    columns: [Option<usize>; ProductKind::COUNT],
    pub header_row: usize,
    pub method: DetectionMethod,
}

impl ProductColumnMap {
    pub fn new(header_row: usize, method: DetectionMethod) -> Self {
        Self {
            columns: [None; ProductKind::COUNT],
            header_row,
            method,
        }
    }

    pub fn insert(&mut self, kind: ProductKind, column: usize) {
        self.columns[kind.index()] = Some(column);
    }

    pub fn get(&self, kind: ProductKind) -> Option<usize> {
        self.columns[kind.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.columns.iter().all(Option::is_none)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProductKind, usize)> + '_ {
        ProductKind::ALL
            .iter()
            .filter_map(move |k| self.get(*k).map(|c| (*k, c)))
    }

    /// Quantities of one grid row. Undetected kinds stay at zero.
    pub fn read(&self, grid: &CellGrid, row: usize) -> ProductQuantities {
        self.iter()
            .map(|(kind, col)| (kind, grid.get(row, col).number_or_zero()))
            .collect()
    }
}

/// Row windows the detector inspects around a block's table start.
#[derive(Debug, Clone, Copy)]
pub struct DetectorWindow {
    pub header_rows: usize,
    pub context_before: usize,
    pub context_after: usize,
}

impl Default for DetectorWindow {
    fn default() -> Self {
        Self {
            header_rows: 10,
            context_before: 3,
            context_after: 8,
        }
    }
}

pub struct ProductColumnDetector<'a> {
    vocabulary: &'a ProductVocabulary,
    window: DetectorWindow,
}

impl<'a> ProductColumnDetector<'a> {
    pub fn new(vocabulary: &'a ProductVocabulary, window: DetectorWindow) -> Self {
        Self { vocabulary, window }
    }

    /// Header row first, then contextual hints, then fixed positions.
    pub fn detect(&self, grid: &CellGrid, start: usize) -> ProductColumnMap {
        if let Some(map) = self.detect_header_row(grid, start) {
            debug!("product columns from header row {}: {:?}", map.header_row, map.columns);
            return map;
        }
        if let Some(map) = self.detect_contextual(grid, start) {
            debug!("product columns from context near row {}: {:?}", start, map.columns);
            return map;
        }
        let map = self.heuristic(grid, start);
        debug!("product columns by position near row {}: {:?}", start, map.columns);
        map
    }

    fn candidate_columns(grid: &CellGrid) -> impl Iterator<Item = usize> + '_ {
        PRODUCT_COLUMNS.filter(move |c| grid.has_column(*c))
    }

    fn detect_header_row(&self, grid: &CellGrid, start: usize) -> Option<ProductColumnMap> {
        let end = (start + self.window.header_rows).min(grid.height());
        for row in start..end {
            let qualifies = Self::candidate_columns(grid)
                .any(|col| self.vocabulary.mentions_unit(&grid.upper_text(row, col)));
            if !qualifies {
                continue;
            }

            let mut map = ProductColumnMap::new(row, DetectionMethod::HeaderRow);
            for col in Self::candidate_columns(grid) {
                let text = grid.upper_text(row, col);
                if text.trim().is_empty() {
                    continue;
                }
                if let Some(kind) = classify_column(self.vocabulary, &text) {
                    map.insert(kind, col);
                }
            }
            if !map.is_empty() {
                return Some(map);
            }
            trace!("row {} mentions units but no product classified", row);
        }
        None
    }

    fn detect_contextual(&self, grid: &CellGrid, start: usize) -> Option<ProductColumnMap> {
        let from = start.saturating_sub(self.window.context_before);
        let to = (start + self.window.context_after).min(grid.height());
        let mut map = ProductColumnMap::new(start + 2, DetectionMethod::Contextual);

        for col in Self::candidate_columns(grid) {
            let kind = (from..to)
                .map(|row| grid.upper_text(row, col))
                .filter(|text| !text.trim().is_empty())
                .find_map(|text| classify_column(self.vocabulary, &text));
            if let Some(kind) = kind {
                map.insert(kind, col);
            }
        }

        (!map.is_empty()).then_some(map)
    }

    fn heuristic(&self, grid: &CellGrid, start: usize) -> ProductColumnMap {
        let mut map = ProductColumnMap::new(start + 2, DetectionMethod::Heuristic);
        map.insert(ProductKind::PorkMeat, 5);
        if grid.has_column(6) {
            map.insert(ProductKind::ChickenThighUnits, 6);
        }
        if grid.has_column(7) {
            map.insert(ProductKind::ChickenBreastWeight, 7);
        }
        map
    }
}

/// Best-scoring product for a header cell, if any. Ties go to the kind
/// declared first in the vocabulary.
pub fn classify_column(vocabulary: &ProductVocabulary, text: &str) -> Option<ProductKind> {
    let normalized = normalize_for_match(text);
    let mut best: Option<(ProductKind, usize)> = None;
    for pattern in vocabulary.patterns() {
        let score = score_pattern(pattern, &normalized);
        if score == 0 {
            continue;
        }
        match best {
            Some((_, top)) if top >= score => {}
            _ => best = Some((pattern.kind, score)),
        }
    }
    best.map(|(kind, _)| kind)
}

/// Keyword hits plus phrase hits, or zero unless at least one keyword and
/// one unit both occur.
pub fn score_pattern(pattern: &ProductPattern, normalized: &str) -> usize {
    let keywords = pattern
        .keywords
        .iter()
        .filter(|k| normalized.contains(*k))
        .count();
    let has_unit = pattern.units.iter().any(|u| normalized.contains(u));
    if keywords == 0 || !has_unit {
        return 0;
    }
    let phrases = pattern
        .phrases
        .iter()
        .filter(|p| normalized.contains(normalize_for_match(p).as_str()))
        .count();
    keywords + phrases
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> &'static ProductVocabulary {
        ProductVocabulary::shared()
    }

    fn detector() -> ProductColumnDetector<'static> {
        ProductColumnDetector::new(vocab(), DetectorWindow::default())
    }

    /// Table with `header` in columns 5.. at `header_row`, numeric data below.
    fn table(header_row: usize, header: &[&str], data_rows: usize) -> CellGrid {
        let width = 5 + header.len();
        let mut rows: Vec<Vec<String>> = vec![vec![String::new(); width]; header_row];
        let mut head = vec!["N°".to_string(), "MUNICIPIO".into(), "COMEDOR".into(), "COBER".into(), "DIRECCION".into()];
        head.extend(header.iter().map(|h| h.to_string()));
        rows.push(head);
        for i in 0..data_rows {
            let mut row = vec![(i + 1).to_string(), "CALI".into(), format!("SITIO {}", i), "50".into(), "CL 1".into()];
            row.extend(header.iter().map(|_| "12.5".to_string()));
            rows.push(row);
        }
        CellGrid::from_text_rows(rows)
    }

    #[test]
    fn test_classify_known_headers() {
        assert_eq!(classify_column(vocab(), "CARNE DE CERDO MAGRA / B X 1000"), Some(ProductKind::PorkMeat));
        assert_eq!(classify_column(vocab(), "CARNE DE RES, MAGRA / KG"), Some(ProductKind::BeefMeat));
        assert_eq!(
            classify_column(vocab(), "MUSLO / CONTRAMUSLO DE POLLO UND / UND"),
            Some(ProductKind::ChickenThighUnits)
        );
        assert_eq!(classify_column(vocab(), "PECHUGA POLLO / KG"), Some(ProductKind::ChickenBreastWeight));
        assert_eq!(classify_column(vocab(), "FILETE DE TILAPIA KG"), Some(ProductKind::Tilapia));
    }

    #[test]
    fn test_classify_requires_keyword_and_unit() {
        assert_eq!(classify_column(vocab(), "CARNE DE CERDO"), None);
        assert_eq!(classify_column(vocab(), "KG"), None);
        assert_eq!(classify_column(vocab(), "12.5"), None);
    }

    #[test]
    fn test_unit_decides_between_chicken_kinds() {
        assert_eq!(classify_column(vocab(), "POLLO UND"), Some(ProductKind::ChickenThighUnits));
        assert_eq!(classify_column(vocab(), "POLLO KG"), Some(ProductKind::ChickenBreastWeight));
    }

    #[test]
    fn test_tie_goes_to_first_declared_kind() {
        let pork = &vocab().patterns()[0];
        let beef = &vocab().patterns()[1];
        let text = normalize_for_match("CERDO RES KG");
        assert_eq!(score_pattern(pork, &text), score_pattern(beef, &text));
        assert_eq!(classify_column(vocab(), "CERDO RES KG"), Some(ProductKind::PorkMeat));
    }

    #[test]
    fn test_header_row_detection_per_column() {
        let grid = table(2, &["COBER EXTRA", "MUSLO/CONTRAMUSLO DE POLLO UND", "PECHUGA POLLO KG"], 3);
        let map = detector().detect(&grid, 2);
        assert_eq!(map.method, DetectionMethod::HeaderRow);
        assert_eq!(map.header_row, 2);
        assert_eq!(map.get(ProductKind::ChickenThighUnits), Some(6));
        assert_eq!(map.get(ProductKind::ChickenBreastWeight), Some(7));
        assert_eq!(map.get(ProductKind::PorkMeat), None);
    }

    #[test]
    fn test_column_map_stable_around_entry_row() {
        let cases = [
            ("CARNE DE CERDO KG", ProductKind::PorkMeat),
            ("CARNE DE RES KG", ProductKind::BeefMeat),
            ("POLLO UND", ProductKind::ChickenThighUnits),
        ];
        for (header, kind) in cases {
            let grid = table(8, &[header], 6);
            for start in 3..=11 {
                let map = detector().detect(&grid, start);
                assert_eq!(map.get(kind), Some(5), "header {:?} from row {}", header, start);
                assert_eq!(map.iter().count(), 1);
            }
        }
    }

    #[test]
    fn test_contextual_detection_uses_first_hint() {
        let mut rows = vec![vec![""; 8]; 6];
        rows[0][6] = "CARNE DE RES";
        rows[1][6] = "RES KG";
        rows[2][6] = "CERDO KG";
        let grid = CellGrid::from_text_rows(rows);
        // The header window starting at row 3 misses the hints above it.
        let map = detector().detect(&grid, 3);
        assert_eq!(map.method, DetectionMethod::Contextual);
        assert_eq!(map.get(ProductKind::BeefMeat), Some(6));
        assert_eq!(map.get(ProductKind::PorkMeat), None);
    }

    #[test]
    fn test_heuristic_fallback() {
        let wide = CellGrid::from_text_rows(vec![vec!["1"; 8]; 4]);
        let map = detector().detect(&wide, 0);
        assert_eq!(map.method, DetectionMethod::Heuristic);
        assert_eq!(map.get(ProductKind::PorkMeat), Some(5));
        assert_eq!(map.get(ProductKind::ChickenThighUnits), Some(6));
        assert_eq!(map.get(ProductKind::ChickenBreastWeight), Some(7));

        let seven = CellGrid::from_text_rows(vec![vec!["1"; 7]; 4]);
        let map = detector().detect(&seven, 0);
        assert_eq!(map.method, DetectionMethod::Heuristic);
        assert_eq!(map.get(ProductKind::PorkMeat), Some(5));
        assert_eq!(map.get(ProductKind::ChickenThighUnits), Some(6));
        assert_eq!(map.get(ProductKind::ChickenBreastWeight), None);
        assert_eq!(map.get(ProductKind::BeefMeat), None);

        let six = CellGrid::from_text_rows(vec![vec!["1"; 6]; 4]);
        let map = detector().detect(&six, 0);
        assert_eq!(map.iter().collect::<Vec<_>>(), vec![(ProductKind::PorkMeat, 5)]);
    }

    #[test]
    fn test_read_defaults_missing_kinds_to_zero() {
        let grid = table(0, &["CERDO KG"], 1);
        let map = detector().detect(&grid, 0);
        let q = map.read(&grid, 1);
        assert_eq!(q.get(ProductKind::PorkMeat), 12.5);
        assert_eq!(q.get(ProductKind::Tilapia), 0.0);
    }
}
