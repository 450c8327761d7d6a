use std::fmt;
use std::sync::Arc;
use regex::Regex;
use lazy_static::lazy_static;
use serde::Serialize;
use tracing::{debug, info};
use crate::grid::CellGrid;
use crate::processor::fold_accents;
use super::columns::{DetectorWindow, ProductColumnDetector, ProductColumnMap};
use super::dialect::{DialectTag, CONSORTIUM_MARKER, DINING_HALLS_MARKER, BUGA_MARKERS, YUMBO_MARKERS};
use super::header::HeaderMetadata;
use super::records::{is_table_start_marker, is_total_row, ExtractionMode, Record, RecordExtractor};
use super::vocabulary::ProductVocabulary;

/// Route label used when the structural scan finds no text above a table.
pub const GENERAL_ROUTE: &str = "GENERAL ROUTE";

const STRUCTURAL_MARKERS: &[&str] = &["N°", "Nº"];

const METADATA_WORDS: &[&str] = &[
    "PROGRAMA",
    "EMPRESA",
    "MODALIDAD",
    "SOLICITUD",
    "DIAS DE CONSUMO",
    "CONSORCIO",
    "UNION TEMPORAL",
];

lazy_static! {
    static ref FALLBACK_LABELS: Vec<Regex> = [
        r"(?i)RUTA\s+\d+",
        r"(?i)DIA\s+\d+",
        r"(?i)ENTREGA\s+\d+",
        r"(?i)GRUPO\s+\d+",
        r"(?i)LOTE\s+\d+",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
}

/// How block boundaries are found in a grid.
#[derive(Debug, Clone)]
pub enum SegmentationStrategy {
    /// A column-0 label matching the regex opens each block.
    LabeledPattern(Regex),
    /// Each `N°` table header opens a block; its label is searched upward.
    StructuralScan,
}

impl fmt::Display for SegmentationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentationStrategy::LabeledPattern(re) => write!(f, "labeled({})", re.as_str()),
            SegmentationStrategy::StructuralScan => write!(f, "structural"),
        }
    }
}

/// Per-dialect choice of primary strategy. Dialects not listed as
/// structural use their own route-label pattern.
#[derive(Debug, Clone, Default)]
pub struct SegmentationPolicy {
    structural: Vec<DialectTag>,
}

impl SegmentationPolicy {
    pub fn new(structural: impl IntoIterator<Item = DialectTag>) -> Self {
        Self {
            structural: structural.into_iter().collect(),
        }
    }

    pub fn primary(&self, tag: DialectTag) -> SegmentationStrategy {
        if self.structural.contains(&tag) {
            SegmentationStrategy::StructuralScan
        } else {
            SegmentationStrategy::LabeledPattern(tag.route_pattern().clone())
        }
    }

    /// Primary strategy, then the looser labels, then the structural scan.
    pub fn ladder(&self, tag: DialectTag) -> Vec<SegmentationStrategy> {
        let primary = self.primary(tag);
        let primary_is_structural = matches!(primary, SegmentationStrategy::StructuralScan);

        let mut ladder = vec![primary];
        ladder.extend(
            FALLBACK_LABELS
                .iter()
                .map(|re| SegmentationStrategy::LabeledPattern(re.clone())),
        );
        if !primary_is_structural {
            ladder.push(SegmentationStrategy::StructuralScan);
        }
        ladder
    }
}

/// Contiguous rows of one route/day group.
#[derive(Debug, Clone)]
pub struct Block {
    pub label: String,
    pub label_row: Option<usize>,
    pub table_row: usize,
    pub day: String,
    pub route: String,
    pub columns: ProductColumnMap,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentationAttempt {
    pub strategy: String,
    pub blocks: usize,
    pub records: usize,
}

#[derive(Debug, Clone)]
pub struct Segmentation {
    pub blocks: Vec<Block>,
    pub attempts: Vec<SegmentationAttempt>,
}

impl Segmentation {
    pub fn record_count(&self) -> usize {
        self.blocks.iter().map(|b| b.records.len()).sum()
    }

    /// Strategy whose result was accepted.
    pub fn accepted(&self) -> Option<&str> {
        self.attempts.last().map(|a| a.strategy.as_str())
    }

    pub fn into_records(self) -> Vec<Record> {
        self.blocks.into_iter().flat_map(|b| b.records).collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SegmenterOptions {
    /// Rows after a label searched for the table header.
    pub table_search_rows: usize,
    pub mode: ExtractionMode,
    pub window: DetectorWindow,
}

impl Default for SegmenterOptions {
    fn default() -> Self {
        Self {
            table_search_rows: 15,
            mode: ExtractionMode::default(),
            window: DetectorWindow::default(),
        }
    }
}

pub struct Segmenter<'a> {
    grid: &'a CellGrid,
    dialect: DialectTag,
    header: Arc<HeaderMetadata>,
    detector: ProductColumnDetector<'a>,
    options: SegmenterOptions,
}

impl<'a> Segmenter<'a> {
    pub fn new(
        grid: &'a CellGrid,
        dialect: DialectTag,
        header: Arc<HeaderMetadata>,
        vocabulary: &'a ProductVocabulary,
        options: SegmenterOptions,
    ) -> Self {
        Self {
            grid,
            dialect,
            header,
            detector: ProductColumnDetector::new(vocabulary, options.window),
            options,
        }
    }

    /// Runs each strategy of the ladder until one yields records. The last
    /// attempt is accepted as-is when none does.
    pub fn segment(&self, ladder: &[SegmentationStrategy]) -> Segmentation {
        let mut attempts = Vec::new();
        let mut blocks = Vec::new();

        for strategy in ladder {
            blocks = self.run(strategy);
            let records: usize = blocks.iter().map(|b| b.records.len()).sum();
            debug!("{}: {} blocks, {} records", strategy, blocks.len(), records);
            attempts.push(SegmentationAttempt {
                strategy: strategy.to_string(),
                blocks: blocks.len(),
                records,
            });
            if records > 0 {
                break;
            }
        }

        if attempts.len() > 1 {
            info!(
                "segmentation fell back after {} attempts to {}",
                attempts.len(),
                attempts.last().map(|a| a.strategy.as_str()).unwrap_or_default()
            );
        }

        Segmentation { blocks, attempts }
    }

    pub fn run(&self, strategy: &SegmentationStrategy) -> Vec<Block> {
        match strategy {
            SegmentationStrategy::LabeledPattern(re) => self.walk_labeled(re),
            SegmentationStrategy::StructuralScan => self.walk_structural(),
        }
    }

    fn walk_labeled(&self, pattern: &Regex) -> Vec<Block> {
        let grid = self.grid;
        let mut blocks = Vec::new();

        for row in 0..grid.height() {
            let label = grid.text(row, 0);
            if label.is_empty() || !pattern.is_match(&label) {
                continue;
            }
            debug!("route label at row {}: {}", row, label);

            let (day, route) = self.dialect.split_route_label(&label);
            match self.first_table_after(row, pattern, &day, &route) {
                Some((table_row, columns, records)) => blocks.push(Block {
                    label,
                    label_row: Some(row),
                    table_row,
                    day,
                    route,
                    columns,
                    records,
                }),
                None => debug!("no populated table below row {}", row),
            }
        }

        blocks
    }

    /// First table within the search window that yields records.
    fn first_table_after(
        &self,
        label_row: usize,
        pattern: &Regex,
        day: &str,
        route: &str,
    ) -> Option<(usize, ProductColumnMap, Vec<Record>)> {
        let end = (label_row + self.options.table_search_rows).min(self.grid.height());
        let terminators = [pattern, DialectTag::generic_route_pattern()];

        for row in (label_row + 1)..end {
            if !self.opens_table(row) {
                continue;
            }
            let columns = self.detector.detect(self.grid, row);
            let records = RecordExtractor::new(self.grid, &columns, &self.header, &terminators, self.options.mode)
                .extract(row, day, route);
            if !records.is_empty() {
                return Some((row, columns, records));
            }
        }
        None
    }

    fn opens_table(&self, row: usize) -> bool {
        let grid = self.grid;
        if grid.is_blank(row, 1) {
            return false;
        }
        let first = grid.text(row, 0);
        let second = grid.upper_text(row, 1);

        is_table_start_marker(&first)
            || (!first.is_empty() && first.chars().all(|c| c.is_ascii_digit()) && second.contains("MUNICIPIO"))
            || second.contains("COMEDOR")
            || second.contains("ESCUELA")
    }

    fn walk_structural(&self) -> Vec<Block> {
        let grid = self.grid;
        let terminators = [DialectTag::generic_route_pattern()];
        let mut blocks = Vec::new();
        let mut previous_table: Option<usize> = None;

        for row in 0..grid.height() {
            let first = grid.text(row, 0);
            if !STRUCTURAL_MARKERS.contains(&first.as_str()) || grid.is_blank(row, 1) {
                continue;
            }

            let (label, label_row) = match self.label_above(row, previous_table) {
                Some((text, at)) => (text, Some(at)),
                None => (GENERAL_ROUTE.to_string(), None),
            };
            let (day, route) = self.dialect.split_route_label(&label);
            let columns = self.detector.detect(grid, row);
            let records = RecordExtractor::new(grid, &columns, &self.header, &terminators, self.options.mode)
                .extract(row, &day, &route);
            debug!("table at row {} labeled {:?}: {} records", row, label, records.len());

            blocks.push(Block {
                label,
                label_row,
                table_row: row,
                day,
                route,
                columns,
                records,
            });
            previous_table = Some(row);
        }

        blocks
    }

    /// Nearest non-blank, non-numeric column-0 text above `table_row` that
    /// is not report metadata. Stops at the previous table.
    fn label_above(&self, table_row: usize, floor: Option<usize>) -> Option<(String, usize)> {
        let floor = floor.map(|r| r + 1).unwrap_or(0);
        (floor..table_row).rev().find_map(|row| {
            let cell = self.grid.get(row, 0);
            if cell.is_blank() || cell.is_number() {
                return None;
            }
            let text = cell.to_string().trim().to_string();
            let usable = !is_metadata_text(&text) && !is_total_row(&text) && !is_table_start_marker(&text);
            usable.then_some((text, row))
        })
    }
}

/// Program, company and declaration lines from the report header.
pub fn is_metadata_text(text: &str) -> bool {
    let upper = fold_accents(text).to_uppercase();
    upper.contains(DINING_HALLS_MARKER)
        || upper.contains(CONSORTIUM_MARKER)
        || BUGA_MARKERS.iter().chain(YUMBO_MARKERS).any(|m| upper.contains(m))
        || METADATA_WORDS.iter().any(|w| upper.contains(w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::vocabulary::ProductKind;

    fn segment(rows: Vec<Vec<&str>>, dialect: DialectTag, policy: &SegmentationPolicy) -> Segmentation {
        let grid = CellGrid::from_text_rows(rows);
        let header = Arc::new(HeaderMetadata::default());
        let segmenter = Segmenter::new(
            &grid,
            dialect,
            header,
            ProductVocabulary::shared(),
            SegmenterOptions::default(),
        );
        segmenter.segment(&policy.ladder(dialect))
    }

    fn table_header() -> Vec<&'static str> {
        vec!["N°", "MUNICIPIO", "COMEDOR", "COBER", "DIRECCION", "CERDO KG"]
    }

    #[test]
    fn test_labeled_blocks_split_day_and_route() {
        let rows = vec![
            vec!["PROGRAMA COMEDORES COMUNITARIOS"],
            vec!["DIA 1 - RUTA 1"],
            table_header(),
            vec!["1", "CALI", "A", "10", "CL 1", "2"],
            vec!["2", "CALI", "B", "10", "CL 2", "3"],
            vec!["TOTAL"],
            vec!["DIA 2 - RUTA 4"],
            table_header(),
            vec!["1", "JAMUNDI", "C", "5", "CL 3", "1"],
        ];
        let result = segment(rows, DialectTag::CommunityDiningHalls, &SegmentationPolicy::default());
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.blocks.len(), 2);
        assert_eq!(result.blocks[0].day, "DIA 1");
        assert_eq!(result.blocks[0].route, "RUTA 1");
        assert_eq!(result.blocks[0].records.len(), 2);
        assert_eq!(result.blocks[1].day, "DIA 2");
        assert_eq!(result.blocks[1].route, "RUTA 4");
        assert_eq!(result.blocks[1].records[0].quantities.get(ProductKind::PorkMeat), 1.0);
    }

    #[test]
    fn test_falls_back_to_looser_label() {
        let rows = vec![
            vec!["ENTREGA 3"],
            table_header(),
            vec!["1", "CALI", "A", "10", "CL 1", "2"],
        ];
        let result = segment(rows, DialectTag::ConsortiumGeneral, &SegmentationPolicy::default());
        assert_eq!(result.record_count(), 1);
        assert_eq!(result.accepted(), Some(r"labeled((?i)ENTREGA\s+\d+)"));
        assert_eq!(result.blocks[0].route, "ENTREGA 3");
        assert_eq!(result.blocks[0].day, "DIA 1");
    }

    #[test]
    fn test_structural_scan_defaults_to_general_route() {
        let rows = vec![
            vec!["PROGRAMA: X - Y / Z"],
            vec![""],
            table_header(),
            vec!["1", "CALI", "A", "10", "CL 1", "2"],
            vec!["2", "CALI", "B", "10", "CL 2", "2"],
        ];
        let result = segment(rows, DialectTag::Unknown, &SegmentationPolicy::default());
        assert_eq!(result.accepted(), Some("structural"));
        assert_eq!(result.blocks.len(), 1);
        assert_eq!(result.blocks[0].route, GENERAL_ROUTE);
        assert_eq!(result.blocks[0].records.len(), 2);
    }

    #[test]
    fn test_structural_scan_uses_nearest_label() {
        let rows = vec![
            vec!["Zona Norte"],
            table_header(),
            vec!["1", "CALI", "A", "10", "CL 1", "2"],
            vec!["TOTAL", "", "", "", "", "2"],
            vec!["Zona Sur"],
            table_header(),
            vec!["1", "CALI", "B", "10", "CL 2", "4"],
        ];
        let policy = SegmentationPolicy::new([DialectTag::Unknown]);
        let result = segment(rows, DialectTag::Unknown, &policy);
        assert_eq!(result.attempts.len(), 1);
        let routes: Vec<_> = result.blocks.iter().map(|b| b.route.as_str()).collect();
        assert_eq!(routes, vec!["Zona Norte", "Zona Sur"]);
    }

    #[test]
    fn test_empty_grid_accepts_last_attempt() {
        let result = segment(vec![vec!["nada"]], DialectTag::Unknown, &SegmentationPolicy::default());
        assert_eq!(result.record_count(), 0);
        assert!(result.blocks.is_empty());
        assert_eq!(result.attempts.len(), 7);
        assert_eq!(result.accepted(), Some("structural"));
    }

    #[test]
    fn test_policy_ladder_shape() {
        let policy = SegmentationPolicy::new([DialectTag::ReliefProgramBuga]);
        let ladder = policy.ladder(DialectTag::ReliefProgramBuga);
        assert!(matches!(ladder[0], SegmentationStrategy::StructuralScan));
        assert_eq!(ladder.len(), 6);

        let ladder = policy.ladder(DialectTag::CommunityDiningHalls);
        assert!(matches!(ladder[0], SegmentationStrategy::LabeledPattern(_)));
        assert!(matches!(ladder.last(), Some(SegmentationStrategy::StructuralScan)));
    }

    #[test]
    fn test_metadata_text() {
        assert!(is_metadata_text("Solicitud Remesa: M1"));
        assert!(is_metadata_text("UNION TEMPORAL VALLE SOLIDARIO BUGA 2025"));
        assert!(!is_metadata_text("Zona Norte"));
        assert!(is_metadata_text("Días de consumo: 2025-07-21"));
        assert!(!is_metadata_text("RUTA: 5"));
    }

    #[test]
    fn test_structural_scan_keeps_label_with_colon() {
        let rows = vec![
            vec!["Dias de consumo: 2025-07-21"],
            vec!["RUTA: 5"],
            table_header(),
            vec!["1", "CALI", "A", "10", "CL 1", "2"],
        ];
        let policy = SegmentationPolicy::new([DialectTag::Unknown]);
        let result = segment(rows, DialectTag::Unknown, &policy);
        assert_eq!(result.blocks.len(), 1);
        assert_eq!(result.blocks[0].label_row, Some(1));
        assert_eq!(result.blocks[0].route, "RUTA: 5");
        assert_eq!(result.blocks[0].records.len(), 1);
    }
}
