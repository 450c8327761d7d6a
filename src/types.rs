use std::collections::BTreeMap;
use std::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::dataset::{DatasetStats, NormalizedRow, ValidationReport};
use crate::inference::diagnostics::EXPECTED_STRUCTURE;
use crate::inference::dialect::DialectTag;
use crate::inference::records::ExtractionMode;
use crate::inference::segmenter::SegmentationAttempt;
use crate::inference::vocabulary::ProductKind;
use crate::processor::{BatchResult, FileOutcome, StepTiming};

pub const SUPPORTED_FILE_EXTENSIONS: &[&str] = &[
    "csv", "txt",
    "xls", "xlsx", "xlsm", "xlsb", "ods",
];

/// Tag reported for a file that could not be read as a grid.
pub const ERROR_TAG: &str = "ERROR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub extraction: ExtractionConfig,
    pub layout: LayoutConfig,
    /// Worker threads for guide rendering.
    pub threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extraction: ExtractionConfig::default(),
            layout: LayoutConfig::default(),
            threads: num_cpus::get(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub classifier_scan_rows: usize,
    pub consortium_scan_rows: usize,
    pub table_search_rows: usize,
    pub header_window_rows: usize,
    pub context_rows_before: usize,
    pub context_rows_after: usize,
    pub mode: ExtractionMode,
    /// Dialects segmented by table structure instead of route labels.
    pub structural_dialects: Vec<DialectTag>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            classifier_scan_rows: 15,
            consortium_scan_rows: 30,
            table_search_rows: 15,
            header_window_rows: 10,
            context_rows_before: 3,
            context_rows_after: 8,
            mode: ExtractionMode::Lenient,
            structural_dialects: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuideMode {
    /// One guide per route.
    #[default]
    Route,
    /// One guide per delivery site.
    Site,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageFormat {
    #[default]
    A4Portrait,
    LetterLandscape,
}

impl PageFormat {
    /// Width and height in PDF points.
    pub fn size(self) -> (f64, f64) {
        match self {
            PageFormat::A4Portrait => (595.28, 841.89),
            PageFormat::LetterLandscape => (792.0, 612.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperaturePolicy {
    /// A fresh reading for every record and product.
    #[default]
    PerRecord,
    /// One reading per product, reused across a route.
    PerRoute,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub driver: String,
    pub plate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub page_capacity: usize,
    pub mode: GuideMode,
    pub page_format: PageFormat,
    pub prepared_by: String,
    pub approved_by: String,
    pub verdict: String,
    /// Fixed lot per product kind; missing kinds get a generated lot.
    pub lots: BTreeMap<ProductKind, String>,
    /// Driver and plate keyed by route label.
    pub vehicles: BTreeMap<String, Vehicle>,
    pub temperature_policy: TemperaturePolicy,
    /// Seed for lots and temperatures. Entropy when absent.
    pub seed: Option<u64>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            page_capacity: 4,
            mode: GuideMode::Route,
            page_format: PageFormat::A4Portrait,
            prepared_by: String::new(),
            approved_by: String::new(),
            verdict: "APROBADO".to_string(),
            lots: BTreeMap::new(),
            vehicles: BTreeMap::new(),
            temperature_policy: TemperaturePolicy::PerRecord,
            seed: None,
        }
    }
}

/// How a file is turned into a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Spreadsheet,
    Delimited,
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Spreadsheet => write!(f, "spreadsheet"),
            SourceFormat::Delimited => write!(f, "delimited"),
        }
    }
}

impl SourceFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_lowercase().as_str() {
            "xls" | "xlsx" | "xlsm" | "xlsb" | "ods" => Some(SourceFormat::Spreadsheet),
            "csv" | "txt" => Some(SourceFormat::Delimited),
            _ => None,
        }
    }
}

/// File-level failures. Anything less severe is absorbed by the pipeline.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),
    #[error("Failed to read workbook: {0}")]
    ReadFailed(String),
    #[error("Workbook has no worksheet")]
    NoWorksheet,
    #[error("Sheet is empty")]
    EmptySheet,
    #[error("Step {0} ran before the grid was loaded")]
    MissingGrid(&'static str),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl ProcessError {
    /// Guidance for the person who supplied the file.
    pub fn remediation(&self) -> String {
        let hint = match self {
            ProcessError::UnsupportedFile(_) => format!(
                "Save the report as one of: {}.",
                SUPPORTED_FILE_EXTENSIONS.join(", ")
            ),
            ProcessError::ReadFailed(_) | ProcessError::NoWorksheet => {
                "Open the file in a spreadsheet program and save it again; it may be corrupt or password protected."
                    .to_string()
            }
            ProcessError::EmptySheet => "The first worksheet must contain the report.".to_string(),
            ProcessError::MissingGrid(_) | ProcessError::IOError(_) => {
                "Check that the file exists and is readable.".to_string()
            }
        };
        format!("{}\n{}", hint, EXPECTED_STRUCTURE)
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Text does not fit in cell ({column}): {text}")]
    CellOverflow { column: String, text: String },
    #[error("Guide has no pages")]
    EmptyGuide,
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

// JSON serialization wrappers

#[derive(Debug, Serialize)]
pub struct BatchOutput {
    pub files: Vec<FileOutput>,
    pub columns: Vec<&'static str>,
    pub records: Vec<NormalizedRow>,
    pub stats: DatasetStats,
    pub validation: ValidationReport,
}

#[derive(Debug, Serialize)]
pub struct FileOutput {
    pub path: String,
    pub tag: String,
    pub marker_line: Option<String>,
    pub records: usize,
    pub segmentation: Vec<SegmentationAttempt>,
    pub diagnostics: Vec<String>,
    pub error: Option<String>,
    pub remediation: Option<String>,
    pub steps: Vec<StepOutput>,
}

#[derive(Debug, Serialize)]
pub struct StepOutput {
    pub name: String,
    pub duration_ms: i64,
    pub status: String,
}

impl BatchOutput {
    pub fn new(batch: &BatchResult, today: chrono::NaiveDate) -> Self {
        Self {
            files: batch.outcomes.iter().map(Into::into).collect(),
            columns: batch.dataset.column_names(),
            records: batch.dataset.rows(today),
            stats: batch.dataset.stats(),
            validation: batch.dataset.validate(),
        }
    }
}

impl From<&FileOutcome> for FileOutput {
    fn from(outcome: &FileOutcome) -> Self {
        Self {
            path: outcome.path.clone(),
            tag: outcome.tag.clone(),
            marker_line: outcome.marker_line.clone(),
            records: outcome.dataset.len(),
            segmentation: outcome.attempts.clone(),
            diagnostics: outcome.diagnostics.iter().map(ToString::to_string).collect(),
            error: outcome.error.clone(),
            remediation: outcome.remediation.clone(),
            steps: outcome.steps.iter().map(Into::into).collect(),
        }
    }
}

impl From<&StepTiming> for StepOutput {
    fn from(step: &StepTiming) -> Self {
        Self {
            name: step.name.to_string(),
            duration_ms: step.duration.as_millis() as i64,
            status: step.status.clone(),
        }
    }
}
