use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use crate::dataset::Dataset;
use crate::grid::CellGrid;
use crate::inference::diagnostics::{self, StructureIssue};
use crate::inference::dialect::Classification;
use crate::inference::header::HeaderMetadata;
use crate::inference::segmenter::{Segmentation, SegmentationAttempt};
use crate::types::{Config, ProcessError, SourceFormat, ERROR_TAG};

lazy_static! {
    static ref NON_WORD_RE: Regex = Regex::new(r"[^\w\s]").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// Upper-cases, turns punctuation into spaces and collapses whitespace, so
/// "Muslo/Contramuslo  (UND)" and "MUSLO CONTRAMUSLO UND" compare equal.
pub fn normalize_for_match(text: &str) -> String {
    let upper = text.to_uppercase();
    let spaced = NON_WORD_RE.replace_all(&upper, " ");
    WHITESPACE_RE.replace_all(&spaced, " ").trim().to_string()
}

/// Folds the accented Latin-1 letters found in the reports to ASCII.
pub fn fold_accents(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => Some('a'),
            'Á' | 'À' | 'Ä' | 'Â' => Some('A'),
            'é' | 'è' | 'ë' | 'ê' => Some('e'),
            'É' | 'È' | 'Ë' | 'Ê' => Some('E'),
            'í' | 'ì' | 'ï' | 'î' => Some('i'),
            'Í' | 'Ì' | 'Ï' | 'Î' => Some('I'),
            'ó' | 'ò' | 'ö' | 'ô' => Some('o'),
            'Ó' | 'Ò' | 'Ö' | 'Ô' => Some('O'),
            'ú' | 'ù' | 'ü' | 'û' => Some('u'),
            'Ú' | 'Ù' | 'Ü' | 'Û' => Some('U'),
            'ñ' => Some('n'),
            'Ñ' => Some('N'),
            'ç' => Some('c'),
            'Ç' => Some('C'),
            c if c.is_ascii() => Some(c),
            _ => None,
        })
        .collect()
}

/// Timing of one pipeline step.
#[derive(Debug, Clone)]
pub struct StepTiming {
    pub name: &'static str,
    pub duration: Duration,
    pub status: String,
}

/// Working state of one file as it moves through the steps.
#[derive(Debug, Clone)]
pub struct Job {
    pub path: PathBuf,
    pub format: Option<SourceFormat>,
    pub grid: Option<CellGrid>,
    pub classification: Option<Classification>,
    pub header: Option<Arc<HeaderMetadata>>,
    pub segmentation: Option<Segmentation>,
    pub dataset: Option<Dataset>,
    pub diagnostics: Vec<StructureIssue>,
    pub steps: Vec<StepTiming>,
}

impl Job {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: None,
            grid: None,
            classification: None,
            header: None,
            segmentation: None,
            dataset: None,
            diagnostics: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn grid(&self, step: &'static str) -> Result<&CellGrid, ProcessError> {
        self.grid.as_ref().ok_or(ProcessError::MissingGrid(step))
    }
}

#[async_trait]
pub trait AsyncProcessor: Send + Sync {
    async fn process(&self, job: &mut Job, config: &Config) -> Result<(), ProcessError>;
}

pub trait ProcessingStep: AsyncProcessor {
    fn required_for(&self) -> Vec<SourceFormat>;
    fn name(&self) -> &'static str;
}

/// Result of one file, successful or not.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub path: String,
    pub tag: String,
    pub marker_line: Option<String>,
    pub dataset: Dataset,
    pub attempts: Vec<SegmentationAttempt>,
    pub diagnostics: Vec<StructureIssue>,
    pub error: Option<String>,
    pub remediation: Option<String>,
    pub steps: Vec<StepTiming>,
}

impl FileOutcome {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    fn failed(job: Job, error: &ProcessError) -> Self {
        Self {
            path: job.path.to_string_lossy().to_string(),
            tag: ERROR_TAG.to_string(),
            marker_line: None,
            dataset: Dataset::default(),
            attempts: Vec::new(),
            diagnostics: job.diagnostics,
            error: Some(error.to_string()),
            remediation: Some(error.remediation()),
            steps: job.steps,
        }
    }

    fn completed(job: Job) -> Self {
        let path = job.path.to_string_lossy().to_string();
        let dataset = match (job.dataset, &job.header) {
            (Some(dataset), _) => dataset,
            (None, Some(header)) => Dataset::assemble(Arc::clone(header), Vec::new()),
            (None, None) => Dataset::default(),
        };
        let remediation = dataset
            .is_empty()
            .then(|| diagnostics::remediation(&job.diagnostics));
        let (tag, marker_line) = match job.classification {
            Some(c) => (c.tag.to_string(), c.marker_line),
            None => (crate::inference::DialectTag::Unknown.to_string(), None),
        };
        Self {
            path,
            tag,
            marker_line,
            dataset,
            attempts: job.segmentation.map(|s| s.attempts).unwrap_or_default(),
            diagnostics: job.diagnostics,
            error: None,
            remediation,
            steps: job.steps,
        }
    }
}

/// Outcomes in input order plus the concatenation of their datasets.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub outcomes: Vec<FileOutcome>,
    pub dataset: Dataset,
}

pub struct Processor {
    config: Config,
    steps: Vec<Box<dyn ProcessingStep>>,
}

impl Processor {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            steps: Vec::new(),
        }
    }

    /// Readers and inference steps in pipeline order.
    pub fn with_default_steps(config: Config) -> Self {
        use crate::steps::{AssembleStep, ClassifyStep, CsvReader, HeaderStep, SegmentStep, SpreadsheetReader};
        let mut processor = Self::new(config);
        processor.add_step(SpreadsheetReader);
        processor.add_step(CsvReader);
        processor.add_step(ClassifyStep);
        processor.add_step(HeaderStep);
        processor.add_step(SegmentStep);
        processor.add_step(AssembleStep);
        processor
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn add_step<T: ProcessingStep + 'static>(&mut self, step: T) {
        self.steps.push(Box::new(step));
    }

    /// Runs every step that applies to the job's source format. Stops at
    /// the first file-level failure.
    pub async fn process(&self, job: &mut Job) -> Result<(), ProcessError> {
        let extension = job
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| ProcessError::UnsupportedFile("No file extension".to_string()))?;
        let format = SourceFormat::from_extension(extension)
            .ok_or_else(|| ProcessError::UnsupportedFile(extension.to_string()))?;
        job.format = Some(format);

        for step in &self.steps {
            if !step.required_for().contains(&format) {
                continue;
            }
            let started = Instant::now();
            let result = step.process(job, &self.config).await;
            let duration = started.elapsed();
            trace!("step {} took {:?}", step.name(), duration);
            job.steps.push(StepTiming {
                name: step.name(),
                duration,
                status: if result.is_ok() { "ok" } else { "failed" }.to_string(),
            });
            result?;
        }

        Ok(())
    }

    /// Processes one file. Failures become an `ERROR` outcome.
    pub async fn process_file(&self, path: &Path) -> FileOutcome {
        let span = info_span!("file", path = %path.display());
        async {
            let mut job = Job::new(path);
            match self.process(&mut job).await {
                Ok(()) => {
                    let outcome = FileOutcome::completed(job);
                    info!("{}: {} records", outcome.tag, outcome.dataset.len());
                    outcome
                }
                Err(e) => {
                    warn!("processing failed: {}", e);
                    FileOutcome::failed(job, &e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Files are processed one after another in the given order.
    pub async fn process_batch(&self, paths: &[PathBuf]) -> BatchResult {
        let mut outcomes = Vec::with_capacity(paths.len());
        for path in paths {
            outcomes.push(self.process_file(path).await);
        }

        let dataset = Dataset::concat(
            outcomes
                .iter()
                .filter(|o| !o.is_error())
                .map(|o| o.dataset.clone()),
        );
        debug!(
            "batch of {} files: {} records, {} failed",
            paths.len(),
            dataset.len(),
            outcomes.iter().filter(|o| o.is_error()).count()
        );

        BatchResult { outcomes, dataset }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_for_match() {
        assert_eq!(normalize_for_match("Muslo/Contramuslo  (und)"), "MUSLO CONTRAMUSLO UND");
        assert_eq!(normalize_for_match("  CARNE DE RES, MAGRA / KG "), "CARNE DE RES MAGRA KG");
        assert_eq!(normalize_for_match("N°"), "N");
    }

    #[test]
    fn test_fold_accents() {
        assert_eq!(fold_accents("Guía Dirección Ñame"), "Guia Direccion Name");
        assert_eq!(fold_accents("°C"), "C");
    }

    #[tokio::test]
    async fn test_unsupported_extension_is_an_error_outcome() {
        let processor = Processor::with_default_steps(Config::default());
        let outcome = processor.process_file(Path::new("reporte.docx")).await;
        assert_eq!(outcome.tag, ERROR_TAG);
        assert!(outcome.dataset.is_empty());
        assert!(outcome.remediation.unwrap().contains("xlsx"));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error_outcome() {
        let processor = Processor::with_default_steps(Config::default());
        let outcome = processor.process_file(Path::new("/nonexistent/reporte.xlsx")).await;
        assert!(outcome.is_error());
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0].status, "failed");
    }
}
