use std::sync::Arc;
use async_trait::async_trait;
use tracing::{debug, info, trace};
use crate::dataset::Dataset;
use crate::inference::columns::DetectorWindow;
use crate::inference::diagnostics;
use crate::inference::dialect::{classify, DialectTag};
use crate::inference::header::{extract_header, HeaderMetadata};
use crate::inference::segmenter::{SegmentationPolicy, Segmenter, SegmenterOptions};
use crate::inference::vocabulary::ProductVocabulary;
use crate::processor::{AsyncProcessor, Job, ProcessingStep};
use crate::types::{Config, ExtractionConfig, ProcessError, SourceFormat};

fn all_formats() -> Vec<SourceFormat> {
    vec![SourceFormat::Spreadsheet, SourceFormat::Delimited]
}

/// Decides the report dialect and records structural advisories.
pub struct ClassifyStep;

#[async_trait]
impl AsyncProcessor for ClassifyStep {
    async fn process(&self, job: &mut Job, config: &Config) -> Result<(), ProcessError> {
        let grid = job.grid(self.name())?;
        let classification = classify(
            grid,
            config.extraction.classifier_scan_rows,
            config.extraction.consortium_scan_rows,
        );
        let issues = diagnostics::diagnose(grid);
        for issue in &issues {
            debug!("advisory: {}", issue);
        }
        job.diagnostics.extend(issues);
        job.classification = Some(classification);
        Ok(())
    }
}

impl ProcessingStep for ClassifyStep {
    fn required_for(&self) -> Vec<SourceFormat> {
        all_formats()
    }

    fn name(&self) -> &'static str {
        "dialect_classifier"
    }
}

/// Reads program, company, modality and declarations from fixed rows.
pub struct HeaderStep;

#[async_trait]
impl AsyncProcessor for HeaderStep {
    async fn process(&self, job: &mut Job, _config: &Config) -> Result<(), ProcessError> {
        let header = extract_header(job.grid(self.name())?);
        trace!("header: {:?}", header);
        job.header = Some(Arc::new(header));
        Ok(())
    }
}

impl ProcessingStep for HeaderStep {
    fn required_for(&self) -> Vec<SourceFormat> {
        all_formats()
    }

    fn name(&self) -> &'static str {
        "header_extractor"
    }
}

/// Finds route blocks and extracts their records.
pub struct SegmentStep;

pub fn segmenter_options(extraction: &ExtractionConfig) -> SegmenterOptions {
    SegmenterOptions {
        table_search_rows: extraction.table_search_rows,
        mode: extraction.mode,
        window: DetectorWindow {
            header_rows: extraction.header_window_rows,
            context_before: extraction.context_rows_before,
            context_after: extraction.context_rows_after,
        },
    }
}

#[async_trait]
impl AsyncProcessor for SegmentStep {
    async fn process(&self, job: &mut Job, config: &Config) -> Result<(), ProcessError> {
        let grid = job.grid(self.name())?;
        let dialect = job
            .classification
            .as_ref()
            .map(|c| c.tag)
            .unwrap_or(DialectTag::Unknown);
        let header = job
            .header
            .clone()
            .unwrap_or_else(|| Arc::new(HeaderMetadata::default()));

        let policy = SegmentationPolicy::new(config.extraction.structural_dialects.iter().copied());
        let segmenter = Segmenter::new(
            grid,
            dialect,
            header,
            ProductVocabulary::shared(),
            segmenter_options(&config.extraction),
        );
        let segmentation = segmenter.segment(&policy.ladder(dialect));

        info!(
            "{} blocks, {} records via {}",
            segmentation.blocks.len(),
            segmentation.record_count(),
            segmentation.accepted().unwrap_or("nothing")
        );
        job.segmentation = Some(segmentation);
        Ok(())
    }
}

impl ProcessingStep for SegmentStep {
    fn required_for(&self) -> Vec<SourceFormat> {
        all_formats()
    }

    fn name(&self) -> &'static str {
        "block_segmenter"
    }
}

/// Collects the extracted records into the file's dataset.
pub struct AssembleStep;

#[async_trait]
impl AsyncProcessor for AssembleStep {
    async fn process(&self, job: &mut Job, _config: &Config) -> Result<(), ProcessError> {
        let header = job
            .header
            .clone()
            .unwrap_or_else(|| Arc::new(HeaderMetadata::default()));
        let records = job
            .segmentation
            .as_ref()
            .map(|s| s.blocks.iter().flat_map(|b| b.records.iter().cloned()).collect::<Vec<_>>())
            .unwrap_or_default();
        job.dataset = Some(Dataset::assemble(header, records));
        Ok(())
    }
}

impl ProcessingStep for AssembleStep {
    fn required_for(&self) -> Vec<SourceFormat> {
        all_formats()
    }

    fn name(&self) -> &'static str {
        "dataset_assembler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::CellGrid;
    use crate::inference::vocabulary::ProductKind;

    fn job_with(rows: Vec<Vec<&str>>) -> Job {
        let mut job = Job::new("memoria.csv");
        job.grid = Some(CellGrid::from_text_rows(rows));
        job
    }

    async fn run_all(job: &mut Job, config: &Config) {
        ClassifyStep.process(job, config).await.unwrap();
        HeaderStep.process(job, config).await.unwrap();
        SegmentStep.process(job, config).await.unwrap();
        AssembleStep.process(job, config).await.unwrap();
    }

    #[tokio::test]
    async fn test_steps_fill_the_job() {
        let mut job = job_with(vec![
            vec!["CONSORCIO ALIMENTANDO A CALI 2025"],
            vec![""],
            vec![""],
            vec!["PROGRAMA: PAE - CONSORCIO / CONGELADOS"],
            vec!["CONGELADOS RUTA 2"],
            vec!["N°", "MUNICIPIO", "COMEDOR", "COBER", "DIRECCION", "CERDO KG"],
            vec!["1", "CALI", "SITIO A", "30", "CL 1", "4.5"],
            vec!["2", "CALI", "SITIO B", "20", "CL 2", "1.5"],
        ]);
        let config = Config::default();
        run_all(&mut job, &config).await;

        assert_eq!(
            job.classification.as_ref().unwrap().tag,
            DialectTag::ConsortiumFrozenGoods
        );
        assert_eq!(job.header.as_ref().unwrap().program, "PAE");
        let dataset = job.dataset.unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.records()[0].route, "CONGELADOS RUTA 2");
        assert_eq!(dataset.product_totals().get(ProductKind::PorkMeat), 6.0);
        assert!(!job.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_structural_policy_from_config() {
        let mut job = job_with(vec![
            vec!["CONSORCIO ALIMENTANDO A CALI 2025"],
            vec!["CONGELADOS RUTA 2"],
            vec!["N°", "MUNICIPIO", "COMEDOR"],
            vec!["1", "CALI", "SITIO A"],
        ]);
        let mut config = Config::default();
        config.extraction.structural_dialects = vec![DialectTag::ConsortiumFrozenGoods];
        run_all(&mut job, &config).await;

        let segmentation = job.segmentation.unwrap();
        assert_eq!(segmentation.accepted(), Some("structural"));
        assert_eq!(segmentation.blocks[0].route, "CONGELADOS RUTA 2");
    }

    #[tokio::test]
    async fn test_missing_grid_is_reported() {
        let mut job = Job::new("memoria.csv");
        let err = HeaderStep.process(&mut job, &Config::default()).await.unwrap_err();
        assert!(matches!(err, ProcessError::MissingGrid("header_extractor")));
    }
}
