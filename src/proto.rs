//! Protobuf form of a batch result, for the `protobuf` output format.

use chrono::NaiveDate;
use crate::dataset::NormalizedRow;
use crate::processor::{BatchResult, FileOutcome, StepTiming};

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Batch {
    #[prost(message, repeated, tag = "1")]
    pub files: Vec<FileReport>,
    #[prost(string, repeated, tag = "2")]
    pub columns: Vec<String>,
    #[prost(message, repeated, tag = "3")]
    pub records: Vec<DeliveryRecord>,
    #[prost(string, repeated, tag = "4")]
    pub errors: Vec<String>,
    #[prost(string, repeated, tag = "5")]
    pub warnings: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileReport {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(string, tag = "2")]
    pub tag: String,
    #[prost(int64, tag = "3")]
    pub records: i64,
    #[prost(string, optional, tag = "4")]
    pub error: Option<String>,
    #[prost(string, repeated, tag = "5")]
    pub diagnostics: Vec<String>,
    #[prost(message, repeated, tag = "6")]
    pub steps: Vec<ProcessingStep>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProcessingStep {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int64, tag = "2")]
    pub duration_ms: i64,
    #[prost(string, tag = "3")]
    pub status: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeliveryRecord {
    #[prost(string, tag = "1")]
    pub program: String,
    #[prost(string, tag = "2")]
    pub company: String,
    #[prost(string, tag = "3")]
    pub modality: String,
    #[prost(string, tag = "4")]
    pub supply_request: String,
    #[prost(string, tag = "5")]
    pub consumption_days: String,
    #[prost(string, tag = "6")]
    pub delivery_date: String,
    #[prost(string, tag = "7")]
    pub day: String,
    #[prost(string, tag = "8")]
    pub route: String,
    #[prost(int64, tag = "9")]
    pub seq_no: i64,
    #[prost(string, tag = "10")]
    pub municipality: String,
    #[prost(string, tag = "11")]
    pub site_name: String,
    #[prost(int64, tag = "12")]
    pub beneficiary_count: i64,
    #[prost(string, tag = "13")]
    pub address: String,
    #[prost(double, tag = "14")]
    pub pork_kg: f64,
    #[prost(double, tag = "15")]
    pub beef_kg: f64,
    #[prost(int64, tag = "16")]
    pub chicken_thigh_units: i64,
    #[prost(double, tag = "17")]
    pub chicken_breast_kg: f64,
    #[prost(double, optional, tag = "18")]
    pub tilapia_kg: Option<f64>,
}

impl From<NormalizedRow> for DeliveryRecord {
    fn from(row: NormalizedRow) -> Self {
        Self {
            program: row.program,
            company: row.company,
            modality: row.modality,
            supply_request: row.supply_request,
            consumption_days: row.consumption_days,
            delivery_date: row.delivery_date,
            day: row.day,
            route: row.route,
            seq_no: row.seq_no,
            municipality: row.municipality,
            site_name: row.site_name,
            beneficiary_count: row.beneficiary_count,
            address: row.address,
            pork_kg: row.pork_kg,
            beef_kg: row.beef_kg,
            chicken_thigh_units: row.chicken_thigh_units,
            chicken_breast_kg: row.chicken_breast_kg,
            tilapia_kg: row.tilapia_kg,
        }
    }
}

impl From<&StepTiming> for ProcessingStep {
    fn from(step: &StepTiming) -> Self {
        Self {
            name: step.name.to_string(),
            duration_ms: step.duration.as_millis() as i64,
            status: step.status.clone(),
        }
    }
}

impl From<&FileOutcome> for FileReport {
    fn from(outcome: &FileOutcome) -> Self {
        Self {
            path: outcome.path.clone(),
            tag: outcome.tag.clone(),
            records: outcome.dataset.len() as i64,
            error: outcome.error.clone(),
            diagnostics: outcome.diagnostics.iter().map(ToString::to_string).collect(),
            steps: outcome.steps.iter().map(Into::into).collect(),
        }
    }
}

impl Batch {
    pub fn new(batch: &BatchResult, today: NaiveDate) -> Self {
        let validation = batch.dataset.validate();
        Self {
            files: batch.outcomes.iter().map(Into::into).collect(),
            columns: batch.dataset.column_names().into_iter().map(String::from).collect(),
            records: batch.dataset.rows(today).into_iter().map(Into::into).collect(),
            errors: validation.errors.iter().map(ToString::to_string).collect(),
            warnings: validation.warnings.iter().map(ToString::to_string).collect(),
        }
    }
}
