use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::io;
use std::sync::Arc;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;
use crate::inference::header::{HeaderField, HeaderMetadata};
use crate::inference::records::Record;
use crate::inference::vocabulary::{ProductKind, ProductQuantities};

/// Fixed columns of the normalized dataset, before the product columns.
pub const BASE_COLUMNS: [&str; 13] = [
    "PROGRAM",
    "COMPANY",
    "MODALITY",
    "SUPPLY_REQUEST",
    "CONSUMPTION_DAYS",
    "DELIVERY_DATE",
    "DAY",
    "ROUTE",
    "SEQ_NO",
    "MUNICIPALITY",
    "SITE_NAME",
    "BENEFICIARY_COUNT",
    "ADDRESS",
];

/// Ordered records plus the header of every report they came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    headers: Vec<Arc<HeaderMetadata>>,
    records: Vec<Record>,
}

impl Dataset {
    /// Builds one report's dataset. Count-like quantities are truncated to
    /// whole units, weights keep their fraction.
    pub fn assemble(header: Arc<HeaderMetadata>, records: impl IntoIterator<Item = Record>) -> Self {
        let records: Vec<Record> = records.into_iter().map(coerce).collect();
        debug!("assembled {} records", records.len());
        Self {
            headers: vec![header],
            records,
        }
    }

    /// Appends datasets in order. No deduplication and no reconciliation.
    pub fn concat(datasets: impl IntoIterator<Item = Dataset>) -> Self {
        let mut out = Dataset::default();
        for dataset in datasets {
            out.append(dataset);
        }
        out
    }

    pub fn append(&mut self, other: Dataset) {
        self.headers.extend(other.headers);
        self.records.extend(other.records);
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn headers(&self) -> &[Arc<HeaderMetadata>] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records grouped by route label in discovery order.
    pub fn routes(&self) -> Vec<(String, Vec<&Record>)> {
        group_by(&self.records, |r| r.route.clone())
    }

    pub fn product_totals(&self) -> ProductQuantities {
        sum_quantities(self.records.iter())
    }

    pub fn has_tilapia(&self) -> bool {
        self.records
            .iter()
            .any(|r| r.quantities.get(ProductKind::Tilapia) > 0.0)
    }

    /// Product columns present in this dataset's output.
    pub fn product_kinds(&self) -> Vec<ProductKind> {
        let tilapia = self.has_tilapia();
        ProductKind::ALL
            .iter()
            .copied()
            .filter(|k| *k != ProductKind::Tilapia || tilapia)
            .collect()
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        let mut names = BASE_COLUMNS.to_vec();
        names.extend(self.product_kinds().into_iter().map(ProductKind::column_name));
        names
    }

    /// Normalized rows. `today` fills DELIVERY_DATE where no date was parsed.
    pub fn rows(&self, today: NaiveDate) -> Vec<NormalizedRow> {
        let tilapia = self.has_tilapia();
        self.records
            .iter()
            .map(|r| NormalizedRow::from_record(r, today, tilapia))
            .collect()
    }

    pub fn write_csv<W: io::Write>(&self, writer: W, today: NaiveDate) -> csv::Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.column_names())?;
        for row in self.rows(today) {
            wtr.write_record(row.values())?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn stats(&self) -> DatasetStats {
        let records = &self.records;
        let total_beneficiaries: i64 = records.iter().map(|r| r.beneficiary_count).sum();

        let by_route: Vec<RouteSummary> = self
            .routes()
            .into_iter()
            .map(|(route, group)| RouteSummary::new(route, &group))
            .collect();

        let by_company = group_by(records, |r| (r.header.company.clone(), r.header.modality.clone()))
            .into_iter()
            .map(|((company, modality), group)| CompanySummary {
                company,
                modality,
                sites: group.len(),
                beneficiaries: group.iter().map(|r| r.beneficiary_count).sum(),
                routes: distinct(group.iter().map(|r| r.route.as_str())),
                products: sum_quantities(group.iter().copied()),
            })
            .collect();

        let by_consumption_days = group_by(records, |r| r.header.consumption_days.clone())
            .into_iter()
            .map(|(consumption_days, group)| PeriodSummary {
                consumption_days,
                sites: group.len(),
                beneficiaries: group.iter().map(|r| r.beneficiary_count).sum(),
                routes: distinct(group.iter().map(|r| r.route.as_str())),
            })
            .collect();

        let first = records.first();
        DatasetStats {
            total_records: records.len(),
            total_beneficiaries,
            distinct_routes: by_route.len(),
            product_totals: self.product_totals(),
            principal_program: first.map(|r| r.header.program.clone()),
            principal_company: first.map(|r| r.header.company.clone()),
            principal_modality: first.map(|r| r.header.modality.clone()),
            mean_beneficiaries_per_site: mean(total_beneficiaries, records.len()),
            largest_route_coverage: by_route.iter().map(|r| r.beneficiaries).max().unwrap_or(0),
            by_route,
            by_company,
            by_consumption_days,
        }
    }

    /// Reports problems without failing. Header sentinels are checked per
    /// source report, so they are reported even when no record was found.
    ///
    /// Only ROUTE and SITE_NAME are errors. Program and company always hold
    /// a value (their sentinel when undetected) and beneficiary count
    /// defaults to 0, so those three mandatory fields are reported as
    /// `SentinelField` and `ZeroBeneficiaries` warnings instead.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if !self.records.is_empty() {
            if self.records.iter().all(|r| r.route.trim().is_empty()) {
                report.errors.push(ValidationIssue::MissingColumn { column: "ROUTE" });
            }
            if self.records.iter().all(|r| r.site_name.trim().is_empty()) {
                report.errors.push(ValidationIssue::MissingColumn { column: "SITE_NAME" });
            }
        }

        for field in HeaderField::ALL {
            if self.headers.iter().any(|h| h.is_sentinel(field)) {
                report.warnings.push(ValidationIssue::SentinelField { field });
            }
        }
        if self
            .headers
            .iter()
            .any(|h| !h.is_sentinel(HeaderField::Modality) && h.modality_missing())
        {
            report.warnings.push(ValidationIssue::ModalityNotSpecified);
        }
        if self.headers.iter().any(|h| h.delivery_date.is_none()) {
            report.warnings.push(ValidationIssue::MissingDeliveryDate);
        }

        if self.records.is_empty() {
            report.warnings.push(ValidationIssue::NoRecords);
        } else {
            if self.records.iter().all(|r| r.beneficiary_count == 0) {
                report.warnings.push(ValidationIssue::ZeroBeneficiaries);
            }
            if self.product_totals().is_zero() {
                report.warnings.push(ValidationIssue::ZeroProducts);
            }
        }

        report
    }
}

fn coerce(mut record: Record) -> Record {
    for kind in ProductKind::ALL {
        let value = record.quantities.get(kind);
        let value = if value.is_finite() { value } else { 0.0 };
        let value = if kind.is_count() { value.trunc() } else { value };
        record.quantities.set(kind, value);
    }
    record
}

/// Groups items by key, keeping first-seen key order and item order.
pub fn group_by<'a, T, K, F>(items: &'a [T], key: F) -> Vec<(K, Vec<&'a T>)>
where
    K: Eq + Hash + Clone,
    F: Fn(&T) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<&'a T>)> = Vec::new();
    for item in items {
        let k = key(item);
        match index.get(&k) {
            Some(&i) => groups[i].1.push(item),
            None => {
                index.insert(k.clone(), groups.len());
                groups.push((k, vec![item]));
            }
        }
    }
    groups
}

pub fn sum_quantities<'a>(records: impl Iterator<Item = &'a Record>) -> ProductQuantities {
    let mut total = ProductQuantities::default();
    for record in records {
        total.add(&record.quantities);
    }
    total
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> usize {
    values.collect::<HashSet<_>>().len()
}

fn mean(total: i64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

/// Quantity text for tables: integral values print without decimals.
pub fn format_quantity(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        let text = format!("{:.2}", value);
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// One row of the normalized dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct NormalizedRow {
    pub program: String,
    pub company: String,
    pub modality: String,
    pub supply_request: String,
    pub consumption_days: String,
    pub delivery_date: String,
    pub day: String,
    pub route: String,
    pub seq_no: i64,
    pub municipality: String,
    pub site_name: String,
    pub beneficiary_count: i64,
    pub address: String,
    pub pork_kg: f64,
    pub beef_kg: f64,
    pub chicken_thigh_units: i64,
    pub chicken_breast_kg: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tilapia_kg: Option<f64>,
}

impl NormalizedRow {
    fn from_record(record: &Record, today: NaiveDate, tilapia: bool) -> Self {
        let h = &record.header;
        let q = &record.quantities;
        Self {
            program: h.program.clone(),
            company: h.company.clone(),
            modality: h.modality.clone(),
            supply_request: h.supply_request.clone(),
            consumption_days: h.consumption_days.clone(),
            delivery_date: h.delivery_date_or(today).format("%Y-%m-%d").to_string(),
            day: record.day.clone(),
            route: record.route.clone(),
            seq_no: record.sequence_number,
            municipality: record.municipality.clone(),
            site_name: record.site_name.clone(),
            beneficiary_count: record.beneficiary_count,
            address: record.address.clone(),
            pork_kg: q.get(ProductKind::PorkMeat),
            beef_kg: q.get(ProductKind::BeefMeat),
            chicken_thigh_units: q.get(ProductKind::ChickenThighUnits) as i64,
            chicken_breast_kg: q.get(ProductKind::ChickenBreastWeight),
            tilapia_kg: tilapia.then(|| q.get(ProductKind::Tilapia)),
        }
    }

    /// Field texts in column order.
    pub fn values(&self) -> Vec<String> {
        let mut values = vec![
            self.program.clone(),
            self.company.clone(),
            self.modality.clone(),
            self.supply_request.clone(),
            self.consumption_days.clone(),
            self.delivery_date.clone(),
            self.day.clone(),
            self.route.clone(),
            self.seq_no.to_string(),
            self.municipality.clone(),
            self.site_name.clone(),
            self.beneficiary_count.to_string(),
            self.address.clone(),
            format_quantity(self.pork_kg),
            format_quantity(self.beef_kg),
            self.chicken_thigh_units.to_string(),
            format_quantity(self.chicken_breast_kg),
        ];
        if let Some(tilapia) = self.tilapia_kg {
            values.push(format_quantity(tilapia));
        }
        values
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteSummary {
    pub route: String,
    pub sites: usize,
    pub beneficiaries: i64,
    pub products: ProductQuantities,
    pub mean_beneficiaries_per_site: f64,
    pub total_protein_kg: f64,
}

impl RouteSummary {
    fn new(route: String, group: &[&Record]) -> Self {
        let beneficiaries = group.iter().map(|r| r.beneficiary_count).sum();
        let products = sum_quantities(group.iter().copied());
        Self {
            route,
            sites: group.len(),
            beneficiaries,
            mean_beneficiaries_per_site: mean(beneficiaries, group.len()),
            total_protein_kg: products.total_weight_kg(),
            products,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompanySummary {
    pub company: String,
    pub modality: String,
    pub sites: usize,
    pub beneficiaries: i64,
    pub routes: usize,
    pub products: ProductQuantities,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodSummary {
    pub consumption_days: String,
    pub sites: usize,
    pub beneficiaries: i64,
    pub routes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetStats {
    pub total_records: usize,
    pub total_beneficiaries: i64,
    pub distinct_routes: usize,
    pub product_totals: ProductQuantities,
    pub principal_program: Option<String>,
    pub principal_company: Option<String>,
    pub principal_modality: Option<String>,
    pub mean_beneficiaries_per_site: f64,
    pub largest_route_coverage: i64,
    pub by_route: Vec<RouteSummary>,
    pub by_company: Vec<CompanySummary>,
    pub by_consumption_days: Vec<PeriodSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ValidationIssue {
    MissingColumn { column: &'static str },
    SentinelField { field: HeaderField },
    ModalityNotSpecified,
    MissingDeliveryDate,
    NoRecords,
    ZeroBeneficiaries,
    ZeroProducts,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingColumn { column } => write!(f, "mandatory column {} is empty", column),
            ValidationIssue::SentinelField { field } => write!(f, "{:?} was not detected", field),
            ValidationIssue::ModalityNotSpecified => write!(f, "the program line names no modality"),
            ValidationIssue::MissingDeliveryDate => write!(f, "no delivery date found, today is used"),
            ValidationIssue::NoRecords => write!(f, "no delivery sites were extracted"),
            ValidationIssue::ZeroBeneficiaries => write!(f, "total beneficiaries is 0"),
            ValidationIssue::ZeroProducts => write!(f, "no products detected (all quantities are 0)"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Header fields still at their "not detected" value.
    pub fn sentinel_fields(&self) -> Vec<HeaderField> {
        self.warnings
            .iter()
            .filter_map(|w| match w {
                ValidationIssue::SentinelField { field } => Some(*field),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(route: &str, seq: i64, beneficiaries: i64, products: &[(ProductKind, f64)]) -> Record {
        Record {
            header: Arc::new(HeaderMetadata::default()),
            day: "DIA 1".into(),
            route: route.into(),
            sequence_number: seq,
            municipality: "CALI".into(),
            site_name: format!("SITIO {}", seq),
            beneficiary_count: beneficiaries,
            address: "CL 1".into(),
            quantities: products.iter().copied().collect(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
    }

    fn sample() -> Dataset {
        Dataset::assemble(
            Arc::new(HeaderMetadata::default()),
            vec![
                record("RUTA 1", 1, 10, &[(ProductKind::PorkMeat, 2.5), (ProductKind::ChickenThighUnits, 12.9)]),
                record("RUTA 2", 1, 30, &[(ProductKind::PorkMeat, 1.0)]),
                record("RUTA 1", 2, 20, &[(ProductKind::BeefMeat, 4.0)]),
            ],
        )
    }

    #[test]
    fn test_assemble_truncates_units_only() {
        let ds = sample();
        assert_eq!(ds.records()[0].quantities.get(ProductKind::ChickenThighUnits), 12.0);
        assert_eq!(ds.records()[0].quantities.get(ProductKind::PorkMeat), 2.5);
    }

    #[test]
    fn test_routes_keep_discovery_order() {
        let ds = sample();
        let routes: Vec<_> = ds.routes().into_iter().map(|(r, g)| (r, g.len())).collect();
        assert_eq!(routes, vec![("RUTA 1".to_string(), 2), ("RUTA 2".to_string(), 1)]);
    }

    #[test]
    fn test_stats() {
        let stats = sample().stats();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.total_beneficiaries, 60);
        assert_eq!(stats.distinct_routes, 2);
        assert_eq!(stats.product_totals.get(ProductKind::PorkMeat), 3.5);
        assert_eq!(stats.largest_route_coverage, 30);
        assert_eq!(stats.mean_beneficiaries_per_site, 20.0);
        assert_eq!(stats.by_route[0].total_protein_kg, 6.5);
        assert_eq!(stats.by_company.len(), 1);
        assert_eq!(stats.by_company[0].routes, 2);
        assert_eq!(stats.principal_program.as_deref(), Some("PROGRAMA NO DETECTADO"));
    }

    #[test]
    fn test_sentinel_header_warnings_without_errors() {
        let report = sample().validate();
        assert!(report.is_valid());
        assert_eq!(report.sentinel_fields(), HeaderField::ALL.to_vec());
        assert!(report.warnings.contains(&ValidationIssue::MissingDeliveryDate));
        assert!(!report.warnings.contains(&ValidationIssue::ZeroProducts));
    }

    #[test]
    fn test_empty_dataset_is_a_warning() {
        let ds = Dataset::assemble(Arc::new(HeaderMetadata::default()), Vec::new());
        let report = ds.validate();
        assert!(report.is_valid());
        assert!(report.warnings.contains(&ValidationIssue::NoRecords));
    }

    #[test]
    fn test_zero_products_and_beneficiaries() {
        let ds = Dataset::assemble(Arc::new(HeaderMetadata::default()), vec![record("RUTA 1", 1, 0, &[])]);
        let report = ds.validate();
        assert!(report.warnings.contains(&ValidationIssue::ZeroBeneficiaries));
        assert!(report.warnings.contains(&ValidationIssue::ZeroProducts));
    }

    #[test]
    fn test_concat_is_naive() {
        let combined = Dataset::concat(vec![sample(), sample()]);
        assert_eq!(combined.len(), 6);
        assert_eq!(combined.headers().len(), 2);
        assert_eq!(combined.records()[3], sample().records()[0]);
    }

    #[test]
    fn test_csv_columns_and_tilapia() {
        let ds = sample();
        let mut out = Vec::new();
        ds.write_csv(&mut out, today()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("PROGRAM,COMPANY,MODALITY"));
        assert!(header.ends_with("CHICKEN_BREAST_KG"));
        let first = lines.next().unwrap();
        assert!(first.contains("2025-08-01"));
        assert!(first.contains(",2.5,0,12,0"));

        let fish = Dataset::assemble(
            Arc::new(HeaderMetadata::default()),
            vec![record("RUTA 1", 1, 5, &[(ProductKind::Tilapia, 1.25)])],
        );
        assert!(fish.column_names().contains(&"TILAPIA_KG"));
        assert_eq!(fish.rows(today())[0].values().last().unwrap(), "1.25");
    }

    #[test]
    fn test_format_quantity() {
        assert_eq!(format_quantity(3.0), "3");
        assert_eq!(format_quantity(2.5), "2.5");
        assert_eq!(format_quantity(0.126), "0.13");
        assert_eq!(format_quantity(4.0001), "4");
    }
}
