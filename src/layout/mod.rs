//! Lays route groups out as delivery guides: fixed-capacity pages, lot and
//! temperature assignment, and a totals row on each route's last page.

pub mod archive;
pub mod pdf;
pub mod table;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::Serialize;
use tracing::debug;
use crate::dataset::{sum_quantities, Dataset};
use crate::inference::records::Record;
use crate::inference::vocabulary::{ProductKind, ProductQuantities};
use crate::types::{GuideMode, LayoutConfig, TemperaturePolicy, Vehicle};

pub const TEMPERATURE_MIN: f64 = -18.0;
pub const TEMPERATURE_MAX: f64 = -10.0;

/// Product columns shown when a route carries no quantities at all.
pub const DEFAULT_PRODUCTS: [ProductKind; 3] = [
    ProductKind::PorkMeat,
    ProductKind::BeefMeat,
    ProductKind::ChickenBreastWeight,
];

lazy_static! {
    static ref DIGITS_RE: Regex = Regex::new(r"\d+").unwrap();
}

/// Fixed texts printed on every page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuideHeader {
    pub guide_number: String,
    pub program: String,
    pub company: String,
    pub modality: String,
    pub supply_request: String,
    pub consumption_days: String,
    pub delivery_date: String,
    pub prepared_on: String,
    pub verdict: String,
    pub route_label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuideFooter {
    pub prepared_by: String,
    pub approved_by: String,
    pub vehicle: Vehicle,
}

/// One product's lot and temperature on one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductCell {
    pub kind: ProductKind,
    pub quantity: f64,
    pub lot: Option<String>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuideRow {
    /// Position within the guide, starting at 1.
    pub position: usize,
    pub sequence_number: i64,
    pub municipality: String,
    pub site_name: String,
    pub beneficiaries: i64,
    pub address: String,
    pub products: Vec<ProductCell>,
}

impl GuideRow {
    pub fn product(&self, kind: ProductKind) -> Option<&ProductCell> {
        self.products.iter().find(|p| p.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalsRow {
    pub beneficiaries: i64,
    pub quantities: ProductQuantities,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuidePage {
    pub number: usize,
    pub count: usize,
    pub rows: Vec<GuideRow>,
    pub totals: Option<TotalsRow>,
}

/// Everything needed to print one route (or one site) as a guide.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Guide {
    /// Route label, or site name in site mode.
    pub name: String,
    pub route: String,
    pub day: String,
    pub header: GuideHeader,
    pub products: Vec<ProductKind>,
    pub pages: Vec<GuidePage>,
    pub footer: GuideFooter,
}

impl Guide {
    pub fn rows(&self) -> impl Iterator<Item = &GuideRow> {
        self.pages.iter().flat_map(|p| p.rows.iter())
    }

    pub fn totals(&self) -> Option<&TotalsRow> {
        self.pages.last().and_then(|p| p.totals.as_ref())
    }
}

/// Splits items into consecutive chunks of at most `capacity`.
pub fn paginate<T>(items: &[T], capacity: usize) -> Vec<&[T]> {
    items.chunks(capacity.max(1)).collect()
}

/// `MMDD-NNN`: the first digit run of the label zero-padded to three, or a
/// stable hash of the label when it has no digits.
pub fn guide_number(label: &str, today: NaiveDate) -> String {
    let suffix = match DIGITS_RE.find(label) {
        Some(m) => format!("{:0>3}", m.as_str()),
        None => format!("{:03}", fnv1a(label.as_bytes()) % 1000),
    };
    format!("{}-{}", today.format("%m%d"), suffix)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub struct LayoutEngine<R: Rng> {
    config: LayoutConfig,
    rng: R,
    today: NaiveDate,
}

impl LayoutEngine<StdRng> {
    /// Seeded from the config when a seed is set, from entropy otherwise.
    pub fn from_config(config: LayoutConfig, today: NaiveDate) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::new(config, rng, today)
    }
}

impl<R: Rng> LayoutEngine<R> {
    pub fn new(config: LayoutConfig, rng: R, today: NaiveDate) -> Self {
        Self { config, rng, today }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Guides in route discovery order, or one per record in site mode.
    pub fn layout(&mut self, dataset: &Dataset) -> Vec<Guide> {
        let groups: Vec<(String, Vec<&Record>)> = match self.config.mode {
            GuideMode::Route => dataset.routes(),
            GuideMode::Site => dataset
                .records()
                .iter()
                .map(|r| (r.site_name.clone(), vec![r]))
                .collect(),
        };

        groups
            .into_iter()
            .map(|(name, records)| self.layout_group(name, &records))
            .collect()
    }

    fn layout_group(&mut self, name: String, records: &[&Record]) -> Guide {
        let first = records[0];
        let totals = TotalsRow {
            beneficiaries: records.iter().map(|r| r.beneficiary_count).sum(),
            quantities: sum_quantities(records.iter().copied()),
        };

        let mut products: Vec<ProductKind> = ProductKind::ALL
            .iter()
            .copied()
            .filter(|k| totals.quantities.get(*k) > 0.0)
            .collect();
        if products.is_empty() {
            products = DEFAULT_PRODUCTS.to_vec();
        }

        let lots = self.route_lots(&totals.quantities);
        let policy = self.config.temperature_policy;
        let route_temperatures: Vec<Option<f64>> = match policy {
            TemperaturePolicy::PerRoute => ProductKind::ALL
                .iter()
                .map(|k| (totals.quantities.get(*k) > 0.0).then(|| self.temperature()))
                .collect(),
            TemperaturePolicy::PerRecord => vec![None; ProductKind::COUNT],
        };

        let rows: Vec<GuideRow> = records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let cells = products
                    .iter()
                    .map(|kind| {
                        let quantity = record.quantities.get(*kind);
                        let delivered = quantity > 0.0;
                        let temperature = match policy {
                            _ if !delivered => None,
                            TemperaturePolicy::PerRecord => Some(self.temperature()),
                            TemperaturePolicy::PerRoute => route_temperatures[kind.index()],
                        };
                        ProductCell {
                            kind: *kind,
                            quantity,
                            lot: if delivered { lots[kind.index()].clone() } else { None },
                            temperature,
                        }
                    })
                    .collect();
                GuideRow {
                    position: i + 1,
                    sequence_number: record.sequence_number,
                    municipality: record.municipality.clone(),
                    site_name: record.site_name.clone(),
                    beneficiaries: record.beneficiary_count,
                    address: record.address.clone(),
                    products: cells,
                }
            })
            .collect();

        let chunks = paginate(&rows, self.config.page_capacity);
        let count = chunks.len();
        let pages: Vec<GuidePage> = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| GuidePage {
                number: i + 1,
                count,
                rows: chunk.to_vec(),
                totals: (i + 1 == count).then(|| totals.clone()),
            })
            .collect();
        debug!("guide {}: {} rows on {} pages", name, rows.len(), count);

        let header = &first.header;
        let guide_header = GuideHeader {
            guide_number: guide_number(&first.route, self.today),
            program: header.program.clone(),
            company: header.company.clone(),
            modality: header.modality.clone(),
            supply_request: header.supply_request.clone(),
            consumption_days: header.consumption_days.clone(),
            delivery_date: header.delivery_date_or(self.today).format("%Y-%m-%d").to_string(),
            prepared_on: self.today.format("%Y-%m-%d").to_string(),
            verdict: self.config.verdict.clone(),
            route_label: first.route.clone(),
        };

        Guide {
            name,
            route: first.route.clone(),
            day: first.day.clone(),
            header: guide_header,
            products,
            pages,
            footer: GuideFooter {
                prepared_by: self.config.prepared_by.clone(),
                approved_by: self.config.approved_by.clone(),
                vehicle: self.config.vehicles.get(&first.route).cloned().unwrap_or_default(),
            },
        }
    }

    /// Custom lot when configured, otherwise one generated lot per kind
    /// that the route actually carries.
    fn route_lots(&mut self, totals: &ProductQuantities) -> Vec<Option<String>> {
        ProductKind::ALL
            .iter()
            .map(|kind| match self.config.lots.get(kind) {
                Some(lot) => Some(lot.clone()),
                None if totals.get(*kind) > 0.0 => Some(self.rng.gen_range(100_000..=999_999u32).to_string()),
                None => None,
            })
            .collect()
    }

    /// Uniform in [-18, -10], one decimal.
    fn temperature(&mut self) -> f64 {
        let raw = self.rng.gen_range(TEMPERATURE_MIN..=TEMPERATURE_MAX);
        (raw * 10.0).round() / 10.0
    }
}
