use std::fmt;
use regex::Regex;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::grid::CellGrid;

/// Structural conventions a report can follow. Decided once per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DialectTag {
    CommunityDiningHalls,
    ConsortiumFrozenGoods,
    ConsortiumSingleShift,
    ConsortiumGeneral,
    ReliefProgramBuga,
    ReliefProgramYumbo,
    Unknown,
}

impl fmt::Display for DialectTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DialectTag::CommunityDiningHalls => "COMMUNITY_DINING_HALLS",
            DialectTag::ConsortiumFrozenGoods => "CONSORTIUM_FROZEN_GOODS",
            DialectTag::ConsortiumSingleShift => "CONSORTIUM_SINGLE_SHIFT",
            DialectTag::ConsortiumGeneral => "CONSORTIUM_GENERAL",
            DialectTag::ReliefProgramBuga => "RELIEF_PROGRAM_BUGA",
            DialectTag::ReliefProgramYumbo => "RELIEF_PROGRAM_YUMBO",
            DialectTag::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

lazy_static! {
    static ref DINING_HALLS_ROUTE_RE: Regex =
        Regex::new(r"(?i)DIA\s+\d+\s*-\s*RUTA\s+\d+").unwrap();
    static ref CONSORTIUM_ROUTE_RE: Regex =
        Regex::new(r"(?i)CONGELADOS\s+RUTA\s+\d+").unwrap();
    static ref GENERIC_ROUTE_RE: Regex =
        Regex::new(r"(?i)(DIA|CONGELADOS).*RUTA.*\d+").unwrap();
}

pub const DINING_HALLS_MARKER: &str = "COMEDORES COMUNITARIOS";
pub const CONSORTIUM_MARKER: &str = "CONSORCIO ALIMENTANDO A CALI";
const FROZEN_ROUTE_MARKER: &str = "CONGELADOS RUTA";
const SINGLE_SHIFT_MARKERS: &[&str] = &["JU CALI", "JORNADA UNICA"];
pub const BUGA_MARKERS: &[&str] = &["UNION TEMPORAL VALLE SOLIDARIO BUGA", "VALLE SOLIDARIO BUGA 2025"];
pub const YUMBO_MARKERS: &[&str] = &["UNION TEMPORAL VALLE SOLIDARIO YUMBO", "VALLE SOLIDARIO YUMBO 2025"];

/// Day used when a route label carries no day of its own.
pub const DEFAULT_DAY: &str = "DIA 1";

impl DialectTag {
    /// Case-insensitive regex that opens a route block in this dialect.
    /// `Unknown` shares the generic fallback pattern.
    pub fn route_pattern(self) -> &'static Regex {
        match self {
            DialectTag::CommunityDiningHalls => &DINING_HALLS_ROUTE_RE,
            DialectTag::ConsortiumFrozenGoods
            | DialectTag::ConsortiumSingleShift
            | DialectTag::ConsortiumGeneral => &CONSORTIUM_ROUTE_RE,
            DialectTag::ReliefProgramBuga
            | DialectTag::ReliefProgramYumbo
            | DialectTag::Unknown => &GENERIC_ROUTE_RE,
        }
    }

    /// Pattern every dialect treats as "a new route starts here".
    pub fn generic_route_pattern() -> &'static Regex {
        &GENERIC_ROUTE_RE
    }

    /// Splits a block label into `(day, route)`.
    pub fn split_route_label(self, label: &str) -> (String, String) {
        let label = label.trim();
        if self == DialectTag::CommunityDiningHalls {
            let mut parts = label.split(" - ");
            if let (Some(day), Some(route)) = (parts.next(), parts.next()) {
                return (day.trim().to_string(), route.trim().to_string());
            }
        }
        (DEFAULT_DAY.to_string(), label.to_string())
    }
}

/// Outcome of classification: the tag plus the column-0 line that matched.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub tag: DialectTag,
    pub marker_line: Option<String>,
}

/// Scans column 0 of the first `scan_rows` rows for program markers. The
/// consortium marker triggers a secondary scan of `[i, i + sub_scan_rows)`
/// to refine the tag.
pub fn classify(grid: &CellGrid, scan_rows: usize, sub_scan_rows: usize) -> Classification {
    for i in 0..scan_rows.min(grid.height()) {
        let line = grid.upper_text(i, 0);
        if line.is_empty() {
            continue;
        }

        let tag = if line.contains(DINING_HALLS_MARKER) {
            Some(DialectTag::CommunityDiningHalls)
        } else if line.contains(CONSORTIUM_MARKER) {
            Some(refine_consortium(grid, i, sub_scan_rows))
        } else if BUGA_MARKERS.iter().any(|m| line.contains(m)) {
            Some(DialectTag::ReliefProgramBuga)
        } else if YUMBO_MARKERS.iter().any(|m| line.contains(m)) {
            Some(DialectTag::ReliefProgramYumbo)
        } else {
            None
        };

        if let Some(tag) = tag {
            debug!("dialect {} from row {}: {}", tag, i, line);
            return Classification { tag, marker_line: Some(line) };
        }
    }

    debug!("no program marker in the first {} rows", scan_rows);
    Classification { tag: DialectTag::Unknown, marker_line: None }
}

fn refine_consortium(grid: &CellGrid, from: usize, sub_scan_rows: usize) -> DialectTag {
    let end = (from + sub_scan_rows).min(grid.height());
    for j in from..end {
        let line = grid.upper_text(j, 0);
        if line.contains(FROZEN_ROUTE_MARKER) {
            return DialectTag::ConsortiumFrozenGoods;
        }
        if SINGLE_SHIFT_MARKERS.iter().any(|m| line.contains(m)) {
            return DialectTag::ConsortiumSingleShift;
        }
    }
    DialectTag::ConsortiumGeneral
}
