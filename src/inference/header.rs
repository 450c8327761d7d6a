use chrono::NaiveDate;
use regex::Regex;
use lazy_static::lazy_static;
use serde::Serialize;
use tracing::{debug, trace};
use crate::grid::CellGrid;

pub const PROGRAM_ROW: usize = 3;
pub const SUPPLY_REQUEST_ROW: usize = 7;
pub const CONSUMPTION_DAYS_ROW: usize = 8;

pub const PROGRAM_NOT_DETECTED: &str = "PROGRAMA NO DETECTADO";
pub const COMPANY_NOT_DETECTED: &str = "EMPRESA NO DETECTADA";
pub const MODALITY_NOT_DETECTED: &str = "MODALIDAD NO DETECTADA";
pub const NOT_SPECIFIED: &str = "NO ESPECIFICADO";
/// Placeholder for a part the program line explicitly lacks.
pub const PART_NOT_SPECIFIED: &str = "NO ESPECIFICADA";

const CONSORTIUM_COMPANY: &str = "CONSORCIO ALIMENTANDO A CALI 2025";
const BUGA_COMPANY: &str = "UNION TEMPORAL VALLE SOLIDARIO BUGA 2025";
const YUMBO_COMPANY: &str = "UNION TEMPORAL VALLE SOLIDARIO YUMBO 2025";
const RELIEF_COMPANY: &str = "VALLE SOLIDARIO";

lazy_static! {
    static ref LABELED_PROGRAM_RE: Regex =
        Regex::new(r"(?i)PROGRAMA:\s*(.+?)\s*-\s*(.+?)\s*/\s*(.+?)$").unwrap();
    static ref UNLABELED_PROGRAM_RE: Regex =
        Regex::new(r"^(.+?)\s*-\s*(.+?)\s*/\s*(.+?)$").unwrap();
    static ref PROGRAM_PREFIX_RE: Regex = Regex::new(r"(?i)^PROGRAMA:\s*").unwrap();
    static ref COMPANY_PREFIX_RE: Regex = Regex::new(r"(?i)^EMPRESA(?:\s*:\s*|\s+)").unwrap();
    static ref MODALITY_PREFIX_RE: Regex = Regex::new(r"(?i)^MODALIDAD(?:\s*:\s*|\s+)").unwrap();
    static ref SUPPLY_REQUEST_RE: Regex =
        Regex::new(r"(?i)Solicitud\s+(?:de\s+)?Remesa\s*:\s*(.*)$").unwrap();
    static ref CONSUMPTION_DAYS_RE: Regex =
        Regex::new(r"(?i)D[IÍií]as\s+de\s+consumo\s*:\s*(.*)$").unwrap();
    static ref ISO_DATE_RE: Regex = Regex::new(r"(\d{4}-\d{1,2}-\d{1,2})").unwrap();
    static ref DMY_DATE_RE: Regex = Regex::new(r"(\d{1,2}/\d{1,2}/\d{4})").unwrap();
}

/// Report-level metadata read from fixed rows. Every field falls back to a
/// named sentinel; extraction never fails.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderMetadata {
    pub program: String,
    pub company: String,
    pub modality: String,
    pub supply_request: String,
    pub consumption_days: String,
    pub delivery_date: Option<NaiveDate>,
}

impl Default for HeaderMetadata {
    fn default() -> Self {
        Self {
            program: PROGRAM_NOT_DETECTED.to_string(),
            company: COMPANY_NOT_DETECTED.to_string(),
            modality: MODALITY_NOT_DETECTED.to_string(),
            supply_request: NOT_SPECIFIED.to_string(),
            consumption_days: NOT_SPECIFIED.to_string(),
            delivery_date: None,
        }
    }
}

/// Header text fields that are checked for sentinel values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeaderField {
    Program,
    Company,
    Modality,
    SupplyRequest,
    ConsumptionDays,
}

impl HeaderField {
    pub const ALL: [HeaderField; 5] = [
        HeaderField::Program,
        HeaderField::Company,
        HeaderField::Modality,
        HeaderField::SupplyRequest,
        HeaderField::ConsumptionDays,
    ];
}

impl HeaderMetadata {
    pub fn field(&self, field: HeaderField) -> &str {
        match field {
            HeaderField::Program => &self.program,
            HeaderField::Company => &self.company,
            HeaderField::Modality => &self.modality,
            HeaderField::SupplyRequest => &self.supply_request,
            HeaderField::ConsumptionDays => &self.consumption_days,
        }
    }

    pub fn is_sentinel(&self, field: HeaderField) -> bool {
        let sentinel = match field {
            HeaderField::Program => PROGRAM_NOT_DETECTED,
            HeaderField::Company => COMPANY_NOT_DETECTED,
            HeaderField::Modality => MODALITY_NOT_DETECTED,
            HeaderField::SupplyRequest | HeaderField::ConsumptionDays => NOT_SPECIFIED,
        };
        self.field(field) == sentinel
    }

    pub fn sentinel_fields(&self) -> Vec<HeaderField> {
        HeaderField::ALL
            .iter()
            .copied()
            .filter(|f| self.is_sentinel(*f))
            .collect()
    }

    /// Modality is missing when undetected or explicitly absent from row 3.
    pub fn modality_missing(&self) -> bool {
        self.is_sentinel(HeaderField::Modality) || self.modality == PART_NOT_SPECIFIED
    }

    /// Delivery date for display, substituting `today` when none was parsed.
    pub fn delivery_date_or(&self, today: NaiveDate) -> NaiveDate {
        self.delivery_date.unwrap_or(today)
    }
}

/// Which rule of the program line parser produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramRule {
    Labeled,
    Unlabeled,
    HyphenOnly,
    SlashOnly,
    Keywords,
    Nothing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgramLine {
    pub program: String,
    pub company: String,
    pub modality: String,
    pub rule: ProgramRule,
}

impl Default for ProgramLine {
    fn default() -> Self {
        Self {
            program: PROGRAM_NOT_DETECTED.to_string(),
            company: COMPANY_NOT_DETECTED.to_string(),
            modality: MODALITY_NOT_DETECTED.to_string(),
            rule: ProgramRule::Nothing,
        }
    }
}

/// Reads rows 3, 7 and 8 of column 0.
pub fn extract_header(grid: &CellGrid) -> HeaderMetadata {
    let mut header = HeaderMetadata::default();

    let program_text = grid.text(PROGRAM_ROW, 0);
    if !program_text.is_empty() {
        let line = parse_program_line(&program_text);
        debug!("program line parsed with {:?}", line.rule);
        header.program = line.program;
        header.company = line.company;
        header.modality = line.modality;
    }

    let supply_text = grid.text(SUPPLY_REQUEST_ROW, 0);
    if let Some(value) = parse_labeled_field(&supply_text, &SUPPLY_REQUEST_RE) {
        header.supply_request = value;
    }

    let days_text = grid.text(CONSUMPTION_DAYS_ROW, 0);
    if let Some(value) = parse_labeled_field(&days_text, &CONSUMPTION_DAYS_RE) {
        header.delivery_date = first_date(&value);
        header.consumption_days = value;
    }

    trace!("header metadata: {:?}", header);
    header
}

/// Parses `PROGRAMA: A - B / C` and its degraded forms. The first rule
/// that matches wins.
pub fn parse_program_line(line: &str) -> ProgramLine {
    let text = line.trim();
    if text.is_empty() {
        return ProgramLine::default();
    }

    if let Some(caps) = LABELED_PROGRAM_RE.captures(text) {
        return three_part(&caps[1], &caps[2], &caps[3], ProgramRule::Labeled);
    }

    if let Some(caps) = UNLABELED_PROGRAM_RE.captures(text) {
        return three_part(&caps[1], &caps[2], &caps[3], ProgramRule::Unlabeled);
    }

    if text.contains(" - ") && !text.contains(" / ") {
        if let Some((program, company)) = text.split_once(" - ") {
            return ProgramLine {
                program: strip_program_prefix(program),
                company: strip_label(&COMPANY_PREFIX_RE, company),
                modality: PART_NOT_SPECIFIED.to_string(),
                rule: ProgramRule::HyphenOnly,
            };
        }
    }

    if text.contains(" / ") && !text.contains(" - ") {
        if let Some((program, modality)) = text.split_once(" / ") {
            return ProgramLine {
                program: strip_program_prefix(program),
                company: PART_NOT_SPECIFIED.to_string(),
                modality: strip_label(&MODALITY_PREFIX_RE, modality),
                rule: ProgramRule::SlashOnly,
            };
        }
    }

    let program = strip_program_prefix(text);
    if program.is_empty() {
        return ProgramLine::default();
    }
    let company = infer_company(&program)
        .map(str::to_string)
        .unwrap_or_else(|| COMPANY_NOT_DETECTED.to_string());
    ProgramLine {
        program,
        company,
        modality: MODALITY_NOT_DETECTED.to_string(),
        rule: ProgramRule::Keywords,
    }
}

fn three_part(program: &str, company: &str, modality: &str, rule: ProgramRule) -> ProgramLine {
    ProgramLine {
        program: program.trim().to_string(),
        company: strip_label(&COMPANY_PREFIX_RE, company),
        modality: strip_label(&MODALITY_PREFIX_RE, modality),
        rule,
    }
}

fn strip_program_prefix(text: &str) -> String {
    PROGRAM_PREFIX_RE.replace(text.trim(), "").trim().to_string()
}

/// Removes a literal field label, unless that would leave nothing.
fn strip_label(label: &Regex, text: &str) -> String {
    let text = text.trim();
    let stripped = label.replace(text, "");
    let stripped = stripped.trim();
    if stripped.is_empty() {
        text.to_string()
    } else {
        stripped.to_string()
    }
}

fn infer_company(program: &str) -> Option<&'static str> {
    let upper = program.to_uppercase();
    if upper.contains("CONSORCIO") {
        Some(CONSORTIUM_COMPANY)
    } else if upper.contains("VALLE SOLIDARIO") {
        if upper.contains("BUGA") {
            Some(BUGA_COMPANY)
        } else if upper.contains("YUMBO") {
            Some(YUMBO_COMPANY)
        } else {
            Some(RELIEF_COMPANY)
        }
    } else {
        None
    }
}

/// Value of a `Label: value` row: the text after the label when present,
/// else the text after the first colon, else the whole line.
fn parse_labeled_field(line: &str, label: &Regex) -> Option<String> {
    let text = line.trim();
    if text.is_empty() {
        return None;
    }
    let value = if let Some(caps) = label.captures(text) {
        caps.get(1).map(|m| m.as_str()).unwrap_or_default().to_string()
    } else if let Some((_, after)) = text.split_once(':') {
        after.to_string()
    } else {
        text.to_string()
    };
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// First ISO date in the text, else the first `DD/MM/YYYY` date.
pub fn first_date(text: &str) -> Option<NaiveDate> {
    if let Some(m) = ISO_DATE_RE.find(text) {
        if let Ok(date) = NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d") {
            return Some(date);
        }
    }
    if let Some(m) = DMY_DATE_RE.find(text) {
        if let Ok(date) = NaiveDate::parse_from_str(m.as_str(), "%d/%m/%Y") {
            return Some(date);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_with(program: &str, supply: &str, days: &str) -> CellGrid {
        let mut rows = vec![vec![""]; 9];
        rows[PROGRAM_ROW] = vec![program];
        rows[SUPPLY_REQUEST_ROW] = vec![supply];
        rows[CONSUMPTION_DAYS_ROW] = vec![days];
        CellGrid::from_text_rows(rows)
    }

    #[test]
    fn test_labeled_program_line_strips_field_labels() {
        let line = parse_program_line("PROGRAMA:X - EMPRESA Y / MODALIDAD Z");
        assert_eq!(line.rule, ProgramRule::Labeled);
        assert_eq!(line.program, "X");
        assert_eq!(line.company, "Y");
        assert_eq!(line.modality, "Z");
    }

    #[test]
    fn test_real_program_line() {
        let line = parse_program_line(
            "PROGRAMA:CONSORCIO ALIMENTANDO A CALI 2025 - CONSORCIO ALIMENTANDO A CALI 2025 / ALMUERZO JORNADA UNICA",
        );
        assert_eq!(line.program, "CONSORCIO ALIMENTANDO A CALI 2025");
        assert_eq!(line.company, "CONSORCIO ALIMENTANDO A CALI 2025");
        assert_eq!(line.modality, "ALMUERZO JORNADA UNICA");
    }

    #[test]
    fn test_unlabeled_then_partial_rules() {
        let line = parse_program_line("COMEDORES 2025 - FUNDACION / DESAYUNO");
        assert_eq!(line.rule, ProgramRule::Unlabeled);
        assert_eq!(line.company, "FUNDACION");

        let line = parse_program_line("PROGRAMA: COMEDORES - FUNDACION");
        assert_eq!(line.rule, ProgramRule::HyphenOnly);
        assert_eq!(line.program, "COMEDORES");
        assert_eq!(line.modality, PART_NOT_SPECIFIED);

        let line = parse_program_line("PROGRAMA: COMEDORES / ALMUERZO");
        assert_eq!(line.rule, ProgramRule::SlashOnly);
        assert_eq!(line.company, PART_NOT_SPECIFIED);
        assert_eq!(line.modality, "ALMUERZO");
    }

    #[test]
    fn test_keyword_company_inference() {
        let line = parse_program_line("PROGRAMA: VALLE SOLIDARIO YUMBO");
        assert_eq!(line.rule, ProgramRule::Keywords);
        assert_eq!(line.program, "VALLE SOLIDARIO YUMBO");
        assert_eq!(line.company, YUMBO_COMPANY);

        let line = parse_program_line("CONSORCIO 2025");
        assert_eq!(line.company, CONSORTIUM_COMPANY);

        let line = parse_program_line("ALGO SIN PISTAS");
        assert_eq!(line.company, COMPANY_NOT_DETECTED);
    }

    #[test]
    fn test_header_fields_and_iso_date() {
        let grid = grid_with(
            "PROGRAMA:X - EMPRESA Y / MODALIDAD Z",
            "Solicitud Remesa: M1",
            "Dias de consumo: 2025-07-21 - 2025-07-22",
        );
        let header = extract_header(&grid);
        assert_eq!(header.supply_request, "M1");
        assert_eq!(header.consumption_days, "2025-07-21 - 2025-07-22");
        assert_eq!(header.delivery_date, NaiveDate::from_ymd_opt(2025, 7, 21));
        assert!(header.sentinel_fields().is_empty());
    }

    #[test]
    fn test_field_fallbacks() {
        let grid = grid_with("", "Remesa semanal: MENU 6", "21/07/2025 al 25/07/2025");
        let header = extract_header(&grid);
        assert_eq!(header.supply_request, "MENU 6");
        assert_eq!(header.consumption_days, "21/07/2025 al 25/07/2025");
        assert_eq!(header.delivery_date, NaiveDate::from_ymd_opt(2025, 7, 21));
    }

    #[test]
    fn test_invalid_iso_date_falls_through_to_dmy() {
        assert_eq!(
            first_date("2025-13-40 o 03/02/2025"),
            NaiveDate::from_ymd_opt(2025, 2, 3)
        );
        assert_eq!(first_date("sin fecha"), None);
    }

    #[test]
    fn test_blank_rows_give_all_sentinels() {
        let grid = grid_with("", "", "");
        let header = extract_header(&grid);
        assert_eq!(header, HeaderMetadata::default());
        assert_eq!(header.sentinel_fields().len(), 5);
    }

    #[test]
    fn test_short_grid_never_fails() {
        let grid = CellGrid::from_text_rows(vec![vec!["solo una fila"]]);
        assert_eq!(extract_header(&grid), HeaderMetadata::default());
    }
}
