//! Cell and merge model of the printed guide tables.

use std::ops::Range;
use crate::inference::vocabulary::ProductKind;
use super::{Guide, GuidePage, GuideRow, TotalsRow};

/// Relative widths of the fixed columns before the product groups.
const BASE_COLUMNS: [(&str, f64); 5] = [
    ("N°", 0.8),
    ("MUNICIPIO", 1.5),
    ("COMEDOR / ESCUELA", 4.5),
    ("COBER", 1.2),
    ("DIRECCIÓN", 3.5),
];
const PRODUCT_GROUP: [f64; 3] = [1.2, 1.5, 1.0];
const TRAILING_COLUMNS: [(&str, f64); 2] = [("FIRMA DE RECIBO", 2.0), ("HORA DE ENTREGA", 1.5)];

pub const TOTALS_LABEL: &str = "TOTAL COBERTURA RUTA";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shade {
    #[default]
    None,
    Header,
    Totals,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableCell {
    pub text: String,
    pub align: Align,
    pub row_span: usize,
    pub col_span: usize,
    /// Covered by a neighbouring merged cell.
    pub hidden: bool,
}

impl TableCell {
    pub fn new(text: impl Into<String>, align: Align) -> Self {
        Self {
            text: text.into(),
            align,
            row_span: 1,
            col_span: 1,
            hidden: false,
        }
    }

    pub fn blank() -> Self {
        Self::new("", Align::Center)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub cells: Vec<TableCell>,
    pub shade: Shade,
}

impl TableRow {
    pub fn bold(&self) -> bool {
        self.shade != Shade::None
    }
}

/// Rectangular table; every row has one cell per column, merged cells
/// hide the ones they cover.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub widths: Vec<f64>,
    pub rows: Vec<TableRow>,
}

impl Table {
    pub fn new(widths: Vec<f64>) -> Self {
        Self { widths, rows: Vec::new() }
    }

    pub fn column_count(&self) -> usize {
        self.widths.len()
    }

    pub fn push_row(&mut self, mut cells: Vec<TableCell>, shade: Shade) {
        cells.resize(self.column_count(), TableCell::blank());
        self.rows.push(TableRow { cells, shade });
    }

    pub fn cell(&self, row: usize, col: usize) -> &TableCell {
        &self.rows[row].cells[col]
    }

    /// Merges the block starting at `(row, col)`. Out-of-range spans are clipped.
    pub fn merge(&mut self, row: usize, col: usize, row_span: usize, col_span: usize) {
        let row_span = row_span.min(self.rows.len().saturating_sub(row)).max(1);
        let col_span = col_span.min(self.column_count().saturating_sub(col)).max(1);
        for r in row..row + row_span {
            for c in col..col + col_span {
                self.rows[r].cells[c].hidden = (r, c) != (row, col);
            }
        }
        let anchor = &mut self.rows[row].cells[col];
        anchor.row_span = row_span;
        anchor.col_span = col_span;
    }

    /// Merges consecutive equal, non-empty cells of one column within `rows`.
    pub fn merge_vertical_runs(&mut self, col: usize, rows: Range<usize>) {
        let mut start = rows.start;
        while start < rows.end {
            let text = self.rows[start].cells[col].text.clone();
            let mut end = start + 1;
            while end < rows.end && !text.is_empty() && self.rows[end].cells[col].text == text {
                end += 1;
            }
            if end - start > 1 {
                self.merge(start, col, end - start, 1);
            }
            start = end;
        }
    }

    /// Anchors of every merged block as `(row, col, row_span, col_span)`.
    pub fn merges(&self) -> Vec<(usize, usize, usize, usize)> {
        let mut merges = Vec::new();
        for (r, row) in self.rows.iter().enumerate() {
            for (c, cell) in row.cells.iter().enumerate() {
                if !cell.hidden && (cell.row_span > 1 || cell.col_span > 1) {
                    merges.push((r, c, cell.row_span, cell.col_span));
                }
            }
        }
        merges
    }
}

pub fn column_widths(products: &[ProductKind]) -> Vec<f64> {
    BASE_COLUMNS
        .iter()
        .map(|(_, w)| *w)
        .chain(products.iter().flat_map(|_| PRODUCT_GROUP))
        .chain(TRAILING_COLUMNS.iter().map(|(_, w)| *w))
        .collect()
}

fn product_column(index: usize) -> usize {
    BASE_COLUMNS.len() + index * PRODUCT_GROUP.len()
}

pub fn format_amount(kind: ProductKind, value: f64) -> String {
    if kind.is_count() {
        format!("{}", value.trunc() as i64)
    } else {
        format!("{:.2}", value)
    }
}

pub fn format_temperature(value: f64) -> String {
    format!("{:.1}", value)
}

/// Two header rows: product labels spanning their group, then the
/// quantity/lot/temperature captions.
pub fn product_header_table(guide: &Guide) -> Table {
    let products = &guide.products;
    let mut table = Table::new(column_widths(products));
    let base = BASE_COLUMNS.len();

    let mut labels = vec![TableCell::new(guide.header.company.clone(), Align::Center)];
    labels.resize(base, TableCell::blank());
    let mut captions = vec![TableCell::new("NUMERO DE PESADAS", Align::Center)];
    captions.resize(base, TableCell::blank());
    for kind in products {
        labels.push(TableCell::new(format!("{} / {}", kind.guide_label(), kind.unit()), Align::Center));
        labels.push(TableCell::blank());
        labels.push(TableCell::blank());
        captions.push(TableCell::new("CANTIDAD", Align::Center));
        captions.push(TableCell::new("LOTE", Align::Center));
        captions.push(TableCell::new("°C", Align::Center));
    }
    labels.extend(TRAILING_COLUMNS.iter().map(|(t, _)| TableCell::new(*t, Align::Center)));
    captions.push(TableCell::blank());
    captions.push(TableCell::new("HH:MM", Align::Center));

    table.push_row(labels, Shade::Header);
    table.push_row(captions, Shade::Header);
    table.merge(0, 0, 1, base);
    table.merge(1, 0, 1, base);
    for i in 0..products.len() {
        table.merge(0, product_column(i), 1, PRODUCT_GROUP.len());
    }
    table
}

fn data_cells(products: &[ProductKind], row: &GuideRow) -> Vec<TableCell> {
    let mut cells = vec![
        TableCell::new(row.position.to_string(), Align::Center),
        TableCell::new(row.municipality.clone(), Align::Left),
        TableCell::new(row.site_name.clone(), Align::Left),
        TableCell::new(row.beneficiaries.to_string(), Align::Right),
        TableCell::new(row.address.clone(), Align::Left),
    ];
    for kind in products {
        match row.product(*kind) {
            Some(cell) if cell.quantity > 0.0 => {
                cells.push(TableCell::new(format_amount(*kind, cell.quantity), Align::Right));
                cells.push(TableCell::new(cell.lot.clone().unwrap_or_default(), Align::Center));
                cells.push(TableCell::new(
                    cell.temperature.map(format_temperature).unwrap_or_default(),
                    Align::Center,
                ));
            }
            _ => cells.extend([TableCell::blank(), TableCell::blank(), TableCell::blank()]),
        }
    }
    cells
}

fn totals_cells(products: &[ProductKind], totals: &TotalsRow) -> Vec<TableCell> {
    let mut cells = vec![TableCell::new(TOTALS_LABEL, Align::Left)];
    cells.resize(3, TableCell::blank());
    cells.push(TableCell::new(totals.beneficiaries.to_string(), Align::Right));
    cells.push(TableCell::blank());
    for kind in products {
        cells.push(TableCell::new(format_amount(*kind, totals.quantities.get(*kind)), Align::Right));
        cells.push(TableCell::blank());
        cells.push(TableCell::blank());
    }
    cells
}

/// Caption row, the page's records, and the totals row when present.
/// Equal lots and temperatures on consecutive rows share one merged cell.
pub fn data_table(products: &[ProductKind], rows: &[GuideRow], totals: Option<&TotalsRow>) -> Table {
    let mut table = Table::new(column_widths(products));
    let mut captions: Vec<TableCell> = BASE_COLUMNS
        .iter()
        .map(|(t, _)| TableCell::new(*t, Align::Center))
        .collect();
    for kind in products {
        captions.push(TableCell::new(kind.unit(), Align::Center));
        captions.push(TableCell::new("LOTE", Align::Center));
        captions.push(TableCell::new("TEMP °C", Align::Center));
    }
    captions.extend(TRAILING_COLUMNS.iter().map(|(t, _)| TableCell::new(*t, Align::Center)));
    table.push_row(captions, Shade::Header);

    for row in rows {
        table.push_row(data_cells(products, row), Shade::None);
    }
    let data_rows = 1..1 + rows.len();
    for i in 0..products.len() {
        let col = product_column(i);
        table.merge_vertical_runs(col + 1, data_rows.clone());
        table.merge_vertical_runs(col + 2, data_rows.clone());
    }

    if let Some(totals) = totals {
        table.push_row(totals_cells(products, totals), Shade::Totals);
        let last = table.rows.len() - 1;
        table.merge(last, 0, 1, 3);
    }
    table
}

pub fn page_table(guide: &Guide, page: &GuidePage) -> Table {
    data_table(&guide.products, &page.rows, page.totals.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::vocabulary::ProductQuantities;
    use crate::layout::ProductCell;

    fn row(position: usize, lot: &str, temperature: f64) -> GuideRow {
        GuideRow {
            position,
            sequence_number: position as i64,
            municipality: "CALI".into(),
            site_name: format!("SITIO {}", position),
            beneficiaries: 10,
            address: "CL 1".into(),
            products: vec![ProductCell {
                kind: ProductKind::PorkMeat,
                quantity: 2.5,
                lot: Some(lot.into()),
                temperature: Some(temperature),
            }],
        }
    }

    #[test]
    fn test_consecutive_lots_merge() {
        let rows = vec![row(1, "111111", -12.0), row(2, "111111", -15.3), row(3, "111111", -15.3)];
        let table = data_table(&[ProductKind::PorkMeat], &rows, None);
        assert_eq!(table.rows.len(), 4);
        assert_eq!(table.column_count(), 10);
        let merges = table.merges();
        assert!(merges.contains(&(1, 6, 3, 1)));
        assert!(merges.contains(&(2, 7, 2, 1)));
        assert!(table.cell(3, 6).hidden);
        assert_eq!(table.cell(1, 5).text, "2.50");
        assert_eq!(table.cell(1, 7).text, "-12.0");
    }

    #[test]
    fn test_blank_cells_do_not_merge() {
        let mut table = Table::new(vec![1.0]);
        table.push_row(vec![TableCell::blank()], Shade::None);
        table.push_row(vec![TableCell::blank()], Shade::None);
        table.merge_vertical_runs(0, 0..2);
        assert!(table.merges().is_empty());
    }

    #[test]
    fn test_totals_row() {
        let mut quantities = ProductQuantities::default();
        quantities.set(ProductKind::ChickenThighUnits, 40.0);
        let totals = TotalsRow { beneficiaries: 120, quantities };
        let table = data_table(&[ProductKind::ChickenThighUnits], &[], Some(&totals));
        let last = table.rows.last().unwrap();
        assert_eq!(last.shade, Shade::Totals);
        assert_eq!(last.cells[0].text, TOTALS_LABEL);
        assert_eq!(last.cells[0].col_span, 3);
        assert_eq!(last.cells[3].text, "120");
        assert_eq!(last.cells[5].text, "40");
    }

    #[test]
    fn test_merge_clips_to_table() {
        let mut table = Table::new(vec![1.0, 1.0]);
        table.push_row(vec![TableCell::new("a", Align::Left)], Shade::None);
        table.merge(0, 1, 4, 4);
        assert_eq!(table.merges(), Vec::<(usize, usize, usize, usize)>::new());
        assert_eq!(table.cell(0, 1).row_span, 1);
    }
}
