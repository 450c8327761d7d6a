//! Guide PDFs drawn with lopdf using the standard Helvetica fonts.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use rayon::prelude::*;
use tracing::{debug, warn};
use crate::types::{PageFormat, RenderError};
use super::table::{self, Align, Shade, Table, TableCell};
use super::{Guide, GuidePage};

const MARGIN: f32 = 24.0;
const HEADER_FONT: f32 = 8.0;
const TABLE_FONT: f32 = 6.0;
const LEADING: f32 = 1.25;
const CELL_PADDING: f32 = 2.0;
const SECTION_GAP: f32 = 6.0;
/// Taller cells are an overflow on paginated guides.
const MAX_CELL_LINES: usize = 2;

pub const SHORTAGE_NOTE: &str = "NOTA: LOS FALTANTES Y NOVEDADES SERAN ASUMIDOS POR EL RESPONSABLE EN EL DESPACHO DE BODEGA Y/O EL RESPONSABLE DE LA ENTREGA EN EL CAMION.";
const BLANK_LINE: &str = "_______________";

/// A rendered guide ready for packaging.
#[derive(Debug, Clone)]
pub struct RenderedGuide {
    pub name: String,
    pub guide_number: String,
    pub pdf: Vec<u8>,
    pub pages: usize,
    /// Rendered on the single-page path after the paginated layout failed.
    pub degraded: bool,
}

/// WinAnsi bytes; characters outside Latin-1 print as '?'.
fn encode_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| if (c as u32) < 256 { c as u32 as u8 } else { b'?' })
        .collect()
}

/// Average Helvetica advance, good enough for wrapping decisions.
fn text_width(text: &str, size: f32, bold: bool) -> f32 {
    let em = if bold { 0.56 } else { 0.52 };
    text.chars().count() as f32 * size * em
}

/// Greedy word wrap; words wider than the line are broken by characters.
pub fn wrap(text: &str, max_width: f32, size: f32, bold: bool) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };
        if text_width(&candidate, size, bold) <= max_width {
            current = candidate;
            continue;
        }
        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        for c in word.chars() {
            current.push(c);
            if text_width(&current, size, bold) > max_width && current.chars().count() > 1 {
                current.pop();
                lines.push(std::mem::take(&mut current));
                current.push(c);
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Drawing cursor over one page. `y` starts at zero at the top margin and
/// grows negative; the origin is moved into place when the page is finished.
struct Canvas {
    width: f32,
    y: f32,
    ops: Vec<Operation>,
}

impl Canvas {
    fn new(width: f32) -> Self {
        Self { width, y: 0.0, ops: Vec::new() }
    }

    fn usable_width(&self) -> f32 {
        self.width - 2.0 * MARGIN
    }

    fn used_height(&self) -> f32 {
        -self.y
    }

    fn text(&mut self, x: f32, baseline: f32, text: &str, size: f32, bold: bool) {
        if text.is_empty() {
            return;
        }
        let font = if bold { "F2" } else { "F1" };
        self.ops.push(Operation::new("BT", vec![]));
        self.ops.push(Operation::new("Tf", vec![font.into(), size.into()]));
        self.ops.push(Operation::new("Td", vec![x.into(), baseline.into()]));
        self.ops.push(Operation::new("Tj", vec![Object::string_literal(encode_text(text))]));
        self.ops.push(Operation::new("ET", vec![]));
    }

    fn line(&mut self, text: &str, size: f32, bold: bool) {
        self.y -= size * LEADING;
        let y = self.y;
        self.text(MARGIN, y, text, size, bold);
    }

    fn paragraph(&mut self, text: &str, size: f32, bold: bool) {
        let width = self.usable_width();
        for line in wrap(text, width, size, bold) {
            self.line(&line, size, bold);
        }
    }

    fn gap(&mut self, height: f32) {
        self.y -= height;
    }

    fn rect(&mut self, x: f32, y: f32, w: f32, h: f32, fill: Option<f32>) {
        if let Some(gray) = fill {
            self.ops.push(Operation::new("q", vec![]));
            self.ops.push(Operation::new("g", vec![gray.into()]));
            self.ops.push(Operation::new("re", vec![x.into(), y.into(), w.into(), h.into()]));
            self.ops.push(Operation::new("f", vec![]));
            self.ops.push(Operation::new("Q", vec![]));
        }
        self.ops.push(Operation::new("re", vec![x.into(), y.into(), w.into(), h.into()]));
        self.ops.push(Operation::new("S", vec![]));
    }

    /// Draws a table below the cursor. With `max_lines` set, a body cell
    /// needing more lines is an error instead of a taller row.
    fn table(&mut self, table: &Table, size: f32, max_lines: Option<usize>) -> Result<(), RenderError> {
        let total: f64 = table.widths.iter().sum();
        let usable = self.usable_width();
        let widths: Vec<f32> = table
            .widths
            .iter()
            .map(|w| (*w / total) as f32 * usable)
            .collect();
        let mut xs = Vec::with_capacity(widths.len());
        let mut x = MARGIN;
        for w in &widths {
            xs.push(x);
            x += w;
        }

        let line_height = size * LEADING;
        let mut wrapped: Vec<Vec<Vec<String>>> = Vec::with_capacity(table.rows.len());
        let mut heights: Vec<f32> = Vec::with_capacity(table.rows.len());
        for (r, row) in table.rows.iter().enumerate() {
            let mut cells = Vec::with_capacity(row.cells.len());
            let mut lines_needed = 1;
            for (c, cell) in row.cells.iter().enumerate() {
                if cell.hidden {
                    cells.push(Vec::new());
                    continue;
                }
                let width: f32 = widths[c..c + cell.col_span].iter().sum::<f32>() - 2.0 * CELL_PADDING;
                let lines = wrap(&cell.text, width, size, row.bold());
                if let Some(max) = max_lines.filter(|_| row.shade != Shade::Header) {
                    if lines.len() > max {
                        return Err(RenderError::CellOverflow {
                            column: format!("row {} column {}", r + 1, c + 1),
                            text: cell.text.clone(),
                        });
                    }
                }
                if cell.row_span == 1 {
                    lines_needed = lines_needed.max(lines.len());
                }
                cells.push(lines);
            }
            heights.push(lines_needed as f32 * line_height + 2.0 * CELL_PADDING);
            wrapped.push(cells);
        }

        let mut top = self.y;
        for (r, row) in table.rows.iter().enumerate() {
            let fill = match row.shade {
                Shade::None => None,
                Shade::Header => Some(0.85),
                Shade::Totals => Some(0.75),
            };
            for (c, cell) in row.cells.iter().enumerate() {
                if cell.hidden {
                    continue;
                }
                let w: f32 = widths[c..c + cell.col_span].iter().sum();
                let h: f32 = heights[r..r + cell.row_span].iter().sum();
                self.rect(xs[c], top - h, w, h, fill);
                self.cell_text(cell, &wrapped[r][c], xs[c], top, w, h, size, row.bold());
            }
            top -= heights[r];
        }
        self.y = top;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn cell_text(&mut self, cell: &TableCell, lines: &[String], x: f32, top: f32, w: f32, h: f32, size: f32, bold: bool) {
        let line_height = size * LEADING;
        let block = lines.len() as f32 * line_height;
        let mut baseline = top - (h - block) / 2.0 - size;
        for line in lines {
            let tw = text_width(line, size, bold);
            let tx = match cell.align {
                Align::Left => x + CELL_PADDING,
                Align::Center => x + (w - tw) / 2.0,
                Align::Right => x + w - CELL_PADDING - tw,
            };
            self.text(tx, baseline, line, size, bold);
            baseline -= line_height;
        }
    }

    /// Moves the drawing origin to the top margin of a page `height` tall.
    fn finish(self, height: f32) -> Vec<Operation> {
        let mut ops = Vec::with_capacity(self.ops.len() + 1);
        ops.push(Operation::new(
            "cm",
            vec![1.into(), 0.into(), 0.into(), 1.into(), 0.into(), (height - MARGIN).into()],
        ));
        ops.extend(self.ops);
        ops
    }
}

fn draw_header(canvas: &mut Canvas, guide: &Guide, page: Option<&GuidePage>) {
    let h = &guide.header;
    canvas.line(&h.company, HEADER_FONT + 1.0, true);
    canvas.line(&format!("GUIA DE TRANSPORTE No. {}", h.guide_number), HEADER_FONT + 1.0, true);
    canvas.line(
        &format!("PROGRAMA: {} - EMPRESA: {} - MODALIDAD: {}", h.program, h.company, h.modality),
        HEADER_FONT,
        false,
    );
    canvas.line(
        &format!("FECHA ELABORACIÓN: {}     Fecha despacho: {}", h.prepared_on, h.delivery_date),
        HEADER_FONT,
        false,
    );
    canvas.line(&format!("DICTAMEN: {}", h.verdict), HEADER_FONT, false);
    canvas.line(&format!("Solicitud Remesa: {}", h.supply_request), HEADER_FONT, false);
    canvas.line(&format!("Dias de consumo: {}", h.consumption_days), HEADER_FONT, false);
    let position = match page {
        Some(p) => format!("{}     PÁGINA {} DE {}", h.route_label, p.number, p.count),
        None => h.route_label.clone(),
    };
    canvas.line(&position, HEADER_FONT, true);
    canvas.gap(SECTION_GAP);
}

fn or_blank(value: &str) -> &str {
    if value.trim().is_empty() {
        BLANK_LINE
    } else {
        value
    }
}

fn draw_footer(canvas: &mut Canvas, guide: &Guide) -> Result<(), RenderError> {
    let f = &guide.footer;
    canvas.gap(SECTION_GAP);
    canvas.line(&format!("TRANSPORTADOR: {}", or_blank(&f.vehicle.driver)), HEADER_FONT, false);
    canvas.line(
        &format!("Hora Salida: {}     Placa: {}", BLANK_LINE, or_blank(&f.vehicle.plate)),
        HEADER_FONT,
        false,
    );
    canvas.gap(SECTION_GAP);

    let mut signatures = Table::new(vec![1.0, 1.0]);
    signatures.push_row(
        vec![
            TableCell::new(format!("ELABORADO POR: {}", f.prepared_by), Align::Left),
            TableCell::new(format!("APROBADO POR: {}", f.approved_by), Align::Left),
        ],
        Shade::None,
    );
    signatures.push_row(
        vec![
            TableCell::new("SUPERVISOR DE CALIDAD", Align::Left),
            TableCell::new("LIDER DE ASEGURAMIENTO", Align::Left),
        ],
        Shade::None,
    );
    canvas.table(&signatures, HEADER_FONT, None)?;
    canvas.gap(SECTION_GAP / 2.0);
    canvas.paragraph(SHORTAGE_NOTE, HEADER_FONT - 1.0, false);
    Ok(())
}

fn draw_page(guide: &Guide, page: &GuidePage, width: f32) -> Result<Canvas, RenderError> {
    let mut canvas = Canvas::new(width);
    draw_header(&mut canvas, guide, Some(page));
    canvas.table(&table::product_header_table(guide), TABLE_FONT, Some(MAX_CELL_LINES))?;
    canvas.gap(SECTION_GAP / 2.0);
    canvas.table(&table::page_table(guide, page), TABLE_FONT, Some(MAX_CELL_LINES))?;
    draw_footer(&mut canvas, guide)?;
    Ok(canvas)
}

/// Assembles finished pages into a PDF.
fn build_document(pages: Vec<(Vec<Operation>, f32)>, width: f32) -> Result<Vec<u8>, RenderError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular,
            "F2" => bold,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for (operations, height) in pages {
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;
    Ok(buffer)
}

/// One PDF page per guide page, each with the full header and footer.
pub fn render_guide(guide: &Guide, format: PageFormat) -> Result<Vec<u8>, RenderError> {
    if guide.pages.is_empty() {
        return Err(RenderError::EmptyGuide);
    }
    let (width, height) = format.size();
    let (width, height) = (width as f32, height as f32);
    let pages = guide
        .pages
        .iter()
        .map(|page| draw_page(guide, page, width).map(|c| (c.finish(height), height)))
        .collect::<Result<Vec<_>, RenderError>>()?;
    build_document(pages, width)
}

/// Every row of the guide on one page tall enough to hold them, with cells
/// allowed to grow.
pub fn render_single_page(guide: &Guide, format: PageFormat) -> Result<Vec<u8>, RenderError> {
    let (width, height) = format.size();
    let width = width as f32;
    let rows: Vec<_> = guide.rows().cloned().collect();

    let mut canvas = Canvas::new(width);
    draw_header(&mut canvas, guide, None);
    canvas.table(&table::product_header_table(guide), TABLE_FONT, None)?;
    canvas.gap(SECTION_GAP / 2.0);
    canvas.table(&table::data_table(&guide.products, &rows, guide.totals()), TABLE_FONT, None)?;
    draw_footer(&mut canvas, guide)?;

    let page_height = (canvas.used_height() + 2.0 * MARGIN).max(height as f32);
    build_document(vec![(canvas.finish(page_height), page_height)], width)
}

/// Paginated rendering, falling back to the single-page layout when it fails.
pub fn render_with_fallback(guide: &Guide, format: PageFormat) -> Result<RenderedGuide, RenderError> {
    let (pdf, pages, degraded) = match render_guide(guide, format) {
        Ok(pdf) => (pdf, guide.pages.len(), false),
        Err(e) => {
            warn!("guide {}: {}; using single-page layout", guide.name, e);
            (render_single_page(guide, format)?, 1, true)
        }
    };
    debug!("guide {}: {} bytes, {} pages", guide.name, pdf.len(), pages);
    Ok(RenderedGuide {
        name: guide.name.clone(),
        guide_number: guide.header.guide_number.clone(),
        pdf,
        pages,
        degraded,
    })
}

/// Renders guides in parallel; the result keeps the input order.
pub fn render_all(guides: &[Guide], format: PageFormat, threads: usize) -> Result<Vec<RenderedGuide>, RenderError> {
    let render = || {
        guides
            .par_iter()
            .map(|guide| render_with_fallback(guide, format))
            .collect::<Result<Vec<_>, RenderError>>()
    };
    match rayon::ThreadPoolBuilder::new().num_threads(threads.max(1)).build() {
        Ok(pool) => pool.install(render),
        Err(e) => {
            warn!("could not build render pool: {}", e);
            render()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use crate::dataset::Dataset;
    use crate::inference::header::HeaderMetadata;
    use crate::inference::records::Record;
    use crate::inference::vocabulary::ProductKind;
    use crate::layout::LayoutEngine;
    use crate::types::LayoutConfig;

    fn guides(n: usize, site_name: &str) -> Vec<Guide> {
        let header = Arc::new(HeaderMetadata::default());
        let records = (1..=n)
            .map(|i| Record {
                header: Arc::clone(&header),
                day: "DIA 1".into(),
                route: "RUTA 4".into(),
                sequence_number: i as i64,
                municipality: "CALI".into(),
                site_name: site_name.into(),
                beneficiary_count: 25,
                address: "CL 5 # 10-20".into(),
                quantities: vec![(ProductKind::BeefMeat, 3.25)].into_iter().collect(),
            })
            .collect::<Vec<_>>();
        let dataset = Dataset::assemble(header, records);
        let today = NaiveDate::from_ymd_opt(2025, 7, 21).unwrap();
        LayoutEngine::new(LayoutConfig::default(), StdRng::seed_from_u64(1), today).layout(&dataset)
    }

    fn page_count(pdf: &[u8]) -> usize {
        Document::load_mem(pdf).unwrap().get_pages().len()
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap("COMEDOR LA ESPERANZA", 1000.0, 6.0, false), vec!["COMEDOR LA ESPERANZA"]);
        let lines = wrap("COMEDOR LA ESPERANZA", 40.0, 6.0, false);
        assert!(lines.len() > 1);
        assert!(wrap("", 40.0, 6.0, false).is_empty());
        assert!(wrap("XXXXXXXXXXXXXXXXXXXXXXXXXX", 20.0, 6.0, false).len() > 2);
    }

    #[test]
    fn test_encode_text() {
        assert_eq!(encode_text("Ñ°"), vec![0xD1, 0xB0]);
        assert_eq!(encode_text("✓"), b"?".to_vec());
    }

    #[test]
    fn test_one_pdf_page_per_guide_page() {
        let guides = guides(6, "SITIO");
        let pdf = render_guide(&guides[0], PageFormat::A4Portrait).unwrap();
        assert!(pdf.starts_with(b"%PDF"));
        assert_eq!(page_count(&pdf), 2);
    }

    #[test]
    fn test_overflow_falls_back_to_single_page() {
        let long_name = "COMEDOR COMUNITARIO ".repeat(12);
        let guides = guides(6, &long_name);
        assert!(matches!(
            render_guide(&guides[0], PageFormat::A4Portrait),
            Err(RenderError::CellOverflow { .. })
        ));
        let rendered = render_with_fallback(&guides[0], PageFormat::A4Portrait).unwrap();
        assert!(rendered.degraded);
        assert_eq!(rendered.pages, 1);
        assert_eq!(page_count(&rendered.pdf), 1);
    }

    #[test]
    fn test_render_all_keeps_order() {
        let mut all = guides(2, "SITIO");
        let mut second = all[0].clone();
        second.name = "RUTA 9".into();
        all.push(second);
        let rendered = render_all(&all, PageFormat::LetterLandscape, 2).unwrap();
        let names: Vec<_> = rendered.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["RUTA 4", "RUTA 9"]);
    }

    #[test]
    fn test_empty_guide_is_an_error() {
        let mut guide = guides(1, "SITIO").remove(0);
        guide.pages.clear();
        assert!(matches!(render_guide(&guide, PageFormat::A4Portrait), Err(RenderError::EmptyGuide)));
    }
}
