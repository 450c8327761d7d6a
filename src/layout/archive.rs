use std::collections::HashMap;
use std::io::{Seek, Write};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};
use crate::processor::fold_accents;
use crate::types::ArchiveError;
use super::pdf::RenderedGuide;

const MAX_NAME_CHARS: usize = 50;

lazy_static! {
    static ref UNSAFE_RE: Regex = Regex::new(r"[^\w\s-]").unwrap();
    static ref SEPARATOR_RE: Regex = Regex::new(r"[-\s]+").unwrap();
}

/// File-name-safe form of a route or site label.
pub fn clean_file_name(name: &str) -> String {
    let folded = fold_accents(name);
    let stripped = UNSAFE_RE.replace_all(&folded, "");
    let joined = SEPARATOR_RE.replace_all(stripped.trim(), "_");
    joined.chars().take(MAX_NAME_CHARS).collect()
}

/// `Guia_Transporte_<clean>.pdf` per guide; repeated names get `_2`, `_3`...
pub fn entry_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    names
        .into_iter()
        .map(|name| {
            let clean = clean_file_name(name);
            let count = seen.entry(clean.clone()).or_insert(0);
            *count += 1;
            match *count {
                1 => format!("Guia_Transporte_{}.pdf", clean),
                n => format!("Guia_Transporte_{}_{}.pdf", clean, n),
            }
        })
        .collect()
}

/// Writes every guide into one deflated zip, in guide order.
pub fn write_archive<W: Write + Seek>(writer: W, guides: &[RenderedGuide]) -> Result<W, ArchiveError> {
    let mut zip = ZipWriter::new(writer);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (guide, entry) in guides.iter().zip(entry_names(guides.iter().map(|g| g.name.as_str()))) {
        debug!("adding {} ({} bytes)", entry, guide.pdf.len());
        zip.start_file(entry, options)?;
        zip.write_all(&guide.pdf)?;
    }

    Ok(zip.finish()?)
}
