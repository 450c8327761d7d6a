mod spreadsheet;
mod csv;
mod extract;

pub use spreadsheet::{grid_from_range, SpreadsheetReader};
pub use self::csv::{detect_delimiter, read_delimited, CsvReader};
pub use extract::{segmenter_options, AssembleStep, ClassifyStep, HeaderStep, SegmentStep};
