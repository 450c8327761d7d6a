//! Structural inference over an untyped cell grid: which report dialect it
//! is, where its header metadata sits, where each route block starts and
//! stops, and which columns carry which product.

pub mod columns;
pub mod diagnostics;
pub mod dialect;
pub mod header;
pub mod records;
pub mod segmenter;
pub mod vocabulary;

pub use columns::{DetectionMethod, ProductColumnDetector, ProductColumnMap};
pub use diagnostics::StructureIssue;
pub use dialect::{classify, Classification, DialectTag};
pub use header::{extract_header, HeaderField, HeaderMetadata};
pub use records::{ExtractionMode, Record};
pub use segmenter::{Segmentation, SegmentationPolicy, SegmentationStrategy, Segmenter, SegmenterOptions};
pub use vocabulary::{ProductKind, ProductQuantities, ProductVocabulary};
