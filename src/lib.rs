pub mod types;
pub mod processor;
pub mod grid;
pub mod inference;
pub mod dataset;
pub mod layout;
pub mod proto;
pub mod steps;

// Re-export commonly used types
pub use types::{BatchOutput, Config, LayoutConfig, ProcessError, SourceFormat};
pub use processor::{BatchResult, FileOutcome, Processor};
pub use dataset::Dataset;
pub use grid::{Cell, CellGrid};
pub use layout::{Guide, LayoutEngine};
pub use steps::*;
