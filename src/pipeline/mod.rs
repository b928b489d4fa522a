//! The import pipeline core: intake, validation, batched processing and the
//! downstream record sink.

pub mod csv_file;
pub mod intake;
pub mod processing;
pub mod sink;
pub mod transform;
pub mod validation;

pub use csv_file::CsvFile;
pub use intake::{IntakeService, UploadRequest};
pub use processing::ProcessingEngine;
pub use sink::{JsonlFileSink, RecordSink};
pub use transform::Transformer;
pub use validation::{ValidationEngine, ValidationService};
