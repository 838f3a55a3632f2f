//! OCR log parsing for hourly thermal-oxidizer inspection sheets.
//!
//! Given noisy OCR text of a photographed paper log, [`LogParser`] locates
//! the column of a requested hour, extracts confidence-scored field values,
//! looks for fabricated values and validates the result into an
//! accept, review or reject verdict.

pub mod config;
pub mod error;
pub mod geometry;
pub mod hallucination;
pub mod model;
pub mod parsing;
pub mod validation;

pub use config::{FieldId, FieldPattern, FieldType, LogParsingConfig};
pub use error::ParseFault;
pub use geometry::TokenLayout;
pub use hallucination::{AntiHallucinationDetector, DetectionContext};
pub use model::{
    FieldMatch, FieldValue, HallucinationFlag, HallucinationKind, HourLabel, HourlyReading,
    ValidationCheck, ValidationResult,
};
pub use parsing::{LogParser, ParseOutcome, ParseRequest, ParseState, ProcessedReading, Verdict};
pub use validation::{ValidationPipeline, ValidationRequest};
