use serde::Serialize;
use thermalog::{HallucinationFlag, HourlyReading, ParseOutcome, ValidationResult, Verdict};

pub const REPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct LocatedHour {
    pub label: String,
    pub line: usize,
    pub column: usize,
    pub absolute_position: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocateReport {
    pub report_version: u32,
    pub generated_at: String,
    pub source_path: String,
    pub source_sha256: String,
    pub hour_count: usize,
    pub hours: Vec<LocatedHour>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseReport {
    pub report_version: u32,
    pub generated_at: String,
    pub source_path: String,
    pub source_sha256: String,
    pub target_hour: String,
    pub strict_mode: bool,
    pub verdict: Option<Verdict>,
    pub outcome: ParseOutcome,
    pub hallucination_flags: Vec<HallucinationFlag>,
    pub validation: Option<ValidationResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub report_version: u32,
    pub generated_at: String,
    pub reading_path: String,
    pub reading_sha256: String,
    pub strict_mode: bool,
    /// True when the flags came from a fresh detector run rather than a file.
    pub flags_detected: bool,
    pub verdict: Verdict,
    pub reading: HourlyReading,
    pub hallucination_flags: Vec<HallucinationFlag>,
    pub validation: ValidationResult,
}
