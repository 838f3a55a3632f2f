//! The **Validate** boundary call: six independent checks folded into one
//! [`ValidationResult`].

mod checks;

#[cfg(test)]
mod tests;

use tracing::debug;

pub use checks::FieldFormats;

use crate::config::{HallucinationThresholds, LogParsingConfig, ValidationThresholds};
use crate::error::ParseFault;
use crate::geometry::TokenLayout;
use crate::model::{HallucinationFlag, HourlyReading, ValidationCheck, ValidationResult};

#[derive(Debug, Clone, Copy)]
pub struct ValidationRequest<'a> {
    pub reading: &'a HourlyReading,
    pub flags: &'a [HallucinationFlag],
    /// Source geometry; the overlap check only runs when tokens are present.
    pub layout: Option<&'a TokenLayout>,
    pub strict_mode: bool,
    /// Readings for the other hours of the sheet. May be empty.
    pub series: &'a [HourlyReading],
}

impl<'a> ValidationRequest<'a> {
    pub fn new(reading: &'a HourlyReading, flags: &'a [HallucinationFlag], strict_mode: bool) -> Self {
        Self {
            reading,
            flags,
            layout: None,
            strict_mode,
            series: &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationPipeline {
    thresholds: ValidationThresholds,
    sequence: HallucinationThresholds,
    formats: FieldFormats,
}

impl ValidationPipeline {
    pub fn new(config: &LogParsingConfig) -> Result<Self, ParseFault> {
        Ok(Self {
            thresholds: config.validation,
            sequence: config.hallucination,
            formats: FieldFormats::new()?,
        })
    }

    pub fn validate(&self, request: &ValidationRequest<'_>) -> ValidationResult {
        let reading = request.reading;
        let mut checks: Vec<ValidationCheck> = vec![
            checks::hallucination_detection(request.flags),
            checks::pattern_conformance(reading, &self.formats, request.strict_mode),
        ];

        if let Some(layout) = request.layout.filter(|layout| layout.has_tokens())
            && let Some(check) = checks::bounding_box_overlap(reading, layout, &self.thresholds)
        {
            checks.push(check);
        }

        checks.push(checks::confidence_threshold(
            reading,
            &self.thresholds,
            request.strict_mode,
        ));
        checks.push(checks::business_rules(reading, &self.thresholds));
        checks.push(checks::pattern_consistency(
            reading,
            request.series,
            &self.sequence,
            &self.thresholds,
        ));

        for check in &checks {
            debug!(
                check = %check.name,
                valid = check.is_valid,
                confidence = check.confidence,
                errors = check.errors.len(),
                warnings = check.warnings.len(),
                "validation check"
            );
        }

        ValidationResult::from_checks(
            checks,
            request.strict_mode,
            self.thresholds.manual_review_confidence,
        )
    }
}
