//! Parse boundary: OCR text in, one hourly reading out.
//!
//! [`LogParser`] runs normalize, locate, resolve, slice the column and
//! extract. [`LogParser::process`] continues through hallucination detection
//! and validation and settles the parse state machine on a [`Verdict`].

mod column_locator;
mod field_extractor;
mod normalize;


use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use column_locator::{ColumnLayout, ColumnLine, ColumnLocator, ColumnText, HourPositions};
pub use field_extractor::{
    CandidateScore, FieldExtractor, cleanliness_signal, distinctiveness_signal, parse_value,
    pattern_quality_signal, range_signal, spatial_signal, validate_field,
};
pub use normalize::{TextNormalizer, fix_glyphs, standalone_occurrences};
pub(crate) use normalize::compile_builtin;

use crate::config::LogParsingConfig;
use crate::error::ParseFault;
use crate::geometry::TokenLayout;
use crate::hallucination::{AntiHallucinationDetector, DetectionContext};
use crate::model::{ColumnBounds, HallucinationFlag, HourLabel, HourlyReading, ValidationResult};
use crate::validation::{ValidationPipeline, ValidationRequest};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseRequest {
    pub ocr_text: String,
    pub target_hour: String,
    /// Hour labels the caller knows the sheet carries. When non-empty, any
    /// other located label is ignored.
    #[serde(default)]
    pub known_hour_labels: Vec<String>,
    #[serde(default)]
    pub layout: Option<TokenLayout>,
}

impl ParseRequest {
    pub fn new(ocr_text: impl Into<String>, target_hour: impl Into<String>) -> Self {
        Self {
            ocr_text: ocr_text.into(),
            target_hour: target_hour.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    ManualReviewRequired,
    Rejected,
}

impl Verdict {
    /// `is_valid` already folds in strict mode, so a failing check under
    /// strict validation lands on `Rejected` here.
    pub fn from_result(result: &ValidationResult) -> Self {
        if !result.is_valid {
            Self::Rejected
        } else if result.requires_manual_review {
            Self::ManualReviewRequired
        } else {
            Self::Accepted
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "verdict", rename_all = "snake_case")]
pub enum ParseState {
    NotAttempted,
    TargetColumnNotFound,
    Extracted,
    Validated(Verdict),
}

impl ParseState {
    /// The next state, or `None` when the move is not part of the machine.
    pub fn transition(self, next: ParseState) -> Option<ParseState> {
        match (self, next) {
            (Self::NotAttempted, Self::TargetColumnNotFound)
            | (Self::NotAttempted, Self::Extracted)
            | (Self::Extracted, Self::Validated(_)) => Some(next),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::TargetColumnNotFound | Self::Validated(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseOutcome {
    pub state: ParseState,
    pub reading: HourlyReading,
    /// Set only on structural failure.
    pub reason: Option<String>,
    pub resolved_label: Option<HourLabel>,
    pub column_bounds: Option<ColumnBounds>,
    pub layout: Option<ColumnLayout>,
    /// One reading per other located hour, in hour order.
    #[serde(default)]
    pub sibling_readings: Vec<HourlyReading>,
}

impl ParseOutcome {
    fn structural_failure(
        inspection_time: impl Into<String>,
        reason: String,
        parsed_at: DateTime<Utc>,
        raw_ocr_text: &str,
    ) -> Self {
        let state = ParseState::NotAttempted
            .transition(ParseState::TargetColumnNotFound)
            .unwrap_or(ParseState::TargetColumnNotFound);
        Self {
            state,
            reading: HourlyReading::empty(inspection_time, parsed_at, raw_ocr_text),
            reason: Some(reason),
            resolved_label: None,
            column_bounds: None,
            layout: None,
            sibling_readings: Vec::new(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.state == ParseState::TargetColumnNotFound
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedReading {
    pub outcome: ParseOutcome,
    pub hallucination_flags: Vec<HallucinationFlag>,
    /// Absent when the target column was never found.
    pub validation: Option<ValidationResult>,
}

impl ProcessedReading {
    pub fn state(&self) -> ParseState {
        self.outcome.state
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match self.outcome.state {
            ParseState::Validated(verdict) => Some(verdict),
            _ => None,
        }
    }
}

/// Reusable parser. Holds only the immutable configuration and compiled
/// patterns, so one instance can serve any number of threads.
#[derive(Debug, Clone)]
pub struct LogParser {
    config: LogParsingConfig,
    normalizer: TextNormalizer,
    locator: ColumnLocator,
    validator: ValidationPipeline,
}

impl LogParser {
    pub fn new(config: LogParsingConfig) -> Result<Self, ParseFault> {
        let normalizer = TextNormalizer::new()?;
        let locator = ColumnLocator::new(config.parsing)?;
        let validator = ValidationPipeline::new(&config)?;
        Ok(Self {
            config,
            normalizer,
            locator,
            validator,
        })
    }

    pub fn standard() -> Result<Self, ParseFault> {
        Self::new(LogParsingConfig::standard()?)
    }

    pub fn config(&self) -> &LogParsingConfig {
        &self.config
    }

    /// Hour labels found in raw OCR text, positioned in its normalized form.
    pub fn locate(&self, ocr_text: &str) -> HourPositions {
        self.locator.locate(&self.normalizer.normalize(ocr_text))
    }

    pub fn parse(&self, request: &ParseRequest) -> Result<ParseOutcome, ParseFault> {
        self.parse_at(request, Utc::now())
    }

    /// Deterministic for a given `(request, parsed_at)`.
    pub fn parse_at(
        &self,
        request: &ParseRequest,
        parsed_at: DateTime<Utc>,
    ) -> Result<ParseOutcome, ParseFault> {
        let target = HourLabel::parse(&request.target_hour)
            .ok_or_else(|| ParseFault::InvalidTargetHour(request.target_hour.clone()))?;

        if request.ocr_text.trim().is_empty() {
            warn!(hour = %target, "empty OCR text");
            return Ok(ParseOutcome::structural_failure(
                target.to_string(),
                "Parsing error: OCR text is empty".to_string(),
                parsed_at,
                &request.ocr_text,
            ));
        }

        let normalized = self.normalizer.normalize(&request.ocr_text);
        let mut positions = self.locator.locate(&normalized);
        let known = self.known_labels(&request.known_hour_labels);
        if !known.is_empty() {
            positions.retain(|label, _| known.contains(label));
        }

        let Some((label, position)) = self.locator.resolve(&positions, target) else {
            warn!(hour = %target, located = positions.len(), "target hour not found");
            return Ok(ParseOutcome::structural_failure(
                target.to_string(),
                format!("Target hour not found: {target}"),
                parsed_at,
                &request.ocr_text,
            ));
        };

        let Some(column) =
            self.locator
                .column_text(&normalized, &request.ocr_text, label, &positions)
        else {
            warn!(hour = %target, "resolved hour has no column text");
            return Ok(ParseOutcome::structural_failure(
                target.to_string(),
                format!("Target hour not found: {target}"),
                parsed_at,
                &request.ocr_text,
            ));
        };

        let extractor = FieldExtractor::new(&self.config);
        let reading = HourlyReading::from_field_matches(
            label.to_string(),
            extractor.extract(&column, &position),
            parsed_at,
            request.ocr_text.clone(),
        );

        let sibling_readings = positions
            .iter()
            .filter(|(other, _)| **other != label)
            .filter_map(|(other, other_position)| {
                let sibling = self.locator.column_text(
                    &normalized,
                    &request.ocr_text,
                    *other,
                    &positions,
                )?;
                Some(HourlyReading::from_field_matches(
                    other.to_string(),
                    extractor.extract(&sibling, other_position),
                    parsed_at,
                    request.ocr_text.clone(),
                ))
            })
            .collect::<Vec<HourlyReading>>();

        info!(
            hour = %label,
            fields = reading.field_matches().len(),
            confidence = reading.overall_confidence(),
            siblings = sibling_readings.len(),
            "extracted hourly reading"
        );

        let state = ParseState::NotAttempted
            .transition(ParseState::Extracted)
            .unwrap_or(ParseState::Extracted);
        Ok(ParseOutcome {
            state,
            reading,
            reason: None,
            resolved_label: Some(label),
            column_bounds: Some(column.bounds),
            layout: Some(column.layout),
            sibling_readings,
        })
    }

    pub fn process(
        &self,
        request: &ParseRequest,
        strict_mode: bool,
    ) -> Result<ProcessedReading, ParseFault> {
        self.process_at(request, Utc::now(), strict_mode)
    }

    /// Parse, detect and validate. A structural failure stops after parsing.
    pub fn process_at(
        &self,
        request: &ParseRequest,
        parsed_at: DateTime<Utc>,
        strict_mode: bool,
    ) -> Result<ProcessedReading, ParseFault> {
        let mut outcome = self.parse_at(request, parsed_at)?;
        if outcome.is_failure() {
            return Ok(ProcessedReading {
                outcome,
                hallucination_flags: Vec::new(),
                validation: None,
            });
        }

        let detector = AntiHallucinationDetector::new(&self.config);
        let flags = detector.detect(
            &outcome.reading,
            &DetectionContext {
                siblings: &outcome.sibling_readings,
                layout: request.layout.as_ref(),
            },
        );

        let validation = self.validator.validate(&ValidationRequest {
            reading: &outcome.reading,
            flags: &flags,
            layout: request.layout.as_ref(),
            strict_mode,
            series: &outcome.sibling_readings,
        });

        let verdict = Verdict::from_result(&validation);
        if let Some(next) = outcome.state.transition(ParseState::Validated(verdict)) {
            outcome.state = next;
        }
        info!(
            hour = %outcome.reading.inspection_time(),
            flags = flags.len(),
            errors = validation.errors.len(),
            warnings = validation.warnings.len(),
            verdict = ?verdict,
            "validated hourly reading"
        );

        Ok(ProcessedReading {
            outcome,
            hallucination_flags: flags,
            validation: Some(validation),
        })
    }

    fn known_labels(&self, raw: &[String]) -> BTreeSet<HourLabel> {
        raw.iter()
            .filter_map(|label| {
                let parsed = HourLabel::parse(label);
                if parsed.is_none() {
                    debug!(label = %label, "ignoring unparseable known hour label");
                }
                parsed
            })
            .collect()
    }
}
