use serde::Serialize;
use tracing::debug;

use super::column_locator::ColumnText;
use super::normalize::standalone_occurrences;
use crate::config::{FieldPattern, FieldType, LogParsingConfig};
use crate::model::{
    FieldCandidate, FieldMatch, FieldValue, TextPosition, ValidationCheck, ValidationResult,
};

/// Weighted contribution of each signal to a candidate's confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CandidateScore {
    pub pattern_quality: f64,
    pub range_plausibility: f64,
    pub spatial_placement: f64,
    pub context_proximity: f64,
    pub distinctiveness: f64,
    pub ocr_cleanliness: f64,
    pub total: f64,
}

pub struct FieldExtractor<'a> {
    config: &'a LogParsingConfig,
}

impl<'a> FieldExtractor<'a> {
    pub fn new(config: &'a LogParsingConfig) -> Self {
        Self { config }
    }

    /// One match per configured field that has a candidate at or above the
    /// acceptance floor; fields without one are simply absent.
    pub fn extract(&self, column: &ColumnText, time_position: &TextPosition) -> Vec<FieldMatch> {
        let floor = self.config.parsing.min_field_confidence;
        let mut matches = Vec::new();

        for pattern in self.config.fields() {
            let mut best: Option<(CandidateScore, FieldCandidate)> = None;
            for candidate in collect_candidates(pattern, column) {
                let score = self.score(pattern, &candidate, column, time_position);
                debug!(
                    field = %pattern.name,
                    value = %candidate.value,
                    line = candidate.line,
                    total = score.total,
                    "scored candidate"
                );
                let better = best
                    .as_ref()
                    .map(|(current, _)| score.total > current.total)
                    .unwrap_or(true);
                if better {
                    best = Some((score, candidate));
                }
            }

            let Some((score, candidate)) = best else {
                continue;
            };
            if score.total < floor {
                debug!(field = %pattern.name, total = score.total, floor, "best candidate below floor");
                continue;
            }

            matches.push(self.build_match(pattern, candidate, score.total));
        }

        matches
    }

    pub fn score(
        &self,
        pattern: &FieldPattern,
        candidate: &FieldCandidate,
        column: &ColumnText,
        time_position: &TextPosition,
    ) -> CandidateScore {
        let weights = &self.config.scoring;
        let line_text = column
            .lines
            .iter()
            .find(|line| line.line == candidate.line)
            .map(|line| line.text.as_str())
            .unwrap_or_default();

        let pattern_quality = weights.pattern_quality * pattern_quality_signal(pattern, &candidate.value);
        let range_plausibility = weights.range_plausibility
            * range_signal(pattern, &candidate.value, weights.out_of_range_penalty_ratio);
        let spatial_placement =
            weights.spatial_placement * spatial_signal(candidate.line, time_position.line);
        let context_proximity =
            weights.context_proximity * self.context_signal(pattern, candidate, line_text, column);
        let distinctiveness =
            weights.distinctiveness * distinctiveness_signal(&candidate.value, column);
        let ocr_cleanliness = weights.ocr_cleanliness * cleanliness_signal(&candidate.raw_match);

        let total = (weights.base
            + pattern_quality
            + range_plausibility
            + spatial_placement
            + context_proximity
            + distinctiveness
            + ocr_cleanliness)
            .clamp(0.0, 1.0);

        CandidateScore {
            pattern_quality,
            range_plausibility,
            spatial_placement,
            context_proximity,
            distinctiveness,
            ocr_cleanliness,
            total,
        }
    }

    fn context_signal(
        &self,
        pattern: &FieldPattern,
        candidate: &FieldCandidate,
        line_text: &str,
        column: &ColumnText,
    ) -> f64 {
        let mut signal = 0.0;
        if pattern.unit_on_line(line_text) {
            signal += 0.3;
        }

        let first = candidate
            .line
            .saturating_sub(self.config.parsing.alias_lines_before);
        let last = candidate.line + self.config.parsing.alias_lines_after;
        let alias_nearby = column
            .lines
            .iter()
            .filter(|line| line.line >= first && line.line <= last)
            .any(|line| pattern.alias_on_line(&line.text));
        if alias_nearby {
            signal += 0.2;
        }

        f64::min(signal, 1.0)
    }

    fn build_match(&self, pattern: &FieldPattern, candidate: FieldCandidate, confidence: f64) -> FieldMatch {
        let value = parse_value(pattern.field_type, &candidate.value);
        let validation = validate_field(
            pattern,
            value.as_ref(),
            confidence,
            self.config.validation.manual_review_confidence,
        );

        FieldMatch {
            name: pattern.name,
            value,
            raw_value: candidate.value.trim().to_string(),
            confidence,
            raw_match: candidate.raw_match,
            line: candidate.line,
            position: candidate.position,
            field_type: pattern.field_type,
            unit: pattern.unit.clone(),
            validation,
        }
    }
}

fn collect_candidates(pattern: &FieldPattern, column: &ColumnText) -> Vec<FieldCandidate> {
    let mut candidates = Vec::new();
    for line in &column.lines {
        for captures in pattern.matcher.captures_iter(&line.text) {
            let (Some(whole), Some(value)) = (captures.get(0), captures.name("value")) else {
                continue;
            };
            candidates.push(FieldCandidate {
                value: value.as_str().trim().to_string(),
                line: line.line,
                position: line.text[..whole.start()].chars().count(),
                raw_match: whole.as_str().to_string(),
            });
        }
    }
    candidates
}

pub fn pattern_quality_signal(pattern: &FieldPattern, raw_value: &str) -> f64 {
    if !pattern.field_type.is_numeric() {
        return 0.8;
    }

    match parse_value(pattern.field_type, raw_value).and_then(|value| value.as_f64()) {
        Some(_) if pattern.field_type.prefers_whole_numbers() && raw_value.contains('.') => 0.7,
        Some(_) => 1.0,
        None => 0.0,
    }
}

/// +1 inside the expected range, `-penalty_ratio` outside, 0 when the field
/// has no range or the value is not numeric.
pub fn range_signal(pattern: &FieldPattern, raw_value: &str, penalty_ratio: f64) -> f64 {
    let Some(range) = pattern.expected_range else {
        return 0.0;
    };
    match parse_value(pattern.field_type, raw_value).and_then(|value| value.as_f64()) {
        Some(value) if range.contains(value) => 1.0,
        Some(_) => -penalty_ratio,
        None => 0.0,
    }
}

pub fn spatial_signal(candidate_line: usize, header_line: usize) -> f64 {
    if candidate_line > header_line {
        1.0
    } else if candidate_line == header_line {
        0.3
    } else {
        0.0
    }
}

pub fn distinctiveness_signal(value: &str, column: &ColumnText) -> f64 {
    let occurrences = column
        .lines
        .iter()
        .map(|line| standalone_occurrences(&line.text, value))
        .sum::<usize>();

    match occurrences {
        0 | 1 => 1.0,
        2 => 0.8,
        3 | 4 => 0.6,
        _ => 0.3,
    }
}

pub fn cleanliness_signal(raw_match: &str) -> f64 {
    let mut signal: f64 = 1.0;
    let noisy = raw_match
        .chars()
        .any(|ch| !(ch.is_alphanumeric() || ch.is_whitespace() || ".:-,=".contains(ch)));
    if noisy {
        signal -= 0.2;
    }
    if raw_match.trim().chars().count() < 2 {
        signal -= 0.3;
    }
    if raw_match.contains("  ") {
        signal -= 0.1;
    }
    signal.max(0.0)
}

pub fn parse_value(field_type: FieldType, raw: &str) -> Option<FieldValue> {
    let raw = raw.trim();
    match field_type {
        FieldType::FlowRate | FieldType::Temperature | FieldType::Totalizer => {
            let cleaned = raw
                .chars()
                .filter(|ch| ch.is_ascii_digit() || *ch == '.' || *ch == '-')
                .collect::<String>();
            cleaned.parse::<i64>().ok().map(FieldValue::Integer).or_else(|| {
                cleaned
                    .parse::<f64>()
                    .ok()
                    .filter(|value| value.is_finite())
                    .map(|value| FieldValue::Integer(value.round() as i64))
            })
        }
        FieldType::Pressure | FieldType::Concentration => raw
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(FieldValue::Float),
        FieldType::Numeric => raw.parse::<i64>().ok().map(FieldValue::Integer).or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(FieldValue::Float)
        }),
        FieldType::Time | FieldType::Text => {
            (!raw.is_empty()).then(|| FieldValue::Text(raw.to_string()))
        }
    }
}

/// Validation scoped to a single extracted field.
pub fn validate_field(
    pattern: &FieldPattern,
    value: Option<&FieldValue>,
    confidence: f64,
    review_floor: f64,
) -> ValidationResult {
    let name = pattern.name;
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    match value {
        None => errors.push(format!("{name}: value could not be parsed")),
        Some(value) => {
            if let Some(number) = value.as_f64() {
                if let Some(range) = pattern.expected_range
                    && !range.contains(number)
                {
                    warnings.push(format!(
                        "{name}: value {number} outside expected range {}-{}",
                        range.min, range.max
                    ));
                }

                match pattern.field_type {
                    FieldType::Temperature if number < 100.0 => warnings.push(format!(
                        "{name}: temperature {number} is below 100, likely a misread"
                    )),
                    FieldType::Concentration if number > 50_000.0 => warnings.push(format!(
                        "{name}: concentration {number} exceeds 50000"
                    )),
                    FieldType::Pressure if number <= 0.0 => {
                        errors.push(format!("{name}: pressure must be positive"))
                    }
                    _ => {}
                }
            }
        }
    }

    let check_confidence = if errors.is_empty() { confidence } else { 0.0 };
    let check = ValidationCheck::new(format!("field:{name}"), check_confidence, errors, warnings);
    ValidationResult::from_checks(vec![check], false, review_floor)
}
