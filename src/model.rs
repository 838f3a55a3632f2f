use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{FieldId, FieldType};

/// A normalized "HH:MM" hour label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct HourLabel {
    pub hour: u8,
    pub minute: u8,
}

impl HourLabel {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour <= 23 && minute <= 59).then_some(Self { hour, minute })
    }

    /// Accepts "2:00", "02:00", "02.00", "0200" and a bare hour such as "2".
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (hour, minute) = if let Some((hour, minute)) = raw.split_once([':', '.', '-']) {
            (hour, minute)
        } else if raw.len() == 4 && raw.chars().all(|ch| ch.is_ascii_digit()) {
            raw.split_at(2)
        } else {
            (raw, "00")
        };

        let hour = hour.trim();
        let minute = minute.trim();
        if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
            return None;
        }
        if !hour.chars().chain(minute.chars()).all(|ch| ch.is_ascii_digit()) {
            return None;
        }

        Self::new(hour.parse().ok()?, minute.parse().ok()?)
    }
}

impl fmt::Display for HourLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for HourLabel {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw).ok_or_else(|| format!("'{raw}' is not a valid HH:MM label"))
    }
}

impl From<HourLabel> for String {
    fn from(label: HourLabel) -> Self {
        label.to_string()
    }
}

impl TryFrom<String> for HourLabel {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextPosition {
    pub line: usize,
    pub column: usize,
    pub absolute_position: usize,
    pub confidence: f64,
}

/// Character window within a line that belongs to one hour column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnBounds {
    pub start: usize,
    pub end: usize,
}

impl ColumnBounds {
    pub fn contains(&self, column: usize) -> bool {
        column >= self.start && column < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCandidate {
    pub value: String,
    pub line: usize,
    pub position: usize,
    pub raw_match: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMatch {
    pub name: FieldId,
    pub value: Option<FieldValue>,
    /// Substring captured by the field matcher, before type conversion.
    pub raw_value: String,
    pub confidence: f64,
    pub raw_match: String,
    pub line: usize,
    pub position: usize,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub unit: String,
    pub validation: ValidationResult,
}

impl FieldMatch {
    pub fn numeric_value(&self) -> Option<f64> {
        self.value.as_ref().and_then(FieldValue::as_f64)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct HourlyReadingRecord {
    inspection_time: String,
    #[serde(default)]
    field_matches: Vec<FieldMatch>,
    parsed_at: DateTime<Utc>,
    #[serde(default)]
    raw_ocr_text: String,
}

impl From<HourlyReadingRecord> for HourlyReading {
    fn from(record: HourlyReadingRecord) -> Self {
        Self::from_field_matches(
            record.inspection_time,
            record.field_matches,
            record.parsed_at,
            record.raw_ocr_text,
        )
    }
}

/// One hour's extracted values. `overall_confidence` is always the mean of
/// the accepted field confidences; a stored value is recomputed on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "HourlyReadingRecord")]
pub struct HourlyReading {
    inspection_time: String,
    field_matches: Vec<FieldMatch>,
    overall_confidence: f64,
    parsed_at: DateTime<Utc>,
    raw_ocr_text: String,
}

impl HourlyReading {
    /// Keeps at most one match per field (the most confident, first on ties),
    /// preserving first-seen order.
    pub fn from_field_matches(
        inspection_time: impl Into<String>,
        matches: Vec<FieldMatch>,
        parsed_at: DateTime<Utc>,
        raw_ocr_text: impl Into<String>,
    ) -> Self {
        let mut field_matches: Vec<FieldMatch> = Vec::with_capacity(matches.len());
        for candidate in matches {
            match field_matches
                .iter()
                .position(|existing| existing.name == candidate.name)
            {
                Some(index) => {
                    if candidate.confidence > field_matches[index].confidence {
                        field_matches[index] = candidate;
                    }
                }
                None => field_matches.push(candidate),
            }
        }

        let overall_confidence = if field_matches.is_empty() {
            0.0
        } else {
            field_matches.iter().map(|field| field.confidence).sum::<f64>()
                / field_matches.len() as f64
        };

        Self {
            inspection_time: inspection_time.into(),
            field_matches,
            overall_confidence,
            parsed_at,
            raw_ocr_text: raw_ocr_text.into(),
        }
    }

    pub fn empty(
        inspection_time: impl Into<String>,
        parsed_at: DateTime<Utc>,
        raw_ocr_text: impl Into<String>,
    ) -> Self {
        Self::from_field_matches(inspection_time, Vec::new(), parsed_at, raw_ocr_text)
    }

    pub fn inspection_time(&self) -> &str {
        &self.inspection_time
    }

    pub fn hour_label(&self) -> Option<HourLabel> {
        HourLabel::parse(&self.inspection_time)
    }

    pub fn field_matches(&self) -> &[FieldMatch] {
        &self.field_matches
    }

    pub fn field(&self, id: FieldId) -> Option<&FieldMatch> {
        self.field_matches.iter().find(|field| field.name == id)
    }

    pub fn numeric(&self, id: FieldId) -> Option<f64> {
        self.field(id).and_then(FieldMatch::numeric_value)
    }

    pub fn overall_confidence(&self) -> f64 {
        self.overall_confidence
    }

    pub fn parsed_at(&self) -> DateTime<Utc> {
        self.parsed_at
    }

    pub fn raw_ocr_text(&self) -> &str {
        &self.raw_ocr_text
    }

    pub fn is_empty(&self) -> bool {
        self.field_matches.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HallucinationKind {
    PerfectSequence,
    SpatialMisalignment,
    ConfidenceInconsistency,
    EmptyCellWithContent,
    PatternAnomaly,
}

impl HallucinationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PerfectSequence => "perfectSequence",
            Self::SpatialMisalignment => "spatialMisalignment",
            Self::ConfidenceInconsistency => "confidenceInconsistency",
            Self::EmptyCellWithContent => "emptyCellWithContent",
            Self::PatternAnomaly => "patternAnomaly",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallucinationFlag {
    #[serde(rename = "type")]
    pub kind: HallucinationKind,
    pub description: String,
    #[serde(default)]
    pub affected_field: Option<FieldId>,
}

impl HallucinationFlag {
    pub fn new(
        kind: HallucinationKind,
        description: impl Into<String>,
        affected_field: Option<FieldId>,
    ) -> Self {
        Self {
            kind,
            description: description.into(),
            affected_field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub is_valid: bool,
    pub confidence: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationCheck {
    /// A check passes only when it raised neither errors nor warnings.
    pub fn new(
        name: impl Into<String>,
        confidence: f64,
        errors: Vec<String>,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            is_valid: errors.is_empty() && warnings.is_empty(),
            confidence: confidence.clamp(0.0, 1.0),
            errors,
            warnings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub checks: Vec<ValidationCheck>,
    pub overall_confidence: f64,
    pub requires_manual_review: bool,
}

impl ValidationResult {
    pub fn from_checks(checks: Vec<ValidationCheck>, strict_mode: bool, review_floor: f64) -> Self {
        let errors = checks
            .iter()
            .flat_map(|check| check.errors.iter().cloned())
            .collect::<Vec<String>>();
        let warnings = checks
            .iter()
            .flat_map(|check| check.warnings.iter().cloned())
            .collect::<Vec<String>>();
        let overall_confidence = if checks.is_empty() {
            0.0
        } else {
            checks.iter().map(|check| check.confidence).sum::<f64>() / checks.len() as f64
        };

        let unanimous = checks.iter().all(|check| check.is_valid);
        let is_valid = errors.is_empty() && (!strict_mode || unanimous);
        let requires_manual_review = !warnings.is_empty() || overall_confidence < review_floor;

        Self {
            is_valid,
            errors,
            warnings,
            checks,
            overall_confidence,
            requires_manual_review,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn field(name: FieldId, confidence: f64) -> FieldMatch {
        FieldMatch {
            name,
            value: Some(FieldValue::Integer(1)),
            raw_value: "1".to_string(),
            confidence,
            raw_match: "x 1".to_string(),
            line: 1,
            position: 0,
            field_type: FieldType::Numeric,
            unit: String::new(),
            validation: ValidationResult::from_checks(Vec::new(), false, 0.0),
        }
    }

    #[test]
    fn hour_label_accepts_common_renderings() {
        assert_eq!(HourLabel::parse("02:00"), HourLabel::new(2, 0));
        assert_eq!(HourLabel::parse("2:00"), HourLabel::new(2, 0));
        assert_eq!(HourLabel::parse("0200"), HourLabel::new(2, 0));
        assert_eq!(HourLabel::parse("14.30"), HourLabel::new(14, 30));
        assert_eq!(HourLabel::parse("7"), HourLabel::new(7, 0));
        assert_eq!(HourLabel::parse("24:00"), None);
        assert_eq!(HourLabel::parse("02:75"), None);
        assert_eq!(HourLabel::parse("ab:cd"), None);
        assert_eq!(HourLabel::new(9, 5).unwrap().to_string(), "09:05");
    }

    #[test]
    fn reading_keeps_one_match_per_field_and_derives_confidence() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 0, 0).unwrap();
        let reading = HourlyReading::from_field_matches(
            "02:00",
            vec![
                field(FieldId::ExhaustTempF, 0.6),
                field(FieldId::VaporInletFpm, 0.8),
                field(FieldId::ExhaustTempF, 0.9),
            ],
            at,
            "raw",
        );

        assert_eq!(reading.field_matches().len(), 2);
        assert_eq!(reading.field(FieldId::ExhaustTempF).unwrap().confidence, 0.9);
        assert!((reading.overall_confidence() - 0.85).abs() < 1e-9);
    }

    #[test]
    fn deserialized_reading_recomputes_overall_confidence() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 0, 0).unwrap();
        let reading = HourlyReading::from_field_matches(
            "02:00",
            vec![field(FieldId::ExhaustTempF, 0.5)],
            at,
            "raw",
        );
        let mut json = serde_json::to_value(&reading).unwrap();
        json["overall_confidence"] = serde_json::json!(0.99);

        let restored: HourlyReading = serde_json::from_value(json).unwrap();
        assert_eq!(restored.overall_confidence(), 0.5);
        assert_eq!(restored, reading);
    }

    #[test]
    fn hallucination_kinds_use_camel_case_names() {
        let kind = HallucinationKind::EmptyCellWithContent;
        assert_eq!(
            serde_json::to_value(kind).unwrap(),
            serde_json::json!("emptyCellWithContent")
        );
        assert_eq!(HallucinationKind::PerfectSequence.as_str(), "perfectSequence");
        let parsed: HallucinationKind = serde_json::from_str("\"patternAnomaly\"").unwrap();
        assert_eq!(parsed, HallucinationKind::PatternAnomaly);
    }

    #[test]
    fn manual_review_follows_warnings_even_without_errors() {
        let checks = vec![ValidationCheck::new(
            "business_rules",
            1.0,
            Vec::new(),
            vec!["pressure above 50".to_string()],
        )];
        let result = ValidationResult::from_checks(checks, false, 0.8);
        assert!(result.is_valid);
        assert!(result.requires_manual_review);

        let strict = ValidationResult::from_checks(result.checks.clone(), true, 0.8);
        assert!(!strict.is_valid);
    }
}
