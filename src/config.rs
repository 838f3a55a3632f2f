//! Field registry and tunable thresholds for log parsing.
//!
//! The registry is data-driven: the built-in thermal-oxidizer log layout is
//! returned by [`LogParsingConfig::standard`], and any section can be
//! replaced from a JSON document. Scoring code only ever addresses fields
//! through the closed [`FieldId`] enum.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ParseFault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldId {
    ExhaustTempF,
    VaporInletFpm,
    DilutionAirFpm,
    CombustionAirFpm,
    InletPpm,
    OutletPpm,
    TankPressurePsi,
    TotalizerScf,
    Observations,
}

impl FieldId {
    pub const ALL: [FieldId; 9] = [
        FieldId::ExhaustTempF,
        FieldId::VaporInletFpm,
        FieldId::DilutionAirFpm,
        FieldId::CombustionAirFpm,
        FieldId::InletPpm,
        FieldId::OutletPpm,
        FieldId::TankPressurePsi,
        FieldId::TotalizerScf,
        FieldId::Observations,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExhaustTempF => "exhaustTempF",
            Self::VaporInletFpm => "vaporInletFpm",
            Self::DilutionAirFpm => "dilutionAirFpm",
            Self::CombustionAirFpm => "combustionAirFpm",
            Self::InletPpm => "inletPpm",
            Self::OutletPpm => "outletPpm",
            Self::TankPressurePsi => "tankPressurePsi",
            Self::TotalizerScf => "totalizerScf",
            Self::Observations => "observations",
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Numeric,
    FlowRate,
    Temperature,
    Pressure,
    Concentration,
    Totalizer,
    Time,
    Text,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::FlowRate => "flowRate",
            Self::Temperature => "temperature",
            Self::Pressure => "pressure",
            Self::Concentration => "concentration",
            Self::Totalizer => "totalizer",
            Self::Time => "time",
            Self::Text => "text",
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::Time | Self::Text)
    }

    /// Totalizers accumulate monotonically, so an even step between hours is
    /// expected rather than suspicious.
    pub fn expected_to_vary(self) -> bool {
        self.is_numeric() && self != Self::Totalizer
    }

    pub fn prefers_whole_numbers(self) -> bool {
        matches!(self, Self::FlowRate | Self::Temperature)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }
}

/// Serializable description of one field, as it appears in a config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldPatternSpec {
    pub name: FieldId,
    pub matcher: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub expected_range: Option<ValueRange>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FieldPattern {
    pub name: FieldId,
    pub matcher: Regex,
    pub field_type: FieldType,
    pub unit: String,
    pub expected_range: Option<ValueRange>,
    pub aliases: Vec<String>,
    unit_matcher: Option<Regex>,
    alias_matchers: Vec<Regex>,
}

impl FieldPattern {
    pub fn compile(spec: &FieldPatternSpec) -> Result<Self, ParseFault> {
        let field = spec.name.as_str().to_string();
        let matcher = Regex::new(&spec.matcher).map_err(|source| ParseFault::InvalidMatcher {
            field: field.clone(),
            source,
        })?;
        if !matcher.capture_names().flatten().any(|name| name == "value") {
            return Err(ParseFault::MissingValueGroup(field));
        }

        if let Some(range) = spec.expected_range
            && range.min > range.max
        {
            return Err(ParseFault::InvertedRange {
                field,
                min: range.min,
                max: range.max,
            });
        }

        let unit = spec.unit.trim().to_string();
        let unit_matcher = if unit.is_empty() {
            None
        } else {
            Some(bounded_word_regex(&unit, &field)?)
        };
        let alias_matchers = spec
            .aliases
            .iter()
            .map(|alias| alias.trim())
            .filter(|alias| !alias.is_empty())
            .map(|alias| bounded_word_regex(alias, &field))
            .collect::<Result<Vec<Regex>, ParseFault>>()?;

        Ok(Self {
            name: spec.name,
            matcher,
            field_type: spec.field_type,
            unit,
            expected_range: spec.expected_range,
            aliases: spec.aliases.clone(),
            unit_matcher,
            alias_matchers,
        })
    }

    pub fn unit_on_line(&self, line: &str) -> bool {
        self.unit_matcher
            .as_ref()
            .map(|matcher| matcher.is_match(line))
            .unwrap_or(false)
    }

    pub fn alias_on_line(&self, line: &str) -> bool {
        self.alias_matchers
            .iter()
            .any(|matcher| matcher.is_match(line))
    }

    /// True when a free-form cell label names this field.
    pub fn names_label(&self, label: &str) -> bool {
        let label = label.trim();
        label.eq_ignore_ascii_case(self.name.as_str()) || self.alias_on_line(label)
    }

    pub fn to_spec(&self) -> FieldPatternSpec {
        FieldPatternSpec {
            name: self.name,
            matcher: self.matcher.as_str().to_string(),
            field_type: self.field_type,
            unit: self.unit.clone(),
            expected_range: self.expected_range,
            aliases: self.aliases.clone(),
        }
    }
}

// Letters may not touch the word on either side; digits may ("1450F").
fn bounded_word_regex(word: &str, field: &str) -> Result<Regex, ParseFault> {
    let escaped = regex::escape(word).replace(' ', r"\s*");
    Regex::new(&format!(r"(?i)(?:^|[^a-z]){escaped}(?:$|[^a-z])")).map_err(|source| {
        ParseFault::InvalidMatcher {
            field: field.to_string(),
            source,
        }
    })
}

/// Candidate scoring weights. The six signal weights must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub base: f64,
    pub pattern_quality: f64,
    pub range_plausibility: f64,
    pub spatial_placement: f64,
    pub context_proximity: f64,
    pub distinctiveness: f64,
    pub ocr_cleanliness: f64,
    /// Out-of-range signal magnitude relative to the in-range credit.
    pub out_of_range_penalty_ratio: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            base: 0.5,
            pattern_quality: 0.20,
            range_plausibility: 0.25,
            spatial_placement: 0.20,
            context_proximity: 0.15,
            distinctiveness: 0.10,
            ocr_cleanliness: 0.10,
            out_of_range_penalty_ratio: 1.2,
        }
    }
}

impl ScoringWeights {
    pub fn signal_sum(&self) -> f64 {
        self.pattern_quality
            + self.range_plausibility
            + self.spatial_placement
            + self.context_proximity
            + self.distinctiveness
            + self.ocr_cleanliness
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsingThresholds {
    pub min_field_confidence: f64,
    pub fuzzy_match_threshold: f64,
    pub fuzzy_hour_penalty: f64,
    pub fuzzy_minute_penalty: f64,
    pub edge_column_width: usize,
    pub position_base_confidence: f64,
    pub clean_label_bonus: f64,
    pub line_start_bonus: f64,
    pub alias_lines_before: usize,
    pub alias_lines_after: usize,
}

impl Default for ParsingThresholds {
    fn default() -> Self {
        Self {
            min_field_confidence: 0.4,
            fuzzy_match_threshold: 0.8,
            fuzzy_hour_penalty: 0.4,
            fuzzy_minute_penalty: 0.01,
            edge_column_width: 30,
            position_base_confidence: 0.7,
            clean_label_bonus: 0.2,
            line_start_bonus: 0.1,
            alias_lines_before: 2,
            alias_lines_after: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HallucinationThresholds {
    pub min_sequence_len: usize,
    pub sequence_variance_epsilon: f64,
    pub high_confidence: f64,
    pub min_repeated_hours: usize,
    pub realistic_deviation_ratio: f64,
    pub misalignment_tolerance: f64,
}

impl Default for HallucinationThresholds {
    fn default() -> Self {
        Self {
            min_sequence_len: 3,
            sequence_variance_epsilon: 0.01,
            high_confidence: 0.95,
            min_repeated_hours: 3,
            realistic_deviation_ratio: 0.5,
            misalignment_tolerance: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationThresholds {
    pub confidence_floor: f64,
    pub manual_review_confidence: f64,
    pub min_bbox_overlap: f64,
    pub exhaust_temp_min: f64,
    pub exhaust_temp_max: f64,
    pub pressure_max: f64,
    pub outlet_inlet_ratio_max: f64,
    pub max_filled_hours: usize,
    pub round_value_ratio: f64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            confidence_floor: 0.8,
            manual_review_confidence: 0.8,
            min_bbox_overlap: 0.7,
            exhaust_temp_min: 500.0,
            exhaust_temp_max: 2000.0,
            pressure_max: 50.0,
            outlet_inlet_ratio_max: 0.10,
            max_filled_hours: 24,
            round_value_ratio: 0.75,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigDocument {
    fields: Option<Vec<FieldPatternSpec>>,
    scoring: Option<ScoringWeights>,
    parsing: Option<ParsingThresholds>,
    hallucination: Option<HallucinationThresholds>,
    validation: Option<ValidationThresholds>,
}

/// Immutable parsing configuration, shared read-only by every parse call.
#[derive(Debug, Clone)]
pub struct LogParsingConfig {
    fields: Vec<FieldPattern>,
    pub scoring: ScoringWeights,
    pub parsing: ParsingThresholds,
    pub hallucination: HallucinationThresholds,
    pub validation: ValidationThresholds,
}

impl LogParsingConfig {
    pub fn standard() -> Result<Self, ParseFault> {
        Self::from_parts(
            &standard_field_specs(),
            ScoringWeights::default(),
            ParsingThresholds::default(),
            HallucinationThresholds::default(),
            ValidationThresholds::default(),
        )
    }

    pub fn from_parts(
        specs: &[FieldPatternSpec],
        scoring: ScoringWeights,
        parsing: ParsingThresholds,
        hallucination: HallucinationThresholds,
        validation: ValidationThresholds,
    ) -> Result<Self, ParseFault> {
        let sum = scoring.signal_sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ParseFault::WeightSum(sum));
        }

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(specs.len());
        for spec in specs {
            if !seen.insert(spec.name) {
                return Err(ParseFault::DuplicateField(spec.name.to_string()));
            }
            fields.push(FieldPattern::compile(spec)?);
        }

        Ok(Self {
            fields,
            scoring,
            parsing,
            hallucination,
            validation,
        })
    }

    /// Sections missing from the document keep their built-in values.
    pub fn from_json_str(raw: &str) -> Result<Self, ParseFault> {
        let document: ConfigDocument =
            serde_json::from_str(raw).map_err(|err| ParseFault::InvalidConfig(err.to_string()))?;

        let specs = document.fields.unwrap_or_else(standard_field_specs);
        Self::from_parts(
            &specs,
            document.scoring.unwrap_or_default(),
            document.parsing.unwrap_or_default(),
            document.hallucination.unwrap_or_default(),
            document.validation.unwrap_or_default(),
        )
    }

    pub fn from_json_path(path: &Path) -> Result<Self, ParseFault> {
        let raw = fs::read_to_string(path).map_err(|source| ParseFault::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn fields(&self) -> &[FieldPattern] {
        &self.fields
    }

    pub fn pattern(&self, id: FieldId) -> Option<&FieldPattern> {
        self.fields.iter().find(|pattern| pattern.name == id)
    }
}

const LABEL_SEPARATOR: &str = r"\s*[.:=\-]{0,2}\s*";

/// A numeric row: caption, value shape and trailing unit form one matcher.
struct LabelledRow<'a> {
    name: FieldId,
    field_type: FieldType,
    label: &'a str,
    value: &'a str,
    suffix: &'a str,
    unit: &'a str,
    range: ValueRange,
    aliases: &'a [&'a str],
}

impl LabelledRow<'_> {
    fn into_spec(self) -> FieldPatternSpec {
        FieldPatternSpec {
            name: self.name,
            matcher: format!(
                r"(?i){}{LABEL_SEPARATOR}(?P<value>{}){}",
                self.label, self.value, self.suffix
            ),
            field_type: self.field_type,
            unit: self.unit.to_string(),
            expected_range: Some(self.range),
            aliases: self.aliases.iter().map(|alias| alias.to_string()).collect(),
        }
    }
}

/// Built-in registry for the hourly thermal-oxidizer log sheet.
pub fn standard_field_specs() -> Vec<FieldPatternSpec> {
    vec![
        LabelledRow {
            name: FieldId::ExhaustTempF,
            field_type: FieldType::Temperature,
            label: r"\b(?:exh(?:aust)?\s*)?(?:temp(?:erature)?|tmp)",
            value: r"-?\d{2,5}(?:\.\d+)?",
            suffix: r"(?:\s*(?:deg\s*)?F)?\b",
            unit: "F",
            range: ValueRange::new(1000.0, 2000.0),
            aliases: &["exhaust temp", "exh temp", "temp", "temperature", "stack temp"],
        }
        .into_spec(),
        LabelledRow {
            name: FieldId::VaporInletFpm,
            field_type: FieldType::FlowRate,
            label: r"(?:\bvapou?r(?:\s*inlet)?(?:\s*flow)?|\binlet\s*flow|^\s*flow)",
            value: r"-?\d{1,5}(?:\.\d+)?",
            suffix: r"(?:\s*FPM)?\b",
            unit: "FPM",
            range: ValueRange::new(100.0, 5000.0),
            aliases: &["vapor inlet", "inlet flow", "vapor", "flow"],
        }
        .into_spec(),
        LabelledRow {
            name: FieldId::DilutionAirFpm,
            field_type: FieldType::FlowRate,
            label: r"\bdil(?:ution)?(?:\s*air)?(?:\s*flow)?",
            value: r"-?\d{1,5}(?:\.\d+)?",
            suffix: r"(?:\s*FPM)?\b",
            unit: "FPM",
            range: ValueRange::new(0.0, 5000.0),
            aliases: &["dilution", "dil air"],
        }
        .into_spec(),
        LabelledRow {
            name: FieldId::CombustionAirFpm,
            field_type: FieldType::FlowRate,
            label: r"\bcomb(?:ustion)?(?:\s*air)?(?:\s*flow)?",
            value: r"-?\d{1,5}(?:\.\d+)?",
            suffix: r"(?:\s*FPM)?\b",
            unit: "FPM",
            range: ValueRange::new(0.0, 5000.0),
            aliases: &["combustion", "comb air"],
        }
        .into_spec(),
        LabelledRow {
            name: FieldId::InletPpm,
            field_type: FieldType::Concentration,
            label: r"\binlet(?:\s*(?:ppm|conc(?:entration)?))?",
            value: r"-?\d{1,6}(?:\.\d+)?",
            suffix: r"(?:\s*ppm)?\b",
            unit: "PPM",
            range: ValueRange::new(0.0, 50000.0),
            aliases: &["inlet ppm", "inlet conc", "inlet"],
        }
        .into_spec(),
        LabelledRow {
            name: FieldId::OutletPpm,
            field_type: FieldType::Concentration,
            label: r"\b(?:outlet|exit)(?:\s*(?:ppm|conc(?:entration)?))?",
            value: r"-?\d{1,6}(?:\.\d+)?",
            suffix: r"(?:\s*ppm)?\b",
            unit: "PPM",
            range: ValueRange::new(0.0, 5000.0),
            aliases: &["outlet ppm", "outlet", "exit"],
        }
        .into_spec(),
        LabelledRow {
            name: FieldId::TankPressurePsi,
            field_type: FieldType::Pressure,
            label: r"\b(?:tank\s*)?(?:press(?:ure)?|psig?)",
            value: r"-?\d{1,3}(?:\.\d+)?",
            suffix: r"(?:\s*psig?)?\b",
            unit: "PSI",
            range: ValueRange::new(0.1, 50.0),
            aliases: &["tank pressure", "pressure", "press"],
        }
        .into_spec(),
        LabelledRow {
            name: FieldId::TotalizerScf,
            field_type: FieldType::Totalizer,
            label: r"\b(?:totali[sz]er|total|tot)",
            value: r"\d{1,9}(?:\.\d+)?",
            suffix: r"(?:\s*scf)?\b",
            unit: "SCF",
            range: ValueRange::new(0.0, 99_999_999.0),
            aliases: &["totalizer", "total"],
        }
        .into_spec(),
        FieldPatternSpec {
            name: FieldId::Observations,
            matcher: r"(?i)\b(?:obs(?:ervations?)?|notes?|remarks?|comments?)\s*[.:=\-]{1,2}\s*(?P<value>[A-Za-z][A-Za-z0-9 ,.\-]{1,60})"
                .to_string(),
            field_type: FieldType::Text,
            unit: String::new(),
            expected_range: None,
            aliases: vec![
                "observations".to_string(),
                "notes".to_string(),
                "remarks".to_string(),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_compiles_every_field_once() {
        let config = LogParsingConfig::standard().unwrap();
        assert_eq!(config.fields().len(), FieldId::ALL.len());
        for id in FieldId::ALL {
            assert!(config.pattern(id).is_some(), "missing {id}");
        }
    }

    #[test]
    fn labelled_rows_capture_the_value_after_their_caption() {
        let config = LogParsingConfig::standard().unwrap();
        let value = |id: FieldId, line: &str| {
            config
                .pattern(id)
                .and_then(|pattern| pattern.matcher.captures(line))
                .and_then(|captures| captures.name("value"))
                .map(|value| value.as_str().to_string())
        };

        assert_eq!(value(FieldId::ExhaustTempF, "Exhaust Temp: 1450 deg F").as_deref(), Some("1450"));
        assert_eq!(value(FieldId::TankPressurePsi, "tank pressure = 12.5 psig").as_deref(), Some("12.5"));
        assert_eq!(value(FieldId::TotalizerScf, "totalizer 1234567 SCF").as_deref(), Some("1234567"));
        assert_eq!(value(FieldId::DilutionAirFpm, "inlet flow: 2500 FPM"), None);

        let temp = config.pattern(FieldId::ExhaustTempF).unwrap();
        assert_eq!(temp.unit, "F");
        assert_eq!(temp.expected_range, Some(ValueRange::new(1000.0, 2000.0)));
        assert!(temp.aliases.iter().any(|alias| alias == "stack temp"));
    }

    #[test]
    fn duplicate_fields_are_rejected() {
        let mut specs = standard_field_specs();
        specs.push(specs[0].clone());
        let err = LogParsingConfig::from_parts(
            &specs,
            ScoringWeights::default(),
            ParsingThresholds::default(),
            HallucinationThresholds::default(),
            ValidationThresholds::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ParseFault::DuplicateField(_)));
    }

    #[test]
    fn matcher_without_value_group_is_rejected() {
        let raw = r#"{"fields": [{"name": "exhaustTempF", "matcher": "temp\\s*(\\d+)", "type": "temperature"}]}"#;
        let err = LogParsingConfig::from_json_str(raw).unwrap_err();
        assert!(matches!(err, ParseFault::MissingValueGroup(_)));
    }

    #[test]
    fn weights_that_do_not_sum_to_one_are_rejected() {
        let raw = r#"{"scoring": {"pattern_quality": 0.5}}"#;
        let err = LogParsingConfig::from_json_str(raw).unwrap_err();
        assert!(matches!(err, ParseFault::WeightSum(_)));
    }

    #[test]
    fn partial_document_keeps_default_sections() {
        let raw = r#"{"parsing": {"min_field_confidence": 0.6}}"#;
        let config = LogParsingConfig::from_json_str(raw).unwrap();
        assert_eq!(config.parsing.min_field_confidence, 0.6);
        assert_eq!(config.parsing.fuzzy_match_threshold, 0.8);
        assert_eq!(config.fields().len(), FieldId::ALL.len());
    }

    #[test]
    fn unit_matching_respects_letter_boundaries() {
        let config = LogParsingConfig::standard().unwrap();
        let temp = config.pattern(FieldId::ExhaustTempF).unwrap();
        assert!(temp.unit_on_line("temp: 1450F"));
        assert!(!temp.unit_on_line("flow: 2500 FPM"));

        let flow = config.pattern(FieldId::VaporInletFpm).unwrap();
        assert!(flow.unit_on_line("flow: 2500 FPM"));
        assert!(flow.alias_on_line("Vapor Inlet 2500"));
    }

    #[test]
    fn dumped_registry_reloads_unchanged() {
        let config = LogParsingConfig::standard().unwrap();
        let document = serde_json::json!({
            "fields": config.fields().iter().map(FieldPattern::to_spec).collect::<Vec<_>>(),
            "scoring": config.scoring,
        });

        let reloaded = LogParsingConfig::from_json_str(&document.to_string()).unwrap();
        assert_eq!(reloaded.fields().len(), config.fields().len());
        for (left, right) in reloaded.fields().iter().zip(config.fields()) {
            assert_eq!(left.name, right.name);
            assert_eq!(left.matcher.as_str(), right.matcher.as_str());
            assert_eq!(left.expected_range, right.expected_range);
        }
        assert_eq!(reloaded.scoring, config.scoring);
    }
}
