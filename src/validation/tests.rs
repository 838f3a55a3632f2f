use chrono::{TimeZone, Utc};

use super::*;
use crate::config::{FieldId, FieldType};
use crate::geometry::{BoundingBox, OcrToken};
use crate::model::{FieldMatch, FieldValue, HallucinationKind};
use crate::parsing::Verdict;

fn pipeline() -> ValidationPipeline {
    ValidationPipeline::new(&LogParsingConfig::standard().unwrap()).unwrap()
}

fn field(name: FieldId, field_type: FieldType, raw: &str, confidence: f64) -> FieldMatch {
    let value = raw
        .parse::<i64>()
        .map(FieldValue::Integer)
        .or_else(|_| raw.parse::<f64>().map(FieldValue::Float))
        .unwrap_or_else(|_| FieldValue::Text(raw.to_string()));
    FieldMatch {
        name,
        value: Some(value),
        raw_value: raw.to_string(),
        confidence,
        raw_match: format!("{name} {raw}"),
        line: 1,
        position: 0,
        field_type,
        unit: String::new(),
        validation: ValidationResult::from_checks(Vec::new(), false, 0.8),
    }
}

fn temp(raw: &str) -> FieldMatch {
    field(FieldId::ExhaustTempF, FieldType::Temperature, raw, 1.0)
}

fn vapor(raw: &str) -> FieldMatch {
    field(FieldId::VaporInletFpm, FieldType::FlowRate, raw, 1.0)
}

fn reading(hour: &str, fields: Vec<FieldMatch>) -> HourlyReading {
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
    HourlyReading::from_field_matches(hour, fields, at, "")
}

fn check<'a>(result: &'a ValidationResult, name: &str) -> Option<&'a ValidationCheck> {
    result.checks.iter().find(|check| check.name == name)
}

#[test]
fn clean_confident_reading_is_accepted() {
    let pipeline = pipeline();
    let reading = reading("02:00", vec![temp("1450"), vapor("2520")]);

    let result = pipeline.validate(&ValidationRequest::new(&reading, &[], false));
    assert!(result.is_valid, "{result:?}");
    assert!(!result.requires_manual_review, "{result:?}");
    assert_eq!(result.overall_confidence, 1.0);
    assert_eq!(result.checks.len(), 5);
    assert_eq!(Verdict::from_result(&result), Verdict::Accepted);
}

#[test]
fn any_hallucination_flag_rejects_the_reading() {
    let pipeline = pipeline();
    let reading = reading("02:00", vec![temp("1450")]);
    let flags = vec![HallucinationFlag::new(
        HallucinationKind::EmptyCellWithContent,
        "exhaustTempF value 1450 was read from a cell marked empty",
        Some(FieldId::ExhaustTempF),
    )];

    let result = pipeline.validate(&ValidationRequest::new(&reading, &flags, false));
    assert!(!result.is_valid);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("emptyCellWithContent"));
    assert_eq!(check(&result, "hallucination_detection").unwrap().confidence, 0.75);
    assert_eq!(Verdict::from_result(&result), Verdict::Rejected);
}

#[test]
fn negative_pressure_is_a_hard_error() {
    let pipeline = pipeline();
    let reading = reading(
        "02:00",
        vec![field(FieldId::TankPressurePsi, FieldType::Pressure, "-5", 0.9)],
    );

    let result = pipeline.validate(&ValidationRequest::new(&reading, &[], false));
    assert!(!result.is_valid);
    assert!(
        result
            .errors
            .iter()
            .any(|error| error.contains("pressure must be positive"))
    );
}

#[test]
fn warnings_require_review_and_fail_strict_mode() {
    let pipeline = pipeline();
    let reading = reading("02:00", vec![temp("2150")]);

    let relaxed = pipeline.validate(&ValidationRequest::new(&reading, &[], false));
    assert!(relaxed.is_valid);
    assert!(relaxed.errors.is_empty());
    assert!(relaxed.requires_manual_review);
    assert_eq!(Verdict::from_result(&relaxed), Verdict::ManualReviewRequired);

    let strict = pipeline.validate(&ValidationRequest::new(&reading, &[], true));
    assert!(!strict.is_valid);
    assert_eq!(Verdict::from_result(&strict), Verdict::Rejected);
}

#[test]
fn evenly_stepping_series_needs_review() {
    let pipeline = pipeline();
    let series = vec![
        reading("00:00", vec![vapor("100")]),
        reading("01:00", vec![vapor("200")]),
        reading("03:00", vec![vapor("400")]),
        reading("04:00", vec![vapor("500")]),
    ];
    let target = reading("02:00", vec![vapor("300")]);

    let mut request = ValidationRequest::new(&target, &[], false);
    request.series = &series;
    let relaxed = pipeline.validate(&request);
    assert!(relaxed.requires_manual_review);
    assert!(!check(&relaxed, "pattern_consistency").unwrap().is_valid);

    request.strict_mode = true;
    assert!(!pipeline.validate(&request).is_valid);
}

#[test]
fn nonconforming_raw_value_is_an_error_only_when_strict() {
    let pipeline = pipeline();
    let reading = reading("02:00", vec![temp("1450.5")]);

    let relaxed = pipeline.validate(&ValidationRequest::new(&reading, &[], false));
    let conformance = check(&relaxed, "pattern_conformance").unwrap();
    assert!(conformance.errors.is_empty());
    assert_eq!(conformance.warnings.len(), 1);
    assert!(relaxed.is_valid);

    let strict = pipeline.validate(&ValidationRequest::new(&reading, &[], true));
    assert_eq!(check(&strict, "pattern_conformance").unwrap().errors.len(), 1);
    assert!(!strict.is_valid);
}

#[test]
fn token_straddling_the_column_edge_warns() {
    let pipeline = pipeline();
    let token = |text: &str, x: f64, y: f64| OcrToken {
        text: text.to_string(),
        bbox: BoundingBox {
            x,
            y,
            width: 40.0,
            height: 10.0,
        },
    };
    let layout = TokenLayout {
        tokens: vec![
            token("02:00", 100.0, 0.0),
            token("03:00", 200.0, 0.0),
            token("1450", 150.0, 30.0),
        ],
        cells: Vec::new(),
    };
    let reading = reading("02:00", vec![temp("1450")]);

    let mut request = ValidationRequest::new(&reading, &[], false);
    request.layout = Some(&layout);
    let result = pipeline.validate(&request);

    let overlap = check(&result, "bounding_box_overlap").unwrap();
    assert!((overlap.confidence - 0.5).abs() < 1e-9);
    assert_eq!(overlap.warnings.len(), 1);
    assert!(result.requires_manual_review);

    let bare = TokenLayout::default();
    request.layout = Some(&bare);
    assert!(check(&pipeline.validate(&request), "bounding_box_overlap").is_none());
}

#[test]
fn empty_reading_fails_the_confidence_check() {
    let pipeline = pipeline();
    let reading = reading("02:00", Vec::new());

    let result = pipeline.validate(&ValidationRequest::new(&reading, &[], false));
    assert!(!result.is_valid);
    assert_eq!(
        check(&result, "confidence_threshold").unwrap().errors,
        vec!["no fields were extracted".to_string()]
    );
}

#[test]
fn low_confidence_is_a_warning_unless_strict() {
    let pipeline = pipeline();
    let reading = reading(
        "02:00",
        vec![field(FieldId::ExhaustTempF, FieldType::Temperature, "1452", 0.6)],
    );

    let relaxed = pipeline.validate(&ValidationRequest::new(&reading, &[], false));
    let confidence = check(&relaxed, "confidence_threshold").unwrap();
    assert!(confidence.errors.is_empty());
    assert_eq!(confidence.warnings.len(), 2);
    assert!(relaxed.is_valid);
    assert!(relaxed.requires_manual_review);

    let strict = pipeline.validate(&ValidationRequest::new(&reading, &[], true));
    assert_eq!(check(&strict, "confidence_threshold").unwrap().errors.len(), 1);
}

#[test]
fn business_rules_compare_related_fields() {
    let pipeline = pipeline();
    let reading = reading(
        "02:00",
        vec![
            temp("1452"),
            vapor("800"),
            field(FieldId::DilutionAirFpm, FieldType::FlowRate, "1200", 1.0),
            field(FieldId::InletPpm, FieldType::Concentration, "1000", 1.0),
            field(FieldId::OutletPpm, FieldType::Concentration, "150", 1.0),
        ],
    );

    let result = pipeline.validate(&ValidationRequest::new(&reading, &[], false));
    let rules = check(&result, "business_rules").unwrap();
    assert!(rules.errors.is_empty());
    assert_eq!(rules.warnings.len(), 2);
    assert_eq!(rules.confidence, 0.7);
}

#[test]
fn mostly_round_values_are_suspicious() {
    let pipeline = pipeline();
    let reading = reading(
        "02:00",
        vec![
            temp("1500"),
            vapor("2500"),
            field(FieldId::DilutionAirFpm, FieldType::FlowRate, "1000", 1.0),
        ],
    );

    let result = pipeline.validate(&ValidationRequest::new(&reading, &[], false));
    let consistency = check(&result, "pattern_consistency").unwrap();
    assert_eq!(consistency.warnings, vec!["3 of 3 values are round numbers".to_string()]);
    assert!(result.requires_manual_review);
}
