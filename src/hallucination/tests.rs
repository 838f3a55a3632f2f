use chrono::{TimeZone, Utc};

use super::*;
use crate::geometry::{BoundingBox, CellRegion, OcrToken};
use crate::model::{FieldValue, ValidationCheck, ValidationResult};

fn config() -> LogParsingConfig {
    LogParsingConfig::standard().unwrap()
}

fn field(name: FieldId, field_type: FieldType, value: f64, confidence: f64) -> FieldMatch {
    let typed = if value.fract() == 0.0 {
        FieldValue::Integer(value as i64)
    } else {
        FieldValue::Float(value)
    };
    FieldMatch {
        name,
        value: Some(typed.clone()),
        raw_value: typed.to_string(),
        confidence,
        raw_match: format!("{name} {typed}"),
        line: 1,
        position: 0,
        field_type,
        unit: String::new(),
        validation: ValidationResult::from_checks(
            vec![ValidationCheck::new("field", confidence, Vec::new(), Vec::new())],
            false,
            0.8,
        ),
    }
}

fn temp(value: f64) -> FieldMatch {
    field(FieldId::ExhaustTempF, FieldType::Temperature, value, 0.9)
}

fn vapor(value: f64) -> FieldMatch {
    field(FieldId::VaporInletFpm, FieldType::FlowRate, value, 0.9)
}

fn reading(hour: &str, fields: Vec<FieldMatch>) -> HourlyReading {
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
    HourlyReading::from_field_matches(hour, fields, at, "")
}

fn bbox(x: f64, y: f64, width: f64, height: f64) -> BoundingBox {
    BoundingBox {
        x,
        y,
        width,
        height,
    }
}

fn token(text: &str, x: f64, y: f64) -> OcrToken {
    OcrToken {
        text: text.to_string(),
        bbox: bbox(x, y, 40.0, 10.0),
    }
}

fn kinds(flags: &[HallucinationFlag]) -> Vec<HallucinationKind> {
    flags.iter().map(|flag| flag.kind).collect()
}

#[test]
fn progression_inside_one_reading_is_a_pattern_anomaly() {
    let config = config();
    let detector = AntiHallucinationDetector::new(&config);
    let reading = reading(
        "02:00",
        vec![
            temp(2000.0),
            vapor(2100.0),
            field(FieldId::DilutionAirFpm, FieldType::FlowRate, 2200.0, 0.9),
            field(FieldId::CombustionAirFpm, FieldType::FlowRate, 2300.0, 0.9),
        ],
    );

    let flags = detector.detect(&reading, &DetectionContext::default());
    assert!(flags.iter().any(|flag| {
        flag.kind == HallucinationKind::PatternAnomaly && flag.affected_field.is_none()
    }));
}

#[test]
fn evenly_stepping_hours_are_flagged_for_the_field() {
    let config = config();
    let detector = AntiHallucinationDetector::new(&config);
    let siblings = vec![
        reading("00:00", vec![vapor(100.0)]),
        reading("01:00", vec![vapor(200.0)]),
        reading("03:00", vec![vapor(400.0)]),
        reading("04:00", vec![vapor(500.0)]),
    ];
    let target = reading("02:00", vec![vapor(300.0)]);

    let flags = detector.detect(
        &target,
        &DetectionContext {
            siblings: &siblings,
            layout: None,
        },
    );
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].kind, HallucinationKind::PatternAnomaly);
    assert_eq!(flags[0].affected_field, Some(FieldId::VaporInletFpm));
}

#[test]
fn constant_set_point_is_not_a_progression() {
    assert!(!is_perfect_progression(&[2500.0, 2500.0, 2500.0, 2500.0], 0.01));
    assert!(is_perfect_progression(&[2000.0, 2100.0, 2200.0], 0.01));
    assert!(!is_perfect_progression(&[1450.0, 1462.0, 1449.0], 0.01));
    assert!(!is_perfect_progression(&[1.0, 2.0], 0.01));

    let config = config();
    let detector = AntiHallucinationDetector::new(&config);
    let siblings = vec![
        reading("01:00", vec![vapor(2500.0)]),
        reading("03:00", vec![vapor(2500.0)]),
        reading("04:00", vec![vapor(2500.0)]),
    ];
    let flags = detector.detect(
        &reading("02:00", vec![vapor(2500.0)]),
        &DetectionContext {
            siblings: &siblings,
            layout: None,
        },
    );
    assert!(flags.is_empty(), "{flags:?}");
}

#[test]
fn unchanged_temperature_across_hours_is_a_perfect_sequence() {
    let config = config();
    let detector = AntiHallucinationDetector::new(&config);
    let siblings = vec![
        reading("01:00", vec![temp(1452.0)]),
        reading("03:00", vec![temp(1452.0)]),
        reading("04:00", vec![temp(1471.0)]),
    ];

    let flags = detector.detect(
        &reading("02:00", vec![temp(1452.0)]),
        &DetectionContext {
            siblings: &siblings,
            layout: None,
        },
    );
    assert_eq!(kinds(&flags), vec![HallucinationKind::PerfectSequence]);
    assert_eq!(flags[0].affected_field, Some(FieldId::ExhaustTempF));
}

#[test]
fn value_far_from_other_hours_is_flagged() {
    let config = config();
    let detector = AntiHallucinationDetector::new(&config);
    let siblings = vec![
        reading("00:00", vec![temp(1100.0)]),
        reading("01:00", vec![temp(1120.0)]),
    ];

    let flags = detector.detect(
        &reading("02:00", vec![temp(1950.0)]),
        &DetectionContext {
            siblings: &siblings,
            layout: None,
        },
    );
    assert_eq!(kinds(&flags), vec![HallucinationKind::PatternAnomaly]);
    assert_eq!(flags[0].affected_field, Some(FieldId::ExhaustTempF));
}

#[test]
fn value_token_inside_empty_cell_is_flagged() {
    let config = config();
    let detector = AntiHallucinationDetector::new(&config);
    let layout = TokenLayout {
        tokens: vec![
            token("02:00", 100.0, 0.0),
            token("03:00", 200.0, 0.0),
            token("1450", 100.0, 30.0),
        ],
        cells: vec![CellRegion {
            bbox: bbox(80.0, 25.0, 80.0, 20.0),
            empty: true,
            hour: None,
            label: None,
        }],
    };

    let flags = detector.detect(
        &reading("02:00", vec![temp(1450.0)]),
        &DetectionContext {
            siblings: &[],
            layout: Some(&layout),
        },
    );
    assert_eq!(kinds(&flags), vec![HallucinationKind::EmptyCellWithContent]);
    assert_eq!(flags[0].affected_field, Some(FieldId::ExhaustTempF));
}

#[test]
fn empty_cell_named_by_hour_and_label_is_flagged() {
    let config = config();
    let detector = AntiHallucinationDetector::new(&config);
    let layout = TokenLayout {
        tokens: Vec::new(),
        cells: vec![
            CellRegion {
                bbox: bbox(80.0, 25.0, 80.0, 20.0),
                empty: true,
                hour: Some("02:00".to_string()),
                label: Some("Temp".to_string()),
            },
            CellRegion {
                bbox: bbox(180.0, 25.0, 80.0, 20.0),
                empty: true,
                hour: Some("03:00".to_string()),
                label: Some("Flow".to_string()),
            },
        ],
    };

    let flags = detector.detect(
        &reading("02:00", vec![temp(1450.0), vapor(2520.0)]),
        &DetectionContext {
            siblings: &[],
            layout: Some(&layout),
        },
    );
    assert_eq!(kinds(&flags), vec![HallucinationKind::EmptyCellWithContent]);
    assert_eq!(flags[0].affected_field, Some(FieldId::ExhaustTempF));
}

#[test]
fn token_outside_the_column_band_is_misaligned() {
    let config = config();
    let detector = AntiHallucinationDetector::new(&config);
    let layout = TokenLayout {
        tokens: vec![
            token("02:00", 100.0, 0.0),
            token("03:00", 200.0, 0.0),
            token("1450", 400.0, 30.0),
        ],
        cells: Vec::new(),
    };

    let flags = detector.detect(
        &reading("02:00", vec![temp(1450.0)]),
        &DetectionContext {
            siblings: &[],
            layout: Some(&layout),
        },
    );
    assert_eq!(kinds(&flags), vec![HallucinationKind::SpatialMisalignment]);
}

#[test]
fn high_confidence_with_warnings_is_inconsistent() {
    let config = config();
    let detector = AntiHallucinationDetector::new(&config);
    let mut questioned = field(FieldId::TankPressurePsi, FieldType::Pressure, 75.0, 0.97);
    questioned.validation = ValidationResult::from_checks(
        vec![ValidationCheck::new(
            "field:tankPressurePsi",
            0.97,
            Vec::new(),
            vec!["tankPressurePsi: value 75 outside expected range 0.1-50".to_string()],
        )],
        false,
        0.8,
    );

    let flags = detector.detect(&reading("02:00", vec![questioned]), &DetectionContext::default());
    assert_eq!(kinds(&flags), vec![HallucinationKind::ConfidenceInconsistency]);
}

#[test]
fn confident_field_already_flagged_is_inconsistent() {
    let config = config();
    let detector = AntiHallucinationDetector::new(&config);
    let target = reading(
        "03:00",
        vec![field(FieldId::ExhaustTempF, FieldType::Temperature, 1300.0, 0.97)],
    );
    let siblings = vec![
        reading("01:00", vec![temp(1100.0)]),
        reading("02:00", vec![temp(1200.0)]),
        reading("04:00", vec![temp(1400.0)]),
    ];

    let flags = detector.detect(
        &target,
        &DetectionContext {
            siblings: &siblings,
            layout: None,
        },
    );
    assert_eq!(
        kinds(&flags),
        vec![
            HallucinationKind::PatternAnomaly,
            HallucinationKind::ConfidenceInconsistency
        ]
    );
    assert_eq!(flags[1].affected_field, Some(FieldId::ExhaustTempF));
}

#[test]
fn round_values_are_reported_per_field() {
    let reading = reading(
        "02:00",
        vec![
            temp(1450.0),
            vapor(2500.0),
            field(FieldId::DilutionAirFpm, FieldType::FlowRate, 1463.0, 0.9),
            field(FieldId::TankPressurePsi, FieldType::Pressure, 12.5, 0.9),
        ],
    );

    assert_eq!(
        round_number_fields(&reading),
        vec![FieldId::ExhaustTempF, FieldId::VaporInletFpm]
    );
    assert!(is_round(2000.0));
    assert!(!is_round(0.0));
}
