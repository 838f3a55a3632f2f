use regex::Regex;

use crate::config::{FieldId, FieldType, HallucinationThresholds, ValidationThresholds};
use crate::error::ParseFault;
use crate::geometry::TokenLayout;
use crate::hallucination::{hourly_series, is_perfect_progression, round_number_fields};
use crate::model::{FieldMatch, HallucinationFlag, HourlyReading, ValidationCheck};
use crate::parsing::compile_builtin;

/// Strict raw-value shapes per field type.
#[derive(Debug, Clone)]
pub struct FieldFormats {
    whole: Regex,
    totalizer: Regex,
    decimal: Regex,
    numeric: Regex,
    time: Regex,
    text: Regex,
}

impl FieldFormats {
    pub fn new() -> Result<Self, ParseFault> {
        Ok(Self {
            whole: compile_builtin("whole-number format", r"^\d{1,5}$")?,
            totalizer: compile_builtin("totalizer format", r"^\d{1,9}$")?,
            decimal: compile_builtin("decimal format", r"^\d{1,6}(?:\.\d{1,4})?$")?,
            numeric: compile_builtin("numeric format", r"^-?\d+(?:\.\d+)?$")?,
            time: compile_builtin("time format", r"^\d{1,2}:\d{2}$")?,
            text: compile_builtin("text format", r"^[A-Za-z0-9][A-Za-z0-9 ,.\-]*$")?,
        })
    }

    pub fn for_type(&self, field_type: FieldType) -> &Regex {
        match field_type {
            FieldType::FlowRate | FieldType::Temperature => &self.whole,
            FieldType::Totalizer => &self.totalizer,
            FieldType::Pressure | FieldType::Concentration => &self.decimal,
            FieldType::Numeric => &self.numeric,
            FieldType::Time => &self.time,
            FieldType::Text => &self.text,
        }
    }

    pub fn conforms(&self, field: &FieldMatch) -> bool {
        self.for_type(field.field_type)
            .is_match(field.raw_value.trim())
    }
}

pub fn hallucination_detection(flags: &[HallucinationFlag]) -> ValidationCheck {
    let errors = flags
        .iter()
        .map(|flag| match flag.affected_field {
            Some(field) => format!("{} ({field}): {}", flag.kind.as_str(), flag.description),
            None => format!("{}: {}", flag.kind.as_str(), flag.description),
        })
        .collect::<Vec<String>>();
    let confidence = (1.0 - 0.25 * flags.len() as f64).max(0.0);

    ValidationCheck::new("hallucination_detection", confidence, errors, Vec::new())
}

/// A nonconforming raw value is an error under strict validation and a
/// warning otherwise.
pub fn pattern_conformance(
    reading: &HourlyReading,
    formats: &FieldFormats,
    strict_mode: bool,
) -> ValidationCheck {
    let mut failures = Vec::new();
    for field in reading.field_matches() {
        if !formats.conforms(field) {
            failures.push(format!(
                "{}: raw value '{}' does not match the {} format",
                field.name,
                field.raw_value,
                field.field_type.as_str()
            ));
        }
    }

    let total = reading.field_matches().len();
    let confidence = if total == 0 {
        1.0
    } else {
        (total - failures.len()) as f64 / total as f64
    };

    let (errors, warnings) = if strict_mode {
        (failures, Vec::new())
    } else {
        (Vec::new(), failures)
    };
    ValidationCheck::new("pattern_conformance", confidence, errors, warnings)
}

/// Share of each value token that falls inside the target column band.
/// `None` when the geometry cannot place the target column at all.
pub fn bounding_box_overlap(
    reading: &HourlyReading,
    layout: &TokenLayout,
    thresholds: &ValidationThresholds,
) -> Option<ValidationCheck> {
    let band = layout.column_band(reading.hour_label()?)?;
    let mut warnings = Vec::new();
    let mut overlaps = Vec::new();

    for field in reading.field_matches() {
        let Some(token) = layout.value_token(&field.raw_value, Some(&band)) else {
            warnings.push(format!(
                "{}: value {} has no matching token in the source geometry",
                field.name, field.raw_value
            ));
            overlaps.push(0.0);
            continue;
        };

        let overlap = token.bbox.coverage_by(&band.box_for_row(&token.bbox));
        if overlap < thresholds.min_bbox_overlap {
            warnings.push(format!(
                "{}: value {} overlaps its column by {:.0}%, below {:.0}%",
                field.name,
                field.raw_value,
                overlap * 100.0,
                thresholds.min_bbox_overlap * 100.0
            ));
        }
        overlaps.push(overlap);
    }

    let confidence = if overlaps.is_empty() {
        1.0
    } else {
        overlaps.iter().sum::<f64>() / overlaps.len() as f64
    };
    Some(ValidationCheck::new(
        "bounding_box_overlap",
        confidence,
        Vec::new(),
        warnings,
    ))
}

pub fn confidence_threshold(
    reading: &HourlyReading,
    thresholds: &ValidationThresholds,
    strict_mode: bool,
) -> ValidationCheck {
    let floor = thresholds.confidence_floor;
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if reading.is_empty() {
        errors.push("no fields were extracted".to_string());
    } else if reading.overall_confidence() < floor {
        let message = format!(
            "overall confidence {:.2} is below {floor:.2}",
            reading.overall_confidence()
        );
        if strict_mode {
            errors.push(message);
        } else {
            warnings.push(message);
        }
    }

    for field in reading.field_matches() {
        if field.confidence < floor {
            warnings.push(format!(
                "{}: confidence {:.2} is below {floor:.2}",
                field.name, field.confidence
            ));
        }
    }

    ValidationCheck::new(
        "confidence_threshold",
        reading.overall_confidence(),
        errors,
        warnings,
    )
}

pub fn business_rules(reading: &HourlyReading, thresholds: &ValidationThresholds) -> ValidationCheck {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if let Some(temp) = reading.numeric(FieldId::ExhaustTempF) {
        if temp < thresholds.exhaust_temp_min {
            errors.push(format!(
                "{}: exhaust temperature {temp} is below {}",
                FieldId::ExhaustTempF,
                thresholds.exhaust_temp_min
            ));
        } else if temp > thresholds.exhaust_temp_max {
            warnings.push(format!(
                "{}: exhaust temperature {temp} is above {}",
                FieldId::ExhaustTempF,
                thresholds.exhaust_temp_max
            ));
        }
    }

    if let Some(pressure) = reading.numeric(FieldId::TankPressurePsi) {
        if pressure <= 0.0 {
            errors.push(format!(
                "{}: pressure must be positive",
                FieldId::TankPressurePsi
            ));
        } else if pressure > thresholds.pressure_max {
            warnings.push(format!(
                "{}: pressure {pressure} is above {}",
                FieldId::TankPressurePsi,
                thresholds.pressure_max
            ));
        }
    }

    if let (Some(inlet), Some(dilution)) = (
        reading.numeric(FieldId::VaporInletFpm),
        reading.numeric(FieldId::DilutionAirFpm),
    ) && inlet < dilution
    {
        warnings.push(format!(
            "{}: inlet flow {inlet} is below dilution flow {dilution}",
            FieldId::VaporInletFpm
        ));
    }

    if let (Some(inlet), Some(outlet)) = (
        reading.numeric(FieldId::InletPpm),
        reading.numeric(FieldId::OutletPpm),
    ) && inlet > 0.0
        && outlet > inlet * thresholds.outlet_inlet_ratio_max
    {
        warnings.push(format!(
            "{}: outlet {outlet} exceeds {:.0}% of inlet {inlet}",
            FieldId::OutletPpm,
            thresholds.outlet_inlet_ratio_max * 100.0
        ));
    }

    let confidence = if !errors.is_empty() {
        0.3
    } else if !warnings.is_empty() {
        0.7
    } else {
        1.0
    };
    ValidationCheck::new("business_rules", confidence, errors, warnings)
}

/// Warnings only: these shapes are suspicious, never conclusive.
pub fn pattern_consistency(
    reading: &HourlyReading,
    series: &[HourlyReading],
    sequence: &HallucinationThresholds,
    thresholds: &ValidationThresholds,
) -> ValidationCheck {
    let mut warnings = Vec::new();

    let filled = std::iter::once(reading)
        .chain(series.iter())
        .filter(|entry| !entry.is_empty())
        .count();
    if filled > thresholds.max_filled_hours {
        warnings.push(format!(
            "{filled} hours carry values, more than the {} a sheet holds",
            thresholds.max_filled_hours
        ));
    }

    let varying = reading
        .field_matches()
        .iter()
        .filter(|field| field.field_type.expected_to_vary())
        .collect::<Vec<&FieldMatch>>();
    let values = varying
        .iter()
        .filter_map(|field| field.numeric_value())
        .collect::<Vec<f64>>();
    if values.len() >= sequence.min_sequence_len
        && is_perfect_progression(&values, sequence.sequence_variance_epsilon)
    {
        warnings.push("field values form an evenly spaced sequence".to_string());
    }

    if !series.is_empty() {
        for field in &varying {
            let hourly = hourly_series(reading, series, field.name)
                .into_iter()
                .map(|(_, value)| value)
                .collect::<Vec<f64>>();
            if hourly.len() >= sequence.min_sequence_len
                && is_perfect_progression(&hourly, sequence.sequence_variance_epsilon)
            {
                warnings.push(format!(
                    "{}: values step evenly across {} hours",
                    field.name,
                    hourly.len()
                ));
            }
        }
    }

    let numeric = reading
        .field_matches()
        .iter()
        .filter(|field| field.numeric_value().is_some())
        .count();
    let round = round_number_fields(reading).len();
    if numeric >= sequence.min_sequence_len
        && round as f64 / numeric as f64 >= thresholds.round_value_ratio
    {
        warnings.push(format!(
            "{round} of {numeric} values are round numbers"
        ));
    }

    let confidence = (1.0 - 0.2 * warnings.len() as f64).max(0.0);
    ValidationCheck::new("pattern_consistency", confidence, Vec::new(), warnings)
}
