//! Systemic fabrication signatures that only show up when the whole
//! extraction is looked at together: uniform sequences, repeated sensor
//! values, values read from blank cells, and tokens outside their column.
//!
//! The detector only reports. Deciding pass or fail belongs to
//! [`crate::validation::ValidationPipeline`].

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::{FieldId, FieldType, LogParsingConfig};
use crate::geometry::TokenLayout;
use crate::model::{FieldMatch, HallucinationFlag, HallucinationKind, HourLabel, HourlyReading};

/// Everything besides the reading itself that the detector may look at.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectionContext<'a> {
    /// Readings for the other hours of the same sheet.
    pub siblings: &'a [HourlyReading],
    pub layout: Option<&'a TokenLayout>,
}

pub struct AntiHallucinationDetector<'a> {
    config: &'a LogParsingConfig,
}

impl<'a> AntiHallucinationDetector<'a> {
    pub fn new(config: &'a LogParsingConfig) -> Self {
        Self { config }
    }

    pub fn detect(
        &self,
        reading: &HourlyReading,
        context: &DetectionContext<'_>,
    ) -> Vec<HallucinationFlag> {
        let mut flags = Vec::new();

        self.check_reading_sequence(reading, &mut flags);
        self.check_hourly_series(reading, context.siblings, &mut flags);
        self.check_sibling_deviation(reading, context.siblings, &mut flags);
        if let Some(layout) = context.layout {
            self.check_layout(reading, layout, &mut flags);
        }
        self.check_confidence(reading, &mut flags);

        debug!(
            hour = %reading.inspection_time(),
            flags = flags.len(),
            "hallucination detection finished"
        );
        flags
    }

    fn check_reading_sequence(&self, reading: &HourlyReading, flags: &mut Vec<HallucinationFlag>) {
        let values = reading
            .field_matches()
            .iter()
            .filter(|field| field.field_type.expected_to_vary())
            .filter_map(FieldMatch::numeric_value)
            .collect::<Vec<f64>>();

        if values.len() >= self.config.hallucination.min_sequence_len
            && is_perfect_progression(&values, self.config.hallucination.sequence_variance_epsilon)
        {
            flags.push(HallucinationFlag::new(
                HallucinationKind::PatternAnomaly,
                format!(
                    "values {} form a perfect arithmetic progression",
                    format_values(&values)
                ),
                None,
            ));
        }
    }

    fn check_hourly_series(
        &self,
        reading: &HourlyReading,
        siblings: &[HourlyReading],
        flags: &mut Vec<HallucinationFlag>,
    ) {
        if siblings.is_empty() {
            return;
        }
        let thresholds = &self.config.hallucination;

        for field in reading.field_matches() {
            if !field.field_type.expected_to_vary() || field.numeric_value().is_none() {
                continue;
            }

            let series = hourly_series(reading, siblings, field.name);
            let values = series.iter().map(|(_, value)| *value).collect::<Vec<f64>>();

            if values.len() >= thresholds.min_sequence_len
                && is_perfect_progression(&values, thresholds.sequence_variance_epsilon)
            {
                flags.push(HallucinationFlag::new(
                    HallucinationKind::PatternAnomaly,
                    format!(
                        "{} steps evenly across hours: {}",
                        field.name,
                        format_values(&values)
                    ),
                    Some(field.name),
                ));
                continue;
            }

            let sensor = matches!(
                field.field_type,
                FieldType::Temperature | FieldType::Concentration
            );
            if sensor
                && let Some(label) = reading.hour_label()
                && let Some(run) = repeated_run_through(&series, label)
                && run >= thresholds.min_repeated_hours
            {
                flags.push(HallucinationFlag::new(
                    HallucinationKind::PerfectSequence,
                    format!(
                        "{} holds {} unchanged for {run} consecutive hours",
                        field.name, field.raw_value
                    ),
                    Some(field.name),
                ));
            }
        }
    }

    fn check_sibling_deviation(
        &self,
        reading: &HourlyReading,
        siblings: &[HourlyReading],
        flags: &mut Vec<HallucinationFlag>,
    ) {
        for field in reading.field_matches() {
            let Some(value) = field.numeric_value() else {
                continue;
            };
            let Some(range) = self
                .config
                .pattern(field.name)
                .and_then(|pattern| pattern.expected_range)
            else {
                continue;
            };

            let mut others = siblings
                .iter()
                .filter_map(|sibling| sibling.numeric(field.name))
                .collect::<Vec<f64>>();
            if others.len() < 2 {
                continue;
            }
            let Some(center) = median(&mut others) else {
                continue;
            };

            let limit = range.span() * self.config.hallucination.realistic_deviation_ratio;
            if (value - center).abs() > limit {
                flags.push(HallucinationFlag::new(
                    HallucinationKind::PatternAnomaly,
                    format!(
                        "{} value {value} deviates from the other hours (median {center}) by more than {limit}",
                        field.name
                    ),
                    Some(field.name),
                ));
            }
        }
    }

    fn check_layout(
        &self,
        reading: &HourlyReading,
        layout: &TokenLayout,
        flags: &mut Vec<HallucinationFlag>,
    ) {
        let hour = reading.hour_label();
        let band = hour.and_then(|label| layout.column_band(label));
        let mut blank = BTreeSet::new();

        for field in reading.field_matches() {
            let Some(token) = layout.value_token(&field.raw_value, band.as_ref()) else {
                continue;
            };
            let (x, y) = token.bbox.centroid();

            if layout.cell_at(x, y).is_some_and(|cell| cell.empty) {
                blank.insert(field.name);
                flags.push(HallucinationFlag::new(
                    HallucinationKind::EmptyCellWithContent,
                    format!(
                        "{} value {} was read from a cell marked empty",
                        field.name, field.raw_value
                    ),
                    Some(field.name),
                ));
            }

            if let Some(band) = band
                && !band.contains_x(x, self.config.hallucination.misalignment_tolerance)
            {
                flags.push(HallucinationFlag::new(
                    HallucinationKind::SpatialMisalignment,
                    format!(
                        "{} value {} sits at x={x:.1}, outside column band {:.1}-{:.1}",
                        field.name, field.raw_value, band.left, band.right
                    ),
                    Some(field.name),
                ));
            }
        }

        let Some(hour) = hour else {
            return;
        };
        for cell in layout.cells.iter().filter(|cell| cell.empty) {
            let same_hour = cell
                .hour
                .as_deref()
                .and_then(HourLabel::parse)
                .is_some_and(|label| label == hour);
            let Some(label) = cell.label.as_deref() else {
                continue;
            };
            if !same_hour {
                continue;
            }

            for field in reading.field_matches() {
                let names_field = self
                    .config
                    .pattern(field.name)
                    .is_some_and(|pattern| pattern.names_label(label));
                if names_field && blank.insert(field.name) {
                    flags.push(HallucinationFlag::new(
                        HallucinationKind::EmptyCellWithContent,
                        format!(
                            "{} has value {} but the {hour} {label} cell is marked empty",
                            field.name, field.raw_value
                        ),
                        Some(field.name),
                    ));
                }
            }
        }
    }

    /// Runs last: a confident field is inconsistent when its own validation or
    /// an earlier flag already casts doubt on it.
    fn check_confidence(&self, reading: &HourlyReading, flags: &mut Vec<HallucinationFlag>) {
        let flagged = flags
            .iter()
            .filter_map(|flag| flag.affected_field)
            .collect::<BTreeSet<FieldId>>();
        let reading_flagged = flags.iter().any(|flag| flag.affected_field.is_none());
        let numeric = reading
            .field_matches()
            .iter()
            .filter_map(FieldMatch::numeric_value)
            .collect::<Vec<f64>>();
        let all_hundreds = numeric.len() >= self.config.hallucination.min_sequence_len
            && numeric.iter().all(|value| ends_in(*value, 100));

        for field in reading.field_matches() {
            if field.confidence < self.config.hallucination.high_confidence {
                continue;
            }
            let cause = if !field.validation.errors.is_empty()
                || !field.validation.warnings.is_empty()
            {
                "its own validation raised issues"
            } else if flagged.contains(&field.name) {
                "another check flagged the same field"
            } else if reading_flagged && field.numeric_value().is_some_and(is_round) {
                "its round value belongs to a flagged sequence"
            } else if all_hundreds {
                "every value in the reading is a multiple of 100"
            } else {
                continue;
            };
            flags.push(HallucinationFlag::new(
                HallucinationKind::ConfidenceInconsistency,
                format!(
                    "{} carries confidence {:.2} although {cause}",
                    field.name, field.confidence
                ),
                Some(field.name),
            ));
        }
    }
}

/// Fields whose value ends in 00, 50 or 0. Not disqualifying on its own.
pub fn round_number_fields(reading: &HourlyReading) -> Vec<FieldId> {
    reading
        .field_matches()
        .iter()
        .filter(|field| field.numeric_value().is_some_and(is_round))
        .map(|field| field.name)
        .collect()
}

pub fn is_round(value: f64) -> bool {
    ends_in(value, 100) || ends_in(value, 50) || ends_in(value, 10)
}

fn ends_in(value: f64, step: i64) -> bool {
    if value.fract() != 0.0 || value == 0.0 {
        return false;
    }
    (value as i64) % step == 0
}

/// True when successive differences are non-zero and all but identical.
/// Constant runs do not count: set points legitimately hold a value.
pub fn is_perfect_progression(values: &[f64], epsilon: f64) -> bool {
    if values.len() < 3 {
        return false;
    }

    let diffs = values
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect::<Vec<f64>>();
    let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
    if mean.abs() < epsilon {
        return false;
    }

    let variance =
        diffs.iter().map(|diff| (diff - mean).powi(2)).sum::<f64>() / diffs.len() as f64;
    variance < epsilon
}

/// `(hour, value)` pairs for one field across the reading and its siblings,
/// in hour order.
pub(crate) fn hourly_series(
    reading: &HourlyReading,
    siblings: &[HourlyReading],
    field: FieldId,
) -> Vec<(HourLabel, f64)> {
    let mut series = std::iter::once(reading)
        .chain(siblings.iter())
        .filter_map(|entry| Some((entry.hour_label()?, entry.numeric(field)?)))
        .collect::<Vec<(HourLabel, f64)>>();
    series.sort_by(|left, right| left.0.cmp(&right.0));
    series.dedup_by_key(|(label, _)| *label);
    series
}

// Length of the run of equal values that contains `label`.
fn repeated_run_through(series: &[(HourLabel, f64)], label: HourLabel) -> Option<usize> {
    let index = series.iter().position(|(hour, _)| *hour == label)?;
    let value = series[index].1;

    let before = series[..index]
        .iter()
        .rev()
        .take_while(|(_, other)| *other == value)
        .count();
    let after = series[index + 1..]
        .iter()
        .take_while(|(_, other)| *other == value)
        .count();
    Some(before + 1 + after)
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let middle = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[middle - 1] + values[middle]) / 2.0)
    } else {
        Some(values[middle])
    }
}

fn format_values(values: &[f64]) -> String {
    values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<String>>()
        .join(", ")
}
