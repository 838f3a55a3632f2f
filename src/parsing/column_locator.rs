use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::normalize::{compile_builtin, fix_glyphs};
use crate::config::ParsingThresholds;
use crate::error::ParseFault;
use crate::model::{ColumnBounds, HourLabel, TextPosition};

/// Best position per hour label, ordered by hour.
pub type HourPositions = BTreeMap<HourLabel, TextPosition>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnLayout {
    /// Several hour labels share the header line; values sit underneath.
    Tabular,
    /// One hour label per line with its values on the following lines.
    Stacked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLine {
    pub line: usize,
    pub text: String,
}

/// Text region belonging to one hour column. Tabular lines are rebuilt as
/// "<row label> <cell>" so labelled matchers still see their label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnText {
    pub label: HourLabel,
    pub layout: ColumnLayout,
    pub bounds: ColumnBounds,
    pub header_line: usize,
    pub lines: Vec<ColumnLine>,
}

#[derive(Debug, Clone)]
pub struct ColumnLocator {
    colon_form: Regex,
    confusable_form: Regex,
    digit_run: Regex,
    clean_form: Regex,
    header_token: Regex,
    thresholds: ParsingThresholds,
}

impl ColumnLocator {
    pub fn new(thresholds: ParsingThresholds) -> Result<Self, ParseFault> {
        Ok(Self {
            colon_form: compile_builtin(
                "colon hour label",
                r"\b(?P<hour>\d{1,2}):(?P<minute>\d{2})\b",
            )?,
            confusable_form: compile_builtin(
                "confusable hour label",
                r"\b(?P<hour>[0-9OoIl]{1,2}):(?P<minute>[0-9OoIl]{2})\b",
            )?,
            digit_run: compile_builtin("digit-run hour label", r"\b(?P<hour>\d{2})(?P<minute>\d{2})\b")?,
            clean_form: compile_builtin("clean hour label", r"^\d{2}:\d{2}$")?,
            header_token: compile_builtin("header token", r"^(?:\d{1,2}:\d{2}|\d{4})$")?,
            thresholds,
        })
    }

    /// Finds every hour label in normalized text. Duplicates keep the most
    /// confident occurrence, the earliest one on ties.
    pub fn locate(&self, text: &str) -> HourPositions {
        let mut positions = HourPositions::new();
        let mut line_offset = 0usize;

        for (line_index, line) in text.split('\n').enumerate() {
            let header_row = self.is_header_row(line);
            let patterns = [
                (&self.colon_form, false),
                (&self.confusable_form, false),
                (&self.digit_run, true),
            ];

            for (pattern, needs_header_context) in patterns {
                for captures in pattern.captures_iter(line) {
                    let Some(whole) = captures.get(0) else {
                        continue;
                    };
                    let (Some(hour), Some(minute)) = (captures.name("hour"), captures.name("minute"))
                    else {
                        continue;
                    };

                    let column = line[..whole.start()].chars().count();
                    if needs_header_context && !header_row {
                        continue;
                    }
                    if !whole.as_str().chars().any(|ch| ch.is_ascii_digit()) {
                        continue;
                    }

                    let (Ok(hour), Ok(minute)) = (
                        fix_glyphs(hour.as_str()).parse::<u8>(),
                        fix_glyphs(minute.as_str()).parse::<u8>(),
                    ) else {
                        continue;
                    };
                    let Some(label) = HourLabel::new(hour, minute) else {
                        continue;
                    };

                    let mut confidence = self.thresholds.position_base_confidence;
                    if self.clean_form.is_match(whole.as_str()) {
                        confidence += self.thresholds.clean_label_bonus;
                    }
                    if column == 0 {
                        confidence += self.thresholds.line_start_bonus;
                    }
                    let position = TextPosition {
                        line: line_index,
                        column,
                        absolute_position: line_offset + column,
                        confidence: confidence.min(1.0),
                    };

                    let replace = positions
                        .get(&label)
                        .map(|existing| position.confidence > existing.confidence)
                        .unwrap_or(true);
                    if replace {
                        positions.insert(label, position);
                    }
                }
            }

            line_offset += line.chars().count() + 1;
        }

        debug!(hours = positions.len(), "located hour labels");
        positions
    }

    /// Exact label wins; otherwise the closest label scoring above the fuzzy
    /// threshold, earliest in the text on ties.
    pub fn resolve(
        &self,
        positions: &HourPositions,
        target: HourLabel,
    ) -> Option<(HourLabel, TextPosition)> {
        if let Some(position) = positions.get(&target) {
            return Some((target, *position));
        }

        positions
            .iter()
            .map(|(label, position)| (self.fuzzy_score(*label, target), *label, *position))
            .filter(|(score, _, _)| *score > self.thresholds.fuzzy_match_threshold)
            .max_by(|left, right| {
                left.0
                    .total_cmp(&right.0)
                    .then_with(|| right.2.absolute_position.cmp(&left.2.absolute_position))
            })
            .map(|(score, label, position)| {
                debug!(requested = %target, matched = %label, score, "fuzzy hour match");
                (label, position)
            })
    }

    pub fn fuzzy_score(&self, candidate: HourLabel, target: HourLabel) -> f64 {
        let hour_delta = f64::from(candidate.hour.abs_diff(target.hour));
        let minute_delta = f64::from(candidate.minute.abs_diff(target.minute));
        1.0 - (hour_delta * self.thresholds.fuzzy_hour_penalty
            + minute_delta * self.thresholds.fuzzy_minute_penalty)
    }

    /// Midpoints to the nearest labels on the same header line, or a fixed
    /// width on a side without a neighbour.
    pub fn column_bounds(&self, target: &TextPosition, positions: &HourPositions) -> ColumnBounds {
        let columns = header_columns(target.line, positions);
        let left = columns.iter().copied().filter(|column| *column < target.column).max();
        let right = columns.iter().copied().filter(|column| *column > target.column).min();
        let edge = self.thresholds.edge_column_width;

        ColumnBounds {
            start: left
                .map(|column| (column + target.column) / 2)
                .unwrap_or_else(|| target.column.saturating_sub(edge)),
            end: right
                .map(|column| (target.column + column) / 2)
                .unwrap_or(target.column + edge),
        }
    }

    /// Lines from the target header down to the next line carrying any hour
    /// label, cut to the target column. `raw_text` is the text before
    /// normalization, line for line; its spacing places values in rows that
    /// leave a cell blank.
    pub fn column_text(
        &self,
        text: &str,
        raw_text: &str,
        label: HourLabel,
        positions: &HourPositions,
    ) -> Option<ColumnText> {
        let target = positions.get(&label)?;
        let lines = text.split('\n').collect::<Vec<&str>>();
        let raw_lines = raw_text.lines().collect::<Vec<&str>>();
        let header_lines = positions
            .values()
            .map(|position| position.line)
            .collect::<BTreeSet<usize>>();
        let end_line = header_lines
            .range(target.line + 1..)
            .next()
            .copied()
            .unwrap_or(lines.len());

        let columns = header_columns(target.line, positions);
        let layout = if columns.len() > 1 {
            ColumnLayout::Tabular
        } else {
            ColumnLayout::Stacked
        };
        let bounds = self.column_bounds(target, positions);
        let target_index = columns.iter().position(|column| *column == target.column);
        let raw_header = match layout {
            ColumnLayout::Tabular => raw_lines
                .get(target.line)
                .and_then(|line| RawHeader::from_line(line, columns.len())),
            ColumnLayout::Stacked => None,
        };

        let mut column_lines = Vec::new();
        for line_index in target.line..end_line.min(lines.len()) {
            let line = lines[line_index];
            let text = match layout {
                ColumnLayout::Stacked => line.trim().to_string(),
                ColumnLayout::Tabular if line_index == target.line => {
                    tabular_header_cell(line, &bounds, &columns)
                }
                ColumnLayout::Tabular => tabular_cell(
                    line,
                    raw_lines.get(line_index).copied(),
                    raw_header.as_ref(),
                    columns.len(),
                    target_index,
                ),
            };
            if !text.is_empty() {
                column_lines.push(ColumnLine {
                    line: line_index,
                    text,
                });
            }
        }

        Some(ColumnText {
            label,
            layout,
            bounds,
            header_line: target.line,
            lines: column_lines,
        })
    }

    fn is_header_row(&self, line: &str) -> bool {
        let mut tokens = line.split_whitespace().peekable();
        tokens.peek().is_some()
            && tokens.all(|token| {
                self.header_token.is_match(token) && HourLabel::parse(token).is_some()
            })
    }
}

fn header_columns(line: usize, positions: &HourPositions) -> Vec<usize> {
    let mut columns = positions
        .values()
        .filter(|position| position.line == line)
        .map(|position| position.column)
        .collect::<Vec<usize>>();
    columns.sort_unstable();
    columns.dedup();
    columns
}

fn tokens_with_columns(line: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut column = 0usize;
    for token in line.split(' ') {
        if !token.is_empty() {
            tokens.push((column, token));
        }
        column += token.chars().count() + 1;
    }
    tokens
}

fn tabular_header_cell(line: &str, bounds: &ColumnBounds, columns: &[usize]) -> String {
    let first_column = columns.first().copied().unwrap_or(bounds.start);
    tokens_with_columns(line)
        .into_iter()
        .filter(|(column, _)| *column < first_column || bounds.contains(*column))
        .map(|(_, token)| token)
        .collect::<Vec<&str>>()
        .join(" ")
}

// Leading digit-free tokens are the row label; each value is a digit-bearing
// token plus the unit tokens after it. A row with one value per header label
// is read by ordinal. Any other row is placed with the raw spacing, and a row
// that cannot be placed yields no cell for any hour.
fn tabular_cell(
    line: &str,
    raw_line: Option<&str>,
    raw_header: Option<&RawHeader>,
    column_count: usize,
    target_index: Option<usize>,
) -> String {
    let Some(target_index) = target_index else {
        return String::new();
    };
    let tokens = line.split_whitespace().collect::<Vec<&str>>();
    let split = tokens
        .iter()
        .position(|token| has_digit(token))
        .unwrap_or(tokens.len());
    let groups = value_groups(&tokens, split);

    let cell = if groups.len() == column_count {
        groups.get(target_index).cloned()
    } else {
        raw_line
            .zip(raw_header)
            .and_then(|(raw_line, header)| {
                header.place(raw_line, tokens.len(), split, &groups, target_index)
            })
    };
    let Some(cell) = cell else {
        return String::new();
    };

    tokens[..split]
        .iter()
        .chain(&tokens[cell])
        .copied()
        .collect::<Vec<&str>>()
        .join(" ")
}

fn value_groups(tokens: &[&str], split: usize) -> Vec<Range<usize>> {
    let mut groups: Vec<Range<usize>> = Vec::new();
    for (index, token) in tokens.iter().enumerate().skip(split) {
        if has_digit(token) {
            groups.push(index..index + 1);
        } else if let Some(group) = groups.last_mut() {
            group.end = index + 1;
        }
    }
    groups
}

/// Header label centres measured on the unnormalized line.
#[derive(Debug, Clone, PartialEq)]
struct RawHeader {
    centres: Vec<f64>,
    first_start: usize,
    half_gap: f64,
}

impl RawHeader {
    fn from_line(line: &str, column_count: usize) -> Option<Self> {
        let spans = token_spans(line);
        let (centres, first_start) = if spans.len() == column_count * 2 && !line.contains(':') {
            // "02 00 03 00"
            let centres = spans
                .chunks(2)
                .map(|pair| (pair[0].start + pair[1].end) as f64 / 2.0)
                .collect::<Vec<f64>>();
            (centres, spans.first()?.start)
        } else if spans.len() >= column_count {
            let labels = &spans[spans.len() - column_count..];
            (
                labels.iter().map(span_centre).collect::<Vec<f64>>(),
                labels.first()?.start,
            )
        } else {
            return None;
        };
        let half_gap = centres
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .fold(f64::INFINITY, f64::min)
            / 2.0;
        half_gap.is_finite().then_some(Self {
            centres,
            first_start,
            half_gap,
        })
    }

    /// Value group sitting under the target label, when every value of the
    /// row sits unambiguously under a distinct label.
    fn place(
        &self,
        raw_line: &str,
        token_count: usize,
        split: usize,
        groups: &[Range<usize>],
        target_index: usize,
    ) -> Option<Range<usize>> {
        let spans = token_spans(raw_line);
        if spans.len() != token_count {
            return None;
        }
        if split > 0 && spans[split - 1].end > self.first_start {
            return None;
        }

        let mut claimed: Vec<Option<Range<usize>>> = vec![None; self.centres.len()];
        for group in groups {
            let centre = span_centre(spans.get(group.start)?);
            let (column, distance) = self
                .centres
                .iter()
                .enumerate()
                .map(|(column, header)| (column, (header - centre).abs()))
                .min_by(|left, right| left.1.total_cmp(&right.1))?;
            if distance > self.half_gap || claimed[column].replace(group.clone()).is_some() {
                debug!(line = raw_line, "row values do not line up with the header");
                return None;
            }
        }
        claimed.get(target_index).cloned().flatten()
    }
}

/// Character ranges of the whitespace-separated tokens of a line.
fn token_spans(line: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = None;
    for (column, ch) in line.chars().chain(std::iter::once(' ')).enumerate() {
        match (ch.is_whitespace(), start) {
            (false, None) => start = Some(column),
            (true, Some(begin)) => {
                spans.push(begin..column);
                start = None;
            }
            _ => {}
        }
    }
    spans
}

fn span_centre(span: &Range<usize>) -> f64 {
    (span.start + span.end) as f64 / 2.0
}

fn has_digit(token: &str) -> bool {
    token.chars().any(|ch| ch.is_ascii_digit())
}
