//! Per-token geometry supplied by the upstream OCR engine.
//!
//! Everything here is optional input: checks that need geometry are skipped
//! when the caller has none.

use serde::{Deserialize, Serialize};

use crate::model::HourLabel;
use crate::parsing::standalone_occurrences;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn centroid(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.right() && y >= self.y && y <= self.bottom()
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f64 {
        let width = self.right().min(other.right()) - self.x.max(other.x);
        let height = self.bottom().min(other.bottom()) - self.y.max(other.y);
        if width <= 0.0 || height <= 0.0 {
            0.0
        } else {
            width * height
        }
    }

    /// Share of this box that lies inside `other`.
    pub fn coverage_by(&self, other: &BoundingBox) -> f64 {
        let area = self.area();
        if area <= 0.0 {
            return 0.0;
        }
        (self.intersection_area(other) / area).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrToken {
    pub text: String,
    pub bbox: BoundingBox,
}

/// A table cell as judged by the OCR engine. `empty` means the engine saw no
/// ink in the region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRegion {
    pub bbox: BoundingBox,
    #[serde(default)]
    pub empty: bool,
    #[serde(default)]
    pub hour: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnBand {
    pub left: f64,
    pub right: f64,
}

impl ColumnBand {
    pub fn width(&self) -> f64 {
        (self.right - self.left).max(0.0)
    }

    pub fn center(&self) -> f64 {
        (self.left + self.right) / 2.0
    }

    pub fn contains_x(&self, x: f64, tolerance: f64) -> bool {
        let slack = self.width() * tolerance;
        x >= self.left - slack && x <= self.right + slack
    }

    /// The band clipped to the vertical extent of `row`.
    pub fn box_for_row(&self, row: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x: self.left,
            y: row.y,
            width: self.width(),
            height: row.height,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenLayout {
    #[serde(default)]
    pub tokens: Vec<OcrToken>,
    #[serde(default)]
    pub cells: Vec<CellRegion>,
}

impl TokenLayout {
    pub fn has_tokens(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Horizontal band of an hour column, from the midpoints between the
    /// centroids of neighbouring hour-label tokens. A side without a
    /// neighbour mirrors the other side, or spans 1.5 label widths when the
    /// label stands alone.
    pub fn column_band(&self, hour: HourLabel) -> Option<ColumnBand> {
        let mut labels = self
            .tokens
            .iter()
            .filter(|token| token.text.contains(':'))
            .filter_map(|token| {
                HourLabel::parse(&token.text)
                    .map(|label| (label, token.bbox.centroid().0, token.bbox.width))
            })
            .collect::<Vec<(HourLabel, f64, f64)>>();
        labels.sort_by(|left, right| left.1.total_cmp(&right.1));
        labels.dedup_by_key(|(label, _, _)| *label);

        let index = labels.iter().position(|(label, _, _)| *label == hour)?;
        let (_, center, width) = labels[index];
        let left = index
            .checked_sub(1)
            .map(|previous| (labels[previous].1 + center) / 2.0);
        let right = labels.get(index + 1).map(|next| (center + next.1) / 2.0);

        let (left, right) = match (left, right) {
            (Some(left), Some(right)) => (left, right),
            (Some(left), None) => (left, center + (center - left)),
            (None, Some(right)) => (center - (right - center), right),
            (None, None) => (center - width * 1.5, center + width * 1.5),
        };
        Some(ColumnBand { left, right })
    }

    /// The token carrying `raw_value`, preferring the one closest to the
    /// centre of `band` when several tokens hold the same text.
    pub fn value_token(&self, raw_value: &str, band: Option<&ColumnBand>) -> Option<&OcrToken> {
        let mut candidates = self
            .tokens
            .iter()
            .filter(|token| standalone_occurrences(&token.text, raw_value) > 0);

        match band {
            Some(band) => candidates.min_by(|left, right| {
                let left_distance = (left.bbox.centroid().0 - band.center()).abs();
                let right_distance = (right.bbox.centroid().0 - band.center()).abs();
                left_distance.total_cmp(&right_distance)
            }),
            None => candidates.next(),
        }
    }

    pub fn cell_at(&self, x: f64, y: f64) -> Option<&CellRegion> {
        self.cells.iter().find(|cell| cell.bbox.contains_point(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn coverage_is_share_of_token_inside_band() {
        let token = bbox(0.0, 0.0, 10.0, 10.0);
        let band = bbox(5.0, 0.0, 100.0, 10.0);
        assert!((token.coverage_by(&band) - 0.5).abs() < 1e-9);
        assert_eq!(token.coverage_by(&bbox(50.0, 0.0, 5.0, 5.0)), 0.0);
    }

    #[test]
    fn column_band_uses_neighbour_midpoints() {
        let layout = TokenLayout {
            tokens: vec![
                token("02:00", 100.0, 0.0),
                token("03:00", 200.0, 0.0),
                token("04:00", 300.0, 0.0),
            ],
            cells: Vec::new(),
        };

        let band = layout.column_band(HourLabel::new(3, 0).unwrap()).unwrap();
        assert_eq!(band.left, 170.0);
        assert_eq!(band.right, 270.0);

        let first = layout.column_band(HourLabel::new(2, 0).unwrap()).unwrap();
        assert_eq!(first.left, 70.0);
        assert_eq!(first.right, 170.0);
    }

    #[test]
    fn value_token_prefers_the_one_inside_the_band() {
        let layout = TokenLayout {
            tokens: vec![
                token("02:00", 100.0, 0.0),
                token("03:00", 200.0, 0.0),
                token("1450", 200.0, 20.0),
                token("1450", 100.0, 20.0),
            ],
            cells: Vec::new(),
        };

        let band = layout.column_band(HourLabel::new(2, 0).unwrap()).unwrap();
        let found = layout.value_token("1450", Some(&band)).unwrap();
        assert_eq!(found.bbox.x, 100.0);
        assert!(layout.value_token("9999", Some(&band)).is_none());
    }
}
