use serde::{Deserialize, Serialize};

use crate::event::EventRecord;

pub type Rgb = (u8, u8, u8);

pub const FAVORABLE_COLOR: Rgb = (0, 255, 0);
pub const UNFAVORABLE_COLOR: Rgb = (255, 0, 0);
pub const NEUTRAL_COLOR: Rgb = (0, 0, 255);
pub const STROKE_COLOR: Rgb = (0, 0, 0);

pub const FAVORABLE_TONE: f64 = 2.0;
pub const UNFAVORABLE_TONE: f64 = -2.0;

pub const FILL_OPACITY: f64 = 0.8;
pub const STROKE_WIDTH_PX: f64 = 1.0;

pub const FIXED_RADIUS_PX: f64 = 5.0;
pub const MENTION_SCALE_FACTOR: f64 = 3.0;
pub const MIN_RADIUS_PX: f64 = 5.0;
pub const MAX_RADIUS_PX: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToneClass {
    Favorable,
    Neutral,
    Unfavorable,
}

impl ToneClass {
    pub fn of(tone: f64) -> Self {
        if tone >= FAVORABLE_TONE {
            Self::Favorable
        } else if tone <= UNFAVORABLE_TONE {
            Self::Unfavorable
        } else {
            Self::Neutral
        }
    }

    pub fn color(self) -> Rgb {
        match self {
            Self::Favorable => FAVORABLE_COLOR,
            Self::Neutral => NEUTRAL_COLOR,
            Self::Unfavorable => UNFAVORABLE_COLOR,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Favorable => "Positive tone (\u{2265} 2)",
            Self::Neutral => "Neutral tone",
            Self::Unfavorable => "Negative tone (\u{2264} -2)",
        }
    }
}

/// How marker radii are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MarkerSizing {
    #[default]
    Fixed,
    /// Area grows with the mention count (square-root radius), clamped.
    ByMentions,
}

pub fn tone_color(tone: f64) -> Rgb {
    ToneClass::of(tone).color()
}

/// `MENTION_SCALE_FACTOR * sqrt(max(mentions, 1))`, clamped to
/// `[MIN_RADIUS_PX, MAX_RADIUS_PX]`. Missing counts size like a single mention.
pub fn mention_radius(mention_count: Option<u32>) -> f64 {
    let mentions = mention_count.unwrap_or(1).max(1) as f64;
    (MENTION_SCALE_FACTOR * mentions.sqrt()).clamp(MIN_RADIUS_PX, MAX_RADIUS_PX)
}

pub fn marker_radius(record: &EventRecord, sizing: MarkerSizing) -> f64 {
    match sizing {
        MarkerSizing::Fixed => FIXED_RADIUS_PX,
        MarkerSizing::ByMentions => mention_radius(record.mention_count),
    }
}

/// Rendered representation of one event.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualMarker {
    /// `(longitude, latitude)`, handed to the drawing surface unprojected.
    pub position: (f64, f64),
    pub fill: Rgb,
    pub fill_opacity: f64,
    pub radius_px: f64,
    pub stroke: Rgb,
    pub stroke_width_px: f64,
    /// Index of the originating record in the set this marker was derived from.
    pub record: usize,
}

pub fn derive_marker(index: usize, record: &EventRecord, sizing: MarkerSizing) -> VisualMarker {
    VisualMarker {
        position: (record.longitude, record.latitude),
        fill: tone_color(record.tone),
        fill_opacity: FILL_OPACITY,
        radius_px: marker_radius(record, sizing),
        stroke: STROKE_COLOR,
        stroke_width_px: STROKE_WIDTH_PX,
        record: index,
    }
}

/// Derive the full marker layer for a record set, preserving order.
pub fn derive_markers(records: &[EventRecord], sizing: MarkerSizing) -> Vec<VisualMarker> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| derive_marker(index, record, sizing))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SqlDate;

    fn record(tone: f64, mention_count: Option<u32>) -> EventRecord {
        EventRecord {
            id: 42,
            date: SqlDate(20250601),
            latitude: 35.68,
            longitude: 139.76,
            source_url: None,
            tone,
            mention_count,
            place_name: None,
        }
    }

    #[test]
    fn tone_thresholds_are_inclusive() {
        assert_eq!(tone_color(2.0), FAVORABLE_COLOR);
        assert_eq!(tone_color(-2.0), UNFAVORABLE_COLOR);
        assert_eq!(tone_color(1.999), NEUTRAL_COLOR);
        assert_eq!(tone_color(-1.999), NEUTRAL_COLOR);
        assert_eq!(tone_color(0.0), NEUTRAL_COLOR);
    }

    #[test]
    fn tone_outside_band_picks_extreme_colors() {
        for tone in [2.01, 5.0, 37.5, f64::MAX] {
            assert_eq!(tone_color(tone), FAVORABLE_COLOR, "tone {tone}");
        }
        for tone in [-2.01, -8.0, -100.0, f64::MIN] {
            assert_eq!(tone_color(tone), UNFAVORABLE_COLOR, "tone {tone}");
        }
    }

    #[test]
    fn missing_and_zero_mentions_size_like_one() {
        let one = mention_radius(Some(1));
        assert_eq!(mention_radius(None), one);
        assert_eq!(mention_radius(Some(0)), one);
    }

    #[test]
    fn mention_radius_is_monotone_and_bounded() {
        let mut previous = 0.0;
        for mentions in (0..5_000).step_by(7).chain([u32::MAX - 1, u32::MAX]) {
            let radius = mention_radius(Some(mentions));
            assert!(radius >= previous, "radius shrank at {mentions}");
            assert!((MIN_RADIUS_PX..=MAX_RADIUS_PX).contains(&radius));
            previous = radius;
        }
        assert_eq!(mention_radius(Some(u32::MAX)), MAX_RADIUS_PX);
    }

    #[test]
    fn mention_radius_grows_with_square_root() {
        let r16 = mention_radius(Some(16));
        let r64 = mention_radius(Some(64));
        assert!((r16 - 12.0).abs() < 1e-9);
        assert!((r64 - 24.0).abs() < 1e-9);
    }

    #[test]
    fn fixed_sizing_ignores_mentions() {
        assert_eq!(
            marker_radius(&record(0.0, Some(900)), MarkerSizing::Fixed),
            FIXED_RADIUS_PX
        );
    }

    #[test]
    fn derived_marker_keeps_position_and_back_reference() {
        let marker = derive_marker(3, &record(-4.0, Some(25)), MarkerSizing::ByMentions);
        assert_eq!(marker.position, (139.76, 35.68));
        assert_eq!(marker.fill, UNFAVORABLE_COLOR);
        assert_eq!(marker.stroke, STROKE_COLOR);
        assert!((marker.radius_px - 15.0).abs() < 1e-9);
        assert_eq!(marker.record, 3);
    }

    #[test]
    fn derive_markers_is_deterministic() {
        let records = vec![record(3.0, None), record(-3.0, Some(4)), record(0.5, Some(100))];
        let first = derive_markers(&records, MarkerSizing::ByMentions);
        let second = derive_markers(&records, MarkerSizing::ByMentions);
        assert_eq!(first, second);
        let indices: Vec<usize> = first.iter().map(|m| m.record).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
