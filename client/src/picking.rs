use worldpulse_shared::VisualMarker;

use crate::viewport::Viewport;

/// Topmost marker whose disc (stroke included) contains the screen point.
/// Later markers draw over earlier ones, so they win ties.
pub fn pick(markers: &[VisualMarker], vp: &Viewport, sx: f64, sy: f64) -> Option<usize> {
    markers
        .iter()
        .enumerate()
        .rev()
        .find(|(_, marker)| {
            let (mx, my) = vp.lon_lat_to_screen(marker.position.0, marker.position.1);
            let reach = marker.radius_px + marker.stroke_width_px / 2.0;
            let (dx, dy) = (sx - mx, sy - my);
            dx * dx + dy * dy <= reach * reach
        })
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use worldpulse_shared::InitialView;
    use worldpulse_shared::marker::STROKE_COLOR;

    use super::*;

    fn marker(record: usize, lon: f64, lat: f64, radius_px: f64) -> VisualMarker {
        VisualMarker {
            position: (lon, lat),
            fill: (0, 0, 255),
            fill_opacity: 0.8,
            radius_px,
            stroke: STROKE_COLOR,
            stroke_width_px: 1.0,
            record,
        }
    }

    fn viewport() -> Viewport {
        Viewport::centered(&InitialView::default(), 800.0, 600.0)
    }

    #[test]
    fn picks_marker_under_point() {
        let vp = viewport();
        let markers = vec![marker(0, 139.76, 35.68, 5.0)];
        assert_eq!(pick(&markers, &vp, 400.0, 300.0), Some(0));
        assert_eq!(pick(&markers, &vp, 405.0, 300.0), Some(0));
        assert_eq!(pick(&markers, &vp, 406.0, 300.0), None);
    }

    #[test]
    fn overlapping_markers_resolve_to_topmost() {
        let vp = viewport();
        let markers = vec![
            marker(0, 139.76, 35.68, 20.0),
            marker(1, 139.76, 35.68, 5.0),
        ];
        assert_eq!(pick(&markers, &vp, 400.0, 300.0), Some(1));
        assert_eq!(pick(&markers, &vp, 412.0, 300.0), Some(0));
    }

    #[test]
    fn empty_layer_picks_nothing() {
        assert_eq!(pick(&[], &viewport(), 0.0, 0.0), None);
    }
}
