use std::f64::consts::PI;

use worldpulse_shared::InitialView;

/// Side of the Web Mercator world at zoom 0, in pixels.
pub const WORLD_SIZE: f64 = 256.0;
/// Latitudes beyond this do not fit the square Mercator world.
pub const MAX_LATITUDE: f64 = 85.051_128_78;

const MIN_SCALE: f64 = 2.0;
const MAX_SCALE: f64 = 262_144.0; // zoom 18
const ZOOM_SENSITIVITY: f64 = 0.002;

/// Project `(longitude, latitude)` to zoom-0 world pixels.
pub fn project(longitude: f64, latitude: f64) -> (f64, f64) {
    let lat = latitude.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let x = (longitude + 180.0) / 360.0 * WORLD_SIZE;
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * WORLD_SIZE;
    (x, y)
}

/// Inverse of [`project`].
pub fn unproject(x: f64, y: f64) -> (f64, f64) {
    let longitude = x / WORLD_SIZE * 360.0 - 180.0;
    let n = PI * (1.0 - 2.0 * y / WORLD_SIZE);
    let latitude = n.sinh().atan().to_degrees();
    (longitude, latitude)
}

/// Pan/zoom transform from world pixels to screen (CSS) pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    pub offset_x: f64,
    pub offset_y: f64,
    pub scale: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            scale: MIN_SCALE,
        }
    }
}

impl Viewport {
    /// Viewport of a `width`x`height` screen centered on `view`.
    pub fn centered(view: &InitialView, width: f64, height: f64) -> Self {
        let mut vp = Self::default();
        vp.center_on(view.latitude, view.longitude, view.zoom, width, height);
        vp
    }

    pub fn center_on(&mut self, latitude: f64, longitude: f64, zoom: f64, width: f64, height: f64) {
        self.scale = 2f64.powf(zoom).clamp(MIN_SCALE, MAX_SCALE);
        let (wx, wy) = project(longitude, latitude);
        self.offset_x = width / 2.0 - wx * self.scale;
        self.offset_y = height / 2.0 - wy * self.scale;
    }

    pub fn zoom(&self) -> f64 {
        self.scale.log2()
    }

    pub fn world_to_screen(&self, wx: f64, wy: f64) -> (f64, f64) {
        (
            wx * self.scale + self.offset_x,
            wy * self.scale + self.offset_y,
        )
    }

    pub fn screen_to_world(&self, sx: f64, sy: f64) -> (f64, f64) {
        (
            (sx - self.offset_x) / self.scale,
            (sy - self.offset_y) / self.scale,
        )
    }

    pub fn lon_lat_to_screen(&self, longitude: f64, latitude: f64) -> (f64, f64) {
        let (wx, wy) = project(longitude, latitude);
        self.world_to_screen(wx, wy)
    }

    /// Zoom toward a focus point (screen coordinates).
    pub fn zoom_at(&mut self, delta: f64, screen_x: f64, screen_y: f64) {
        let factor = (-delta * ZOOM_SENSITIVITY).exp();
        let new_scale = (self.scale * factor).clamp(MIN_SCALE, MAX_SCALE);
        let ratio = new_scale / self.scale;

        // Keep the point under the cursor fixed
        self.offset_x = screen_x - (screen_x - self.offset_x) * ratio;
        self.offset_y = screen_y - (screen_y - self.offset_y) * ratio;
        self.scale = new_scale;
    }

    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.offset_x += dx;
        self.offset_y += dy;
    }

    /// Center and zoom of the current view, for persisting.
    pub fn view(&self, width: f64, height: f64) -> InitialView {
        let (wx, wy) = self.screen_to_world(width / 2.0, height / 2.0);
        let (longitude, latitude) = unproject(wx, wy);
        InitialView {
            latitude,
            longitude,
            zoom: self.zoom(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn projection_corners_and_center() {
        assert_eq!(project(-180.0, 0.0).0, 0.0);
        let (x, y) = project(0.0, 0.0);
        assert!(close(x, 128.0) && close(y, 128.0));
        let (_, top) = project(0.0, MAX_LATITUDE);
        assert!(top.abs() < 1e-3);
        assert_eq!(project(0.0, 89.9), project(0.0, 95.0));
    }

    #[test]
    fn unproject_inverts_project() {
        let (x, y) = project(139.76, 35.68);
        let (lon, lat) = unproject(x, y);
        assert!(close(lon, 139.76) && close(lat, 35.68));
    }

    #[test]
    fn centered_view_puts_location_in_middle() {
        let view = InitialView::default();
        let vp = Viewport::centered(&view, 800.0, 600.0);
        let (sx, sy) = vp.lon_lat_to_screen(view.longitude, view.latitude);
        assert!(close(sx, 400.0) && close(sy, 300.0));
        assert!(close(vp.zoom(), 5.0));

        let back = vp.view(800.0, 600.0);
        assert!(close(back.latitude, view.latitude));
        assert!(close(back.longitude, view.longitude));
    }

    #[test]
    fn zoom_at_keeps_focus_point_fixed() {
        let mut vp = Viewport::centered(&InitialView::default(), 800.0, 600.0);
        let before = vp.screen_to_world(200.0, 150.0);
        vp.zoom_at(-300.0, 200.0, 150.0);
        let after = vp.screen_to_world(200.0, 150.0);
        assert!(close(before.0, after.0) && close(before.1, after.1));
        assert!(vp.zoom() > 5.0);
    }

    #[test]
    fn zoom_is_clamped() {
        let mut vp = Viewport::default();
        vp.zoom_at(1e6, 0.0, 0.0);
        assert_eq!(vp.scale, MIN_SCALE);
        vp.zoom_at(-1e6, 0.0, 0.0);
        assert_eq!(vp.scale, MAX_SCALE);
    }

    #[test]
    fn pan_moves_offset() {
        let mut vp = Viewport::default();
        vp.pan(10.0, -5.0);
        assert_eq!((vp.offset_x, vp.offset_y), (10.0, -5.0));
    }
}
