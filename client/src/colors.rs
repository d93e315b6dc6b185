use worldpulse_shared::marker::Rgb;

/// Format RGBA as a CSS color string.
pub fn rgba_css(r: u8, g: u8, b: u8, a: f64) -> String {
    format!("rgba({r},{g},{b},{a})")
}

pub fn rgb_css((r, g, b): Rgb) -> String {
    format!("rgb({r},{g},{b})")
}

pub fn fill_css((r, g, b): Rgb, opacity: f64) -> String {
    rgba_css(r, g, b, opacity.clamp(0.0, 1.0))
}

/// Map background shown beneath and between tiles.
pub const BACKGROUND: &str = "#242f3e";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_fill_is_translucent_rgba() {
        assert_eq!(fill_css((0, 255, 0), 0.8), "rgba(0,255,0,0.8)");
        assert_eq!(fill_css((255, 0, 0), 3.0), "rgba(255,0,0,1)");
    }

    #[test]
    fn opaque_rgb() {
        assert_eq!(rgb_css((0, 0, 255)), "rgb(0,0,255)");
    }
}
