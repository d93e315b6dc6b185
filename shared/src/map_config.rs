use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitialView {
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: f64,
}

impl Default for InitialView {
    fn default() -> Self {
        Self {
            latitude: 35.68,
            longitude: 139.76,
            zoom: 5.0,
        }
    }
}

/// Base-map settings served by `GET /api/map-config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    pub api_key: String,
    /// Raster tile template containing `{z}`, `{x}`, `{y}` and optionally `{key}`.
    pub tile_url_template: String,
    #[serde(default)]
    pub attribution: String,
    #[serde(default)]
    pub initial_view: InitialView,
}

impl MapConfig {
    pub fn tile_url(&self, z: u32, x: u32, y: u32) -> String {
        self.tile_url_template
            .replace("{z}", &z.to_string())
            .replace("{x}", &x.to_string())
            .replace("{y}", &y.to_string())
            .replace("{key}", &self.api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_url_substitutes_all_placeholders() {
        let config = MapConfig {
            api_key: "abc123".into(),
            tile_url_template: "https://tiles.example.com/{z}/{x}/{y}.png?key={key}".into(),
            attribution: String::new(),
            initial_view: InitialView::default(),
        };
        assert_eq!(
            config.tile_url(5, 28, 12),
            "https://tiles.example.com/5/28/12.png?key=abc123"
        );
    }

    #[test]
    fn initial_view_defaults_when_missing() {
        let config: MapConfig = serde_json::from_str(
            r#"{"api_key":"k","tile_url_template":"https://t/{z}/{x}/{y}.png"}"#,
        )
        .expect("config should parse");
        assert_eq!(config.initial_view, InitialView::default());
        assert!(config.attribution.is_empty());
    }
}
