use gloo_storage::Storage;
use serde::{Deserialize, Serialize};
use worldpulse_shared::{InitialView, MarkerSizing};

const STORAGE_KEY: &str = "worldpulse_settings";

/// Viewer preferences kept in `localStorage`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sizing: MarkerSizing,
    pub last_view: Option<InitialView>,
}

impl Settings {
    pub fn load() -> Self {
        gloo_storage::LocalStorage::get(STORAGE_KEY).unwrap_or_default()
    }

    pub fn save(&self) {
        if let Err(e) = gloo_storage::LocalStorage::set(STORAGE_KEY, self) {
            crate::console::warn(&format!("failed to persist settings: {e}"));
        }
    }

    /// Where the map opens: the last viewed location, else the server default.
    pub fn initial_view(&self, fallback: InitialView) -> InitialView {
        self.last_view
            .filter(|view| {
                view.latitude.is_finite() && view.longitude.is_finite() && view.zoom.is_finite()
            })
            .unwrap_or(fallback)
    }
}
