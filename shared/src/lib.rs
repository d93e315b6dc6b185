pub mod event;
pub mod map_config;
pub mod marker;
pub mod title;

pub use event::{ApiError, EventRecord, SqlDate};
pub use map_config::{InitialView, MapConfig};
pub use marker::{MarkerSizing, ToneClass, VisualMarker, derive_marker, derive_markers};
pub use title::{TITLE_PLACEHOLDER, title_from_url};
