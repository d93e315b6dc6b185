#![cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use js_sys::Reflect;
use wasm_bindgen::JsCast;
use wasm_bindgen::JsValue;
use wasm_bindgen::prelude::*;
use web_sys::HtmlImageElement;
use worldpulse_shared::MapConfig;

use crate::viewport::{Viewport, WORLD_SIZE};

const MAX_CONCURRENCY: usize = 6;
const MAX_CACHED_TILES: usize = 256;
pub const MAX_TILE_ZOOM: u32 = 18;
const ONLOAD_HANDLE_KEY: &str = "__worldpulseTileOnload";
const ONERROR_HANDLE_KEY: &str = "__worldpulseTileOnerror";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    /// Screen rectangle `(x, y, size)` covered by this tile.
    pub fn screen_rect(&self, vp: &Viewport) -> (f64, f64, f64) {
        let world_span = WORLD_SIZE / f64::from(1u32 << self.z);
        let (sx, sy) = vp.world_to_screen(
            f64::from(self.x) * world_span,
            f64::from(self.y) * world_span,
        );
        (sx, sy, world_span * vp.scale)
    }
}

/// Tile zoom level best matching the viewport scale.
pub fn tile_zoom(vp: &Viewport) -> u32 {
    vp.zoom().round().clamp(0.0, f64::from(MAX_TILE_ZOOM)) as u32
}

/// Tiles covering a `width`x`height` screen, nearest to the center first.
pub fn visible_tiles(vp: &Viewport, width: f64, height: f64) -> Vec<TileCoord> {
    let z = tile_zoom(vp);
    let count = 1u32 << z;
    let world_span = WORLD_SIZE / f64::from(count);

    let (x0, y0) = vp.screen_to_world(0.0, 0.0);
    let (x1, y1) = vp.screen_to_world(width, height);
    let last = f64::from(count - 1);
    let index = |world: f64| (world / world_span).floor().clamp(0.0, last) as u32;

    if x1 <= 0.0 || y1 <= 0.0 || x0 >= WORLD_SIZE || y0 >= WORLD_SIZE {
        return Vec::new();
    }

    let (center_x, center_y) = vp.screen_to_world(width / 2.0, height / 2.0);
    let mut tiles: Vec<TileCoord> = (index(y0)..=index(y1))
        .flat_map(|y| (index(x0)..=index(x1)).map(move |x| TileCoord { z, x, y }))
        .collect();
    tiles.sort_by(|a, b| {
        distance_sq(a, world_span, center_x, center_y)
            .total_cmp(&distance_sq(b, world_span, center_x, center_y))
    });
    tiles
}

fn distance_sq(tile: &TileCoord, span: f64, cx: f64, cy: f64) -> f64 {
    let dx = (f64::from(tile.x) + 0.5) * span - cx;
    let dy = (f64::from(tile.y) + 0.5) * span - cy;
    dx * dx + dy * dy
}

#[derive(Clone)]
enum TileEntry {
    Loading,
    Ready(HtmlImageElement),
    Failed,
}

/// Raster base-map tiles fetched through image elements, a few at a time.
#[derive(Clone)]
pub struct TileLayer {
    inner: Rc<Inner>,
}

struct Inner {
    config: MapConfig,
    entries: RefCell<HashMap<TileCoord, TileEntry>>,
    queue: RefCell<VecDeque<TileCoord>>,
    in_flight: Cell<usize>,
    on_ready: Rc<dyn Fn()>,
}

impl TileLayer {
    /// `on_ready` runs whenever a tile finishes decoding.
    pub fn new(config: MapConfig, on_ready: Rc<dyn Fn()>) -> Self {
        Self {
            inner: Rc::new(Inner {
                config,
                entries: RefCell::new(HashMap::new()),
                queue: RefCell::new(VecDeque::new()),
                in_flight: Cell::new(0),
                on_ready,
            }),
        }
    }

    pub fn attribution(&self) -> &str {
        &self.inner.config.attribution
    }

    pub fn image(&self, coord: &TileCoord) -> Option<HtmlImageElement> {
        match self.inner.entries.borrow().get(coord) {
            Some(TileEntry::Ready(img)) => Some(img.clone()),
            _ => None,
        }
    }

    /// Queue every tile in `wanted` that is not cached yet. Queued tiles no
    /// longer wanted are dropped.
    pub fn request(&self, wanted: &[TileCoord]) {
        let wanted_set: HashSet<TileCoord> = wanted.iter().copied().collect();
        {
            let mut entries = self.inner.entries.borrow_mut();
            let mut queue = self.inner.queue.borrow_mut();
            queue.retain(|coord| {
                let keep = wanted_set.contains(coord);
                if !keep {
                    entries.remove(coord);
                }
                keep
            });
            for coord in wanted {
                if !entries.contains_key(coord) {
                    entries.insert(*coord, TileEntry::Loading);
                    queue.push_back(*coord);
                }
            }
            if entries.len() > MAX_CACHED_TILES {
                entries.retain(|coord, entry| {
                    wanted_set.contains(coord) || matches!(entry, TileEntry::Loading)
                });
            }
        }
        pump_queue(&self.inner);
    }
}

fn pump_queue(inner: &Rc<Inner>) {
    while inner.in_flight.get() < MAX_CONCURRENCY {
        let Some(coord) = inner.queue.borrow_mut().pop_front() else {
            break;
        };
        inner.in_flight.set(inner.in_flight.get() + 1);
        load_tile(inner, coord);
    }
}

fn finish(inner: &Rc<Inner>, coord: TileCoord, entry: TileEntry) {
    let ready = matches!(entry, TileEntry::Ready(_));
    if let Some(slot) = inner.entries.borrow_mut().get_mut(&coord) {
        *slot = entry;
    }
    inner.in_flight.set(inner.in_flight.get().saturating_sub(1));
    if ready {
        (inner.on_ready)();
    }
    pump_queue(inner);
}

fn load_tile(inner: &Rc<Inner>, coord: TileCoord) {
    let img = match HtmlImageElement::new() {
        Ok(img) => img,
        Err(_) => {
            finish(inner, coord, TileEntry::Failed);
            return;
        }
    };

    let img_for_load = img.clone();
    let inner_load = inner.clone();
    let onload = Closure::<dyn FnMut()>::new(move || {
        clear_image_handlers(&img_for_load);
        finish(&inner_load, coord, TileEntry::Ready(img_for_load.clone()));
    });

    let img_for_error = img.clone();
    let inner_error = inner.clone();
    let onerror = Closure::<dyn FnMut()>::new(move || {
        clear_image_handlers(&img_for_error);
        finish(&inner_error, coord, TileEntry::Failed);
    });

    let onload_js = onload.into_js_value();
    let onerror_js = onerror.into_js_value();
    img.set_onload(Some(onload_js.unchecked_ref()));
    img.set_onerror(Some(onerror_js.unchecked_ref()));
    let _ = Reflect::set(
        img.as_ref(),
        &JsValue::from_str(ONLOAD_HANDLE_KEY),
        &onload_js,
    );
    let _ = Reflect::set(
        img.as_ref(),
        &JsValue::from_str(ONERROR_HANDLE_KEY),
        &onerror_js,
    );
    img.set_src(&inner.config.tile_url(coord.z, coord.x, coord.y));
}

fn clear_image_handlers(img: &HtmlImageElement) {
    img.set_onload(None);
    img.set_onerror(None);
    let _ = Reflect::delete_property(img.as_ref(), &JsValue::from_str(ONLOAD_HANDLE_KEY));
    let _ = Reflect::delete_property(img.as_ref(), &JsValue::from_str(ONERROR_HANDLE_KEY));
}

#[cfg(test)]
mod tests {
    use worldpulse_shared::InitialView;

    use super::*;

    #[test]
    fn zoom_follows_viewport_scale() {
        let vp = Viewport::centered(&InitialView::default(), 800.0, 600.0);
        assert_eq!(tile_zoom(&vp), 5);

        let mut far = vp.clone();
        far.zoom_at(-1e6, 0.0, 0.0);
        assert_eq!(tile_zoom(&far), MAX_TILE_ZOOM);
    }

    #[test]
    fn visible_tiles_cover_screen_nearest_first() {
        let vp = Viewport::centered(&InitialView::default(), 800.0, 600.0);
        let tiles = visible_tiles(&vp, 800.0, 600.0);

        // 800x600 at 256px per tile spans 4-5 columns and 3-4 rows.
        assert!((12..=20).contains(&tiles.len()), "got {}", tiles.len());
        assert!(tiles.iter().all(|t| t.z == 5 && t.x < 32 && t.y < 32));

        let (x, y, size) = tiles[0].screen_rect(&vp);
        assert!((size - 256.0).abs() < 1e-9);
        assert!(x <= 400.0 && 400.0 <= x + size);
        assert!(y <= 300.0 && 300.0 <= y + size);
    }

    #[test]
    fn tiles_outside_world_are_skipped() {
        let mut vp = Viewport::centered(&InitialView::default(), 800.0, 600.0);
        vp.pan(1e7, 0.0);
        assert!(visible_tiles(&vp, 800.0, 600.0).is_empty());
    }

    #[test]
    fn screen_rect_scales_with_zoom() {
        let vp = Viewport {
            offset_x: 10.0,
            offset_y: 20.0,
            scale: 4.0,
        };
        let rect = TileCoord { z: 2, x: 1, y: 3 }.screen_rect(&vp);
        assert_eq!(rect, (10.0 + 64.0 * 4.0, 20.0 + 192.0 * 4.0, 256.0));
    }
}
