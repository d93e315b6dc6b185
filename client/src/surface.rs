#![cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use wasm_bindgen::JsCast;
use web_sys::{CanvasRenderingContext2d, HtmlCanvasElement};
use worldpulse_shared::{InitialView, MapConfig, VisualMarker};

use crate::api::ConfigurationError;
use crate::colors::{BACKGROUND, fill_css, rgb_css};
use crate::console;
use crate::overlay::{
    MapProvider, Overlay, OverlayEvent, OverlayHandler, Subscription, SurfaceOptions,
};
use crate::picking::pick;
use crate::render_loop::RenderScheduler;
use crate::tiles::{TileLayer, visible_tiles};
use crate::viewport::Viewport;

/// Pointer travel (CSS px) below which a press counts as a click.
const CLICK_SLOP_PX: f64 = 5.0;
const TILE_WASH: &str = "rgba(36,47,62,0.35)";

/// Creates canvas-backed map surfaces drawing raster tiles from `MapConfig`.
pub struct CanvasProvider {
    config: MapConfig,
}

impl CanvasProvider {
    pub fn new(config: MapConfig) -> Self {
        Self { config }
    }
}

impl MapProvider for CanvasProvider {
    type Mount = HtmlCanvasElement;
    type Surface = CanvasSurface;
    type Overlay = CanvasOverlay;

    fn create_surface(
        &self,
        canvas: &HtmlCanvasElement,
        options: &SurfaceOptions,
    ) -> Result<CanvasSurface, ConfigurationError> {
        let ctx = canvas
            .get_context("2d")
            .ok()
            .flatten()
            .and_then(|ctx| ctx.dyn_into::<CanvasRenderingContext2d>().ok())
            .ok_or_else(|| ConfigurationError("canvas 2D context unavailable".into()))?;
        Ok(CanvasSurface::new(
            canvas.clone(),
            ctx,
            self.config.clone(),
            options.initial_view,
        ))
    }

    fn create_overlay(&self, surface: &CanvasSurface) -> CanvasOverlay {
        CanvasOverlay {
            surface: surface.inner.clone(),
        }
    }

    fn open_link(&self, url: &str) {
        let Some(window) = web_sys::window() else {
            return;
        };
        if let Err(e) =
            window.open_with_url_and_target_and_features(url, "_blank", "noopener,noreferrer")
        {
            console::warn(&format!("failed to open {url}: {e:?}"));
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    start_x: f64,
    start_y: f64,
    last_x: f64,
    last_y: f64,
    moved: bool,
}

#[derive(Default)]
struct MarkerLayer {
    markers: RefCell<Vec<VisualMarker>>,
    handlers: RefCell<Vec<(u64, OverlayHandler)>>,
    next_handler: Cell<u64>,
    hovered: Cell<Option<usize>>,
}

/// Handle to the mounted map canvas. Clones share one surface.
#[derive(Clone)]
pub struct CanvasSurface {
    inner: Rc<SurfaceInner>,
}

struct SurfaceInner {
    canvas: HtmlCanvasElement,
    ctx: CanvasRenderingContext2d,
    viewport: RefCell<Viewport>,
    css_size: Cell<(f64, f64)>,
    tiles: TileLayer,
    layer: MarkerLayer,
    scheduler: RenderScheduler,
    drag: Cell<Option<Drag>>,
    last_press: Cell<(f64, f64)>,
}

impl CanvasSurface {
    fn new(
        canvas: HtmlCanvasElement,
        ctx: CanvasRenderingContext2d,
        config: MapConfig,
        view: InitialView,
    ) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<SurfaceInner>| {
            let render_target = weak.clone();
            let scheduler = RenderScheduler::new(move || {
                if let Some(surface) = render_target.upgrade() {
                    surface.render();
                }
            });
            let tile_target = weak.clone();
            let tiles = TileLayer::new(
                config,
                Rc::new(move || {
                    if let Some(surface) = tile_target.upgrade() {
                        surface.scheduler.mark_dirty();
                    }
                }),
            );
            SurfaceInner {
                // Centered on a zero-sized screen; the first resize re-centers.
                viewport: RefCell::new(Viewport::centered(&view, 0.0, 0.0)),
                canvas,
                ctx,
                css_size: Cell::new((0.0, 0.0)),
                tiles,
                layer: MarkerLayer::default(),
                scheduler,
                drag: Cell::new(None),
                last_press: Cell::new((f64::NAN, f64::NAN)),
            }
        });
        inner.scheduler.mark_dirty();
        Self { inner }
    }

    pub fn mark_dirty(&self) {
        self.inner.scheduler.mark_dirty();
    }

    /// Current center and zoom.
    pub fn view(&self) -> InitialView {
        let (w, h) = self.inner.css_size.get();
        self.inner.viewport.borrow().view(w, h)
    }

    pub fn pointer_down(&self, client_x: f64, client_y: f64) {
        self.inner.drag.set(Some(Drag {
            start_x: client_x,
            start_y: client_y,
            last_x: client_x,
            last_y: client_y,
            moved: false,
        }));
        self.inner.last_press.set((client_x, client_y));
        self.set_cursor("grabbing");
    }

    pub fn pointer_move(&self, client_x: f64, client_y: f64) {
        if let Some(mut drag) = self.inner.drag.get() {
            let (dx, dy) = (client_x - drag.last_x, client_y - drag.last_y);
            drag.last_x = client_x;
            drag.last_y = client_y;
            drag.moved |= (client_x - drag.start_x).hypot(client_y - drag.start_y) >= CLICK_SLOP_PX;
            self.inner.drag.set(Some(drag));
            if drag.moved {
                self.inner.viewport.borrow_mut().pan(dx, dy);
                self.set_hovered(None, client_x, client_y);
                self.mark_dirty();
            }
            return;
        }

        let hit = self.hit_test(client_x, client_y);
        self.set_cursor(if hit.is_some() { "pointer" } else { "grab" });
        self.set_hovered(hit, client_x, client_y);
    }

    /// Ends a drag. Returns whether the view moved.
    pub fn pointer_up(&self) -> bool {
        let moved = self.inner.drag.take().is_some_and(|drag| drag.moved);
        self.set_cursor("grab");
        moved
    }

    pub fn pointer_leave(&self) {
        self.inner.drag.set(None);
        self.set_hovered(None, 0.0, 0.0);
    }

    pub fn wheel(&self, delta_y: f64, client_x: f64, client_y: f64) {
        let (x, y) = self.local(client_x, client_y);
        self.inner.viewport.borrow_mut().zoom_at(delta_y, x, y);
        self.set_hovered(None, client_x, client_y);
        self.mark_dirty();
    }

    pub fn click(&self, client_x: f64, client_y: f64) {
        let (px, py) = self.inner.last_press.get();
        if (client_x - px).hypot(client_y - py) >= CLICK_SLOP_PX {
            return;
        }
        if let Some(marker) = self.hit_test(client_x, client_y) {
            self.emit(&OverlayEvent::Click { marker });
        }
    }

    fn local(&self, client_x: f64, client_y: f64) -> (f64, f64) {
        let rect = self.inner.canvas.get_bounding_client_rect();
        (client_x - rect.left(), client_y - rect.top())
    }

    fn hit_test(&self, client_x: f64, client_y: f64) -> Option<usize> {
        let (x, y) = self.local(client_x, client_y);
        let viewport = self.inner.viewport.borrow();
        pick(&self.inner.layer.markers.borrow(), &viewport, x, y)
    }

    /// Emits while over a marker so the tooltip tracks the pointer, and once
    /// on leaving it.
    fn set_hovered(&self, marker: Option<usize>, client_x: f64, client_y: f64) {
        let previous = self.inner.layer.hovered.replace(marker);
        if marker.is_none() && previous.is_none() {
            return;
        }
        self.emit(&OverlayEvent::Hover {
            marker,
            client_x,
            client_y,
        });
    }

    fn emit(&self, event: &OverlayEvent) {
        let handlers: Vec<OverlayHandler> = self
            .inner
            .layer
            .handlers
            .borrow()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    fn set_cursor(&self, cursor: &str) {
        self.inner.canvas.style().set_property("cursor", cursor).ok();
    }
}

impl SurfaceInner {
    fn sync_size(&self) -> (f64, f64) {
        let w = f64::from(self.canvas.client_width().max(0));
        let h = f64::from(self.canvas.client_height().max(0));
        let (old_w, old_h) = self.css_size.replace((w, h));
        if (old_w, old_h) != (w, h) {
            // Keep the same map point at the center.
            self.viewport
                .borrow_mut()
                .pan((w - old_w) / 2.0, (h - old_h) / 2.0);
        }

        let dpr = web_sys::window()
            .map(|w| w.device_pixel_ratio())
            .unwrap_or(1.0)
            .max(1.0);
        let bw = (w * dpr).round().max(1.0) as u32;
        let bh = (h * dpr).round().max(1.0) as u32;
        if self.canvas.width() != bw || self.canvas.height() != bh {
            self.canvas.set_width(bw);
            self.canvas.set_height(bh);
        }
        self.ctx.set_transform(dpr, 0.0, 0.0, dpr, 0.0, 0.0).ok();
        (w, h)
    }

    fn render(&self) {
        let (w, h) = self.sync_size();
        let ctx = &self.ctx;
        let vp = self.viewport.borrow().clone();

        ctx.set_fill_style_str(BACKGROUND);
        ctx.fill_rect(0.0, 0.0, w, h);

        let wanted = visible_tiles(&vp, w, h);
        self.tiles.request(&wanted);
        let mut drew_tiles = false;
        for coord in &wanted {
            let Some(image) = self.tiles.image(coord) else {
                continue;
            };
            let (sx, sy, size) = coord.screen_rect(&vp);
            // Snap outward so adjacent tiles overlap by up to a pixel.
            let (x, y) = (sx.floor(), sy.floor());
            let side_w = (sx + size).ceil() - x;
            let side_h = (sy + size).ceil() - y;
            ctx.draw_image_with_html_image_element_and_dw_and_dh(&image, x, y, side_w, side_h)
                .ok();
            drew_tiles = true;
        }
        if drew_tiles {
            ctx.set_fill_style_str(TILE_WASH);
            ctx.fill_rect(0.0, 0.0, w, h);
        }

        self.draw_markers(&vp, w, h);
        self.draw_attribution(w, h);
    }

    fn draw_markers(&self, vp: &Viewport, w: f64, h: f64) {
        let ctx = &self.ctx;
        for marker in self.layer.markers.borrow().iter() {
            let (x, y) = vp.lon_lat_to_screen(marker.position.0, marker.position.1);
            let r = marker.radius_px;
            if x + r < 0.0 || y + r < 0.0 || x - r > w || y - r > h {
                continue;
            }
            ctx.begin_path();
            if ctx.arc(x, y, r, 0.0, std::f64::consts::TAU).is_err() {
                continue;
            }
            ctx.set_fill_style_str(&fill_css(marker.fill, marker.fill_opacity));
            ctx.fill();
            if marker.stroke_width_px > 0.0 {
                ctx.set_line_width(marker.stroke_width_px);
                ctx.set_stroke_style_str(&rgb_css(marker.stroke));
                ctx.stroke();
            }
        }
    }

    fn draw_attribution(&self, w: f64, h: f64) {
        let text = self.tiles.attribution();
        if text.is_empty() {
            return;
        }
        let ctx = &self.ctx;
        ctx.set_font("11px sans-serif");
        ctx.set_text_align("right");
        ctx.set_text_baseline("bottom");
        let width = ctx.measure_text(text).map(|m| m.width()).unwrap_or(0.0);
        ctx.set_fill_style_str("rgba(0,0,0,0.55)");
        ctx.fill_rect(w - width - 8.0, h - 16.0, width + 8.0, 16.0);
        ctx.set_fill_style_str("#d0d6e0");
        ctx.fill_text(text, w - 4.0, h - 2.0).ok();
    }
}

/// Marker layer drawn on a [`CanvasSurface`]. Dropping it clears the markers
/// and any remaining handlers.
pub struct CanvasOverlay {
    surface: Rc<SurfaceInner>,
}

impl Overlay for CanvasOverlay {
    fn set_markers(&self, markers: &[VisualMarker]) {
        let layer = &self.surface.layer;
        *layer.markers.borrow_mut() = markers.to_vec();
        layer.hovered.set(None);
        self.surface.scheduler.mark_dirty();
    }

    fn subscribe(&self, handler: OverlayHandler) -> Subscription {
        let layer = &self.surface.layer;
        let id = layer.next_handler.get();
        layer.next_handler.set(id + 1);
        layer.handlers.borrow_mut().push((id, handler));

        let surface = Rc::downgrade(&self.surface);
        Subscription::new(move || {
            if let Some(surface) = surface.upgrade() {
                surface.layer.handlers.borrow_mut().retain(|(h, _)| *h != id);
            }
        })
    }
}

impl Drop for CanvasOverlay {
    fn drop(&mut self) {
        let layer = &self.surface.layer;
        layer.markers.borrow_mut().clear();
        layer.handlers.borrow_mut().clear();
        layer.hovered.set(None);
        self.surface.scheduler.mark_dirty();
    }
}
