use std::cell::{Cell, RefCell};
use std::rc::Rc;

use leptos::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{HtmlCanvasElement, MouseEvent, PointerEvent, WheelEvent};
use worldpulse_shared::marker::Rgb;
use worldpulse_shared::{InitialView, MapConfig, MarkerSizing, ToneClass};

use crate::api;
use crate::colors::{rgb_css, rgba_css};
use crate::console;
use crate::overlay::{
    FetchOutcome, MountOutcome, OverlayEvent, OverlayHandler, OverlaySession, SurfaceOptions,
    Tooltip,
};
use crate::settings::Settings;
use crate::surface::{CanvasProvider, CanvasSurface};

type Session = OverlaySession<CanvasProvider>;
type SessionCell = Rc<RefCell<Option<Session>>>;

/// Owned snapshot of the hovered event, rendered outside the session borrow.
#[derive(Debug, Clone, PartialEq)]
struct TooltipInfo {
    title: String,
    date: String,
    tone: f64,
    color: Rgb,
    mentions: Option<u32>,
    url: Option<String>,
    x: f64,
    y: f64,
}

impl TooltipInfo {
    fn from_tooltip(tooltip: Tooltip<'_>) -> Self {
        let record = tooltip.record;
        Self {
            title: record.display_title(),
            date: record.date.to_string(),
            tone: record.tone,
            color: ToneClass::of(record.tone).color(),
            mentions: record.mention_count,
            url: record.link().map(str::to_owned),
            x: tooltip.client_x,
            y: tooltip.client_y,
        }
    }
}

/// Signals mirrored from the session after every mutation.
#[derive(Clone, Copy)]
struct Ui {
    loading: RwSignal<bool>,
    error: RwSignal<Option<String>>,
    tooltip: RwSignal<Option<TooltipInfo>>,
    event_count: RwSignal<usize>,
}

impl Ui {
    fn sync(&self, session: &Session) {
        self.loading.set(session.is_loading());
        self.error.set(session.error().map(str::to_owned));
        self.event_count.set(session.records().len());
        self.sync_tooltip(session);
    }

    fn sync_tooltip(&self, session: &Session) {
        self.tooltip
            .set(session.tooltip().map(TooltipInfo::from_tooltip));
    }
}

fn surface_of(session: &SessionCell) -> Option<CanvasSurface> {
    session.borrow().as_ref()?.surface().cloned()
}

/// Issue a fetch and apply its result if it is still the latest one.
fn fetch_and_render(session: &SessionCell, ui: Ui) {
    let ticket = {
        let mut guard = session.borrow_mut();
        let Some(active) = guard.as_mut() else {
            return;
        };
        let ticket = active.begin_fetch();
        ui.sync(active);
        ticket
    };

    let session = session.clone();
    wasm_bindgen_futures::spawn_local(async move {
        let result = api::fetch_events().await;
        if let Err(e) = &result {
            console::error(&format!("events fetch failed: {e}"));
        }

        let mut guard = session.borrow_mut();
        let Some(active) = guard.as_mut() else {
            return;
        };
        match active.complete_fetch(ticket, result) {
            FetchOutcome::Applied => {
                console::log(&format!("rendered {} markers", active.markers().len()));
            }
            FetchOutcome::Stale => console::log("discarded superseded events response"),
            FetchOutcome::Failed => {}
        }
        ui.sync(active);
    });
}

fn on_overlay_event(session: &SessionCell, ui: Ui, event: &OverlayEvent) {
    match *event {
        OverlayEvent::Hover {
            marker,
            client_x,
            client_y,
        } => {
            let mut guard = session.borrow_mut();
            let Some(active) = guard.as_mut() else {
                return;
            };
            if active.hover(marker, client_x, client_y) {
                ui.sync_tooltip(active);
            }
        }
        OverlayEvent::Click { marker } => {
            let guard = session.borrow();
            if let Some(active) = guard.as_ref()
                && let Some(url) = active.activate(marker)
            {
                console::log(&format!("opened {url}"));
            }
        }
    }
}

fn persist(sizing: MarkerSizing, last_view: Option<InitialView>) {
    Settings { sizing, last_view }.save();
}

#[component]
pub fn App() -> impl IntoView {
    let saved = Settings::load();
    let ui = Ui {
        loading: RwSignal::new(false),
        error: RwSignal::new(None),
        tooltip: RwSignal::new(None),
        event_count: RwSignal::new(0),
    };
    let config_error: RwSignal<Option<String>> = RwSignal::new(None);
    let map_config: RwSignal<Option<MapConfig>> = RwSignal::new(None);
    let sizing: RwSignal<MarkerSizing> = RwSignal::new(saved.sizing);
    let last_view = Rc::new(Cell::new(saved.last_view));

    let canvas_ref = NodeRef::<leptos::html::Canvas>::new();
    let session: SessionCell = Rc::new(RefCell::new(None));

    let handler: OverlayHandler = {
        let session = Rc::downgrade(&session);
        Rc::new(move |event: &OverlayEvent| {
            if let Some(session) = session.upgrade() {
                on_overlay_event(&session, ui, event);
            }
        })
    };

    wasm_bindgen_futures::spawn_local(async move {
        match api::fetch_map_config().await {
            Ok(config) => map_config.set(Some(config)),
            Err(e) => {
                console::error(&e.to_string());
                config_error.set(Some(e.to_string()));
            }
        }
    });

    // Mount once both the config and the canvas exist; the first mount loads data.
    Effect::new({
        let session = session.clone();
        let last_view = last_view.clone();
        move || {
            let Some(config) = map_config.get() else {
                return;
            };
            let Some(canvas_el) = canvas_ref.get() else {
                return;
            };
            let canvas: &HtmlCanvasElement = &canvas_el;

            let outcome = {
                let mut guard = session.borrow_mut();
                let active = guard.get_or_insert_with(|| {
                    OverlaySession::new(CanvasProvider::new(config.clone()), sizing.get_untracked())
                });
                let settings = Settings {
                    sizing: sizing.get_untracked(),
                    last_view: last_view.get(),
                };
                let options = SurfaceOptions {
                    initial_view: settings.initial_view(config.initial_view),
                };
                active.mount(canvas, &options, handler.clone())
            };

            match outcome {
                Ok(MountOutcome::Created) => fetch_and_render(&session, ui),
                Ok(MountOutcome::AlreadyMounted) => {}
                Err(e) => {
                    console::error(&e.to_string());
                    config_error.set(Some(e.to_string()));
                }
            }
        }
    });

    // Repaint on window resize; the surface re-reads its size each frame.
    if let Some(window) = web_sys::window() {
        let session = session.clone();
        let on_resize = Closure::<dyn FnMut()>::new(move || {
            if let Some(surface) = surface_of(&session) {
                surface.mark_dirty();
            }
        });
        window
            .add_event_listener_with_callback("resize", on_resize.as_ref().unchecked_ref())
            .ok();
        on_resize.forget();
    }

    let remember_view = {
        let session = session.clone();
        let last_view = last_view.clone();
        move || {
            if let Some(surface) = surface_of(&session) {
                let view = surface.view();
                last_view.set(Some(view));
                persist(sizing.get_untracked(), Some(view));
            }
        }
    };

    // --- Input handlers ---

    let on_pointer_down = {
        let session = session.clone();
        move |e: PointerEvent| {
            if let Some(surface) = surface_of(&session) {
                surface.pointer_down(f64::from(e.client_x()), f64::from(e.client_y()));
            }
            if let Some(target) = e.target()
                && let Ok(el) = target.dyn_into::<web_sys::HtmlElement>()
            {
                el.set_pointer_capture(e.pointer_id()).ok();
            }
        }
    };

    let on_pointer_move = {
        let session = session.clone();
        move |e: PointerEvent| {
            if let Some(surface) = surface_of(&session) {
                surface.pointer_move(f64::from(e.client_x()), f64::from(e.client_y()));
            }
        }
    };

    let on_pointer_up = {
        let session = session.clone();
        let remember_view = remember_view.clone();
        move |_: PointerEvent| {
            if let Some(surface) = surface_of(&session)
                && surface.pointer_up()
            {
                remember_view();
            }
        }
    };

    let on_pointer_leave = {
        let session = session.clone();
        move |_: PointerEvent| {
            if let Some(surface) = surface_of(&session) {
                surface.pointer_leave();
            }
        }
    };

    let on_wheel = {
        let session = session.clone();
        let remember_view = remember_view.clone();
        move |e: WheelEvent| {
            e.prevent_default();
            if let Some(surface) = surface_of(&session) {
                surface.wheel(e.delta_y(), f64::from(e.client_x()), f64::from(e.client_y()));
                remember_view();
            }
        }
    };

    let on_click = {
        let session = session.clone();
        move |e: MouseEvent| {
            if let Some(surface) = surface_of(&session) {
                surface.click(f64::from(e.client_x()), f64::from(e.client_y()));
            }
        }
    };

    let on_reload = {
        let session = session.clone();
        move |_: MouseEvent| fetch_and_render(&session, ui)
    };

    let on_sizing = {
        let session = session.clone();
        let last_view = last_view.clone();
        move |e: web_sys::Event| {
            let next = if event_target_checked(&e) {
                MarkerSizing::ByMentions
            } else {
                MarkerSizing::Fixed
            };
            sizing.set(next);
            if let Some(active) = session.borrow_mut().as_mut() {
                active.set_sizing(next);
                ui.sync(active);
            }
            persist(next, last_view.get());
        }
    };

    view! {
        <div style="position: relative; width: 100%; height: 100%; overflow: hidden; background: #242f3e; font-family: 'Inter', system-ui, sans-serif;">
            <canvas
                node_ref=canvas_ref
                style="position: absolute; inset: 0; width: 100%; height: 100%; touch-action: none; cursor: grab;"
                on:pointerdown=on_pointer_down
                on:pointermove=on_pointer_move
                on:pointerup=on_pointer_up
                on:pointerleave=on_pointer_leave
                on:wheel=on_wheel
                on:click=on_click
            />
            <Toolbar ui=ui sizing=sizing on_reload=on_reload on_sizing=on_sizing />
            <Legend />
            {move || ui.loading.get().then(|| view! {
                <div style="position: absolute; inset: 0; display: flex; align-items: center; justify-content: center; background: rgba(0,0,0,0.35); color: #e2e0d8; font-size: 1.1rem; pointer-events: none; z-index: 5;">
                    "Loading..."
                </div>
            })}
            {move || config_error.get().map(|message| view! {
                <div style="position: absolute; top: 64px; left: 50%; transform: translateX(-50%); background: #5c1b1b; color: #ffd7d7; border: 1px solid #a33; border-radius: 6px; padding: 8px 14px; z-index: 20;">
                    {message}
                </div>
            })}
            {move || ui.error.get().map(|message| view! {
                <div style="position: absolute; bottom: 16px; left: 50%; transform: translateX(-50%); background: #5c1b1b; color: #ffd7d7; border: 1px solid #a33; border-radius: 6px; padding: 8px 14px; z-index: 20; max-width: 80%;">
                    {format!("Error: {message}")}
                </div>
            })}
            <EventTooltip tooltip=ui.tooltip />
        </div>
    }
}

#[component]
fn Toolbar(
    ui: Ui,
    sizing: RwSignal<MarkerSizing>,
    on_reload: impl Fn(MouseEvent) + 'static,
    on_sizing: impl Fn(web_sys::Event) + 'static,
) -> impl IntoView {
    view! {
        <div style="position: absolute; top: 12px; left: 12px; z-index: 10; display: flex; align-items: center; gap: 12px; background: #161921; border: 1px solid #282c3e; border-radius: 6px; padding: 8px 12px; color: #e2e0d8; font-size: 0.8rem;">
            <button
                style="background: #1f6feb; color: #fff; border: none; border-radius: 4px; padding: 6px 12px; cursor: pointer;"
                disabled=move || ui.loading.get()
                on:click=on_reload
            >
                {move || if ui.loading.get() { "Loading..." } else { "Reload Data" }}
            </button>
            <label style="display: flex; align-items: center; gap: 6px; cursor: pointer;">
                <input
                    type="checkbox"
                    prop:checked=move || sizing.get() == MarkerSizing::ByMentions
                    on:change=on_sizing
                />
                "Size by mentions"
            </label>
            <span style="color: #9a9590; font-variant-numeric: tabular-nums;">
                {move || format!("{} events", ui.event_count.get())}
            </span>
        </div>
    }
}

#[component]
fn Legend() -> impl IntoView {
    let entries = [ToneClass::Favorable, ToneClass::Neutral, ToneClass::Unfavorable];
    view! {
        <div style="position: absolute; bottom: 28px; right: 12px; z-index: 10; background: #161921; border: 1px solid #282c3e; border-radius: 6px; padding: 8px 10px; color: #e2e0d8; font-size: 0.72rem; display: flex; flex-direction: column; gap: 4px;">
            {entries
                .into_iter()
                .map(|class| {
                    let (r, g, b) = class.color();
                    view! {
                        <div style="display: flex; align-items: center; gap: 6px;">
                            <span style={format!(
                                "display: inline-block; width: 10px; height: 10px; border-radius: 50%; border: 1px solid #000; background: {};",
                                rgba_css(r, g, b, 0.8),
                            )} />
                            {class.label()}
                        </div>
                    }
                })
                .collect_view()}
        </div>
    }
}

#[component]
fn EventTooltip(tooltip: RwSignal<Option<TooltipInfo>>) -> impl IntoView {
    move || {
        tooltip.get().map(|info| {
            let mentions = info
                .mentions
                .map_or_else(|| "n/a".to_owned(), |count| count.to_string());
            view! {
                <div
                    style:left=format!("{}px", info.x + 5.0)
                    style:top=format!("{}px", info.y + 5.0)
                    style="position: fixed; pointer-events: none; z-index: 100; background: #161921; border: 1px solid #282c3e; border-radius: 6px; box-shadow: 0 4px 16px rgba(0,0,0,0.5); max-width: 300px; display: flex; flex-direction: row; overflow: hidden;"
                >
                    <div style={format!("width: 3px; flex-shrink: 0; background: {};", rgb_css(info.color))} />
                    <div style="padding: 8px 10px; flex: 1; min-width: 0;">
                        <div style="font-size: 0.85rem; font-weight: 700; color: #e2e0d8; line-height: 1.3;">
                            {info.title}
                        </div>
                        <div style="font-size: 0.72rem; color: #9a9590; font-family: 'JetBrains Mono', monospace; margin-top: 4px;">
                            {format!("{} \u{00b7} tone {:.2} \u{00b7} {} mentions", info.date, info.tone, mentions)}
                        </div>
                        {info.url.map(|url| view! {
                            <div style="font-size: 0.65rem; color: #6ea8fe; margin-top: 4px; word-break: break-all;">
                                {url}
                            </div>
                        })}
                    </div>
                </div>
            }
        })
    }
}
