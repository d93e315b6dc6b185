use std::fmt;
use std::rc::Rc;

use worldpulse_shared::{EventRecord, InitialView, MarkerSizing, VisualMarker, derive_markers};

use crate::api::ConfigurationError;

/// Options for the one drawing surface of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceOptions {
    pub initial_view: InitialView,
}

/// Pointer activity on an overlay, in terms of marker indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverlayEvent {
    /// `marker` is `None` when the pointer left every marker. Coordinates are
    /// client (page) pixels.
    Hover {
        marker: Option<usize>,
        client_x: f64,
        client_y: f64,
    },
    Click { marker: usize },
}

pub type OverlayHandler = Rc<dyn Fn(&OverlayEvent)>;

/// Unregisters an overlay handler when dropped.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Marker layer bound to a surface. Markers are swapped in wholesale.
pub trait Overlay {
    fn set_markers(&self, markers: &[VisualMarker]);
    fn subscribe(&self, handler: OverlayHandler) -> Subscription;
}

/// Capability to create the map surface and its overlay.
pub trait MapProvider {
    type Mount: ?Sized;
    type Surface;
    type Overlay: Overlay;

    fn create_surface(
        &self,
        mount: &Self::Mount,
        options: &SurfaceOptions,
    ) -> Result<Self::Surface, ConfigurationError>;

    fn create_overlay(&self, surface: &Self::Surface) -> Self::Overlay;

    /// Open `url` in a new browsing context.
    fn open_link(&self, url: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    SurfaceReady,
    DataLoaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    Created,
    AlreadyMounted,
}

/// Issued by [`OverlaySession::begin_fetch`]; only the latest one is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied,
    Failed,
    /// A newer fetch was issued after this one; the response was dropped.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct HoverTarget {
    marker: usize,
    client_x: f64,
    client_y: f64,
}

/// The hovered record and where to draw its tooltip.
#[derive(Debug, Clone, Copy)]
pub struct Tooltip<'a> {
    pub record: &'a EventRecord,
    pub client_x: f64,
    pub client_y: f64,
}

/// Owns the single surface/overlay pair of a page and keeps its markers in
/// step with the latest successfully fetched event set.
pub struct OverlaySession<P: MapProvider> {
    provider: P,
    surface: Option<P::Surface>,
    overlay: Option<P::Overlay>,
    subscription: Option<Subscription>,
    records: Vec<EventRecord>,
    markers: Vec<VisualMarker>,
    sizing: MarkerSizing,
    loaded: bool,
    latest_ticket: u64,
    loading: bool,
    error: Option<String>,
    hovered: Option<HoverTarget>,
}

impl<P: MapProvider> OverlaySession<P> {
    pub fn new(provider: P, sizing: MarkerSizing) -> Self {
        Self {
            provider,
            surface: None,
            overlay: None,
            subscription: None,
            records: Vec::new(),
            markers: Vec::new(),
            sizing,
            loaded: false,
            latest_ticket: 0,
            loading: false,
            error: None,
            hovered: None,
        }
    }

    /// Create the surface and bind the overlay. Later calls are no-ops.
    pub fn mount(
        &mut self,
        mount: &P::Mount,
        options: &SurfaceOptions,
        handler: OverlayHandler,
    ) -> Result<MountOutcome, ConfigurationError> {
        if self.surface.is_some() {
            return Ok(MountOutcome::AlreadyMounted);
        }

        let surface = self.provider.create_surface(mount, options)?;
        let overlay = self.provider.create_overlay(&surface);
        self.subscription = Some(overlay.subscribe(handler));
        if !self.markers.is_empty() {
            overlay.set_markers(&self.markers);
        }
        self.surface = Some(surface);
        self.overlay = Some(overlay);
        Ok(MountOutcome::Created)
    }

    pub fn state(&self) -> LifecycleState {
        match (&self.surface, self.loaded) {
            (None, _) => LifecycleState::Uninitialized,
            (Some(_), false) => LifecycleState::SurfaceReady,
            (Some(_), true) => LifecycleState::DataLoaded,
        }
    }

    pub fn surface(&self) -> Option<&P::Surface> {
        self.surface.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn markers(&self) -> &[VisualMarker] {
        &self.markers
    }

    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.latest_ticket += 1;
        self.loading = true;
        FetchTicket(self.latest_ticket)
    }

    /// Apply the result of the fetch behind `ticket`. Failures keep the
    /// current markers.
    pub fn complete_fetch<E: fmt::Display>(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<EventRecord>, E>,
    ) -> FetchOutcome {
        if ticket.0 != self.latest_ticket {
            return FetchOutcome::Stale;
        }
        self.loading = false;

        match result {
            Ok(records) => {
                self.records = records;
                self.loaded = true;
                self.error = None;
                self.hovered = None;
                self.rebuild_markers();
                FetchOutcome::Applied
            }
            Err(e) => {
                let message = e.to_string();
                self.error = Some(if message.trim().is_empty() {
                    "Unknown error".to_owned()
                } else {
                    message
                });
                FetchOutcome::Failed
            }
        }
    }

    pub fn set_sizing(&mut self, sizing: MarkerSizing) {
        if self.sizing == sizing {
            return;
        }
        self.sizing = sizing;
        self.rebuild_markers();
    }

    /// Track the marker under the pointer. Returns whether the tooltip changed.
    pub fn hover(&mut self, marker: Option<usize>, client_x: f64, client_y: f64) -> bool {
        let next = marker
            .filter(|index| *index < self.markers.len())
            .map(|marker| HoverTarget {
                marker,
                client_x,
                client_y,
            });
        let changed = next != self.hovered;
        self.hovered = next;
        changed
    }

    pub fn tooltip(&self) -> Option<Tooltip<'_>> {
        let target = self.hovered?;
        let marker = self.markers.get(target.marker)?;
        let record = self.records.get(marker.record)?;
        Some(Tooltip {
            record,
            client_x: target.client_x,
            client_y: target.client_y,
        })
    }

    /// Follow the marker's source link, if it has one. Returns the opened URL.
    pub fn activate(&self, marker: usize) -> Option<&str> {
        let marker = self.markers.get(marker)?;
        let url = self.records.get(marker.record)?.link()?;
        self.provider.open_link(url);
        Some(url)
    }

    fn rebuild_markers(&mut self) {
        self.markers = derive_markers(&self.records, self.sizing);
        if let Some(overlay) = &self.overlay {
            overlay.set_markers(&self.markers);
        }
    }
}

impl<P: MapProvider> Drop for OverlaySession<P> {
    fn drop(&mut self) {
        // Handlers go before the overlay and surface they observe.
        self.subscription.take();
        self.overlay.take();
        self.surface.take();
    }
}
