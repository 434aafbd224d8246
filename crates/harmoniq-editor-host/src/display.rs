//! Boundary between the embedding logic and the native window system.
//!
//! [`NativeDisplay`] is the narrow set of X11 requests the embedding window
//! and the run loop need. The Xlib backend (feature `x11`) implements it for
//! real displays and `testing::FakeDisplay` (feature `testing`) implements
//! it for tests. Every method takes `&self`: the connection is shared between
//! the run loop and all windows on the UI thread.

use std::fmt;
use std::os::fd::RawFd;

use bitflags::bitflags;

use crate::error::DisplayError;
use crate::geometry::Size;
use crate::xembed::EmbedInfo;

/// Native window identifier (an X11 XID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Interned property or message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Atom(pub u64);

/// Native graphics context handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcId(pub u64);

bitflags! {
    /// Subset of the X11 event masks selected by the embedding window.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        const EXPOSURE = 1 << 0;
        const STRUCTURE_NOTIFY = 1 << 1;
        const SUBSTRUCTURE_NOTIFY = 1 << 2;
        const FOCUS_CHANGE = 1 << 3;
        const PROPERTY_CHANGE = 1 << 4;
        const RESIZE_REDIRECT = 1 << 5;
        const KEY_PRESS = 1 << 6;
        const BUTTON_PRESS = 1 << 7;
        const BUTTON_RELEASE = 1 << 8;
        const BUTTON_MOTION = 1 << 9;
    }
}

/// Window manager normal hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeHints {
    pub min: Size,
    pub max: Option<Size>,
}

impl SizeHints {
    /// Hints pinning the window to exactly `size`.
    pub fn fixed(size: Size) -> Self {
        Self {
            min: size,
            max: Some(size),
        }
    }

    pub fn minimum(min: Size) -> Self {
        Self { min, max: None }
    }
}

/// Parameters for [`NativeDisplay::create_window`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    /// `None` creates a top-level window on the default screen's root.
    pub parent: Option<WindowId>,
    pub size: Size,
    pub border_width: u32,
    /// Excluded from window manager placement and decoration.
    pub override_redirect: bool,
    /// Mask applied through the creation attributes.
    pub event_mask: EventMask,
}

/// Native events, already decoded from the wire representation.
///
/// `event` fields name the window the notification was reported on (the
/// routing key), `window` fields the window the notification is about. They
/// differ for substructure notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Expose {
        window: WindowId,
        count: i32,
    },
    Configure {
        event: WindowId,
        window: WindowId,
        size: Size,
    },
    ResizeRequest {
        window: WindowId,
        size: Size,
    },
    Create {
        parent: WindowId,
        window: WindowId,
    },
    Map {
        event: WindowId,
        window: WindowId,
    },
    Unmap {
        event: WindowId,
        window: WindowId,
    },
    Destroy {
        event: WindowId,
        window: WindowId,
    },
    FocusIn {
        window: WindowId,
    },
    FocusOut {
        window: WindowId,
    },
    Property {
        window: WindowId,
        atom: Atom,
    },
    ClientMessage {
        window: WindowId,
        message_type: Atom,
        data: [i64; 5],
    },
    /// Anything the embedding logic does not interpret.
    Other {
        window: WindowId,
        kind: i32,
    },
}

impl Event {
    /// Window the event is routed by.
    pub fn routing_window(&self) -> WindowId {
        match *self {
            Event::Expose { window, .. }
            | Event::ResizeRequest { window, .. }
            | Event::FocusIn { window }
            | Event::FocusOut { window }
            | Event::Property { window, .. }
            | Event::ClientMessage { window, .. }
            | Event::Other { window, .. } => window,
            Event::Configure { event, .. }
            | Event::Map { event, .. }
            | Event::Unmap { event, .. }
            | Event::Destroy { event, .. } => event,
            Event::Create { parent, .. } => parent,
        }
    }
}

/// Native window system requests used by the embedding host.
pub trait NativeDisplay {
    /// Resolves `name`; with `only_if_exists` the atom is never created.
    fn intern_atom(&self, name: &str, only_if_exists: bool) -> Option<Atom>;

    fn atom_name(&self, atom: Atom) -> Option<String>;

    fn screen_size(&self) -> Size;

    fn create_window(&self, spec: &WindowSpec) -> Result<WindowId, DisplayError>;

    fn destroy_window(&self, window: WindowId);

    fn select_input(&self, window: WindowId, mask: EventMask);

    fn set_size_hints(&self, window: WindowId, hints: SizeHints);

    /// Sets both the window name and the icon name.
    fn set_title(&self, window: WindowId, title: &str);

    fn set_wm_protocols(&self, window: WindowId, protocols: &[Atom]);

    fn map_window(&self, window: WindowId);

    fn unmap_window(&self, window: WindowId);

    fn resize_window(&self, window: WindowId, size: Size);

    /// Live geometry; `None` once the window is gone.
    fn geometry(&self, window: WindowId) -> Option<Size>;

    /// Reads the `_XEMBED_INFO` property; `None` while it is absent.
    fn embed_info(&self, window: WindowId, property: Atom) -> Option<EmbedInfo>;

    /// Sends a 32-bit format client message without an event mask.
    fn send_client_message(&self, window: WindowId, message_type: Atom, data: [i64; 5]);

    fn create_gc(&self, window: WindowId) -> GcId;

    fn free_gc(&self, gc: GcId);

    fn clear_window(&self, window: WindowId);

    fn fill_rectangle(&self, window: WindowId, gc: GcId, size: Size);

    /// Pushes buffered requests to the server.
    fn flush(&self);

    /// Flushes and waits until the server processed every request.
    fn sync(&self);

    /// Descriptor that becomes readable when events arrive, if any.
    fn connection_fd(&self) -> Option<RawFd>;

    /// Whether events are already queued client side.
    fn has_pending_events(&self) -> bool;

    /// Next queued event without blocking.
    fn next_event(&self) -> Option<Event>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substructure_events_route_by_reporting_window() {
        let host = WindowId(1);
        let child = WindowId(2);
        let create = Event::Create {
            parent: host,
            window: child,
        };
        let unmap = Event::Unmap {
            event: host,
            window: child,
        };
        assert_eq!(create.routing_window(), host);
        assert_eq!(unmap.routing_window(), host);
        assert_eq!(Event::FocusIn { window: child }.routing_window(), child);
    }

    #[test]
    fn event_masks_combine() {
        let mask = EventMask::EXPOSURE | EventMask::FOCUS_CHANGE;
        assert!(mask.contains(EventMask::EXPOSURE));
        assert!(!mask.contains(EventMask::RESIZE_REDIRECT));
        assert_eq!(EventMask::empty().bits(), 0);
    }
}
