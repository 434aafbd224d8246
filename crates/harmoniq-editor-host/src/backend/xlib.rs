//! Xlib implementation of [`NativeDisplay`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::mem;
use std::os::fd::RawFd;
use std::os::raw::{c_char, c_int, c_long, c_uchar, c_uint, c_ulong};
use std::ptr::{self, NonNull};

use tracing::{debug, trace, warn};
use x11::xlib;

use crate::display::{Atom, Event, EventMask, GcId, NativeDisplay, SizeHints, WindowId, WindowSpec};
use crate::error::DisplayError;
use crate::geometry::Size;
use crate::xembed::EmbedInfo;

const DEPTH: c_int = 24;

/// A connection to an X server.
///
/// Not `Send`: Xlib connections opened without `XInitThreads` must stay on
/// the thread that opened them.
pub struct XlibDisplay {
    display: NonNull<xlib::Display>,
    screen: c_int,
    visual: *mut xlib::Visual,
    colormap: xlib::Colormap,
    pixels: Pixels,
    gcs: RefCell<HashMap<u64, xlib::GC>>,
    next_gc: Cell<u64>,
}

impl std::fmt::Debug for XlibDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XlibDisplay")
            .field("display", &self.display)
            .field("screen", &self.screen)
            .finish_non_exhaustive()
    }
}

/// Logs protocol errors instead of letting Xlib terminate the process.
///
/// Requests on the plugin's window race with the plugin destroying it, so
/// `BadWindow` and friends are expected.
/// Black and white in the window visual.
///
/// The windows use their own TrueColor visual rather than the screen default,
/// so the screen's `BlackPixel`/`WhitePixel` may not apply to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pixels {
    black: c_ulong,
    white: c_ulong,
}

impl Pixels {
    fn for_visual(info: &xlib::XVisualInfo) -> Self {
        Self {
            black: 0,
            white: info.red_mask | info.green_mask | info.blue_mask,
        }
    }
}

unsafe extern "C" fn log_x_error(
    display: *mut xlib::Display,
    event: *mut xlib::XErrorEvent,
) -> c_int {
    if event.is_null() {
        return 0;
    }
    let event = &*event;
    let mut text = [0 as c_char; 256];
    xlib::XGetErrorText(
        display,
        c_int::from(event.error_code),
        text.as_mut_ptr(),
        text.len() as c_int,
    );
    let message = CStr::from_ptr(text.as_ptr()).to_string_lossy();
    warn!(
        resource = event.resourceid,
        request = event.request_code,
        "X protocol error: {message}"
    );
    0
}

impl XlibDisplay {
    /// Opens `name`, or `$DISPLAY` when `None`.
    pub fn open(name: Option<&str>) -> Result<Self, DisplayError> {
        let c_name = name
            .map(CString::new)
            .transpose()
            .map_err(|_| DisplayError::Open("display name contains a NUL byte".into()))?;
        // SAFETY: plain Xlib calls on a connection we own; every pointer passed
        // is either null or outlives the call.
        unsafe {
            let raw = xlib::XOpenDisplay(c_name.as_ref().map_or(ptr::null(), |n| n.as_ptr()));
            let display = NonNull::new(raw).ok_or_else(|| {
                DisplayError::Open(
                    name.map(str::to_owned)
                        .or_else(|| std::env::var("DISPLAY").ok())
                        .unwrap_or_else(|| "<unset DISPLAY>".into()),
                )
            })?;
            xlib::XSetErrorHandler(Some(log_x_error));

            let screen = xlib::XDefaultScreen(raw);
            let mut info: xlib::XVisualInfo = mem::zeroed();
            if xlib::XMatchVisualInfo(raw, screen, DEPTH, xlib::TrueColor, &mut info) == 0 {
                xlib::XCloseDisplay(raw);
                return Err(DisplayError::NoVisual);
            }
            let colormap = xlib::XCreateColormap(
                raw,
                xlib::XRootWindow(raw, screen),
                info.visual,
                xlib::AllocNone,
            );
            debug!(screen, "opened X display");
            Ok(Self {
                display,
                screen,
                visual: info.visual,
                colormap,
                pixels: Pixels::for_visual(&info),
                gcs: RefCell::new(HashMap::new()),
                next_gc: Cell::new(1),
            })
        }
    }

    fn raw(&self) -> *mut xlib::Display {
        self.display.as_ptr()
    }

    fn native_mask(mask: EventMask) -> c_long {
        const TABLE: [(EventMask, c_long); 10] = [
            (EventMask::EXPOSURE, xlib::ExposureMask),
            (EventMask::STRUCTURE_NOTIFY, xlib::StructureNotifyMask),
            (EventMask::SUBSTRUCTURE_NOTIFY, xlib::SubstructureNotifyMask),
            (EventMask::FOCUS_CHANGE, xlib::FocusChangeMask),
            (EventMask::PROPERTY_CHANGE, xlib::PropertyChangeMask),
            (EventMask::RESIZE_REDIRECT, xlib::ResizeRedirectMask),
            (EventMask::KEY_PRESS, xlib::KeyPressMask),
            (EventMask::BUTTON_PRESS, xlib::ButtonPressMask),
            (EventMask::BUTTON_RELEASE, xlib::ButtonReleaseMask),
            (EventMask::BUTTON_MOTION, xlib::ButtonMotionMask),
        ];
        TABLE
            .iter()
            .filter(|(flag, _)| mask.contains(*flag))
            .fold(xlib::NoEventMask, |acc, (_, native)| acc | native)
    }

    fn gc(&self, gc: GcId) -> Option<xlib::GC> {
        self.gcs.borrow().get(&gc.0).copied()
    }

    /// Decodes the parts of `event` the embedding logic understands.
    ///
    /// # Safety
    /// `event` must have been filled in by `XNextEvent`.
    unsafe fn translate(event: &xlib::XEvent) -> Event {
        let id = |w: xlib::Window| WindowId(w as u64);
        match event.get_type() {
            xlib::Expose => {
                let e = event.expose;
                Event::Expose {
                    window: id(e.window),
                    count: e.count,
                }
            }
            xlib::ConfigureNotify => {
                let e = event.configure;
                Event::Configure {
                    event: id(e.event),
                    window: id(e.window),
                    size: Size::new(e.width, e.height),
                }
            }
            xlib::ResizeRequest => {
                let e = event.resize_request;
                Event::ResizeRequest {
                    window: id(e.window),
                    size: Size::new(e.width, e.height),
                }
            }
            xlib::CreateNotify => {
                let e = event.create_window;
                Event::Create {
                    parent: id(e.parent),
                    window: id(e.window),
                }
            }
            xlib::MapNotify => {
                let e = event.map;
                Event::Map {
                    event: id(e.event),
                    window: id(e.window),
                }
            }
            xlib::UnmapNotify => {
                let e = event.unmap;
                Event::Unmap {
                    event: id(e.event),
                    window: id(e.window),
                }
            }
            xlib::DestroyNotify => {
                let e = event.destroy_window;
                Event::Destroy {
                    event: id(e.event),
                    window: id(e.window),
                }
            }
            xlib::FocusIn => Event::FocusIn {
                window: id(event.focus_change.window),
            },
            xlib::FocusOut => Event::FocusOut {
                window: id(event.focus_change.window),
            },
            xlib::PropertyNotify => {
                let e = event.property;
                Event::Property {
                    window: id(e.window),
                    atom: Atom(e.atom as u64),
                }
            }
            xlib::ClientMessage => {
                let e = event.client_message;
                let mut data = [0i64; 5];
                for (slot, value) in data.iter_mut().enumerate() {
                    *value = e.data.get_long(slot) as i64;
                }
                Event::ClientMessage {
                    window: id(e.window),
                    message_type: Atom(e.message_type as u64),
                    data,
                }
            }
            kind => Event::Other {
                window: id(event.any.window),
                kind,
            },
        }
    }
}

impl Drop for XlibDisplay {
    fn drop(&mut self) {
        // SAFETY: the connection is still open and nothing else refers to it.
        unsafe {
            for (_, gc) in self.gcs.borrow_mut().drain() {
                xlib::XFreeGC(self.raw(), gc);
            }
            xlib::XFreeColormap(self.raw(), self.colormap);
            xlib::XCloseDisplay(self.raw());
        }
    }
}

// SAFETY (all methods): `self.display` is an open connection for the life of
// `self`, and every pointer handed to Xlib outlives the call.
impl NativeDisplay for XlibDisplay {
    fn intern_atom(&self, name: &str, only_if_exists: bool) -> Option<Atom> {
        let name = CString::new(name).ok()?;
        let atom = unsafe {
            xlib::XInternAtom(self.raw(), name.as_ptr(), c_int::from(only_if_exists))
        };
        (atom != 0).then_some(Atom(atom as u64))
    }

    fn atom_name(&self, atom: Atom) -> Option<String> {
        unsafe {
            let name = xlib::XGetAtomName(self.raw(), atom.0 as xlib::Atom);
            if name.is_null() {
                return None;
            }
            let owned = CStr::from_ptr(name).to_string_lossy().into_owned();
            xlib::XFree(name.cast());
            Some(owned)
        }
    }

    fn screen_size(&self) -> Size {
        unsafe {
            Size::new(
                xlib::XDisplayWidth(self.raw(), self.screen),
                xlib::XDisplayHeight(self.raw(), self.screen),
            )
        }
    }

    fn create_window(&self, spec: &WindowSpec) -> Result<WindowId, DisplayError> {
        let (width, height) = spec.size.to_unsigned();
        unsafe {
            let parent = spec
                .parent
                .map_or_else(|| xlib::XRootWindow(self.raw(), self.screen), |w| w.0 as xlib::Window);
            let mut attributes: xlib::XSetWindowAttributes = mem::zeroed();
            attributes.colormap = self.colormap;
            attributes.border_pixel = 0;
            attributes.background_pixel = self.pixels.black;
            attributes.event_mask = Self::native_mask(spec.event_mask);
            attributes.override_redirect = c_int::from(spec.override_redirect);
            let window = xlib::XCreateWindow(
                self.raw(),
                parent,
                0,
                0,
                width,
                height,
                spec.border_width as c_uint,
                DEPTH,
                xlib::InputOutput as c_uint,
                self.visual,
                xlib::CWColormap
                    | xlib::CWBorderPixel
                    | xlib::CWBackPixel
                    | xlib::CWEventMask
                    | xlib::CWOverrideRedirect,
                &mut attributes,
            );
            if window == 0 {
                return Err(DisplayError::CreateWindow("XCreateWindow returned no window"));
            }
            trace!(window, parent, width, height, "created X window");
            Ok(WindowId(window as u64))
        }
    }

    fn destroy_window(&self, window: WindowId) {
        unsafe {
            xlib::XDestroyWindow(self.raw(), window.0 as xlib::Window);
        }
    }

    fn select_input(&self, window: WindowId, mask: EventMask) {
        unsafe {
            xlib::XSelectInput(self.raw(), window.0 as xlib::Window, Self::native_mask(mask));
        }
    }

    fn set_size_hints(&self, window: WindowId, hints: SizeHints) {
        unsafe {
            let raw = xlib::XAllocSizeHints();
            if raw.is_null() {
                warn!(%window, "XAllocSizeHints failed");
                return;
            }
            let native = &mut *raw;
            native.flags = xlib::PMinSize;
            native.min_width = hints.min.width;
            native.min_height = hints.min.height;
            if let Some(max) = hints.max {
                native.flags |= xlib::PMaxSize;
                native.max_width = max.width;
                native.max_height = max.height;
            }
            xlib::XSetWMNormalHints(self.raw(), window.0 as xlib::Window, raw);
            xlib::XFree(raw.cast());
        }
    }

    fn set_title(&self, window: WindowId, title: &str) {
        let Ok(title) = CString::new(title) else {
            warn!(%window, "window title contains a NUL byte");
            return;
        };
        unsafe {
            xlib::XStoreName(self.raw(), window.0 as xlib::Window, title.as_ptr());
            xlib::XSetIconName(self.raw(), window.0 as xlib::Window, title.as_ptr());
        }
    }

    fn set_wm_protocols(&self, window: WindowId, protocols: &[Atom]) {
        let mut atoms: Vec<xlib::Atom> = protocols.iter().map(|a| a.0 as xlib::Atom).collect();
        unsafe {
            xlib::XSetWMProtocols(
                self.raw(),
                window.0 as xlib::Window,
                atoms.as_mut_ptr(),
                atoms.len() as c_int,
            );
        }
    }

    fn map_window(&self, window: WindowId) {
        unsafe {
            xlib::XMapWindow(self.raw(), window.0 as xlib::Window);
        }
    }

    fn unmap_window(&self, window: WindowId) {
        unsafe {
            xlib::XUnmapWindow(self.raw(), window.0 as xlib::Window);
        }
    }

    fn resize_window(&self, window: WindowId, size: Size) {
        let (width, height) = size.to_unsigned();
        unsafe {
            xlib::XResizeWindow(self.raw(), window.0 as xlib::Window, width, height);
        }
    }

    fn geometry(&self, window: WindowId) -> Option<Size> {
        unsafe {
            let mut attributes: xlib::XWindowAttributes = mem::zeroed();
            if xlib::XGetWindowAttributes(self.raw(), window.0 as xlib::Window, &mut attributes) == 0
            {
                return None;
            }
            Some(Size::new(attributes.width, attributes.height))
        }
    }

    fn embed_info(&self, window: WindowId, property: Atom) -> Option<EmbedInfo> {
        unsafe {
            let mut actual_type: xlib::Atom = 0;
            let mut actual_format: c_int = 0;
            let mut items: c_ulong = 0;
            let mut remaining: c_ulong = 0;
            let mut data: *mut c_uchar = ptr::null_mut();
            let status = xlib::XGetWindowProperty(
                self.raw(),
                window.0 as xlib::Window,
                property.0 as xlib::Atom,
                0,
                2,
                xlib::False,
                property.0 as xlib::Atom,
                &mut actual_type,
                &mut actual_format,
                &mut items,
                &mut remaining,
                &mut data,
            );
            if status != xlib::Success as c_int || data.is_null() {
                return None;
            }
            // Format 32 items are delivered as C longs.
            let words: Vec<u32> = if actual_format == 32 {
                std::slice::from_raw_parts(data.cast::<c_ulong>(), items as usize)
                    .iter()
                    .map(|word| *word as u32)
                    .collect()
            } else {
                Vec::new()
            };
            xlib::XFree(data.cast());
            EmbedInfo::from_words(&words)
        }
    }

    fn send_client_message(&self, window: WindowId, message_type: Atom, data: [i64; 5]) {
        unsafe {
            let mut message: xlib::XClientMessageEvent = mem::zeroed();
            message.type_ = xlib::ClientMessage;
            message.display = self.raw();
            message.window = window.0 as xlib::Window;
            message.message_type = message_type.0 as xlib::Atom;
            message.format = 32;
            for (slot, value) in data.iter().enumerate() {
                message.data.set_long(slot, *value as c_long);
            }
            let mut event = xlib::XEvent::from(message);
            xlib::XSendEvent(
                self.raw(),
                window.0 as xlib::Window,
                xlib::False,
                xlib::NoEventMask,
                &mut event,
            );
        }
    }

    fn create_gc(&self, window: WindowId) -> GcId {
        let id = self.next_gc.get();
        self.next_gc.set(id + 1);
        unsafe {
            let gc = xlib::XCreateGC(self.raw(), window.0 as xlib::Window, 0, ptr::null_mut());
            xlib::XSetForeground(self.raw(), gc, self.pixels.white);
            xlib::XSetBackground(self.raw(), gc, self.pixels.black);
            self.gcs.borrow_mut().insert(id, gc);
        }
        GcId(id)
    }

    fn free_gc(&self, gc: GcId) {
        if let Some(native) = self.gcs.borrow_mut().remove(&gc.0) {
            unsafe {
                xlib::XFreeGC(self.raw(), native);
            }
        }
    }

    fn clear_window(&self, window: WindowId) {
        unsafe {
            xlib::XClearWindow(self.raw(), window.0 as xlib::Window);
        }
    }

    fn fill_rectangle(&self, window: WindowId, gc: GcId, size: Size) {
        let Some(native) = self.gc(gc) else {
            return;
        };
        let (width, height) = size.to_unsigned();
        unsafe {
            xlib::XFillRectangle(self.raw(), window.0 as xlib::Window, native, 0, 0, width, height);
        }
    }

    fn flush(&self) {
        unsafe {
            xlib::XFlush(self.raw());
        }
    }

    fn sync(&self) {
        unsafe {
            xlib::XSync(self.raw(), xlib::False);
        }
    }

    fn connection_fd(&self) -> Option<RawFd> {
        Some(unsafe { xlib::XConnectionNumber(self.raw()) })
    }

    fn has_pending_events(&self) -> bool {
        unsafe { xlib::XPending(self.raw()) > 0 }
    }

    fn next_event(&self) -> Option<Event> {
        if !self.has_pending_events() {
            return None;
        }
        unsafe {
            let mut event: xlib::XEvent = mem::zeroed();
            xlib::XNextEvent(self.raw(), &mut event);
            Some(Self::translate(&event))
        }
    }
}
