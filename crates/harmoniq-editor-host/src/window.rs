//! Native window hosting a plugin editor through XEmbed.
//!
//! An [`EmbeddingWindow`] owns a decorated host window and, inside it, an
//! invisible override-redirect *embed parent*. The plugin creates its editor
//! as a child of the embed parent; the resulting `CreateNotify` starts the
//! XEmbed handshake. Resize attempts on the host are negotiated with the
//! application's [`WindowController`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use anyhow::{bail, Result};
use tracing::{debug, trace, warn};

use crate::config::EditorHostConfig;
use crate::display::{Atom, Event, EventMask, GcId, NativeDisplay, SizeHints, WindowId, WindowSpec};
use crate::error::{EmbedError, ProtocolViolation};
use crate::event_sources::{PluginEventSources, PluginRunLoop};
use crate::geometry::Size;
use crate::runloop::{RunLoop, WindowHandler};
use crate::xembed::{
    EmbedInfo, EmbedMessage, EmbedState, Focus, Opcode, WM_DELETE_WINDOW, WM_PROTOCOLS, XEMBED,
    XEMBED_INFO,
};

/// Application-side policy for an editor window.
///
/// Every callback receives the window it concerns and may call back into it.
pub trait WindowController {
    /// Returns the size the window should take when `requested` is asked for.
    fn constrain_size(&self, window: &EmbeddingWindow, requested: Size) -> Size;
    fn on_resize(&self, window: &EmbeddingWindow, size: Size);
    fn on_show(&self, window: &EmbeddingWindow);
    /// Called before the window releases its native resources.
    fn on_close(&self, window: &EmbeddingWindow);
}

/// Controller accepting every size and ignoring notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconstrainedController;

impl WindowController for UnconstrainedController {
    fn constrain_size(&self, _window: &EmbeddingWindow, requested: Size) -> Size {
        requested
    }

    fn on_resize(&self, _window: &EmbeddingWindow, _size: Size) {}

    fn on_show(&self, _window: &EmbeddingWindow) {}

    fn on_close(&self, _window: &EmbeddingWindow) {}
}

/// Abstraction for embedding plugin UI windows inside the Harmoniq shell application.
pub trait WindowEmbedder {
    /// Shows the editor surface and returns the parent the plugin attaches to.
    fn attach(&self) -> Result<NativeParent>;
    fn detach(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformType {
    /// An X11 window id the editor is reparented into with XEmbed.
    X11EmbedWindowId,
}

/// Parent handle handed to the plugin's `attached()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeParent {
    pub platform: PlatformType,
    pub window: WindowId,
}

type ClosedCallback = Box<dyn FnOnce(&EmbeddingWindow)>;

pub struct EmbeddingWindowBuilder {
    title: String,
    size: Size,
    resizable: bool,
    config: EditorHostConfig,
    controller: Rc<dyn WindowController>,
    on_closed: Option<ClosedCallback>,
}

impl EmbeddingWindowBuilder {
    pub fn new(title: impl Into<String>, size: Size) -> Self {
        Self {
            title: title.into(),
            size,
            resizable: true,
            config: EditorHostConfig::default(),
            controller: Rc::new(UnconstrainedController),
            on_closed: None,
        }
    }

    /// A non-resizable window pins both minimum and maximum size hints.
    pub fn resizable(mut self, resizable: bool) -> Self {
        self.resizable = resizable;
        self
    }

    pub fn config(mut self, config: EditorHostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn controller(mut self, controller: Rc<dyn WindowController>) -> Self {
        self.controller = controller;
        self
    }

    /// Invoked once, after the window has been torn down.
    pub fn on_closed(mut self, callback: impl FnOnce(&EmbeddingWindow) + 'static) -> Self {
        self.on_closed = Some(Box::new(callback));
        self
    }

    /// Creates the host window and its embed parent and registers both with
    /// `run_loop`.
    pub fn build(self, run_loop: &Rc<RunLoop>) -> Result<EmbeddingWindow, EmbedError> {
        let display = Rc::clone(run_loop.display());
        let embed_info = display
            .intern_atom(XEMBED_INFO, true)
            .ok_or(EmbedError::MissingAtom(XEMBED_INFO))?;

        let host = display.create_window(&WindowSpec {
            parent: None,
            size: display.screen_size(),
            border_width: self.config.border_width,
            override_redirect: false,
            event_mask: EventMask::empty(),
        })?;
        display.flush();

        let inner = Rc::new(WindowInner {
            display: Rc::clone(&display),
            run_loop: Rc::clone(run_loop),
            controller: self.controller,
            on_closed: RefCell::new(self.on_closed),
            sources: Rc::new(PluginEventSources::new(Rc::clone(run_loop))),
            atoms: ProtocolAtoms {
                embed_info,
                embed: Cell::new(None),
                wm_protocols: display.intern_atom(WM_PROTOCOLS, false),
                wm_delete_window: display.intern_atom(WM_DELETE_WINDOW, false),
            },
            host: Cell::new(Some(host)),
            embed_parent: Cell::new(None),
            gc: Cell::new(None),
            size: Cell::new(Size::default()),
            is_mapped: Cell::new(false),
            state: Cell::new(EmbedState::Unbound),
        });
        // From here on dropping `window` releases whatever was created.
        let window = EmbeddingWindow { inner };
        window.resize_forced(self.size);

        let mut host_mask = EventMask::EXPOSURE
            | EventMask::STRUCTURE_NOTIFY
            | EventMask::SUBSTRUCTURE_NOTIFY
            | EventMask::FOCUS_CHANGE;
        if self.config.redirect_resize {
            host_mask |= EventMask::RESIZE_REDIRECT;
        }
        display.select_input(host, host_mask);

        let hints = if self.resizable {
            SizeHints::minimum(self.config.min_size)
        } else {
            SizeHints::fixed(self.size)
        };
        display.set_size_hints(host, hints);
        display.set_title(host, &self.title);
        if let Some(delete) = window.inner.atoms.wm_delete_window {
            display.set_wm_protocols(host, &[delete]);
        }
        window.inner.gc.set(Some(display.create_gc(host)));

        let embed_parent = display.create_window(&WindowSpec {
            parent: Some(host),
            size: self.size,
            border_width: self.config.border_width,
            override_redirect: true,
            event_mask: EventMask::EXPOSURE
                | EventMask::KEY_PRESS
                | EventMask::BUTTON_PRESS
                | EventMask::BUTTON_RELEASE
                | EventMask::BUTTON_MOTION,
        })?;
        window.inner.embed_parent.set(Some(embed_parent));
        display.select_input(
            embed_parent,
            EventMask::SUBSTRUCTURE_NOTIFY | EventMask::PROPERTY_CHANGE,
        );
        display.map_window(embed_parent);
        display.flush();

        run_loop.register_window(host, window.handler(EmbeddingWindow::handle_host_event))?;
        run_loop.register_window(embed_parent, window.handler(EmbeddingWindow::handle_plug_event))?;

        let mut state = window.inner.state.get();
        state.bind();
        window.inner.state.set(state);
        debug!(%host, %embed_parent, size = %self.size, title = %self.title, "created editor window");
        Ok(window)
    }
}

struct ProtocolAtoms {
    embed_info: Atom,
    /// `_XEMBED` is only interned once a client shows up.
    embed: Cell<Option<Atom>>,
    wm_protocols: Option<Atom>,
    wm_delete_window: Option<Atom>,
}

struct WindowInner {
    display: Rc<dyn NativeDisplay>,
    run_loop: Rc<RunLoop>,
    controller: Rc<dyn WindowController>,
    on_closed: RefCell<Option<ClosedCallback>>,
    sources: Rc<PluginEventSources>,
    atoms: ProtocolAtoms,
    host: Cell<Option<WindowId>>,
    embed_parent: Cell<Option<WindowId>>,
    gc: Cell<Option<GcId>>,
    size: Cell<Size>,
    is_mapped: Cell<bool>,
    state: Cell<EmbedState>,
}

impl WindowInner {
    /// Frees the graphics context, destroys the host window (taking the embed
    /// parent with it) and drops every run-loop registration. Each resource is
    /// taken out of its cell, so a second call does nothing.
    fn release_native(&self, child: Option<WindowId>) {
        if let Some(gc) = self.gc.take() {
            self.display.free_gc(gc);
        }
        let embed_parent = self.embed_parent.take();
        if let Some(host) = self.host.take() {
            self.display.destroy_window(host);
            self.display.flush();
            self.run_loop.unregister_window(host);
        }
        for window in embed_parent.into_iter().chain(child) {
            self.run_loop.unregister_window(window);
        }
        self.sources.release();
    }
}

impl Drop for WindowInner {
    fn drop(&mut self) {
        let state = self.state.get();
        if !state.is_closed() {
            self.release_native(state.child().map(|child| child.window));
        }
    }
}

/// A host window with an embedded plugin editor.
pub struct EmbeddingWindow {
    inner: Rc<WindowInner>,
}

impl fmt::Debug for EmbeddingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingWindow")
            .field("host", &self.inner.host.get())
            .field("embed_parent", &self.inner.embed_parent.get())
            .field("size", &self.inner.size.get())
            .field("is_mapped", &self.inner.is_mapped.get())
            .field("state", &self.inner.state.get())
            .finish()
    }
}

impl EmbeddingWindow {
    pub fn show(&self) {
        if let Some(host) = self.inner.host.get() {
            self.inner.display.map_window(host);
            self.inner.display.flush();
        }
    }

    /// Unmaps the host window. Teardown follows once the unmap is reported.
    pub fn close(&self) {
        if let Some(host) = self.inner.host.get() {
            self.inner.display.unmap_window(host);
            self.inner.display.flush();
        }
    }

    /// Resizes host and embed parent unless `size` is already the current size.
    pub fn resize(&self, size: Size) {
        self.apply_resize(size, false);
    }

    pub fn resize_forced(&self, size: Size) {
        self.apply_resize(size, true);
    }

    /// Live geometry of the host window, or the last negotiated size once the
    /// host is gone.
    pub fn size(&self) -> Size {
        self.inner
            .host
            .get()
            .and_then(|host| self.inner.display.geometry(host))
            .unwrap_or_else(|| self.inner.size.get())
    }

    /// Last size negotiated with the controller.
    pub fn cached_size(&self) -> Size {
        self.inner.size.get()
    }

    /// Re-applies the negotiated size if the native geometry drifted from it.
    pub fn check_size(&self) {
        let cached = self.inner.size.get();
        let live = self.size();
        if live != cached {
            debug!(%live, %cached, "window geometry drifted");
            self.resize_forced(cached);
        }
    }

    /// Where the plugin should attach its editor; `None` once closed.
    pub fn embed_target(&self) -> Option<NativeParent> {
        self.inner.embed_parent.get().map(|window| NativeParent {
            platform: PlatformType::X11EmbedWindowId,
            window,
        })
    }

    /// Descriptor and timer registration for the embedded plugin.
    pub fn plugin_run_loop(&self) -> Rc<dyn PluginRunLoop> {
        Rc::clone(&self.inner.sources) as Rc<dyn PluginRunLoop>
    }

    pub fn plugin_event_sources(&self) -> &PluginEventSources {
        &self.inner.sources
    }

    pub fn state(&self) -> EmbedState {
        self.inner.state.get()
    }

    pub fn host_window(&self) -> Option<WindowId> {
        self.inner.host.get()
    }

    pub fn embed_parent(&self) -> Option<WindowId> {
        self.inner.embed_parent.get()
    }

    pub fn is_mapped(&self) -> bool {
        self.inner.is_mapped.get()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.get().is_closed()
    }

    fn apply_resize(&self, size: Size, force: bool) {
        if !force && size == self.inner.size.get() {
            return;
        }
        if let Some(host) = self.inner.host.get() {
            self.inner.display.resize_window(host, size);
        }
        if let Some(embed_parent) = self.inner.embed_parent.get() {
            self.inner.display.resize_window(embed_parent, size);
        }
        self.inner.size.set(size);
    }

    fn handler(
        &self,
        handle: fn(&EmbeddingWindow, &Event) -> Result<bool, ProtocolViolation>,
    ) -> WindowHandler {
        let weak: Weak<WindowInner> = Rc::downgrade(&self.inner);
        Rc::new(move |event: &Event| match weak.upgrade() {
            Some(inner) => handle(&EmbeddingWindow { inner }, event),
            None => Ok(false),
        })
    }

    fn handle_host_event(&self, event: &Event) -> Result<bool, ProtocolViolation> {
        let Some(host) = self.inner.host.get() else {
            return Ok(false);
        };
        match event {
            Event::Expose { count, .. } => {
                if *count == 0 {
                    self.paint(host);
                }
                Ok(true)
            }
            Event::Configure { window, size, .. } if *window == host => {
                self.negotiate_configure(*size);
                Ok(true)
            }
            Event::ResizeRequest { size, .. } => {
                self.negotiate_resize_request(host, *size);
                Ok(true)
            }
            Event::Map { window, .. } if *window == host => {
                if self.inner.is_mapped.replace(true) {
                    return Ok(false);
                }
                self.inner.controller.on_show(self);
                Ok(true)
            }
            Event::Unmap { window, .. } | Event::Destroy { window, .. } if *window == host => {
                self.close_from_native();
                Ok(true)
            }
            Event::ClientMessage {
                message_type, data, ..
            } if self.is_close_request(*message_type, data) => {
                self.close_from_native();
                Ok(true)
            }
            Event::FocusIn { .. } => {
                self.send_focus(Focus::Active);
                Ok(false)
            }
            Event::FocusOut { .. } => {
                self.send_focus(Focus::Inactive);
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// Events on the embed parent and on the embedded child.
    fn handle_plug_event(&self, event: &Event) -> Result<bool, ProtocolViolation> {
        match event {
            Event::Create { parent, window } => {
                if Some(*parent) == self.inner.embed_parent.get() {
                    self.embed_child(*window)?;
                }
                Ok(true)
            }
            Event::ClientMessage {
                message_type, data, ..
            } => {
                if Some(*message_type) == self.inner.atoms.embed.get() {
                    if let Some(message) = EmbedMessage::from_client_data(data) {
                        trace!(opcode = ?message.opcode, "client message from editor");
                        if message.opcode == Opcode::RequestFocus {
                            self.send_to_child(Opcode::FocusIn);
                        }
                    }
                } else {
                    trace!(
                        message_type = ?self.inner.display.atom_name(*message_type),
                        "ignoring client message"
                    );
                }
                Ok(false)
            }
            Event::Property { window, atom } if *atom == self.inner.atoms.embed_info => {
                self.refresh_embed_info(*window);
                Ok(false)
            }
            Event::Unmap { window, .. } | Event::Destroy { window, .. } => {
                let mut state = self.inner.state.get();
                if state.release_child(*window).is_some() {
                    self.inner.state.set(state);
                    self.inner.run_loop.unregister_window(*window);
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn embed_child(&self, child: WindowId) -> Result<(), ProtocolViolation> {
        let Some(embed_parent) = self.inner.embed_parent.get() else {
            return Ok(());
        };
        let previous = self.inner.state.get().child().map(|c| c.window);
        let info = self.inner.display.embed_info(child, self.inner.atoms.embed_info);

        let mut next = self.inner.state.get();
        if !next.embed(child, info)? {
            return Ok(());
        }
        let embed_atom = self.embed_atom()?;
        self.inner.state.set(next);

        if let Some(previous) = previous.filter(|previous| *previous != child) {
            self.inner.run_loop.unregister_window(previous);
        }
        let handler = self.handler(EmbeddingWindow::handle_plug_event);
        if let Err(err) = self.inner.run_loop.register_window(child, handler) {
            warn!(%child, "editor window already registered: {err}");
        }

        let Some(info) = next.child().map(|c| c.info) else {
            return Ok(());
        };
        let display = &self.inner.display;
        // `_XEMBED_INFO` changes only arrive with PropertyNotify selected.
        display.select_input(child, EventMask::PROPERTY_CHANGE);
        self.send_embed_message(child, embed_atom, embed_parent, &info, Opcode::EmbeddedNotify);
        display.map_window(child);
        display.resize_window(child, self.inner.size.get());
        self.send_embed_message(child, embed_atom, embed_parent, &info, Opcode::WindowActivate);
        self.send_embed_message(child, embed_atom, embed_parent, &info, Opcode::FocusIn);
        display.sync();
        debug!(%child, %embed_parent, version = info.version, "editor embedded");
        Ok(())
    }

    fn embed_atom(&self) -> Result<Atom, ProtocolViolation> {
        if let Some(atom) = self.inner.atoms.embed.get() {
            return Ok(atom);
        }
        let atom = self
            .inner
            .display
            .intern_atom(XEMBED, true)
            .ok_or(ProtocolViolation::MissingAtom(XEMBED))?;
        self.inner.atoms.embed.set(Some(atom));
        Ok(atom)
    }

    fn send_embed_message(
        &self,
        child: WindowId,
        embed_atom: Atom,
        embed_parent: WindowId,
        info: &EmbedInfo,
        opcode: Opcode,
    ) {
        let message = EmbedMessage::to_client(opcode, embed_parent, info);
        self.inner
            .display
            .send_client_message(child, embed_atom, message.to_client_data());
        self.inner.display.sync();
        trace!(%child, ?opcode, "sent embed message");
    }

    /// Sends `opcode` to the embedded child, if there is one.
    fn send_to_child(&self, opcode: Opcode) {
        let state = self.inner.state.get();
        let (Some(child), Some(embed_parent), Some(embed_atom)) = (
            state.child(),
            self.inner.embed_parent.get(),
            self.inner.atoms.embed.get(),
        ) else {
            return;
        };
        self.send_embed_message(child.window, embed_atom, embed_parent, &child.info, opcode);
    }

    fn send_focus(&self, focus: Focus) {
        let mut state = self.inner.state.get();
        if state.set_focus(focus).is_none() {
            return;
        }
        self.inner.state.set(state);
        let opcode = match focus {
            Focus::Active => Opcode::WindowActivate,
            Focus::Inactive => Opcode::WindowDeactivate,
        };
        self.send_to_child(opcode);
    }

    fn refresh_embed_info(&self, window: WindowId) {
        match self.inner.display.embed_info(window, self.inner.atoms.embed_info) {
            Some(info) => {
                let mut state = self.inner.state.get();
                if state.update_info(window, info) {
                    self.inner.state.set(state);
                    debug!(%window, version = info.version, flags = info.flags, "embed info changed");
                }
            }
            None => trace!(%window, "embed info unreadable, keeping previous value"),
        }
    }

    fn negotiate_configure(&self, requested: Size) {
        let cached = self.inner.size.get();
        if requested == cached {
            return;
        }
        let constrained = self.inner.controller.constrain_size(self, requested);
        debug!(%requested, %constrained, %cached, "host configured");
        if constrained != cached {
            self.inner.size.set(requested);
            self.inner.controller.on_resize(self, requested);
        }
        if constrained != requested {
            self.resize_forced(constrained);
        } else if let Some(embed_parent) = self.inner.embed_parent.get() {
            self.inner.display.resize_window(embed_parent, requested);
        }
    }

    fn negotiate_resize_request(&self, host: WindowId, requested: Size) {
        let cached = self.inner.size.get();
        if requested == cached {
            return;
        }
        let constrained = self.inner.controller.constrain_size(self, requested);
        debug!(%requested, %constrained, %cached, "resize requested");
        if constrained == cached {
            self.inner.display.resize_window(host, constrained);
        } else {
            self.resize_forced(constrained);
        }
    }

    fn paint(&self, host: WindowId) {
        self.inner.display.clear_window(host);
        if let Some(gc) = self.inner.gc.get() {
            self.inner.display.fill_rectangle(host, gc, self.inner.size.get());
        }
    }

    fn is_close_request(&self, message_type: Atom, data: &[i64; 5]) -> bool {
        let atoms = &self.inner.atoms;
        match (atoms.wm_protocols, atoms.wm_delete_window) {
            (Some(protocols), Some(delete)) => {
                message_type == protocols && data[0] as u64 == delete.0
            }
            _ => false,
        }
    }

    fn close_from_native(&self) {
        if self.is_closed() {
            return;
        }
        self.inner.controller.on_close(self);
        self.teardown();
    }

    /// Releases everything the window owns. Only the first call has an effect.
    fn teardown(&self) {
        let mut state = self.inner.state.get();
        let child = state.child().map(|child| child.window);
        if !state.close() {
            return;
        }
        self.inner.state.set(state);
        self.inner.release_native(child);
        self.inner.is_mapped.set(false);
        debug!("editor window closed");

        let callback = self.inner.on_closed.borrow_mut().take();
        if let Some(callback) = callback {
            callback(self);
        }
    }
}

impl WindowEmbedder for EmbeddingWindow {
    fn attach(&self) -> Result<NativeParent> {
        let Some(target) = self.embed_target() else {
            bail!("editor window already closed");
        };
        self.show();
        Ok(target)
    }

    fn detach(&self) -> Result<()> {
        if self.is_closed() {
            bail!("editor window already closed");
        }
        self.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DisplayCall, FakeDisplay};

    fn setup() -> (Rc<FakeDisplay>, Rc<RunLoop>) {
        let display = Rc::new(FakeDisplay::new());
        let run_loop = RunLoop::new(display.clone());
        (display, run_loop)
    }

    fn builder(size: Size) -> EmbeddingWindowBuilder {
        EmbeddingWindowBuilder::new("Editor", size).config(EditorHostConfig::builtin())
    }

    #[test]
    fn build_creates_host_and_override_redirect_parent() {
        let (display, run_loop) = setup();
        let window = builder(Size::new(640, 480)).build(&run_loop).expect("window");

        let created = display.created_windows();
        assert_eq!(created.len(), 2);
        let (host, host_spec) = &created[0];
        let (parent, parent_spec) = &created[1];
        assert_eq!(host_spec.size, Size::new(1920, 1080));
        assert!(!host_spec.override_redirect);
        assert_eq!(parent_spec.parent, Some(*host));
        assert!(parent_spec.override_redirect);
        assert_eq!(parent_spec.size, Size::new(640, 480));

        // Only the host exists when the initial size is applied.
        assert_eq!(display.resizes_of(*host), vec![Size::new(640, 480)]);
        assert!(display.resizes_of(*parent).is_empty());

        let calls = display.calls();
        assert!(calls.contains(&DisplayCall::SetSizeHints(
            *host,
            SizeHints::minimum(EditorHostConfig::DEFAULT_MIN_SIZE)
        )));
        assert!(calls.contains(&DisplayCall::SetTitle(*host, "Editor".into())));
        assert!(calls.contains(&DisplayCall::SetWmProtocols(
            *host,
            vec![display.atom(WM_DELETE_WINDOW).expect("atom")]
        )));
        assert!(calls.contains(&DisplayCall::Map(*parent)));
        assert!(!calls.contains(&DisplayCall::Map(*host)));
        assert_eq!(display.live_gc_count(), 1);

        assert!(run_loop.is_window_registered(*host));
        assert!(run_loop.is_window_registered(*parent));
        assert_eq!(window.state(), EmbedState::AwaitingChild);
        assert_eq!(
            window.embed_target(),
            Some(NativeParent {
                platform: PlatformType::X11EmbedWindowId,
                window: *parent,
            })
        );
    }

    #[test]
    fn fixed_windows_pin_both_hints() {
        let (display, run_loop) = setup();
        let window = builder(Size::new(300, 200))
            .resizable(false)
            .build(&run_loop)
            .expect("window");
        let host = window.host_window().expect("host");
        assert!(display
            .calls()
            .contains(&DisplayCall::SetSizeHints(host, SizeHints::fixed(Size::new(300, 200)))));
    }

    #[test]
    fn redirect_resize_is_opt_in() {
        let (display, run_loop) = setup();
        let config = EditorHostConfig {
            redirect_resize: true,
            ..EditorHostConfig::builtin()
        };
        let window = builder(Size::new(300, 200))
            .config(config)
            .build(&run_loop)
            .expect("window");
        let host = window.host_window().expect("host");
        let mask = display
            .calls()
            .into_iter()
            .find_map(|call| match call {
                DisplayCall::SelectInput(window, mask) if window == host => Some(mask),
                _ => None,
            })
            .expect("host input mask");
        assert!(mask.contains(EventMask::RESIZE_REDIRECT));
        assert!(mask.contains(EventMask::SUBSTRUCTURE_NOTIFY));
    }

    #[test]
    fn build_fails_without_embed_info_atom() {
        let display = Rc::new(FakeDisplay::new().without_atom(XEMBED_INFO));
        let run_loop = RunLoop::new(display.clone());
        let err = builder(Size::new(100, 100)).build(&run_loop).unwrap_err();
        assert!(matches!(err, EmbedError::MissingAtom(XEMBED_INFO)));
        assert!(display.created_windows().is_empty());
    }

    #[test]
    fn dropping_an_open_window_releases_native_resources() {
        let (display, run_loop) = setup();
        let window = builder(Size::new(100, 100)).build(&run_loop).expect("window");
        let host = window.host_window().expect("host");
        let parent = window.embed_parent().expect("parent");
        drop(window);

        assert_eq!(display.live_gc_count(), 0);
        assert!(display.calls().contains(&DisplayCall::DestroyWindow(host)));
        assert!(!run_loop.is_window_registered(host));
        assert!(!run_loop.is_window_registered(parent));
    }

    #[test]
    fn resize_skips_unchanged_sizes_unless_forced() {
        let (display, run_loop) = setup();
        let window = builder(Size::new(100, 100)).build(&run_loop).expect("window");
        let parent = window.embed_parent().expect("parent");

        window.resize(Size::new(100, 100));
        assert!(display.resizes_of(parent).is_empty());
        window.resize_forced(Size::new(100, 100));
        window.resize(Size::new(120, 90));
        assert_eq!(
            display.resizes_of(parent),
            vec![Size::new(100, 100), Size::new(120, 90)]
        );
        assert_eq!(window.cached_size(), Size::new(120, 90));
    }

    #[test]
    fn check_size_restores_drifted_geometry() {
        let (display, run_loop) = setup();
        let window = builder(Size::new(200, 150)).build(&run_loop).expect("window");
        let host = window.host_window().expect("host");

        window.check_size();
        assert_eq!(display.resizes_of(host).len(), 1);

        display.set_geometry(host, Size::new(10, 10));
        assert_eq!(window.size(), Size::new(10, 10));
        window.check_size();
        assert_eq!(window.size(), Size::new(200, 150));
    }

    #[test]
    fn expose_paints_only_the_last_region() {
        let (display, run_loop) = setup();
        let window = builder(Size::new(200, 150)).build(&run_loop).expect("window");
        let host = window.host_window().expect("host");
        display.clear_calls();

        display.push_event(Event::Expose { window: host, count: 1 });
        display.push_event(Event::Expose { window: host, count: 0 });
        run_loop.run_once().expect("run once");

        assert_eq!(display.count_calls(|call| matches!(call, DisplayCall::Clear(_))), 1);
        assert_eq!(
            display.count_calls(
                |call| matches!(call, DisplayCall::Fill(w, _, size) if *w == host && *size == Size::new(200, 150))
            ),
            1
        );
    }

    #[test]
    fn embedder_attach_shows_and_detach_unmaps() {
        let (display, run_loop) = setup();
        let window = builder(Size::new(200, 150)).build(&run_loop).expect("window");
        let host = window.host_window().expect("host");

        let target = window.attach().expect("attach");
        assert_eq!(Some(target.window), window.embed_parent());
        assert!(display.calls().contains(&DisplayCall::Map(host)));

        window.detach().expect("detach");
        assert!(display.calls().contains(&DisplayCall::Unmap(host)));

        display.push_event(Event::Unmap { event: host, window: host });
        run_loop.run_once().expect("run once");
        assert!(window.is_closed());
        assert!(window.attach().is_err());
        assert!(window.detach().is_err());
    }
}
