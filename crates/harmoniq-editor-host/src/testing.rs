//! In-memory [`NativeDisplay`] for exercising the embedding logic without an
//! X server.
//!
//! [`FakeDisplay`] records every request as a [`DisplayCall`], serves events
//! queued with [`FakeDisplay::push_event`] and answers property reads from
//! values seeded with [`FakeDisplay::set_embed_info`].

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::os::fd::RawFd;

use crate::display::{Atom, Event, EventMask, GcId, NativeDisplay, SizeHints, WindowId, WindowSpec};
use crate::error::DisplayError;
use crate::geometry::Size;
use crate::xembed::{EmbedInfo, EmbedMessage, WM_DELETE_WINDOW, WM_PROTOCOLS, XEMBED, XEMBED_INFO};

/// One request issued against the fake display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayCall {
    CreateWindow { window: WindowId, spec: WindowSpec },
    DestroyWindow(WindowId),
    SelectInput(WindowId, EventMask),
    SetSizeHints(WindowId, SizeHints),
    SetTitle(WindowId, String),
    SetWmProtocols(WindowId, Vec<Atom>),
    Map(WindowId),
    Unmap(WindowId),
    Resize(WindowId, Size),
    SendClientMessage {
        window: WindowId,
        message_type: Atom,
        data: [i64; 5],
    },
    CreateGc(WindowId, GcId),
    FreeGc(GcId),
    Clear(WindowId),
    Fill(WindowId, GcId, Size),
    Flush,
    Sync,
}

#[derive(Debug)]
struct State {
    atoms: HashMap<String, Atom>,
    next_id: u64,
    calls: Vec<DisplayCall>,
    events: VecDeque<Event>,
    geometry: HashMap<WindowId, Size>,
    embed_info: HashMap<WindowId, EmbedInfo>,
    live_gcs: HashSet<GcId>,
    screen: Size,
}

#[derive(Debug)]
pub struct FakeDisplay {
    state: RefCell<State>,
}

impl Default for FakeDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDisplay {
    /// A 1920x1080 display where the XEmbed and WM atoms already exist.
    pub fn new() -> Self {
        let display = Self {
            state: RefCell::new(State {
                atoms: HashMap::new(),
                next_id: 0x100,
                calls: Vec::new(),
                events: VecDeque::new(),
                geometry: HashMap::new(),
                embed_info: HashMap::new(),
                live_gcs: HashSet::new(),
                screen: Size::new(1920, 1080),
            }),
        };
        for name in [XEMBED_INFO, XEMBED, WM_PROTOCOLS, WM_DELETE_WINDOW] {
            display.intern_atom(name, false);
        }
        display
    }

    /// Forgets `name`, as if no client on the display had interned it.
    pub fn without_atom(self, name: &str) -> Self {
        self.state.borrow_mut().atoms.remove(name);
        self
    }

    pub fn atom(&self, name: &str) -> Option<Atom> {
        self.state.borrow().atoms.get(name).copied()
    }

    /// Allocates an id for a window "created" by another client.
    pub fn allocate_window(&self) -> WindowId {
        WindowId(self.next_id())
    }

    pub fn push_event(&self, event: Event) {
        self.state.borrow_mut().events.push_back(event);
    }

    pub fn set_embed_info(&self, window: WindowId, info: EmbedInfo) {
        self.state.borrow_mut().embed_info.insert(window, info);
    }

    pub fn clear_embed_info(&self, window: WindowId) {
        self.state.borrow_mut().embed_info.remove(&window);
    }

    /// Simulates a geometry change that bypassed the host.
    pub fn set_geometry(&self, window: WindowId, size: Size) {
        self.state.borrow_mut().geometry.insert(window, size);
    }

    pub fn calls(&self) -> Vec<DisplayCall> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Windows created so far, in creation order.
    pub fn created_windows(&self) -> Vec<(WindowId, WindowSpec)> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                DisplayCall::CreateWindow { window, spec } => Some((*window, spec.clone())),
                _ => None,
            })
            .collect()
    }

    /// Every resize request issued for `window`.
    pub fn resizes_of(&self, window: WindowId) -> Vec<Size> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                DisplayCall::Resize(target, size) if *target == window => Some(*size),
                _ => None,
            })
            .collect()
    }

    /// XEmbed messages sent to `window`, in order.
    pub fn embed_messages_to(&self, window: WindowId) -> Vec<EmbedMessage> {
        let xembed = self.atom(XEMBED);
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                DisplayCall::SendClientMessage {
                    window: target,
                    message_type,
                    data,
                } if *target == window && Some(*message_type) == xembed => {
                    EmbedMessage::from_client_data(data)
                }
                _ => None,
            })
            .collect()
    }

    pub fn count_calls(&self, predicate: impl Fn(&DisplayCall) -> bool) -> usize {
        self.state.borrow().calls.iter().filter(|call| predicate(*call)).count()
    }

    pub fn live_gc_count(&self) -> usize {
        self.state.borrow().live_gcs.len()
    }

    fn next_id(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    fn record(&self, call: DisplayCall) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl NativeDisplay for FakeDisplay {
    fn intern_atom(&self, name: &str, only_if_exists: bool) -> Option<Atom> {
        if let Some(atom) = self.atom(name) {
            return Some(atom);
        }
        if only_if_exists {
            return None;
        }
        let atom = Atom(self.next_id());
        self.state.borrow_mut().atoms.insert(name.to_owned(), atom);
        Some(atom)
    }

    fn atom_name(&self, atom: Atom) -> Option<String> {
        self.state
            .borrow()
            .atoms
            .iter()
            .find(|(_, value)| **value == atom)
            .map(|(name, _)| name.clone())
    }

    fn screen_size(&self) -> Size {
        self.state.borrow().screen
    }

    fn create_window(&self, spec: &WindowSpec) -> Result<WindowId, DisplayError> {
        let window = WindowId(self.next_id());
        let mut state = self.state.borrow_mut();
        state.geometry.insert(window, spec.size);
        state.calls.push(DisplayCall::CreateWindow {
            window,
            spec: spec.clone(),
        });
        Ok(window)
    }

    fn destroy_window(&self, window: WindowId) {
        let mut state = self.state.borrow_mut();
        state.geometry.remove(&window);
        state.calls.push(DisplayCall::DestroyWindow(window));
    }

    fn select_input(&self, window: WindowId, mask: EventMask) {
        self.record(DisplayCall::SelectInput(window, mask));
    }

    fn set_size_hints(&self, window: WindowId, hints: SizeHints) {
        self.record(DisplayCall::SetSizeHints(window, hints));
    }

    fn set_title(&self, window: WindowId, title: &str) {
        self.record(DisplayCall::SetTitle(window, title.to_owned()));
    }

    fn set_wm_protocols(&self, window: WindowId, protocols: &[Atom]) {
        self.record(DisplayCall::SetWmProtocols(window, protocols.to_vec()));
    }

    fn map_window(&self, window: WindowId) {
        self.record(DisplayCall::Map(window));
    }

    fn unmap_window(&self, window: WindowId) {
        self.record(DisplayCall::Unmap(window));
    }

    fn resize_window(&self, window: WindowId, size: Size) {
        let mut state = self.state.borrow_mut();
        if let Some(current) = state.geometry.get_mut(&window) {
            *current = size;
        }
        state.calls.push(DisplayCall::Resize(window, size));
    }

    fn geometry(&self, window: WindowId) -> Option<Size> {
        self.state.borrow().geometry.get(&window).copied()
    }

    fn embed_info(&self, window: WindowId, property: Atom) -> Option<EmbedInfo> {
        if self.atom(XEMBED_INFO) != Some(property) {
            return None;
        }
        self.state.borrow().embed_info.get(&window).copied()
    }

    fn send_client_message(&self, window: WindowId, message_type: Atom, data: [i64; 5]) {
        self.record(DisplayCall::SendClientMessage {
            window,
            message_type,
            data,
        });
    }

    fn create_gc(&self, window: WindowId) -> GcId {
        let gc = GcId(self.next_id());
        let mut state = self.state.borrow_mut();
        state.live_gcs.insert(gc);
        state.calls.push(DisplayCall::CreateGc(window, gc));
        gc
    }

    fn free_gc(&self, gc: GcId) {
        let mut state = self.state.borrow_mut();
        assert!(state.live_gcs.remove(&gc), "graphics context {gc:?} freed twice");
        state.calls.push(DisplayCall::FreeGc(gc));
    }

    fn clear_window(&self, window: WindowId) {
        self.record(DisplayCall::Clear(window));
    }

    fn fill_rectangle(&self, window: WindowId, gc: GcId, size: Size) {
        self.record(DisplayCall::Fill(window, gc, size));
    }

    fn flush(&self) {
        self.record(DisplayCall::Flush);
    }

    fn sync(&self) {
        self.record(DisplayCall::Sync);
    }

    fn connection_fd(&self) -> Option<RawFd> {
        None
    }

    fn has_pending_events(&self) -> bool {
        !self.state.borrow().events.is_empty()
    }

    fn next_event(&self) -> Option<Event> {
        self.state.borrow_mut().events.pop_front()
    }
}
