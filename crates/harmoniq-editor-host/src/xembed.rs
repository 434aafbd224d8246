//! XEmbed protocol vocabulary and the embedder-side state machine.

use tracing::debug;

use crate::display::WindowId;
use crate::error::ProtocolViolation;

/// Property every XEmbed client sets on its window before it is embedded.
pub const XEMBED_INFO: &str = "_XEMBED_INFO";
/// Message type of every XEmbed client message.
pub const XEMBED: &str = "_XEMBED";
pub const WM_DELETE_WINDOW: &str = "WM_DELETE_WINDOW";
pub const WM_PROTOCOLS: &str = "WM_PROTOCOLS";

/// `_XEMBED_INFO` flag bit telling the embedder the client wants to be mapped.
pub const XEMBED_MAPPED: u32 = 1 << 0;

/// `CurrentTime` placeholder carried in the first message slot.
const CURRENT_TIME: i64 = 0;

/// XEmbed message opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum Opcode {
    EmbeddedNotify = 0,
    WindowActivate = 1,
    WindowDeactivate = 2,
    RequestFocus = 3,
    FocusIn = 4,
    FocusOut = 5,
    FocusNext = 6,
    FocusPrev = 7,
    // 8 and 9 were XEMBED_GRAB_KEY / XEMBED_UNGRAB_KEY
    ModalityOn = 10,
    ModalityOff = 11,
    RegisterAccelerator = 12,
    UnregisterAccelerator = 13,
    ActivateAccelerator = 14,
}

impl TryFrom<i64> for Opcode {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Opcode::EmbeddedNotify,
            1 => Opcode::WindowActivate,
            2 => Opcode::WindowDeactivate,
            3 => Opcode::RequestFocus,
            4 => Opcode::FocusIn,
            5 => Opcode::FocusOut,
            6 => Opcode::FocusNext,
            7 => Opcode::FocusPrev,
            10 => Opcode::ModalityOn,
            11 => Opcode::ModalityOff,
            12 => Opcode::RegisterAccelerator,
            13 => Opcode::UnregisterAccelerator,
            14 => Opcode::ActivateAccelerator,
            other => return Err(other),
        })
    }
}

/// Contents of the `_XEMBED_INFO` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedInfo {
    pub version: u32,
    pub flags: u32,
}

impl EmbedInfo {
    pub const fn new(version: u32, flags: u32) -> Self {
        Self { version, flags }
    }

    /// Decodes the two 32-bit items of the property.
    pub fn from_words(words: &[u32]) -> Option<Self> {
        match words {
            [version, flags, ..] => Some(Self {
                version: *version,
                flags: *flags,
            }),
            _ => None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.flags & XEMBED_MAPPED != 0
    }
}

/// One XEmbed client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedMessage {
    pub opcode: Opcode,
    pub detail: i64,
    /// Embedder window for host-to-client messages.
    pub data1: i64,
    /// Protocol version the client advertised.
    pub data2: i64,
}

impl EmbedMessage {
    /// Host-to-client message addressed from `embedder`.
    pub fn to_client(opcode: Opcode, embedder: WindowId, info: &EmbedInfo) -> Self {
        Self {
            opcode,
            detail: 0,
            data1: embedder.0 as i64,
            data2: i64::from(info.version),
        }
    }

    pub fn to_client_data(&self) -> [i64; 5] {
        [
            CURRENT_TIME,
            self.opcode as i64,
            self.detail,
            self.data1,
            self.data2,
        ]
    }

    /// Decodes client message data; `None` for opcodes outside the protocol.
    pub fn from_client_data(data: &[i64; 5]) -> Option<Self> {
        let opcode = Opcode::try_from(data[1]).ok()?;
        Some(Self {
            opcode,
            detail: data[2],
            data1: data[3],
            data2: data[4],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Active,
    Inactive,
}

/// The client window currently embedded and what we know about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedChild {
    pub window: WindowId,
    pub info: EmbedInfo,
    pub focus: Focus,
}

/// Embedder-side protocol state.
///
/// The child window id only exists inside [`EmbedState::Embedded`], so it
/// cannot be addressed before the client was created or after it went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbedState {
    #[default]
    Unbound,
    AwaitingChild,
    Embedded(EmbeddedChild),
    Closed,
}

impl EmbedState {
    /// Unbound -> AwaitingChild once the embed parent exists.
    pub fn bind(&mut self) {
        if *self == EmbedState::Unbound {
            *self = EmbedState::AwaitingChild;
        }
    }

    /// AwaitingChild -> Embedded for a freshly created client window.
    ///
    /// Returns `Ok(false)` when the state does not accept a child (unbound or
    /// closed). A second client replaces an embedded one.
    pub fn embed(
        &mut self,
        window: WindowId,
        info: Option<EmbedInfo>,
    ) -> Result<bool, ProtocolViolation> {
        if matches!(*self, EmbedState::Unbound | EmbedState::Closed) {
            return Ok(false);
        }
        let info = info.ok_or(ProtocolViolation::MissingEmbedInfo(window))?;
        if info.is_mapped() {
            return Err(ProtocolViolation::AlreadyMapped(window));
        }
        debug!(child = %window, version = info.version, "embedding client window");
        *self = EmbedState::Embedded(EmbeddedChild {
            window,
            info,
            focus: Focus::Active,
        });
        Ok(true)
    }

    /// Records a focus change and returns the child to notify.
    pub fn set_focus(&mut self, focus: Focus) -> Option<EmbeddedChild> {
        match self {
            EmbedState::Embedded(child) => {
                child.focus = focus;
                Some(*child)
            }
            _ => None,
        }
    }

    /// Embedded -> AwaitingChild when `window` is the embedded child.
    pub fn release_child(&mut self, window: WindowId) -> Option<EmbeddedChild> {
        match *self {
            EmbedState::Embedded(child) if child.window == window => {
                debug!(child = %window, "client window left the embedder");
                *self = EmbedState::AwaitingChild;
                Some(child)
            }
            _ => None,
        }
    }

    /// Refreshes the recorded info of the embedded child.
    pub fn update_info(&mut self, window: WindowId, info: EmbedInfo) -> bool {
        match self {
            EmbedState::Embedded(child) if child.window == window => {
                child.info = info;
                true
            }
            _ => false,
        }
    }

    /// Any state -> Closed. Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        if *self == EmbedState::Closed {
            return false;
        }
        *self = EmbedState::Closed;
        true
    }

    pub fn child(&self) -> Option<&EmbeddedChild> {
        match self {
            EmbedState::Embedded(child) => Some(child),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        *self == EmbedState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHILD: WindowId = WindowId(0x42);

    fn awaiting() -> EmbedState {
        let mut state = EmbedState::default();
        state.bind();
        state
    }

    #[test]
    fn embed_requires_embed_info() {
        let mut state = awaiting();
        assert_eq!(
            state.embed(CHILD, None),
            Err(ProtocolViolation::MissingEmbedInfo(CHILD))
        );
        assert_eq!(state, EmbedState::AwaitingChild);
    }

    #[test]
    fn embed_rejects_premapped_clients() {
        let mut state = awaiting();
        let info = EmbedInfo::new(0, XEMBED_MAPPED);
        assert_eq!(
            state.embed(CHILD, Some(info)),
            Err(ProtocolViolation::AlreadyMapped(CHILD))
        );
    }

    #[test]
    fn unbound_and_closed_states_ignore_children() {
        let mut state = EmbedState::Unbound;
        assert_eq!(state.embed(CHILD, Some(EmbedInfo::new(0, 0))), Ok(false));
        state.bind();
        assert!(state.close());
        assert!(!state.close());
        assert_eq!(state.embed(CHILD, Some(EmbedInfo::new(0, 0))), Ok(false));
        assert!(state.is_closed());
    }

    #[test]
    fn child_is_only_addressable_while_embedded() {
        let mut state = awaiting();
        assert!(state.set_focus(Focus::Inactive).is_none());

        assert_eq!(state.embed(CHILD, Some(EmbedInfo::new(1, 0))), Ok(true));
        let child = state.set_focus(Focus::Inactive).expect("embedded child");
        assert_eq!(child.focus, Focus::Inactive);
        assert_eq!(child.info.version, 1);

        assert!(state.release_child(WindowId(7)).is_none());
        assert!(state.release_child(CHILD).is_some());
        assert_eq!(state, EmbedState::AwaitingChild);
        assert!(state.child().is_none());
    }

    #[test]
    fn client_messages_follow_the_xembed_layout() {
        let info = EmbedInfo::new(3, 0);
        let message = EmbedMessage::to_client(Opcode::FocusIn, WindowId(0x10), &info);
        assert_eq!(message.to_client_data(), [0, 4, 0, 0x10, 3]);
        assert_eq!(
            EmbedMessage::from_client_data(&[0, 3, 0, 0, 0]).map(|m| m.opcode),
            Some(Opcode::RequestFocus)
        );
        assert_eq!(EmbedMessage::from_client_data(&[0, 8, 0, 0, 0]), None);
    }

    #[test]
    fn embed_info_needs_two_words() {
        assert_eq!(EmbedInfo::from_words(&[0]), None);
        assert_eq!(
            EmbedInfo::from_words(&[1, XEMBED_MAPPED]),
            Some(EmbedInfo::new(1, 1))
        );
    }
}
