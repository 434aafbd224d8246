//! Harmoniq Studio plugin editor hosting for X11.
//!
//! Third party plugins draw their editors into a window the host provides.
//! This crate opens that window, runs the XEmbed handshake with the editor
//! the plugin creates inside it, negotiates resizes with the application and
//! drives everything from a single-threaded [`RunLoop`] that the plugin can
//! also register descriptors and timers with.
//!
//! The native window system is reached through [`NativeDisplay`]; the Xlib
//! implementation lives in `backend::xlib` behind the `x11` feature, and
//! `testing::FakeDisplay` (feature `testing`) stands in for it in tests.

pub mod backend;
pub mod config;
pub mod display;
pub mod error;
pub mod event_sources;
pub mod geometry;
pub mod runloop;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod window;
pub mod xembed;

pub use config::EditorHostConfig;
pub use display::{Atom, Event, EventMask, NativeDisplay, SizeHints, WindowId, WindowSpec};
pub use error::{DisplayError, EmbedError, ProtocolViolation, RunLoopError};
pub use event_sources::{EventHandler, PluginEventSources, PluginRunLoop, TimerHandler};
pub use geometry::Size;
pub use runloop::{RunLoop, TimerId};
pub use window::{
    EmbeddingWindow, EmbeddingWindowBuilder, NativeParent, PlatformType, UnconstrainedController,
    WindowController, WindowEmbedder,
};
pub use xembed::{EmbedInfo, EmbedMessage, EmbedState, Focus, Opcode};
