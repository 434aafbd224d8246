use std::io;

use thiserror::Error;

use crate::display::WindowId;

/// Misbehaviour of the embedded peer that cannot be repaired in place.
///
/// These surface from [`RunLoop::run`](crate::RunLoop::run) and are expected
/// to end the host process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("child window {0} does not advertise _XEMBED_INFO")]
    MissingEmbedInfo(WindowId),
    #[error("child window {0} was already mapped when it was embedded")]
    AlreadyMapped(WindowId),
    #[error("the display does not know the {0} atom")]
    MissingAtom(&'static str),
}

/// Errors reported by the run loop and the plugin event-source registry.
#[derive(Debug, Error)]
pub enum RunLoopError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("window {0} already has an event handler")]
    WindowAlreadyRegistered(WindowId),
    #[error("the run loop instance was already initialised")]
    AlreadyInitialized,
    #[error("waiting for events failed: {0}")]
    Poll(#[from] io::Error),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
}

impl RunLoopError {
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, RunLoopError::InvalidArgument(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RunLoopError::NotFound(_))
    }
}

/// Failures raised by a [`NativeDisplay`](crate::NativeDisplay) backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisplayError {
    #[error("cannot open display {0}")]
    Open(String),
    #[error("no 24-bit TrueColor visual available")]
    NoVisual,
    #[error("failed to create {0} window")]
    CreateWindow(&'static str),
}

/// Errors that prevent an embedding window from being created.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("the display does not know the {0} atom")]
    MissingAtom(&'static str),
    #[error(transparent)]
    Display(#[from] DisplayError),
    #[error(transparent)]
    RunLoop(#[from] RunLoopError),
}
