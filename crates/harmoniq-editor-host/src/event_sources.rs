//! Run-loop access for the embedded plugin.
//!
//! A plugin editor may ask its host to watch extra descriptors or drive
//! timers on the UI thread. Each embedding window hands out one
//! [`PluginEventSources`], which forwards registrations to the shared
//! [`RunLoop`] and remembers which handler owns which key so it can undo the
//! registration by handler identity, the way plugin SDKs unregister.
//!
//! Handlers are held as [`Weak`] references. The plugin owns them and must
//! keep them alive until it unregisters; a handler dropped early is simply
//! skipped.

use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::error::RunLoopError;
use crate::runloop::{RunLoop, TimerId};

/// Plugin callback for descriptor readiness.
pub trait EventHandler {
    fn on_fd_is_set(&self, fd: RawFd);
}

/// Plugin callback for periodic timers.
pub trait TimerHandler {
    fn on_timer(&self);
}

/// Run-loop capability exposed to an embedded plugin.
pub trait PluginRunLoop {
    fn register_event_handler(
        &self,
        handler: Weak<dyn EventHandler>,
        fd: RawFd,
    ) -> Result<(), RunLoopError>;

    fn unregister_event_handler(&self, handler: &Weak<dyn EventHandler>) -> Result<(), RunLoopError>;

    fn register_timer(
        &self,
        handler: Weak<dyn TimerHandler>,
        interval_ms: u64,
    ) -> Result<(), RunLoopError>;

    fn unregister_timer(&self, handler: &Weak<dyn TimerHandler>) -> Result<(), RunLoopError>;
}

/// Per-window registry of plugin descriptors and timers.
pub struct PluginEventSources {
    run_loop: Rc<RunLoop>,
    descriptors: RefCell<Vec<(RawFd, Weak<dyn EventHandler>)>>,
    timers: RefCell<Vec<(TimerId, Weak<dyn TimerHandler>)>>,
    released: Cell<bool>,
}

impl std::fmt::Debug for PluginEventSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEventSources")
            .field("descriptors", &self.descriptors.borrow().len())
            .field("timers", &self.timers.borrow().len())
            .field("released", &self.released.get())
            .finish()
    }
}

impl PluginEventSources {
    pub fn new(run_loop: Rc<RunLoop>) -> Self {
        Self {
            run_loop,
            descriptors: RefCell::new(Vec::new()),
            timers: RefCell::new(Vec::new()),
            released: Cell::new(false),
        }
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.borrow().len()
    }

    pub fn timer_count(&self) -> usize {
        self.timers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptor_count() == 0 && self.timer_count() == 0
    }

    /// Calls every registered descriptor handler regardless of readiness.
    ///
    /// Some plugins only pump their UI from these callbacks and expect the
    /// host to call them from its idle path.
    pub fn notify_all_fd_handlers(&self) {
        let handlers: Vec<_> = self.descriptors.borrow().clone();
        for (fd, handler) in handlers {
            if let Some(handler) = handler.upgrade() {
                handler.on_fd_is_set(fd);
            }
        }
    }

    /// Removes every registration from the run loop. Safe to call repeatedly.
    pub fn release(&self) {
        if self.released.replace(true) {
            return;
        }
        for (fd, _) in self.descriptors.take() {
            match self.run_loop.unregister_file_descriptor(fd) {
                Err(err) if err.is_not_found() => debug!(fd, "descriptor already dropped"),
                Err(err) => warn!(fd, "releasing plugin descriptor: {err}"),
                Ok(()) => {}
            }
        }
        for (id, _) in self.timers.take() {
            if let Err(err) = self.run_loop.unregister_timer(id) {
                warn!(%id, "releasing plugin timer: {err}");
            }
        }
        debug!("released plugin event sources");
    }

    pub fn is_released(&self) -> bool {
        self.released.get()
    }

    fn ensure_live(&self) -> Result<(), RunLoopError> {
        if self.released.get() {
            return Err(RunLoopError::InvalidArgument("editor window already closed"));
        }
        Ok(())
    }
}

impl PluginRunLoop for PluginEventSources {
    fn register_event_handler(
        &self,
        handler: Weak<dyn EventHandler>,
        fd: RawFd,
    ) -> Result<(), RunLoopError> {
        self.ensure_live()?;
        if handler.strong_count() == 0 {
            return Err(RunLoopError::InvalidArgument("event handler is gone"));
        }
        if self.descriptors.borrow().iter().any(|(known, _)| *known == fd) {
            return Err(RunLoopError::InvalidArgument(
                "file descriptor already registered",
            ));
        }

        let callback = Weak::clone(&handler);
        self.run_loop.register_file_descriptor(
            fd,
            Rc::new(move |fd| match callback.upgrade() {
                Some(handler) => handler.on_fd_is_set(fd),
                None => warn!(fd, "plugin dropped its event handler without unregistering"),
            }),
        )?;
        self.descriptors.borrow_mut().push((fd, handler));
        debug!(fd, "plugin registered event handler");
        Ok(())
    }

    fn unregister_event_handler(&self, handler: &Weak<dyn EventHandler>) -> Result<(), RunLoopError> {
        // Dropped handlers still compare by address.
        let position = self
            .descriptors
            .borrow()
            .iter()
            .position(|(_, known)| Weak::ptr_eq(known, handler))
            .ok_or(RunLoopError::NotFound("event handler"))?;
        let (fd, _) = self.descriptors.borrow_mut().remove(position);
        match self.run_loop.unregister_file_descriptor(fd) {
            // The run loop drops descriptors that were closed under it.
            Err(err) if err.is_not_found() => debug!(fd, "descriptor already dropped"),
            result => result?,
        }
        debug!(fd, "plugin unregistered event handler");
        Ok(())
    }

    fn register_timer(
        &self,
        handler: Weak<dyn TimerHandler>,
        interval_ms: u64,
    ) -> Result<(), RunLoopError> {
        self.ensure_live()?;
        if handler.strong_count() == 0 {
            return Err(RunLoopError::InvalidArgument("timer handler is gone"));
        }

        let callback = Weak::clone(&handler);
        let id = self.run_loop.register_timer(
            interval_ms,
            Rc::new(move |id| match callback.upgrade() {
                Some(handler) => handler.on_timer(),
                None => warn!(%id, "plugin dropped its timer handler without unregistering"),
            }),
        )?;
        self.timers.borrow_mut().push((id, handler));
        debug!(%id, interval_ms, "plugin registered timer");
        Ok(())
    }

    fn unregister_timer(&self, handler: &Weak<dyn TimerHandler>) -> Result<(), RunLoopError> {
        let position = self
            .timers
            .borrow()
            .iter()
            .position(|(_, known)| Weak::ptr_eq(known, handler))
            .ok_or(RunLoopError::NotFound("timer handler"))?;
        let (id, _) = self.timers.borrow_mut().remove(position);
        self.run_loop.unregister_timer(id)?;
        debug!(%id, "plugin unregistered timer");
        Ok(())
    }
}

impl Drop for PluginEventSources {
    fn drop(&mut self) {
        self.release();
    }
}
