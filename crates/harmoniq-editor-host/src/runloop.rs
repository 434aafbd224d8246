//! Single-threaded reactor multiplexing the display connection, watched file
//! descriptors and periodic timers.
//!
//! Everything runs on the UI thread: handlers are invoked one at a time from
//! [`RunLoop::run_once`], and may register or unregister any source
//! (themselves included) while they run. Registries are never borrowed
//! across a handler call. The only blocking point is the `poll(2)` inside
//! the wait step, so handlers must not block.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use once_cell::unsync::OnceCell;
use tracing::{debug, error, trace, warn};

use crate::display::{Event, NativeDisplay, WindowId};
use crate::error::{ProtocolViolation, RunLoopError};

/// Handles events routed to one window. Returns whether the event was consumed.
pub type WindowHandler = Rc<dyn Fn(&Event) -> Result<bool, ProtocolViolation>>;
/// Invoked when a watched descriptor becomes readable.
pub type FdHandler = Rc<dyn Fn(RawFd)>;
/// Invoked each time a timer expires.
pub type TimerCallback = Rc<dyn Fn(TimerId)>;

/// Identifies a timer registered with [`RunLoop::register_timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

struct Timer {
    interval: Duration,
    deadline: Instant,
    callback: TimerCallback,
}

thread_local! {
    static INSTANCE: OnceCell<Rc<RunLoop>> = OnceCell::new();
}

pub struct RunLoop {
    display: Rc<dyn NativeDisplay>,
    windows: RefCell<HashMap<WindowId, WindowHandler>>,
    descriptors: RefCell<BTreeMap<RawFd, FdHandler>>,
    timers: RefCell<BTreeMap<TimerId, Timer>>,
    next_timer: Cell<u64>,
    running: Cell<bool>,
}

impl fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLoop")
            .field("windows", &self.windows.borrow().len())
            .field("descriptors", &self.descriptors.borrow().len())
            .field("timers", &self.timers.borrow().len())
            .field("running", &self.running.get())
            .finish()
    }
}

impl RunLoop {
    /// Creates a run loop owning `display`.
    pub fn new(display: Rc<dyn NativeDisplay>) -> Rc<Self> {
        Rc::new(Self {
            display,
            windows: RefCell::new(HashMap::new()),
            descriptors: RefCell::new(BTreeMap::new()),
            timers: RefCell::new(BTreeMap::new()),
            next_timer: Cell::new(1),
            running: Cell::new(false),
        })
    }

    /// Creates the process run loop. It lives until the thread exits.
    pub fn init(display: Rc<dyn NativeDisplay>) -> Result<Rc<Self>, RunLoopError> {
        INSTANCE.with(|cell| {
            let run_loop = Self::new(display);
            cell.set(Rc::clone(&run_loop))
                .map_err(|_| RunLoopError::AlreadyInitialized)?;
            Ok(run_loop)
        })
    }

    /// The run loop created by [`RunLoop::init`], if any.
    pub fn instance() -> Option<Rc<Self>> {
        INSTANCE.with(|cell| cell.get().cloned())
    }

    pub fn display(&self) -> &Rc<dyn NativeDisplay> {
        &self.display
    }

    pub fn register_window(
        &self,
        window: WindowId,
        handler: WindowHandler,
    ) -> Result<(), RunLoopError> {
        let mut windows = self.windows.borrow_mut();
        if windows.contains_key(&window) {
            return Err(RunLoopError::WindowAlreadyRegistered(window));
        }
        debug!(%window, "registered window handler");
        windows.insert(window, handler);
        Ok(())
    }

    /// Returns whether a handler was registered for `window`.
    pub fn unregister_window(&self, window: WindowId) -> bool {
        let removed = self.windows.borrow_mut().remove(&window).is_some();
        if removed {
            debug!(%window, "unregistered window handler");
        }
        removed
    }

    pub fn is_window_registered(&self, window: WindowId) -> bool {
        self.windows.borrow().contains_key(&window)
    }

    pub fn register_file_descriptor(
        &self,
        fd: RawFd,
        handler: FdHandler,
    ) -> Result<(), RunLoopError> {
        if fd < 0 {
            return Err(RunLoopError::InvalidArgument("negative file descriptor"));
        }
        let mut descriptors = self.descriptors.borrow_mut();
        if descriptors.contains_key(&fd) {
            return Err(RunLoopError::InvalidArgument(
                "file descriptor already watched",
            ));
        }
        debug!(fd, "watching file descriptor");
        descriptors.insert(fd, handler);
        Ok(())
    }

    pub fn unregister_file_descriptor(&self, fd: RawFd) -> Result<(), RunLoopError> {
        if self.descriptors.borrow_mut().remove(&fd).is_none() {
            return Err(RunLoopError::NotFound("file descriptor"));
        }
        debug!(fd, "stopped watching file descriptor");
        Ok(())
    }

    pub fn is_file_descriptor_registered(&self, fd: RawFd) -> bool {
        self.descriptors.borrow().contains_key(&fd)
    }

    /// Registers a periodic timer firing every `interval_ms` milliseconds.
    pub fn register_timer(
        &self,
        interval_ms: u64,
        callback: TimerCallback,
    ) -> Result<TimerId, RunLoopError> {
        if interval_ms == 0 {
            return Err(RunLoopError::InvalidArgument("timer interval must be non-zero"));
        }
        let id = TimerId(self.next_timer.get());
        self.next_timer.set(id.0 + 1);
        let interval = Duration::from_millis(interval_ms);
        self.timers.borrow_mut().insert(
            id,
            Timer {
                interval,
                deadline: Instant::now() + interval,
                callback,
            },
        );
        debug!(%id, interval_ms, "registered timer");
        Ok(id)
    }

    pub fn unregister_timer(&self, id: TimerId) -> Result<(), RunLoopError> {
        if self.timers.borrow_mut().remove(&id).is_none() {
            return Err(RunLoopError::NotFound("timer"));
        }
        debug!(%id, "unregistered timer");
        Ok(())
    }

    pub fn timer_count(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Runs wait steps until [`RunLoop::stop`] is called or a handler reports a
    /// protocol violation.
    pub fn run(&self) -> Result<(), RunLoopError> {
        self.running.set(true);
        while self.running.get() {
            if let Err(err) = self.run_once() {
                self.running.set(false);
                error!("run loop stopped: {err}");
                return Err(err);
            }
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.running.set(false);
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// One wait step: block until the display, a watched descriptor or a
    /// timer is ready, then dispatch everything that is pending.
    pub fn run_once(&self) -> Result<(), RunLoopError> {
        // Requests issued by handlers must reach the server before we block.
        self.display.flush();
        let timeout = if self.display.has_pending_events() {
            Some(Duration::ZERO)
        } else {
            self.next_timeout(Instant::now())
        };
        let ready = self.wait(timeout)?;

        self.dispatch_display_events()?;
        self.dispatch_descriptors(&ready);
        self.dispatch_timers(Instant::now());
        Ok(())
    }

    /// Routes `event` to the handler registered for its window.
    pub fn dispatch_event(&self, event: &Event) -> Result<bool, ProtocolViolation> {
        let window = event.routing_window();
        let handler = self.windows.borrow().get(&window).cloned();
        match handler {
            Some(handler) => {
                let consumed = handler(event)?;
                trace!(%window, consumed, ?event, "dispatched event");
                Ok(consumed)
            }
            None => {
                trace!(%window, ?event, "no handler for event");
                Ok(false)
            }
        }
    }

    fn dispatch_display_events(&self) -> Result<(), ProtocolViolation> {
        while let Some(event) = self.display.next_event() {
            self.dispatch_event(&event)?;
        }
        Ok(())
    }

    fn dispatch_descriptors(&self, ready: &[RawFd]) {
        for &fd in ready {
            // A handler earlier in this cycle may have unregistered `fd`.
            let handler = self.descriptors.borrow().get(&fd).cloned();
            if let Some(handler) = handler {
                trace!(fd, "descriptor ready");
                handler(fd);
            }
        }
    }

    fn dispatch_timers(&self, now: Instant) {
        let expired: Vec<TimerId> = self
            .timers
            .borrow()
            .iter()
            .filter(|(_, timer)| timer.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            let callback = {
                let mut timers = self.timers.borrow_mut();
                let Some(timer) = timers.get_mut(&id) else {
                    continue;
                };
                timer.deadline = now + timer.interval;
                Rc::clone(&timer.callback)
            };
            trace!(%id, "timer fired");
            callback(id);
        }
    }

    fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.timers
            .borrow()
            .values()
            .map(|timer| timer.deadline.saturating_duration_since(now))
            .min()
    }

    /// Polls the display connection and every watched descriptor. Returns the
    /// watched descriptors that became ready.
    fn wait(&self, timeout: Option<Duration>) -> Result<Vec<RawFd>, RunLoopError> {
        let display_fd = self.display.connection_fd();
        let mut fds: Vec<libc::pollfd> = display_fd
            .into_iter()
            .chain(self.descriptors.borrow().keys().copied())
            .map(|fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        if fds.is_empty() && timeout.is_none() {
            trace!("nothing to wait for");
            return Ok(Vec::new());
        }

        let timeout_ms = timeout.map_or(-1, poll_timeout_ms);
        // SAFETY: `fds` is a live, exclusively borrowed buffer of `fds.len()`
        // initialised pollfd structs for the duration of the call.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(RunLoopError::Poll(err));
        }

        let ready_mask = libc::POLLIN | libc::POLLERR | libc::POLLHUP;
        let mut ready = Vec::new();
        for pfd in fds.iter().filter(|pfd| Some(pfd.fd) != display_fd) {
            if pfd.revents & libc::POLLNVAL != 0 {
                // A closed descriptor would wake every poll without ever
                // becoming readable.
                warn!(fd = pfd.fd, "watched descriptor was closed, dropping it");
                self.descriptors.borrow_mut().remove(&pfd.fd);
            } else if pfd.revents & ready_mask != 0 {
                ready.push(pfd.fd);
            }
        }
        Ok(ready)
    }
}

fn poll_timeout_ms(timeout: Duration) -> libc::c_int {
    // Round up so a pending timer is never polled with a zero timeout early.
    let millis = (timeout.as_micros() + 999) / 1000;
    millis.min(libc::c_int::MAX as u128) as libc::c_int
}

#[cfg(test)]
mod tests {
    use std::os::fd::AsRawFd;

    use super::*;
    use crate::testing::FakeDisplay;

    fn run_loop() -> (Rc<FakeDisplay>, Rc<RunLoop>) {
        let display = Rc::new(FakeDisplay::new());
        let run_loop = RunLoop::new(display.clone());
        (display, run_loop)
    }

    #[test]
    fn second_window_registration_is_rejected() {
        let (_, run_loop) = run_loop();
        let hits = Rc::new(Cell::new(0));
        let first = Rc::clone(&hits);
        run_loop
            .register_window(
                WindowId(1),
                Rc::new(move |_| {
                    first.set(first.get() + 1);
                    Ok(true)
                }),
            )
            .unwrap();

        let err = run_loop
            .register_window(WindowId(1), Rc::new(|_| Ok(false)))
            .unwrap_err();
        assert!(matches!(err, RunLoopError::WindowAlreadyRegistered(WindowId(1))));

        let consumed = run_loop
            .dispatch_event(&Event::FocusIn {
                window: WindowId(1),
            })
            .unwrap();
        assert!(consumed);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn duplicate_descriptor_is_invalid_and_unknown_is_not_found() {
        let (_, run_loop) = run_loop();
        run_loop.register_file_descriptor(5, Rc::new(|_| {})).unwrap();
        let err = run_loop
            .register_file_descriptor(5, Rc::new(|_| {}))
            .unwrap_err();
        assert!(err.is_invalid_argument());

        assert!(run_loop.unregister_file_descriptor(6).unwrap_err().is_not_found());
        run_loop.unregister_file_descriptor(5).unwrap();
        assert!(!run_loop.is_file_descriptor_registered(5));
    }

    #[test]
    fn zero_interval_timer_is_invalid() {
        let (_, run_loop) = run_loop();
        let err = run_loop.register_timer(0, Rc::new(|_| {})).unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(run_loop.timer_count(), 0);
        assert!(run_loop
            .unregister_timer(TimerId(99))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn queued_display_events_are_dispatched_in_order() {
        let (display, run_loop) = run_loop();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        run_loop
            .register_window(
                WindowId(3),
                Rc::new(move |event| {
                    log.borrow_mut().push(event.clone());
                    Ok(true)
                }),
            )
            .unwrap();

        display.push_event(Event::FocusIn {
            window: WindowId(3),
        });
        display.push_event(Event::FocusOut {
            window: WindowId(4),
        });
        display.push_event(Event::FocusOut {
            window: WindowId(3),
        });
        run_loop.run_once().unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![
                Event::FocusIn {
                    window: WindowId(3)
                },
                Event::FocusOut {
                    window: WindowId(3)
                },
            ]
        );
        assert!(!display.has_pending_events());
    }

    #[test]
    fn protocol_violation_stops_the_loop() {
        let (display, run_loop) = run_loop();
        run_loop
            .register_window(
                WindowId(1),
                Rc::new(|_| Err(ProtocolViolation::MissingAtom("_XEMBED"))),
            )
            .unwrap();
        display.push_event(Event::FocusIn {
            window: WindowId(1),
        });

        let err = run_loop.run().unwrap_err();
        assert!(matches!(
            err,
            RunLoopError::Protocol(ProtocolViolation::MissingAtom("_XEMBED"))
        ));
        assert!(!run_loop.is_running());
    }

    #[test]
    fn handler_may_unregister_itself() {
        let (display, run_loop) = run_loop();
        let weak = Rc::downgrade(&run_loop);
        run_loop
            .register_window(
                WindowId(9),
                Rc::new(move |_| {
                    if let Some(run_loop) = weak.upgrade() {
                        run_loop.unregister_window(WindowId(9));
                    }
                    Ok(true)
                }),
            )
            .unwrap();
        display.push_event(Event::Unmap {
            event: WindowId(9),
            window: WindowId(9),
        });
        display.push_event(Event::Destroy {
            event: WindowId(9),
            window: WindowId(9),
        });
        run_loop.run_once().unwrap();
        assert!(!run_loop.is_window_registered(WindowId(9)));
    }

    #[test]
    fn timers_fire_after_their_interval() {
        let (_, run_loop) = run_loop();
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        let id = run_loop
            .register_timer(
                5,
                Rc::new(move |_| counter.set(counter.get() + 1)),
            )
            .unwrap();

        std::thread::sleep(Duration::from_millis(6));
        run_loop.run_once().unwrap();
        assert_eq!(fired.get(), 1);

        run_loop.unregister_timer(id).unwrap();
        run_loop.run_once().unwrap();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn timer_unregistered_by_earlier_timer_does_not_fire() {
        let (_, run_loop) = run_loop();
        let fired = Rc::new(Cell::new(0));
        let victim = Rc::new(Cell::new(None));

        let weak = Rc::downgrade(&run_loop);
        let target = Rc::clone(&victim);
        run_loop
            .register_timer(
                1,
                Rc::new(move |_| {
                    if let (Some(run_loop), Some(id)) = (weak.upgrade(), target.get()) {
                        let _ = run_loop.unregister_timer(id);
                    }
                }),
            )
            .unwrap();
        let counter = Rc::clone(&fired);
        let id = run_loop
            .register_timer(1, Rc::new(move |_| counter.set(counter.get() + 1)))
            .unwrap();
        victim.set(Some(id));

        std::thread::sleep(Duration::from_millis(3));
        run_loop.run_once().unwrap();
        assert_eq!(fired.get(), 0);
        assert_eq!(run_loop.timer_count(), 1);
    }

    #[test]
    fn closed_descriptors_are_dropped() {
        let (_, run_loop) = run_loop();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let (reader, writer) = os_pipe::pipe().expect("pipe");
        let fd = reader.as_raw_fd();
        run_loop
            .register_file_descriptor(fd, Rc::new(move |_| counter.set(counter.get() + 1)))
            .unwrap();
        drop(reader);
        drop(writer);

        run_loop.run_once().unwrap();
        assert!(!run_loop.is_file_descriptor_registered(fd));
        assert_eq!(hits.get(), 0);

        // Nothing is left to wait on, so the next step returns at once.
        let started = Instant::now();
        run_loop.run_once().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn timeouts_round_up_to_whole_milliseconds() {
        assert_eq!(poll_timeout_ms(Duration::ZERO), 0);
        assert_eq!(poll_timeout_ms(Duration::from_micros(1)), 1);
        assert_eq!(poll_timeout_ms(Duration::from_millis(16)), 16);
    }

    #[test]
    fn process_instance_is_initialised_once() {
        let display: Rc<dyn NativeDisplay> = Rc::new(FakeDisplay::new());
        assert!(RunLoop::instance().is_none());
        let run_loop = RunLoop::init(Rc::clone(&display)).unwrap();
        let again = RunLoop::init(display).unwrap_err();
        assert!(matches!(again, RunLoopError::AlreadyInitialized));
        let instance = RunLoop::instance().expect("initialised");
        assert!(Rc::ptr_eq(&run_loop, &instance));
    }
}
