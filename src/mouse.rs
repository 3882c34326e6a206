//! Cursor state notification.
//!
//! One producer (the session's tracker thread, fed by the execution
//! context) publishes cursor observations; any number of consumer threads
//! read the latest snapshot or block until the cursor *shape* changes.
//!
//! The shape-changed condition is a generation counter, not a pulse: a
//! change published while nobody is waiting is still observed by the next
//! waiter. Cancellation (explicit release or session teardown) wakes every
//! waiter with [`MouseError::Cancelled`], so no thread can be left parked
//! across destruction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::context::{CursorShape, CursorSnapshot, ExecutionContext};
use crate::error::MouseError;

/// Notification kinds that can be released to unblock waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// The cursor shape-change wait in `mouse_data(wait = true)`.
    MouseShape,
}

/// A cursor state snapshot handed to consumers.
#[derive(Debug, Clone)]
pub struct MouseData {
    /// Screen X position.
    pub x: i32,
    /// Screen Y position.
    pub y: i32,
    /// Whether the cursor is currently shown.
    pub visible: bool,
    /// True when the shape changed since the last consumed snapshot.
    pub shape_changed: bool,
    /// The current shape bitmap, when one is known.
    pub shape: Option<CursorShape>,
}

#[derive(Default)]
struct NotifierState {
    x: i32,
    y: i32,
    visible: bool,
    shape: Option<CursorShape>,
    last_shape_id: Option<u64>,
    /// Bumped on every shape change.
    shape_generation: u64,
    /// The generation most recently handed to a consumer.
    consumed_generation: u64,
    /// Bumped by `release`; waiters that entered earlier observe it and
    /// return cancelled.
    release_generation: u64,
    closed: bool,
}

impl NotifierState {
    fn snapshot(&self, shape_changed: bool) -> MouseData {
        MouseData {
            x: self.x,
            y: self.y,
            visible: self.visible,
            shape_changed,
            shape: self.shape.clone(),
        }
    }
}

/// The shared notifier. Producer and consumers all hold it through `Arc`.
pub(crate) struct MouseNotifier {
    state: Mutex<NotifierState>,
    cond: Condvar,
}

impl MouseNotifier {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NotifierState::default()),
            cond: Condvar::new(),
        }
    }

    /// Publish a fresh observation. Position and visibility always update;
    /// a new shape identity bumps the change generation and wakes waiters.
    /// The first observed shape counts as a change, so consumers always
    /// learn the initial shape.
    pub fn publish(&self, snapshot: &CursorSnapshot) {
        let mut state = self.state.lock();
        state.x = snapshot.x;
        state.y = snapshot.y;
        state.visible = snapshot.visible;

        if snapshot.visible && state.last_shape_id != Some(snapshot.shape_id) {
            state.last_shape_id = Some(snapshot.shape_id);
            state.shape = snapshot.shape.clone();
            state.shape_generation += 1;
            self.cond.notify_all();
        }
    }

    /// Read the current state, optionally blocking until the shape changes.
    pub fn get(&self, wait: bool) -> Result<MouseData, MouseError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(MouseError::Cancelled);
        }

        if !wait {
            let changed = state.shape_generation > state.consumed_generation;
            if changed {
                state.consumed_generation = state.shape_generation;
            }
            return Ok(state.snapshot(changed));
        }

        let entry_release = state.release_generation;
        loop {
            if state.closed || state.release_generation != entry_release {
                return Err(MouseError::Cancelled);
            }
            if state.shape_generation > state.consumed_generation {
                state.consumed_generation = state.shape_generation;
                return Ok(state.snapshot(true));
            }
            self.cond.wait(&mut state);
        }
    }

    /// Wake every current waiter without a shape change. Safe with zero
    /// waiters; repeated calls are idempotent wakes.
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.release_generation += 1;
        self.cond.notify_all();
    }

    /// Teardown: all current and future waits return cancelled.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.cond.notify_all();
    }
}

/// Cloneable consumer handle, detached from the session's lifetime.
///
/// Threads blocked in [`MouseWatcher::mouse_data`] while the session is
/// destroyed return [`MouseError::Cancelled`] instead of hanging.
#[derive(Clone)]
pub struct MouseWatcher {
    notifier: Arc<MouseNotifier>,
    enabled: bool,
}

impl MouseWatcher {
    pub(crate) fn new(notifier: Arc<MouseNotifier>, enabled: bool) -> Self {
        Self { notifier, enabled }
    }

    /// Read the cursor state; with `wait` the call blocks until the shape
    /// changes or the wait is cancelled.
    pub fn mouse_data(&self, wait: bool) -> Result<MouseData, MouseError> {
        if !self.enabled {
            return Err(MouseError::Disabled);
        }
        self.notifier.get(wait)
    }

    /// Release waiters of the given notification kind.
    pub fn release_event(&self, kind: Notification) {
        match kind {
            Notification::MouseShape => self.notifier.release(),
        }
    }
}

/// How often the tracker thread samples the context's cursor state.
const TRACKER_INTERVAL: Duration = Duration::from_millis(16);

/// The producer thread: samples the execution context and feeds the
/// notifier until stopped.
pub(crate) struct MouseTrackerThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MouseTrackerThread {
    pub fn spawn(
        context: Arc<dyn ExecutionContext>,
        notifier: Arc<MouseNotifier>,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("mouse-shape-tracker".to_string())
            .spawn(move || {
                debug!("mouse tracker started");
                while !stop_flag.load(Ordering::SeqCst) {
                    if let Some(snapshot) = context.cursor_state() {
                        notifier.publish(&snapshot);
                    }
                    thread::sleep(TRACKER_INTERVAL);
                }
                debug!("mouse tracker stopped");
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("mouse tracker thread panicked");
            }
        }
    }
}

impl Drop for MouseTrackerThread {
    fn drop(&mut self) {
        self.stop();
    }
}
