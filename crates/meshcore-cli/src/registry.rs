//! Pending-wait registry.
//!
//! A command that needs to block on the radio registers one or more
//! [`Pattern`]s and gets back a [`WaitHandle`]. The router hands every
//! routed event to [`WaitRegistry::notify`], which resolves the *first*
//! matching waiter in registration order and removes it. Each waiter owns a
//! single-slot channel, so the blocked command wakes without polling.
//!
//! Acks, login results, status responses and "messages waiting" signals
//! that nobody is waiting for are parked in a short backlog and handed to
//! the next registration that matches them. This covers the gap between a
//! command that triggers one of these and the later command that waits for
//! it (`msg` then `wait_ack`). A keyed wait that timed out leaves its key
//! behind, so the late event it wanted is dropped instead of parked for
//! some unrelated waiter.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::event::{Event, EventKind, Pattern};

/// Upper bound on parked events.
pub const BACKLOG_CAPACITY: usize = 64;

/// How a wait ended.
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    /// A matching event arrived.
    Event(Arc<Event>),
    /// The deadline passed first.
    Timeout,
    /// The link dropped while waiting.
    Disconnected(String),
    /// The session was torn down by the user.
    Interrupted,
}

impl WaitOutcome {
    /// The event, if the wait succeeded.
    pub fn event(&self) -> Option<&Arc<Event>> {
        match self {
            WaitOutcome::Event(event) => Some(event),
            _ => None,
        }
    }
}

/// Why outstanding waits are being failed.
#[derive(Debug, Clone)]
pub enum FailReason {
    /// Link loss; later registrations work again after a reconnect.
    Disconnected(String),
    /// Session teardown; every later registration fails immediately too.
    Interrupted,
}

/// Identifier of a registered waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

struct Waiter {
    id: WaiterId,
    patterns: Vec<Pattern>,
    deadline: Instant,
    slot: Sender<WaitOutcome>,
}

impl Waiter {
    fn matches(&self, event: &Event) -> bool {
        self.patterns.iter().any(|p| p.matches(event))
    }
}

struct RegistryState {
    waiters: VecDeque<Waiter>,
    backlog: VecDeque<Arc<Event>>,
    /// Keyed patterns whose waiter gave up, with when it did.
    abandoned: VecDeque<(Pattern, Instant)>,
    next_id: u64,
    interrupted: bool,
}

struct RegistryInner {
    state: Mutex<RegistryState>,
    backlog_ttl: Duration,
}

impl RegistryInner {
    fn cancel(&self, id: WaiterId) -> bool {
        let mut state = self.state.lock();
        state.take(id).is_some()
    }

    /// Remove a waiter whose deadline passed, remembering the keyed
    /// patterns of retained kinds it was waiting on.
    fn abandon(&self, id: WaiterId) -> bool {
        let mut state = self.state.lock();
        let Some(waiter) = state.take(id) else {
            return false;
        };
        let now = Instant::now();
        for pattern in waiter.patterns {
            if pattern.key.is_some() && WaitRegistry::is_retained(pattern.kind) {
                if state.abandoned.len() >= BACKLOG_CAPACITY {
                    state.abandoned.pop_front();
                }
                state.abandoned.push_back((pattern, now));
            }
        }
        true
    }
}

impl RegistryState {
    fn take(&mut self, id: WaiterId) -> Option<Waiter> {
        let index = self.waiters.iter().position(|w| w.id == id)?;
        self.waiters.remove(index)
    }

    fn expire(&mut self, ttl: Duration) {
        self.backlog.retain(|event| event.received_at.elapsed() <= ttl);
        self.abandoned.retain(|(_, at)| at.elapsed() <= ttl);
    }
}

/// Registry of outstanding waits. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WaitRegistry {
    inner: Arc<RegistryInner>,
}

impl WaitRegistry {
    /// Create a registry whose backlog keeps events for `backlog_ttl`.
    pub fn new(backlog_ttl: Duration) -> Self {
        WaitRegistry {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(RegistryState {
                    waiters: VecDeque::new(),
                    backlog: VecDeque::new(),
                    abandoned: VecDeque::new(),
                    next_id: 1,
                    interrupted: false,
                }),
                backlog_ttl,
            }),
        }
    }

    /// Whether unclaimed events of this kind are parked for later waiters.
    pub fn is_retained(kind: EventKind) -> bool {
        matches!(
            kind,
            EventKind::Ack | EventKind::Login | EventKind::StatusResponse | EventKind::MessagesWaiting
        )
    }

    /// Register interest in any of `patterns` for at most `timeout`.
    ///
    /// A parked event that already matches resolves the handle at once.
    pub fn register(&self, patterns: Vec<Pattern>, timeout: Duration) -> WaitHandle {
        let (slot, rx) = bounded(1);
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();

        let id = WaiterId(state.next_id);
        state.next_id += 1;

        let handle = WaitHandle {
            id,
            rx,
            deadline,
            registry: self.inner.clone(),
        };

        if state.interrupted {
            let _ = slot.send(WaitOutcome::Interrupted);
            return handle;
        }

        state.expire(self.inner.backlog_ttl);
        // Waiting on the key again makes its late answer wanted.
        state.abandoned.retain(|(p, _)| !patterns.contains(p));
        let parked = state
            .backlog
            .iter()
            .position(|event| patterns.iter().any(|p| p.matches(event)));
        if let Some(index) = parked {
            if let Some(event) = state.backlog.remove(index) {
                tracing::debug!(waiter = id.0, kind = %event.kind, "waiter satisfied from backlog");
                let _ = slot.send(WaitOutcome::Event(event));
                return handle;
            }
        }

        tracing::trace!(
            waiter = id.0,
            patterns = ?patterns,
            timeout_ms = timeout.as_millis() as u64,
            "waiter registered"
        );
        state.waiters.push_back(Waiter {
            id,
            patterns,
            deadline,
            slot,
        });
        handle
    }

    /// Resolve the first waiter matching `event`.
    ///
    /// Returns the event back when nobody claimed it. The outcome is put in
    /// the waiter's slot before the lock is released, so a waiter that is
    /// no longer registered always finds it there.
    pub fn notify(&self, event: Arc<Event>) -> Option<Arc<Event>> {
        let mut state = self.inner.state.lock();
        let Some(index) = state.waiters.iter().position(|w| w.matches(&event)) else {
            return Some(event);
        };
        let Some(waiter) = state.waiters.remove(index) else {
            return Some(event);
        };

        tracing::trace!(
            waiter = waiter.id.0,
            kind = %event.kind,
            late = Instant::now() > waiter.deadline,
            "waiter resolved"
        );
        // Fresh single-slot channel, never blocks. The receiver may already
        // be gone if the handle was dropped.
        let _ = waiter.slot.try_send(WaitOutcome::Event(event));
        None
    }

    /// Park an unclaimed event if its kind is retained. A late answer to a
    /// keyed wait that already timed out is dropped.
    pub fn retain(&self, event: Arc<Event>) {
        if !Self::is_retained(event.kind) {
            return;
        }
        let mut state = self.inner.state.lock();
        state.expire(self.inner.backlog_ttl);
        if let Some(index) = state.abandoned.iter().position(|(p, _)| p.matches(&event)) {
            state.abandoned.remove(index);
            tracing::debug!(kind = %event.kind, key = ?event.key, "late event for a timed-out wait dropped");
            return;
        }
        if state.backlog.len() >= BACKLOG_CAPACITY {
            state.backlog.pop_front();
        }
        tracing::trace!(kind = %event.kind, key = ?event.key, "event parked");
        state.backlog.push_back(event);
    }

    /// Fail every outstanding waiter.
    pub fn fail_all(&self, reason: FailReason) {
        let mut state = self.inner.state.lock();
        let outcome = match &reason {
            FailReason::Disconnected(why) => WaitOutcome::Disconnected(why.clone()),
            FailReason::Interrupted => {
                state.interrupted = true;
                WaitOutcome::Interrupted
            }
        };
        state.backlog.clear();
        state.abandoned.clear();
        if !state.waiters.is_empty() {
            tracing::debug!(count = state.waiters.len(), reason = ?reason, "failing outstanding waiters");
        }
        for waiter in state.waiters.drain(..) {
            let _ = waiter.slot.try_send(outcome.clone());
        }
    }

    /// Remove a waiter without resolving it.
    pub fn cancel(&self, id: WaiterId) -> bool {
        self.inner.cancel(id)
    }

    /// Number of outstanding waiters.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// Number of parked events.
    pub fn backlog_len(&self) -> usize {
        self.inner.state.lock().backlog.len()
    }

    /// Whether the session was torn down.
    pub fn is_interrupted(&self) -> bool {
        self.inner.state.lock().interrupted
    }
}

/// A registered wait. Dropping it cancels the waiter.
pub struct WaitHandle {
    id: WaiterId,
    rx: Receiver<WaitOutcome>,
    deadline: Instant,
    registry: Arc<RegistryInner>,
}

impl WaitHandle {
    /// Waiter identifier.
    pub fn id(&self) -> WaiterId {
        self.id
    }

    /// Block until resolution or deadline.
    ///
    /// Exactly one outcome is reported. A waiter that was resolved while its
    /// deadline passed finds the outcome already in its slot, because the
    /// registry fills the slot under the same lock that removes the waiter.
    pub fn wait(&mut self) -> WaitOutcome {
        match self.rx.recv_deadline(self.deadline) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => self.expire(),
        }
    }

    /// Like [`wait`](Self::wait), but each time the deadline passes while
    /// `progressing` reports activity, the deadline moves `timeout` ahead.
    pub fn wait_while(&mut self, timeout: Duration, mut progressing: impl FnMut() -> bool) -> WaitOutcome {
        loop {
            match self.rx.recv_deadline(self.deadline) {
                Ok(outcome) => return outcome,
                Err(RecvTimeoutError::Timeout) if progressing() => {
                    self.extend(timeout);
                }
                Err(_) => return self.expire(),
            }
        }
    }

    /// Move the deadline to `timeout` from now.
    pub fn extend(&mut self, timeout: Duration) {
        self.deadline = Instant::now() + timeout;
        let mut state = self.registry.state.lock();
        if let Some(waiter) = state.waiters.iter_mut().find(|w| w.id == self.id) {
            waiter.deadline = self.deadline;
        }
    }

    /// Whether an outcome is already available without blocking.
    pub fn is_resolved(&self) -> bool {
        !self.rx.is_empty()
    }

    fn expire(&mut self) -> WaitOutcome {
        if self.registry.abandon(self.id) {
            return WaitOutcome::Timeout;
        }
        self.rx.try_recv().unwrap_or(WaitOutcome::Timeout)
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        self.registry.cancel(self.id);
    }
}
