//! Progress tracker.
//!
//! A direct translation of
//! `original_source/response_cache/progress_tracker.go`: a
//! Pending/Reading/Success/Failure/Uncacheable state machine guarded by a
//! `parking_lot::Condvar`, letting any number of joiners wait for "the
//! header is durable" or "more body bytes are available" without polling.

use crate::error::CacheError;
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Reading,
    Success,
    Failure,
    Uncacheable,
}

struct Inner {
    state: State,
    length: u64,
    reason: Option<CacheError>,
}

/// Coordinates any number of waiters on a single in-flight cache population.
pub struct ProgressTracker {
    state: Mutex<Inner>,
    cond: Condvar,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Inner { state: State::Pending, length: 0, reason: None }),
            cond: Condvar::new(),
        }
    }

    /// Pending -> Reading, once the header has been durably written.
    pub fn set_reading(&self) {
        let mut state = self.state.lock();
        state.state = State::Reading;
        self.cond.notify_all();
    }

    /// Record that `n` more body bytes were written.
    pub fn wrote(&self, n: u64) {
        let mut state = self.state.lock();
        state.length += n;
        self.cond.notify_all();
    }

    /// Pending/Reading -> Success, once the body is fully written and its
    /// length has been verified.
    pub fn success(&self) {
        let mut state = self.state.lock();
        state.state = State::Success;
        self.cond.notify_all();
    }

    /// Pending/Reading -> Failure. The reason is captured as an owned value
    /// here (not re-exposed by reference) so it can be handed out to
    /// waiters on other threads.
    pub fn failure(&self, reason: CacheError) {
        let mut state = self.state.lock();
        state.state = State::Failure;
        state.reason = Some(reason);
        self.cond.notify_all();
    }

    /// Pending -> Uncacheable, when the upstream response fails the
    /// cacheability predicate.
    pub fn uncacheable(&self) {
        let mut state = self.state.lock();
        state.state = State::Uncacheable;
        state.reason = Some(CacheError::Uncacheable);
        self.cond.notify_all();
    }

    /// Block while Pending. Returns once the header is durable (`Reading`
    /// or later), or the terminal reason if the populator failed or the
    /// response was uncacheable before ever reaching `Reading`.
    pub fn wait_for_response(&self) -> Result<(), CacheError> {
        let mut state = self.state.lock();
        loop {
            match state.state {
                State::Pending => self.cond.wait(&mut state),
                State::Reading | State::Success => return Ok(()),
                State::Failure | State::Uncacheable => {
                    return Err(state.reason.clone().unwrap_or(CacheError::Uncacheable));
                }
            }
        }
    }

    /// Block while `Reading` and `length <= position`. Returns once more
    /// bytes are available, `Ok(None)` on clean EOF (`Success` with nothing
    /// left), or the failure reason.
    pub fn wait_for_more(&self, position: u64) -> Result<bool, CacheError> {
        let mut state = self.state.lock();
        loop {
            match state.state {
                State::Pending => {
                    return Err(CacheError::Io("wait_for_more used before header was complete".to_string()));
                }
                State::Reading => {
                    if state.length > position {
                        return Ok(true);
                    }
                    self.cond.wait(&mut state);
                }
                State::Success => {
                    if state.length > position {
                        return Ok(true);
                    }
                    return Ok(false); // EOF
                }
                State::Failure | State::Uncacheable => {
                    return Err(state.reason.clone().unwrap_or(CacheError::Uncacheable));
                }
            }
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
