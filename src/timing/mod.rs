//! Per-request timing state.
//!
//! A [`RequestTiming`] is created by the service layer when a request arrives and
//! stored in the request's extensions. Handler code reaches it through
//! [`TimingExt`] to mark named segments of work.

pub mod ledger;
pub mod lifecycle;

use http::Request;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use self::ledger::{millis, TimingLedger};
use self::lifecycle::{LifecycleTracker, Phase};
use crate::emit::Emitter;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimingError {
    #[error("no timing segment named '{0}' was started")]
    UnknownSegment(String),
    #[error("timing segment '{0}' is already closed")]
    SegmentNotOpen(String),
    #[error("request timing is not installed on this request")]
    NotInstalled,
}

/// What is left of a request's timing once it has completed.
#[derive(Debug, Clone)]
pub struct CompletedTiming {
    pub response_time_ms: u64,
    pub ledger: TimingLedger,
    pub lifecycle: bool,
}

#[derive(Debug)]
struct TimingState {
    ledger: TimingLedger,
    lifecycle: Option<LifecycleTracker>,
    completed: bool,
}

#[derive(Debug, Clone)]
struct SegmentReport {
    emitter: Emitter,
    path: Arc<str>,
}

/// Cloneable handle to one request's ledger.
///
/// Clones share the same ledger, so work fanned out to other tasks can record
/// segments on the request that spawned it.
#[derive(Debug, Clone)]
pub struct RequestTiming {
    id: Arc<str>,
    received: Instant,
    state: Arc<Mutex<TimingState>>,
    report: Option<SegmentReport>,
}

impl RequestTiming {
    pub fn new(id: impl Into<Arc<str>>, lifecycle: bool) -> Self {
        Self::received_at(id, Instant::now(), lifecycle)
    }

    pub fn received_at(id: impl Into<Arc<str>>, received: Instant, lifecycle: bool) -> Self {
        Self {
            id: id.into(),
            received,
            state: Arc::new(Mutex::new(TimingState {
                ledger: TimingLedger::new(),
                lifecycle: lifecycle.then(LifecycleTracker::new),
                completed: false,
            })),
            report: None,
        }
    }

    /// Every segment closed through [`timing_end`](Self::timing_end) is also
    /// reported to `emitter` as a record of its own.
    pub fn reporting_to(mut self, emitter: Emitter, path: &str) -> Self {
        self.report = Some(SegmentReport {
            emitter,
            path: path.into(),
        });
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn received(&self) -> Instant {
        self.received
    }

    pub fn lifecycle_enabled(&self) -> bool {
        self.state.lock().lifecycle.is_some()
    }

    pub fn timing_start(&self, name: &str) {
        let mut state = self.state.lock();
        if state.completed {
            debug!(request_id = %self.id, segment = name, "request already completed");
            return;
        }
        state.ledger.start_segment(name);
        trace!(request_id = %self.id, segment = name, "timing started");
    }

    pub fn timing_end(&self, name: &str) -> Result<u64, TimingError> {
        let result = self.state.lock().ledger.end_segment(name);
        match &result {
            Ok(elapsed) => {
                debug!(request_id = %self.id, segment = name, elapsed, "timing ended");
                if let Some(report) = &self.report {
                    report.emitter.segment(&self.id, &report.path, name, *elapsed);
                }
            }
            Err(e) => warn!(request_id = %self.id, "{}", e),
        }
        result
    }

    /// Moves lifecycle tracking into `phase`. Does nothing when lifecycle mode is off.
    pub fn enter_phase(&self, phase: Phase) {
        let mut state = self.state.lock();
        let TimingState {
            ledger,
            lifecycle,
            completed,
        } = &mut *state;
        if *completed {
            return;
        }
        if let Some(tracker) = lifecycle.as_mut() {
            if !tracker.enter(phase, ledger) {
                debug!(request_id = %self.id, %phase, "lifecycle phase entered out of order");
            }
        }
    }

    /// Copy of the ledger as it stands now.
    pub fn snapshot(&self) -> TimingLedger {
        self.state.lock().ledger.clone()
    }

    /// Closes the last lifecycle phase and computes the response time.
    ///
    /// Only the first call yields a value; the ledger is not reused after that.
    pub fn complete(&self, completed: Instant) -> Option<CompletedTiming> {
        let mut state = self.state.lock();
        if state.completed {
            return None;
        }
        state.completed = true;
        let TimingState {
            ledger, lifecycle, ..
        } = &mut *state;
        let lifecycle_active = match lifecycle.as_mut() {
            Some(tracker) => {
                tracker.finish(ledger);
                true
            }
            None => false,
        };
        Some(CompletedTiming {
            response_time_ms: millis(completed.saturating_duration_since(self.received).as_millis()),
            ledger: std::mem::take(ledger),
            lifecycle: lifecycle_active,
        })
    }
}

/// Segment marking for handlers, reached through the request's extensions.
pub trait TimingExt {
    fn timing(&self) -> Option<&RequestTiming>;

    fn timing_start(&self, name: &str) {
        match self.timing() {
            Some(timing) => timing.timing_start(name),
            None => debug!(segment = name, "timing_start without request timing"),
        }
    }

    fn timing_end(&self, name: &str) -> Result<u64, TimingError> {
        self.timing()
            .ok_or(TimingError::NotInstalled)?
            .timing_end(name)
    }
}

impl<B> TimingExt for Request<B> {
    fn timing(&self) -> Option<&RequestTiming> {
        self.extensions().get::<RequestTiming>()
    }
}
