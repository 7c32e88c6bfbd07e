use super::ledger::TimingLedger;
use std::fmt;

/// Stages a request passes through on its way to and from the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    OnRequest,
    OnPreAuth,
    OnPostAuth,
    OnPreHandler,
    OnPostHandler,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::OnRequest,
        Phase::OnPreAuth,
        Phase::OnPostAuth,
        Phase::OnPreHandler,
        Phase::OnPostHandler,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::OnRequest => "onRequest",
            Phase::OnPreAuth => "onPreAuth",
            Phase::OnPostAuth => "onPostAuth",
            Phase::OnPreHandler => "onPreHandler",
            Phase::OnPostHandler => "onPostHandler",
        }
    }

    /// Ledger key for this phase: `lifecycle:` followed by [`as_str`](Self::as_str),
    /// e.g. `lifecycle:onPreHandler`. Payload consumers should look phases up by
    /// this key, not the bare phase name; the prefix keeps phases apart from
    /// handler segments.
    pub fn segment_name(&self) -> &'static str {
        match self {
            Phase::OnRequest => "lifecycle:onRequest",
            Phase::OnPreAuth => "lifecycle:onPreAuth",
            Phase::OnPostAuth => "lifecycle:onPostAuth",
            Phase::OnPreHandler => "lifecycle:onPreHandler",
            Phase::OnPostHandler => "lifecycle:onPostHandler",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Walks the fixed phase list, closing each phase as the next one opens.
#[derive(Debug, Clone, Default)]
pub struct LifecycleTracker {
    current: Option<usize>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Phase> {
        self.current.map(|i| Phase::ALL[i])
    }

    /// Returns false when `phase` does not come after the current one.
    pub fn enter(&mut self, phase: Phase, ledger: &mut TimingLedger) -> bool {
        let next = phase.index();
        if let Some(current) = self.current {
            if next <= current {
                return false;
            }
            if let Err(e) = ledger.end_segment(Phase::ALL[current].segment_name()) {
                debug!("lifecycle phase {} was not open: {}", Phase::ALL[current], e);
            }
        }
        ledger.start_segment(phase.segment_name());
        self.current = Some(next);
        true
    }

    /// Closes the last phase entered. It has no successor to do it.
    pub fn finish(&mut self, ledger: &mut TimingLedger) {
        if let Some(current) = self.current.take() {
            if let Err(e) = ledger.end_segment(Phase::ALL[current].segment_name()) {
                debug!("lifecycle phase {} was not open: {}", Phase::ALL[current], e);
            }
        }
    }
}
