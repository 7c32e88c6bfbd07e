//! Deciding whether a completed request gets reported, and reporting it.

pub mod payload;
pub mod sink;

use http::StatusCode;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use self::payload::{LogPayload, Record, RequestMeta, SegmentPayload};
use self::sink::Sink;
use crate::config::{SlowOptions, BASE_TAG};
use crate::threshold::{self, RouteOverride, Threshold};
use crate::timing::CompletedTiming;

/// Added to the tags when the request went over its threshold.
pub const SLOW_TAG: &str = "warning";

#[derive(Debug, Clone)]
pub struct Emission {
    pub tags: BTreeSet<String>,
    pub record: Record,
}

impl Emission {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn request(&self) -> Option<&LogPayload> {
        match &self.record {
            Record::Request(payload) => Some(payload),
            Record::Segment(_) => None,
        }
    }

    pub fn segment(&self) -> Option<&SegmentPayload> {
        match &self.record {
            Record::Segment(payload) => Some(payload),
            Record::Request(_) => None,
        }
    }
}

fn base_tags(options: &SlowOptions) -> BTreeSet<String> {
    let mut tags = options.tags.clone();
    tags.insert(BASE_TAG.to_string());
    tags
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    Disabled,
    UnderThreshold,
}

#[derive(Debug, Clone)]
pub enum Decision {
    Emit(Emission),
    Suppressed(SuppressReason),
}

/// Everything the host knows once the response is determined.
#[derive(Debug, Clone)]
pub struct Completion {
    pub id: String,
    pub meta: RequestMeta,
    pub status: Option<StatusCode>,
    pub route: Option<RouteOverride>,
    pub timing: CompletedTiming,
}

pub fn decide(options: &SlowOptions, completion: Completion) -> Decision {
    let Completion {
        id,
        meta,
        status,
        route,
        timing,
    } = completion;
    let threshold = match threshold::resolve(options.threshold, route.as_ref()) {
        Threshold::Disabled => return Decision::Suppressed(SuppressReason::Disabled),
        threshold => threshold,
    };
    let response_time = timing.response_time_ms;
    let slow = threshold.is_exceeded_by(response_time);
    if !slow && !options.verbose {
        return Decision::Suppressed(SuppressReason::UnderThreshold);
    }

    let mut tags = base_tags(options);
    if slow {
        tags.insert(SLOW_TAG.to_string());
    }

    let timings = (timing.lifecycle || !timing.ledger.is_empty()).then_some(timing.ledger);
    let payload = LogPayload {
        message: payload::message(response_time, &meta),
        response_time,
        threshold: threshold.millis().unwrap_or(options.threshold),
        path: meta.path,
        fragment: meta.fragment,
        method: meta.method,
        user_agent: meta.user_agent,
        referrer: meta.referrer,
        id: options.include_id.then_some(id),
        status_code: payload::status_code(status),
        timings,
    };
    Decision::Emit(Emission {
        tags,
        record: Record::Request(payload),
    })
}

/// Applies [`decide`] and delivers the result, never failing the caller.
#[derive(Clone)]
pub struct Emitter {
    options: Arc<SlowOptions>,
    sink: Arc<dyn Sink>,
}

impl Emitter {
    pub fn new(options: SlowOptions, sink: Arc<dyn Sink>) -> Self {
        Self {
            options: Arc::new(options),
            sink,
        }
    }

    pub fn options(&self) -> &SlowOptions {
        &self.options
    }

    /// Returns whether an emission was handed to the sink.
    pub fn complete(&self, completion: Completion) -> bool {
        let id = completion.id.clone();
        match decide(&self.options, completion) {
            Decision::Emit(emission) => self.deliver(&id, emission),
            Decision::Suppressed(reason) => {
                trace!(request_id = %id, ?reason, "request not reported");
                false
            }
        }
    }

    /// Reports one closed segment. Carries the configured tags but never the slow tag.
    pub fn segment(&self, id: &str, path: &str, name: &str, elapsed: u64) -> bool {
        let payload = SegmentPayload::new(
            name,
            elapsed,
            path,
            self.options.include_id.then(|| id.to_string()),
        );
        self.deliver(
            id,
            Emission {
                tags: base_tags(&self.options),
                record: Record::Segment(payload),
            },
        )
    }

    fn deliver(&self, id: &str, emission: Emission) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| self.sink.emit(emission))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(request_id = %id, "dropping report: {}", e);
                false
            }
            Err(_) => {
                warn!(request_id = %id, "dropping report: sink panicked");
                false
            }
        }
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::sink::{ChannelSink, SinkError};
    use super::*;
    use crate::timing::ledger::TimingLedger;
    use pretty_assertions::assert_eq;

    fn completion(response_time_ms: u64, route: Option<RouteOverride>) -> Completion {
        Completion {
            id: "1700000000000:42:1".to_string(),
            meta: RequestMeta {
                path: "/".to_string(),
                method: "get".to_string(),
                user_agent: Some("shot".to_string()),
                ..RequestMeta::default()
            },
            status: Some(StatusCode::OK),
            route,
            timing: CompletedTiming {
                response_time_ms,
                ledger: TimingLedger::new(),
                lifecycle: false,
            },
        }
    }

    fn emitted(decision: Decision) -> Emission {
        match decision {
            Decision::Emit(emission) => emission,
            Decision::Suppressed(reason) => panic!("suppressed: {reason:?}"),
        }
    }

    #[test]
    fn slow_request_is_reported_with_tags() {
        let options = SlowOptions::default().with_threshold(10).with_tag("error");
        let emission = emitted(decide(&options, completion(200, None)));

        let tags: Vec<_> = emission.tags.iter().map(String::as_str).collect();
        assert_eq!(tags, vec!["error", "rslow", "warning"]);
        assert_eq!(emission.request().unwrap().response_time, 200);
        assert_eq!(emission.request().unwrap().threshold, 10);
        assert!(emission.request().unwrap().message.contains("request took"));
        assert_eq!(emission.request().unwrap().status_code, Some(200));
    }

    #[test]
    fn fast_request_is_suppressed() {
        let decision = decide(&SlowOptions::default(), completion(5, None));
        assert!(matches!(
            decision,
            Decision::Suppressed(SuppressReason::UnderThreshold)
        ));
    }

    #[test]
    fn verbose_reports_fast_requests_without_the_slow_tag() {
        let options = SlowOptions::default().verbose(true);
        let emission = emitted(decide(&options, completion(5, None)));
        assert!(emission.has_tag(BASE_TAG));
        assert!(!emission.has_tag(SLOW_TAG));
    }

    #[test]
    fn verbose_does_not_override_a_disabled_route() {
        let options = SlowOptions::default().verbose(true).with_threshold(0);
        let decision = decide(&options, completion(500, Some(RouteOverride::Disabled)));
        assert!(matches!(decision, Decision::Suppressed(SuppressReason::Disabled)));
    }

    #[test]
    fn route_threshold_overrides_global() {
        let options = SlowOptions::default().with_threshold(10_000_000);
        let emission = emitted(decide(&options, completion(200, Some(RouteOverride::Millis(10)))));
        assert_eq!(emission.request().unwrap().threshold, 10);
    }

    #[test]
    fn id_is_only_included_on_request() {
        let options = SlowOptions::default().with_threshold(0);
        assert_eq!(emitted(decide(&options, completion(1, None))).request().unwrap().id, None);

        let options = options.include_id(true);
        assert_eq!(
            emitted(decide(&options, completion(1, None))).request().unwrap().id.as_deref(),
            Some("1700000000000:42:1")
        );
    }

    #[test]
    fn empty_ledger_is_left_out() {
        let options = SlowOptions::default().with_threshold(0);
        assert!(emitted(decide(&options, completion(1, None))).request().unwrap().timings.is_none());

        let mut with_lifecycle = completion(1, None);
        with_lifecycle.timing.lifecycle = true;
        assert!(emitted(decide(&options, with_lifecycle)).request().unwrap().timings.is_some());
    }

    #[test]
    fn sink_failures_are_swallowed() {
        let failing = |_: Emission| -> Result<(), SinkError> {
            Err(SinkError::Rejected("disk full".to_string()))
        };
        let emitter = Emitter::new(SlowOptions::default().with_threshold(0), Arc::new(failing));
        assert!(!emitter.complete(completion(10, None)));
    }

    #[test]
    fn panicking_sink_does_not_fail_completion() {
        let panicking = |_: Emission| -> Result<(), SinkError> { panic!("sink exploded") };
        let emitter = Emitter::new(SlowOptions::default().with_threshold(0), Arc::new(panicking));
        assert!(!emitter.complete(completion(10, None)));
        assert!(!emitter.segment("1", "/db", "call db", 200));
    }

    #[test]
    fn segments_carry_configured_tags_and_optional_id() {
        let (sink, mut rx) = ChannelSink::channel(8);
        let options = SlowOptions::default().with_tag("error").include_id(true);
        let emitter = Emitter::new(options, Arc::new(sink));
        assert!(emitter.segment("req-1", "/db", "call db", 200));

        let emission = rx.try_recv().unwrap();
        assert!(emission.has_tag(BASE_TAG));
        assert!(emission.has_tag("error"));
        assert!(!emission.has_tag(SLOW_TAG));
        assert!(emission.request().is_none());
        let segment = emission.segment().unwrap();
        assert_eq!(segment.name, "call db");
        assert_eq!(segment.elapsed, 200);
        assert_eq!(segment.id.as_deref(), Some("req-1"));
    }

    #[test]
    fn emitter_delivers_to_the_sink() {
        let (sink, mut rx) = ChannelSink::channel(8);
        let emitter = Emitter::new(SlowOptions::default().with_threshold(0), Arc::new(sink));
        assert!(emitter.complete(completion(10, None)));
        assert!(!emitter.complete(completion(0, None)));

        let emission = rx.try_recv().unwrap();
        assert_eq!(emission.request().unwrap().response_time, 10);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_channel_does_not_fail_completion() {
        let (sink, rx) = ChannelSink::channel(8);
        drop(rx);
        let emitter = Emitter::new(SlowOptions::default().with_threshold(0), Arc::new(sink));
        assert!(!emitter.complete(completion(10, None)));
    }
}
