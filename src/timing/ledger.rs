use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::time::Instant;

use super::TimingError;

/// A named span of work inside one request.
#[derive(Debug, Clone)]
pub struct TimingSegment {
    name: String,
    start: Instant,
    started_at: DateTime<Utc>,
    end: Option<Instant>,
    ended_at: Option<DateTime<Utc>>,
}

impl TimingSegment {
    fn open(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
            started_at: Utc::now(),
            end: None,
            ended_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn end(&self) -> Option<Instant> {
        self.end
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Whole milliseconds between start and end, `None` while the segment is open.
    pub fn elapsed_ms(&self) -> Option<u64> {
        let end = self.end?;
        Some(millis(end.duration_since(self.start).as_millis()))
    }
}

impl Serialize for TimingSegment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TimingSegment", 4)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("start", &self.started_at)?;
        match self.ended_at {
            Some(ended_at) => state.serialize_field("end", &ended_at)?,
            None => state.skip_field("end")?,
        }
        match self.elapsed_ms() {
            Some(elapsed) => state.serialize_field("elapsed", &elapsed)?,
            None => state.skip_field("elapsed")?,
        }
        state.end()
    }
}

/// Per-request collection of segments, kept in the order they were first opened.
#[derive(Debug, Clone, Default)]
pub struct TimingLedger {
    segments: Vec<TimingSegment>,
}

impl TimingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `name`, replacing any earlier segment of the same name in place.
    pub fn start_segment(&mut self, name: &str) {
        let segment = TimingSegment::open(name);
        match self.position(name) {
            Some(index) => self.segments[index] = segment,
            None => self.segments.push(segment),
        }
    }

    /// Closes `name` and returns its elapsed milliseconds.
    pub fn end_segment(&mut self, name: &str) -> Result<u64, TimingError> {
        let index = self
            .position(name)
            .ok_or_else(|| TimingError::UnknownSegment(name.to_string()))?;
        let segment = &mut self.segments[index];
        if !segment.is_open() {
            return Err(TimingError::SegmentNotOpen(name.to_string()));
        }
        segment.end = Some(Instant::now());
        segment.ended_at = Some(Utc::now());
        Ok(segment.elapsed_ms().unwrap_or_default())
    }

    pub fn get(&self, name: &str) -> Option<&TimingSegment> {
        self.segments.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimingSegment> {
        self.segments.iter()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.segments.iter().position(|s| s.name == name)
    }
}

impl Serialize for TimingLedger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.segments.len()))?;
        for segment in &self.segments {
            map.serialize_entry(&segment.name, segment)?;
        }
        map.end()
    }
}

pub(crate) fn millis(ms: u128) -> u64 {
    u64::try_from(ms).unwrap_or(u64::MAX)
}
