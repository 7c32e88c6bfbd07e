//! Slow request reporting for hyper services.
//!
//! [`SlowService`] times each request, lets handlers mark named segments through
//! [`TimingExt`], and reports requests that take longer than the configured
//! threshold (or every request, in verbose mode) to a [`Sink`].
#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate tracing;

pub mod config;
pub mod emit;
pub mod http;
pub mod response;
pub mod threshold;
pub mod timing;

pub use crate::config::{RouteSettings, SlowOptions};
pub use crate::emit::payload::{LogPayload, Record, SegmentPayload};
pub use crate::emit::sink::{ChannelSink, Sink, SinkError, TracingSink};
pub use crate::emit::{Emission, Emitter};
pub use crate::http::router::Router;
pub use crate::http::service::{SlowLayer, SlowService};
pub use crate::threshold::{RouteOverride, Threshold};
pub use crate::timing::{RequestTiming, TimingError, TimingExt};
