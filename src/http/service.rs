use futures::future::BoxFuture;
use http::{Request, Response};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tower_service::Service;

use crate::config::{RouteSettings, SlowOptions};
use crate::emit::payload::RequestMeta;
use crate::emit::sink::Sink;
use crate::emit::{Completion, Emitter};
use crate::http::request_id::request_id;
use crate::timing::lifecycle::Phase;
use crate::timing::RequestTiming;

/// Wraps services in [`SlowService`].
#[derive(Debug, Clone)]
pub struct SlowLayer {
    emitter: Emitter,
}

impl SlowLayer {
    pub fn new(options: SlowOptions, sink: Arc<dyn Sink>) -> Self {
        Self {
            emitter: Emitter::new(options, sink),
        }
    }

    pub fn layer<S>(&self, inner: S) -> SlowService<S> {
        SlowService {
            inner,
            emitter: self.emitter.clone(),
        }
    }
}

/// Times every request that passes through `inner`.
///
/// A fresh [`RequestTiming`] is put into the request's extensions before the inner
/// service sees it. When the inner future yields a response the timing is
/// completed and handed to the emitter together with any [`RouteSettings`] the
/// inner service left in the response extensions. Segments closed by handlers
/// are reported as they close.
#[derive(Debug, Clone)]
pub struct SlowService<S> {
    inner: S,
    emitter: Emitter,
}

impl<S, B, ResBody> Service<Request<B>> for SlowService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let meta = RequestMeta::from_request(&req);
        let timing = RequestTiming::new(
            request_id(&req),
            self.emitter.options().request_lifecycle,
        )
        .reporting_to(self.emitter.clone(), &meta.path);
        timing.enter_phase(Phase::OnRequest);
        req.extensions_mut().insert(timing.clone());
        trace!(request_id = timing.id(), path = %meta.path, "request received");

        let fut = self.inner.call(req);
        let emitter = self.emitter.clone();
        Box::pin(async move {
            let response = fut.await?;
            if let Some(done) = timing.complete(Instant::now()) {
                let route = response
                    .extensions()
                    .get::<RouteSettings>()
                    .and_then(RouteSettings::slow_override);
                emitter.complete(Completion {
                    id: timing.id().to_string(),
                    meta,
                    status: Some(response.status()),
                    route,
                    timing: done,
                });
            }
            Ok(response)
        })
    }
}
