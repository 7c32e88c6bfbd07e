use futures::future::BoxFuture;
use http::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_service::Service;

use crate::config::RouteSettings;
use crate::response::res::{text, SlowBody};
use crate::timing::lifecycle::Phase;
use crate::timing::TimingExt;

pub type HandlerFuture = BoxFuture<'static, Result<Response<SlowBody>, anyhow::Error>>;
type Handler<B> = Arc<dyn Fn(Request<B>) -> HandlerFuture + Send + Sync>;
type Authenticator<B> = Arc<dyn Fn(&Request<B>) -> bool + Send + Sync>;

struct Route<B> {
    method: Method,
    path: String,
    settings: RouteSettings,
    handler: Handler<B>,
}

impl<B> Clone for Route<B> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            path: self.path.clone(),
            settings: self.settings.clone(),
            handler: self.handler.clone(),
        }
    }
}

/// Exact-match router that walks each request through the pipeline phases.
///
/// The matched route's [`RouteSettings`] ride back on the response extensions.
pub struct Router<B> {
    routes: Arc<Vec<Route<B>>>,
    authenticator: Option<Authenticator<B>>,
}

impl<B> Clone for Router<B> {
    fn clone(&self) -> Self {
        Self {
            routes: self.routes.clone(),
            authenticator: self.authenticator.clone(),
        }
    }
}

impl<B> Default for Router<B> {
    fn default() -> Self {
        Self {
            routes: Arc::new(Vec::new()),
            authenticator: None,
        }
    }
}

impl<B: Send + 'static> Router<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route<F, Fut>(
        mut self,
        method: Method,
        path: &str,
        settings: RouteSettings,
        handler: F,
    ) -> Self
    where
        F: Fn(Request<B>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<SlowBody>, anyhow::Error>> + Send + 'static,
    {
        let handler: Handler<B> =
            Arc::new(move |req: Request<B>| -> HandlerFuture { Box::pin(handler(req)) });
        Arc::make_mut(&mut self.routes).push(Route {
            method,
            path: path.to_string(),
            settings,
            handler,
        });
        self
    }

    /// Every route requires `check` to pass; failures answer 401 without running the handler.
    pub fn authenticate<F>(mut self, check: F) -> Self
    where
        F: Fn(&Request<B>) -> bool + Send + Sync + 'static,
    {
        self.authenticator = Some(Arc::new(check));
        self
    }

    fn find(&self, method: &Method, path: &str) -> Result<&Route<B>, StatusCode> {
        let mut path_matched = false;
        for route in self.routes.iter() {
            if route.path == path {
                if route.method == method {
                    return Ok(route);
                }
                path_matched = true;
            }
        }
        Err(if path_matched {
            StatusCode::METHOD_NOT_ALLOWED
        } else {
            StatusCode::NOT_FOUND
        })
    }

    pub async fn dispatch(&self, req: Request<B>) -> Response<SlowBody> {
        let timing = req.timing().cloned();
        let enter = |phase| {
            if let Some(timing) = &timing {
                timing.enter_phase(phase);
            }
        };

        let route = match self.find(req.method(), req.uri().path()) {
            Ok(route) => route,
            Err(status) => return text(status, status.canonical_reason().unwrap_or("")),
        };

        enter(Phase::OnPreAuth);
        if let Some(check) = &self.authenticator {
            if !check(&req) {
                let mut response = text(StatusCode::UNAUTHORIZED, "Unauthorized");
                response.extensions_mut().insert(route.settings.clone());
                return response;
            }
        }
        enter(Phase::OnPostAuth);

        enter(Phase::OnPreHandler);
        let result = (route.handler)(req).await;
        enter(Phase::OnPostHandler);

        let mut response = match result {
            Ok(response) => response,
            Err(e) => {
                error!(path = %route.path, "handler failed: {:#}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        };
        response.extensions_mut().insert(route.settings.clone());
        response
    }
}

impl<B: Send + 'static> Service<Request<B>> for Router<B> {
    type Response = Response<SlowBody>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let router = self.clone();
        Box::pin(async move { Ok(router.dispatch(req).await) })
    }
}
