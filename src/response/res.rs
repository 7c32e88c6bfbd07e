use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::{Response, StatusCode};

use std::convert::Infallible;

pub type SlowBody = BoxBody<Bytes, Infallible>;

pub fn full<T: Into<Bytes>>(chunk: T) -> SlowBody {
    Full::new(chunk.into()).boxed()
}

pub fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<SlowBody> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response
}
