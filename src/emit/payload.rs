use http::header::{HeaderName, REFERER, USER_AGENT};
use http::{HeaderMap, Method, Request, StatusCode};
use serde::Serialize;
use url::Url;

use crate::timing::ledger::TimingLedger;

/// Request details the log record is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub path: String,
    pub fragment: Option<String>,
    pub method: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

impl RequestMeta {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let mut meta = Self {
            path: req.uri().path().to_string(),
            fragment: None,
            method: method_name(req.method()),
            user_agent: None,
            referrer: None,
        };
        meta.read_headers(req.headers());
        meta
    }

    /// For hosts that still hold the full URL, fragment included.
    pub fn from_url(method: &Method, url: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(url)?;
        Ok(Self {
            path: url.path().to_string(),
            fragment: url.fragment().filter(|f| !f.is_empty()).map(str::to_string),
            method: method_name(method),
            user_agent: None,
            referrer: None,
        })
    }

    pub fn read_headers(&mut self, headers: &HeaderMap) {
        let header = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        self.user_agent = header(USER_AGENT);
        self.referrer = header(REFERER);
    }
}

fn method_name(method: &Method) -> String {
    method.as_str().to_ascii_lowercase()
}

/// The structured record handed to a sink.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPayload {
    pub message: String,
    pub response_time: u64,
    pub threshold: i64,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment: Option<String>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<TimingLedger>,
}

impl LogPayload {
    pub fn to_json(&self) -> String {
        to_json(self)
    }
}

/// One record per segment a handler closes with `timing_end`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentPayload {
    pub message: String,
    pub name: String,
    pub elapsed: u64,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl SegmentPayload {
    pub fn new(name: &str, elapsed: u64, path: &str, id: Option<String>) -> Self {
        Self {
            message: format!("timing '{}' took {}ms: {}", name, elapsed, path),
            name: name.to_string(),
            elapsed,
            path: path.to_string(),
            id,
        }
    }
}

/// What an emission carries: a finished request or a single closed segment.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Record {
    Request(LogPayload),
    Segment(SegmentPayload),
}

impl Record {
    pub fn message(&self) -> &str {
        match self {
            Record::Request(payload) => &payload.message,
            Record::Segment(payload) => &payload.message,
        }
    }

    pub fn to_json(&self) -> String {
        to_json(self)
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
}

pub(crate) fn message(response_time: u64, meta: &RequestMeta) -> String {
    format!(
        "request took {}ms: {} {}",
        response_time,
        meta.method.to_ascii_uppercase(),
        meta.path
    )
}

pub(crate) fn status_code(status: Option<StatusCode>) -> Option<u16> {
    status.map(|s| s.as_u16())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reads_request_metadata() {
        let req = Request::builder()
            .method("GET")
            .uri("/items/7?full=1")
            .header(USER_AGENT, "shot")
            .header(REFERER, "http://example.com/")
            .body(())
            .unwrap();
        let meta = RequestMeta::from_request(&req);

        assert_eq!(
            meta,
            RequestMeta {
                path: "/items/7".to_string(),
                fragment: None,
                method: "get".to_string(),
                user_agent: Some("shot".to_string()),
                referrer: Some("http://example.com/".to_string()),
            }
        );
    }

    #[test]
    fn full_url_keeps_the_fragment() {
        let meta = RequestMeta::from_url(&Method::POST, "http://localhost/a/b#top").unwrap();
        assert_eq!(meta.path, "/a/b");
        assert_eq!(meta.fragment.as_deref(), Some("top"));
        assert_eq!(meta.method, "post");
    }

    #[test]
    fn absent_fields_are_left_out() {
        let payload = LogPayload {
            message: "request took 5ms: GET /".to_string(),
            response_time: 5,
            threshold: 1,
            path: "/".to_string(),
            fragment: None,
            method: "get".to_string(),
            user_agent: None,
            referrer: None,
            id: None,
            status_code: None,
            timings: None,
        };
        let json: serde_json::Value = serde_json::from_str(&payload.to_json()).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(object["responseTime"], 5);
        for key in ["referrer", "userAgent", "id", "timings", "fragment"] {
            assert!(!object.contains_key(key), "{key} should be omitted");
        }
    }

    #[test]
    fn segment_record_is_flat() {
        let record = Record::Segment(SegmentPayload::new("call db", 201, "/db", None));
        let json: serde_json::Value = serde_json::from_str(&record.to_json()).unwrap();

        assert_eq!(json["name"], "call db");
        assert_eq!(json["elapsed"], 201);
        assert_eq!(json["path"], "/db");
        assert!(json.get("id").is_none());
        assert_eq!(record.message(), "timing 'call db' took 201ms: /db");
    }
}
