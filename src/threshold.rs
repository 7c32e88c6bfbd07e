use serde::{Deserialize, Serialize};
use std::fmt;

/// The threshold that governs emission for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    Millis(i64),
    Disabled,
}

impl Threshold {
    /// Strictly greater than; a request that takes exactly the threshold is not slow.
    pub fn is_exceeded_by(&self, response_time_ms: u64) -> bool {
        match self {
            Threshold::Millis(limit) => i128::from(response_time_ms) > i128::from(*limit),
            Threshold::Disabled => false,
        }
    }

    pub fn millis(&self) -> Option<i64> {
        match self {
            Threshold::Millis(limit) => Some(*limit),
            Threshold::Disabled => None,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Millis(limit) => write!(f, "{limit}ms"),
            Threshold::Disabled => f.write_str("disabled"),
        }
    }
}

/// A route's own say on the threshold.
///
/// Accepted forms: `false`, `true`, a number, or `{ "threshold": <number | false> }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(from = "RawOverride", into = "RawOverride")]
pub enum RouteOverride {
    #[default]
    Inherit,
    Millis(i64),
    Disabled,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(untagged)]
enum RawThreshold {
    Flag(bool),
    Millis(i64),
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(untagged)]
enum RawOverride {
    Flag(bool),
    Millis(i64),
    Settings { threshold: Option<RawThreshold> },
}

impl From<RawThreshold> for RouteOverride {
    fn from(raw: RawThreshold) -> Self {
        match raw {
            RawThreshold::Flag(false) => RouteOverride::Disabled,
            RawThreshold::Flag(true) => RouteOverride::Inherit,
            RawThreshold::Millis(ms) => RouteOverride::Millis(ms),
        }
    }
}

impl From<RawOverride> for RouteOverride {
    fn from(raw: RawOverride) -> Self {
        match raw {
            RawOverride::Flag(flag) => RawThreshold::Flag(flag).into(),
            RawOverride::Millis(ms) => RouteOverride::Millis(ms),
            RawOverride::Settings { threshold } => {
                threshold.map(Into::into).unwrap_or_default()
            }
        }
    }
}

impl From<RouteOverride> for RawOverride {
    fn from(value: RouteOverride) -> Self {
        let threshold = match value {
            RouteOverride::Inherit => None,
            RouteOverride::Millis(ms) => Some(RawThreshold::Millis(ms)),
            RouteOverride::Disabled => Some(RawThreshold::Flag(false)),
        };
        RawOverride::Settings { threshold }
    }
}

/// Route override beats the global default, and a disabled route beats everything.
pub fn resolve(global_ms: i64, route: Option<&RouteOverride>) -> Threshold {
    match route.copied().unwrap_or_default() {
        RouteOverride::Disabled => Threshold::Disabled,
        RouteOverride::Millis(ms) => Threshold::Millis(ms),
        RouteOverride::Inherit => Threshold::Millis(global_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> RouteOverride {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn global_applies_without_override() {
        assert_eq!(resolve(1000, None), Threshold::Millis(1000));
        assert_eq!(resolve(1000, Some(&RouteOverride::Inherit)), Threshold::Millis(1000));
    }

    #[test]
    fn route_value_beats_global() {
        let route = RouteOverride::Millis(10);
        assert_eq!(resolve(10_000_000, Some(&route)), Threshold::Millis(10));
        assert!(resolve(10_000_000, Some(&route)).is_exceeded_by(200));
    }

    #[test]
    fn disabled_route_never_fires() {
        let threshold = resolve(10_000_000, Some(&RouteOverride::Disabled));
        assert_eq!(threshold, Threshold::Disabled);
        assert!(!threshold.is_exceeded_by(u64::MAX));
    }

    #[test]
    fn resolving_twice_gives_the_same_answer() {
        let route = parse(json!({ "threshold": 25 }));
        assert_eq!(resolve(500, Some(&route)), resolve(500, Some(&route)));
    }

    #[test]
    fn equal_to_threshold_is_not_exceeded() {
        assert!(!Threshold::Millis(200).is_exceeded_by(200));
        assert!(Threshold::Millis(200).is_exceeded_by(201));
    }

    #[test]
    fn negative_thresholds_pass_through() {
        let threshold = resolve(-5, None);
        assert_eq!(threshold.millis(), Some(-5));
        assert!(threshold.is_exceeded_by(0));
    }

    #[test]
    fn accepts_every_override_shape() {
        assert_eq!(parse(json!(false)), RouteOverride::Disabled);
        assert_eq!(parse(json!(true)), RouteOverride::Inherit);
        assert_eq!(parse(json!(10)), RouteOverride::Millis(10));
        assert_eq!(parse(json!({ "threshold": 10 })), RouteOverride::Millis(10));
        assert_eq!(parse(json!({ "threshold": false })), RouteOverride::Disabled);
        assert_eq!(parse(json!({})), RouteOverride::Inherit);
    }

    #[test]
    fn writes_back_in_object_form() {
        let value = serde_json::to_value(RouteOverride::Disabled).unwrap();
        assert_eq!(value, json!({ "threshold": false }));
    }
}
