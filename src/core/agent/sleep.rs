use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

/// Reserved tool name that defers the agent's next cycle.
pub const SLEEP_DIRECTIVE: &str = "SleepTool";

/// Used when the model asks to sleep without a usable duration.
pub const DEFAULT_SLEEP_MS: u64 = 60_000;

/// Longest sleep honoured; larger requests are clamped to it.
pub const MAX_SLEEP_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Where an agent sits in the Active -> Sleeping -> Active cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepState {
    Active,
    Sleeping { until: DateTime<Utc> },
    /// A wake time is stored but has passed; it must be cleared before work starts.
    WakeDue { since: DateTime<Utc> },
}

impl SleepState {
    pub fn evaluate(wake_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match wake_at {
            None => SleepState::Active,
            Some(until) if until > now => SleepState::Sleeping { until },
            Some(since) => SleepState::WakeDue { since },
        }
    }
}

/// A sleep request decoded from the directive's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepRequest {
    pub duration_ms: u64,
    /// True when the requested duration was missing or invalid.
    pub defaulted: bool,
}

impl SleepRequest {
    /// Never fails: malformed input falls back to `fallback_ms`. The
    /// duration is capped at [`MAX_SLEEP_MS`].
    pub fn from_parameters(parameters: &Map<String, Value>, fallback_ms: u64) -> Self {
        match parameters.get("milliseconds").and_then(positive_millis) {
            Some(duration_ms) => Self {
                duration_ms: duration_ms.min(MAX_SLEEP_MS),
                defaulted: false,
            },
            None => Self {
                duration_ms: fallback_ms.min(MAX_SLEEP_MS),
                defaulted: true,
            },
        }
    }

    pub fn wake_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let millis = self.duration_ms.min(MAX_SLEEP_MS) as i64;
        now + Duration::milliseconds(millis)
    }
}

fn positive_millis(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().filter(|ms| *ms > 0),
        Value::String(s) => s.trim().parse::<u64>().ok().filter(|ms| *ms > 0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn no_wake_time_is_active() {
        assert_eq!(
            SleepState::evaluate(None, at("2026-01-01T00:00:00Z")),
            SleepState::Active
        );
    }

    #[test]
    fn future_wake_time_is_sleeping() {
        let now = at("2026-01-01T00:00:00Z");
        let until = at("2026-01-01T00:05:00Z");
        assert_eq!(
            SleepState::evaluate(Some(until), now),
            SleepState::Sleeping { until }
        );
    }

    #[test]
    fn past_or_equal_wake_time_is_due() {
        let now = at("2026-01-01T00:05:00Z");
        assert_eq!(
            SleepState::evaluate(Some(now), now),
            SleepState::WakeDue { since: now }
        );
        let earlier = at("2026-01-01T00:00:00Z");
        assert_eq!(
            SleepState::evaluate(Some(earlier), now),
            SleepState::WakeDue { since: earlier }
        );
    }

    #[test]
    fn request_uses_positive_integer_milliseconds() {
        let req = SleepRequest::from_parameters(&params(json!({"milliseconds": 3_600_000})), 60_000);
        assert_eq!(req.duration_ms, 3_600_000);
        assert!(!req.defaulted);
    }

    #[test]
    fn request_accepts_numeric_strings() {
        let req = SleepRequest::from_parameters(&params(json!({"milliseconds": " 1500 "})), 60_000);
        assert_eq!(req.duration_ms, 1500);
    }

    #[test]
    fn request_falls_back_on_invalid_input() {
        for bad in [
            json!({}),
            json!({"milliseconds": 0}),
            json!({"milliseconds": -5}),
            json!({"milliseconds": 1.5}),
            json!({"milliseconds": "soon"}),
            json!({"milliseconds": null}),
        ] {
            let req = SleepRequest::from_parameters(&params(bad.clone()), DEFAULT_SLEEP_MS);
            assert_eq!(req.duration_ms, DEFAULT_SLEEP_MS, "input {}", bad);
            assert!(req.defaulted);
        }
    }

    #[test]
    fn wake_at_adds_duration() {
        let now = at("2026-01-01T00:00:00Z");
        let req = SleepRequest {
            duration_ms: 3_600_000,
            defaulted: false,
        };
        assert_eq!(req.wake_at(now), at("2026-01-01T01:00:00Z"));
    }

    #[test]
    fn wake_at_clamps_oversized_requests() {
        let now = at("2026-01-01T00:00:00Z");
        let req = SleepRequest {
            duration_ms: u64::MAX,
            defaulted: false,
        };
        assert_eq!(req.wake_at(now), now + Duration::days(365));
    }

    #[test]
    fn oversized_request_is_capped_at_parse_time() {
        let req = SleepRequest::from_parameters(&params(json!({"milliseconds": u64::MAX})), 60_000);
        assert_eq!(req.duration_ms, MAX_SLEEP_MS);
        assert!(!req.defaulted);
    }
}
