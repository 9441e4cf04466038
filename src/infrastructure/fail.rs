//! Fail-response policies.
//!
//! A denied attempt is turned into an HTTP response (or a mark on a request
//! that still proceeds) by a `FailPolicy`. The stock policies all report the
//! retry time twice: as a `Retry-After` header in whole seconds and as an
//! RFC 3339 timestamp in a JSON body.

use crate::domain::key::BruteKey;
use chrono::{DateTime, SecondsFormat, Utc};
use http::header::{CONTENT_TYPE, RETRY_AFTER};
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;

/// Text of the stock error body.
pub const TOO_MANY_REQUESTS_TEXT: &str = "Too many requests in this time frame.";

/// Everything a fail policy knows about a denial.
#[derive(Debug, Clone, Copy)]
pub struct DenyContext<'a> {
    /// Name of the guard that denied the attempt
    pub guard: &'a str,
    /// Derived lookup key
    pub key: &'a BruteKey,
    /// Caller-supplied sub-key, if any
    pub sub_key: Option<&'a str>,
    /// Client address, unless the middleware ignores it
    pub client_ip: Option<IpAddr>,
    /// Time of the decision
    pub now: SystemTime,
    /// Earliest time the next attempt will be considered
    pub retry_not_before: SystemTime,
}

impl DenyContext<'_> {
    /// Seconds until `retry_not_before`, rounded up, never negative.
    pub fn retry_after_secs(&self) -> u64 {
        retry_after_secs(self.now, self.retry_not_before)
    }

    /// `retry_not_before` as an RFC 3339 UTC timestamp with milliseconds.
    pub fn retry_not_before_rfc3339(&self) -> String {
        DateTime::<Utc>::from(self.retry_not_before).to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Seconds from `now` until `at`, rounded up; 0 if `at` is not in the future.
pub fn retry_after_secs(now: SystemTime, at: SystemTime) -> u64 {
    at.duration_since(now).map_or(0, |left| {
        let ms = u64::try_from(left.as_millis()).unwrap_or(u64::MAX);
        ms.div_ceil(1000)
    })
}

/// Denial attached to a request that proceeds anyway.
#[derive(Debug, Clone)]
pub struct DenialMark {
    /// Status the host should answer with
    pub status: StatusCode,
    /// Headers the host should add, `Retry-After` included
    pub headers: HeaderMap,
    /// Earliest time the next attempt will be considered
    pub retry_not_before: SystemTime,
}

/// What a fail policy decided.
#[derive(Debug)]
pub enum FailAction {
    /// Answer the request with this response
    Respond(Response<String>),
    /// Let the request through, carrying the mark
    Mark(DenialMark),
}

/// Caller-supplied fail policy.
pub type CustomFail = Arc<dyn Fn(&DenyContext<'_>) -> FailAction + Send + Sync>;

/// How denied attempts are answered.
#[derive(Clone, Default)]
pub enum FailPolicy {
    /// 429 with `Retry-After` and a JSON error body
    #[default]
    TooManyRequests,
    /// 403 with `Retry-After` and a JSON error body
    Forbidden,
    /// Proceed, attaching status 429 and `Retry-After`
    Mark,
    /// Delegate to a closure
    Custom(CustomFail),
}

impl FailPolicy {
    /// Wrap a closure as a policy.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&DenyContext<'_>) -> FailAction + Send + Sync + 'static,
    {
        FailPolicy::Custom(Arc::new(f))
    }

    /// Turn a denial into an action.
    pub fn apply(&self, ctx: &DenyContext<'_>) -> FailAction {
        match self {
            FailPolicy::TooManyRequests => {
                FailAction::Respond(error_response(StatusCode::TOO_MANY_REQUESTS, ctx))
            }
            FailPolicy::Forbidden => FailAction::Respond(error_response(StatusCode::FORBIDDEN, ctx)),
            FailPolicy::Mark => FailAction::Mark(DenialMark {
                status: StatusCode::TOO_MANY_REQUESTS,
                headers: retry_headers(ctx),
                retry_not_before: ctx.retry_not_before,
            }),
            FailPolicy::Custom(f) => f(ctx),
        }
    }
}

impl std::fmt::Debug for FailPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailPolicy::TooManyRequests => f.write_str("TooManyRequests"),
            FailPolicy::Forbidden => f.write_str("Forbidden"),
            FailPolicy::Mark => f.write_str("Mark"),
            FailPolicy::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail<'a> {
    text: &'a str,
    next_valid_request_date: String,
}

fn retry_headers(ctx: &DenyContext<'_>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(RETRY_AFTER, HeaderValue::from(ctx.retry_after_secs()));
    headers
}

/// Build the stock JSON error response.
pub fn error_response(status: StatusCode, ctx: &DenyContext<'_>) -> Response<String> {
    let body = ErrorBody {
        error: ErrorDetail {
            text: TOO_MANY_REQUESTS_TEXT,
            next_valid_request_date: ctx.retry_not_before_rfc3339(),
        },
    };
    // Serializing two strings cannot fail
    let body = serde_json::to_string(&body).unwrap_or_default();

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = retry_headers(ctx);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
