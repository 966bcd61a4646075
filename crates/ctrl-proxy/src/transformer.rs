//! Turns an upstream response into the response a viewer receives.
//!
//! Order per response: cookie capture (done by the caller with
//! [`set_cookie_directives`]), redirect interception, header sanitization,
//! then either a straight stream or decode, rewrite and inject.

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Response, StatusCode};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ctrl_core::{parse_set_cookie, Config, CookieDirective};
use futures::StreamExt;
use tracing::{debug, warn};
use url::Url;

use crate::decode::{decode_body, DecodeError};
use crate::error::ProxyError;
use crate::inject::{inject, injection_block};
use crate::masking::mask_reference;
use crate::rewrite::{rewrite_body, ContentKind, RewriteContext};

/// Response headers never passed to the viewer.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
    "strict-transport-security",
    "set-cookie",
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "trailer",
];

/// Dropped as well when the body is rewritten.
const REWRITTEN_BODY_HEADERS: &[&str] = &["content-length", "content-encoding", "content-md5", "digest"];

/// Dropped from rewritten HTML; its content depends on the live config.
const HTML_CACHE_HEADERS: &[&str] = &["etag", "last-modified", "expires", "cache-control", "age"];

pub struct TransformContext<'a> {
    /// URL the upstream request was sent to.
    pub document_url: &'a Url,
    /// Config the page is rendered under.
    pub config: &'a Config,
    pub proxy_authority: Option<&'a str>,
    pub max_rewrite_body_bytes: usize,
    /// HEAD responses carry no body to rewrite.
    pub head_request: bool,
}

impl TransformContext<'_> {
    fn rewrite_context(&self) -> RewriteContext<'_> {
        RewriteContext {
            base: self.document_url,
            proxy_authority: self.proxy_authority,
        }
    }
}

/// Parse every `Set-Cookie` header on a response from `host`.
pub fn set_cookie_directives(headers: &HeaderMap, host: &str, now: DateTime<Utc>) -> Vec<CookieDirective> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|raw| parse_set_cookie(raw, host, now))
        .collect()
}

/// Produce the viewer response for `upstream`.
pub async fn transform(
    upstream: reqwest::Response,
    ctx: &TransformContext<'_>,
) -> Result<Response<Body>, ProxyError> {
    let status = upstream.status();
    if let Some(redirect) = intercept_redirect(status, upstream.headers(), ctx) {
        return Ok(redirect);
    }

    let kind = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(ContentKind::from_content_type);

    let Some(kind) = kind else {
        return Ok(stream_through(upstream));
    };
    let bodiless = ctx.head_request || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED;
    let oversized = upstream
        .content_length()
        .is_some_and(|len| len > ctx.max_rewrite_body_bytes as u64);
    if bodiless || oversized {
        return Ok(stream_through(upstream));
    }

    let headers = upstream.headers().clone();
    let mut stream = Box::pin(upstream.bytes_stream());
    let mut buffered = Vec::new();
    while let Some(chunk) = stream.next().await {
        buffered.extend_from_slice(&chunk?);
        if buffered.len() > ctx.max_rewrite_body_bytes {
            debug!(url = %ctx.document_url, "body exceeds rewrite limit, streaming unmodified");
            let prefix = futures::stream::once(async move { Ok::<_, reqwest::Error>(Bytes::from(buffered)) });
            let body = Body::from_stream(prefix.chain(stream));
            return Ok(build(status, sanitize_headers(&headers, false), body));
        }
    }

    let encoding = headers.get(header::CONTENT_ENCODING).and_then(|v| v.to_str().ok());
    let plain = match decode_body(encoding, &buffered, ctx.max_rewrite_body_bytes) {
        Ok(plain) => plain,
        Err(DecodeError::TooLarge { limit }) => {
            debug!(url = %ctx.document_url, limit, "decoded body exceeds rewrite limit, passing through encoded");
            return Ok(build(status, sanitize_headers(&headers, false), Body::from(buffered)));
        }
        Err(e) => {
            warn!(url = %ctx.document_url, error = %e, "cannot decode body, passing through unmodified");
            return Ok(build(status, sanitize_headers(&headers, false), Body::from(buffered)));
        }
    };

    let mut body = rewrite_body(kind, &plain, &ctx.rewrite_context());
    let mut out_headers = sanitize_headers(&headers, true);
    if kind == ContentKind::Html {
        body = inject(&body, &injection_block(ctx.config));
        for name in HTML_CACHE_HEADERS {
            out_headers.remove(*name);
        }
        out_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }
    out_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

    Ok(build(status, out_headers, Body::from(body)))
}

/// Rewrite an upstream redirect into one that stays on the proxy.
///
/// 301/302/307/308 all become 307 so browsers never cache the hop; 303
/// keeps its method-changing meaning. A redirect without a usable
/// `Location` passes its status through with an explanation.
pub fn intercept_redirect(
    status: StatusCode,
    headers: &HeaderMap,
    ctx: &TransformContext<'_>,
) -> Option<Response<Body>> {
    let viewer_status = match status.as_u16() {
        301 | 302 | 307 | 308 => StatusCode::TEMPORARY_REDIRECT,
        303 => StatusCode::SEE_OTHER,
        _ => return None,
    };

    let location = headers
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let Some(location) = location else {
        warn!(url = %ctx.document_url, status = status.as_u16(), "redirect without Location");
        let mut out = HeaderMap::new();
        out.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        let body = format!("upstream answered {status} without a Location header");
        return Some(build(status, out, Body::from(body)));
    };

    let masked = mask_reference(location, ctx.document_url, ctx.proxy_authority)
        .unwrap_or_else(|| location.to_string());
    debug!(from = location, to = %masked, status = status.as_u16(), "redirect masked");

    let mut out = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&masked) {
        out.insert(header::LOCATION, value);
    }
    out.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    out.insert(header::CONTENT_LENGTH, HeaderValue::from(0usize));
    Some(build(viewer_status, out, Body::empty()))
}

/// Copy upstream headers minus the ones that break embedding or describe
/// the upstream connection. With `rewritten`, length and encoding go too.
pub fn sanitize_headers(upstream: &HeaderMap, rewritten: bool) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        let lower = name.as_str();
        if STRIPPED_RESPONSE_HEADERS.contains(&lower) || (rewritten && REWRITTEN_BODY_HEADERS.contains(&lower)) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Pass the body through chunk by chunk. Dropping the body closes the
/// upstream connection.
fn stream_through(upstream: reqwest::Response) -> Response<Body> {
    let status = upstream.status();
    let headers = sanitize_headers(upstream.headers(), false);
    build(status, headers, Body::from_stream(upstream.bytes_stream()))
}

fn build(status: StatusCode, headers: HeaderMap, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
