//! Builds the upstream request headers from an inbound viewer request.

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use ctrl_core::{cookie_header, CookieEntry};
use url::Url;

/// Desktop Chrome; many origins degrade or block unknown agents.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Every coding the response transformer can undo.
pub const ACCEPT_ENCODING: &str = "gzip, deflate, br";

/// Inbound headers never copied upstream: hop-by-hop headers, headers the
/// director sets itself, and anything describing the proxy's own network.
const DROPPED_REQUEST_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
    "cookie",
    "origin",
    "referer",
    "user-agent",
    "accept-encoding",
    "forwarded",
    "via",
    "x-real-ip",
];

/// Headers for the upstream request to `target`.
///
/// The shared jar takes precedence: a cookie the viewer's browser presents
/// is forwarded only when the jar holds no cookie of the same name.
pub fn upstream_headers(inbound: &HeaderMap, target: &Url, jar: &[CookieEntry]) -> HeaderMap {
    let connection_listed = connection_tokens(inbound);
    let mut headers = HeaderMap::with_capacity(inbound.len() + 4);

    for (name, value) in inbound {
        let lower = name.as_str();
        if DROPPED_REQUEST_HEADERS.contains(&lower)
            || lower.starts_with("x-forwarded-")
            || connection_listed.iter().any(|t| t == lower)
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let origin = target.origin().ascii_serialization();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static(ACCEPT_ENCODING));
    if let Ok(value) = HeaderValue::from_str(&format!("{origin}/")) {
        headers.insert(header::REFERER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&origin) {
        headers.insert(header::ORIGIN, value);
    }
    if let Some(cookies) = merged_cookie_header(inbound, jar) {
        if let Ok(value) = HeaderValue::from_str(&cookies) {
            headers.insert(header::COOKIE, value);
        }
    }
    headers
}

/// Jar cookies first, then browser cookies whose names the jar lacks.
pub fn merged_cookie_header(inbound: &HeaderMap, jar: &[CookieEntry]) -> Option<String> {
    let browser: Vec<(&str, &str)> = inbound
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then_some((name, value.trim()))
        })
        .filter(|(name, _)| !jar.iter().any(|c| c.name == *name))
        .collect();

    cookie_header(
        jar.iter()
            .map(|c| (c.name.as_str(), c.value.as_str()))
            .chain(browser),
    )
}

fn connection_tokens(inbound: &HeaderMap) -> Vec<String> {
    inbound
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty() && HeaderName::from_bytes(t.as_bytes()).is_ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, value: &str) -> CookieEntry {
        CookieEntry {
            name: name.into(),
            value: value.into(),
            domain: "portal.example.com".into(),
            path: "/".into(),
        }
    }

    fn inbound(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    fn target() -> Url {
        Url::parse("https://portal.example.com/dash?x=1").unwrap()
    }

    #[test]
    fn sets_browser_identity_and_origin() {
        let headers = upstream_headers(&inbound(&[("user-agent", "curl/8")]), &target(), &[]);
        assert_eq!(headers[header::USER_AGENT], USER_AGENT);
        assert_eq!(headers[header::REFERER], "https://portal.example.com/");
        assert_eq!(headers[header::ORIGIN], "https://portal.example.com");
        assert_eq!(headers[header::ACCEPT_ENCODING], "gzip, deflate, br");
    }

    #[test]
    fn strips_hop_by_hop_and_proxy_headers() {
        let headers = upstream_headers(
            &inbound(&[
                ("host", "kiosk.lan:1337"),
                ("connection", "keep-alive, x-debug"),
                ("x-debug", "1"),
                ("x-forwarded-for", "10.0.0.7"),
                ("x-forwarded-proto", "http"),
                ("x-real-ip", "10.0.0.7"),
                ("forwarded", "for=10.0.0.7"),
                ("accept-encoding", "zstd"),
                ("content-length", "12"),
                ("accept-language", "en-GB"),
            ]),
            &target(),
            &[],
        );
        for gone in ["host", "connection", "x-debug", "x-forwarded-for", "x-forwarded-proto", "x-real-ip", "forwarded", "content-length"] {
            assert!(!headers.contains_key(gone), "{gone} leaked");
        }
        assert_eq!(headers[header::ACCEPT_ENCODING], ACCEPT_ENCODING);
        assert_eq!(headers["accept-language"], "en-GB");
    }

    #[test]
    fn jar_wins_over_browser_cookie() {
        let headers = upstream_headers(
            &inbound(&[("cookie", "sid=browser; theme=dark")]),
            &target(),
            &[entry("sid", "shared")],
        );
        assert_eq!(headers[header::COOKIE], "sid=shared; theme=dark");
    }

    #[test]
    fn no_cookies_no_header() {
        let headers = upstream_headers(&HeaderMap::new(), &target(), &[]);
        assert!(!headers.contains_key(header::COOKIE));
    }

    #[test]
    fn split_cookie_headers_are_merged() {
        let merged = merged_cookie_header(
            &inbound(&[("cookie", "a=1"), ("cookie", "b=2")]),
            &[entry("c", "3")],
        );
        assert_eq!(merged.as_deref(), Some("c=3; a=1; b=2"));
    }
}
