//! Static deny-list of ad and tracking endpoints.
//!
//! Blocked requests are answered with an empty success so pages cannot
//! tell a blocked ad from one that loaded and did nothing.

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};

/// Hosts that are blocked along with every subdomain.
const BLOCKED_DOMAINS: &[&str] = &[
    "google-analytics.com",
    "googletagmanager.com",
    "googletagservices.com",
    "doubleclick.net",
    "googlesyndication.com",
    "googleadservices.com",
    "adservice.google.com",
    "amazon-adsystem.com",
    "adnxs.com",
    "scorecardresearch.com",
    "quantserve.com",
    "outbrain.com",
    "taboola.com",
    "criteo.com",
    "hotjar.com",
    "segment.io",
    "connect.facebook.net",
];

/// Path fragments that mark ad or beacon scripts on otherwise allowed hosts.
const BLOCKED_PATH_MARKERS: &[&str] = &[
    "/pagead/",
    "/adsbygoogle",
    "/gtag/js",
    "/gtm.js",
    "/analytics.js",
];

/// Whether a request for `path` on `host` should be short-circuited.
pub fn is_blocked(host: &str, path: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain_hit = BLOCKED_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")));
    if domain_hit {
        return true;
    }
    let path = path.to_ascii_lowercase();
    BLOCKED_PATH_MARKERS.iter().any(|marker| path.contains(marker))
}

/// 200 response with a body that is a no-op for the requested file type.
pub fn stub_response(path: &str) -> Response<Body> {
    let lower = path.to_ascii_lowercase();
    let file = lower.split(|c| c == '?' || c == '#').next().unwrap_or_default();
    let (content_type, body) = if file.ends_with(".js") || file.ends_with(".mjs") {
        ("application/javascript", "/* blocked */")
    } else if file.ends_with(".css") {
        ("text/css", "/* blocked */")
    } else {
        ("text/plain", "")
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_listed_domains_and_subdomains() {
        assert!(is_blocked("www.google-analytics.com", "/collect"));
        assert!(is_blocked("doubleclick.net", "/"));
        assert!(is_blocked("pagead2.googlesyndication.com", "/pagead/js/adsbygoogle.js"));
        assert!(is_blocked("SECUREPUBADS.G.DOUBLECLICK.NET.", "/tag/js/gpt.js"));
    }

    #[test]
    fn blocks_ad_paths_on_any_host() {
        assert!(is_blocked("news.example.com", "/static/adsbygoogle.js"));
        assert!(is_blocked("www.example.com", "/gtag/js?id=G-1"));
    }

    #[test]
    fn allows_lookalike_hosts() {
        assert!(!is_blocked("notdoubleclick.net", "/"));
        assert!(!is_blocked("news.example.com", "/assets/app.js"));
        assert!(!is_blocked("example.com", "/reading/adventure.css"));
    }

    #[tokio::test]
    async fn js_stub_is_valid_script() {
        let response = stub_response("/tag/ads.js?v=3");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/javascript"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"/* blocked */");
    }

    #[tokio::test]
    async fn css_and_other_stubs() {
        let css = stub_response("/ads/banner.CSS");
        assert_eq!(css.headers()[header::CONTENT_TYPE], "text/css");

        let pixel = stub_response("/collect");
        assert_eq!(pixel.status(), StatusCode::OK);
        let body = axum::body::to_bytes(pixel.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }
}
