//! Conversion between origin URLs and the proxy paths viewers request.
//!
//! Every origin reference is embedded in the path under a reserved prefix
//! that also records the scheme:
//!
//! ```text
//! https://cdn.example.com/s.css?v=2  <->  /--proxy-host--/cdn.example.com/s.css?v=2
//! http://intranet:8080/board         <->  /--proxy-http--/intranet:8080/board
//! ```
//!
//! Paths without a prefix belong to the configured target: `/` is the
//! target URL itself, anything else is that path on the target origin.

use ctrl_core::{normalize_authority, url_authority, ConfigError};
use url::Url;

/// Prefix for origins fetched over https.
pub const HTTPS_PREFIX: &str = "/--proxy-host--/";
/// Prefix for origins fetched over plain http.
pub const HTTP_PREFIX: &str = "/--proxy-http--/";

/// Reference schemes that are never routed through the proxy.
const PASSTHROUGH_SCHEMES: &[&str] = &["data:", "mailto:", "javascript:", "blob:", "about:", "tel:"];

/// Proxy path for an absolute origin URL, or `None` when the scheme is
/// neither http nor https.
pub fn encode(url: &Url) -> Option<String> {
    let prefix = match url.scheme() {
        "https" => HTTPS_PREFIX,
        "http" => HTTP_PREFIX,
        _ => return None,
    };
    url.host_str()?;

    let mut out = String::with_capacity(url.as_str().len() + prefix.len());
    out.push_str(prefix);
    out.push_str(&url_authority(url));
    out.push_str(url.path());
    if let Some(query) = url.query() {
        out.push('?');
        out.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        out.push('#');
        out.push_str(fragment);
    }
    Some(out)
}

/// Whether `path` already carries one of the reserved prefixes.
pub fn is_masked(path: &str) -> bool {
    path.starts_with(HTTPS_PREFIX) || path.starts_with(HTTP_PREFIX)
}

/// Rewrite a reference found in a document fetched from `base`.
///
/// Returns `None` when the reference must stay as it is: empty values,
/// fragments, non-network schemes, and anything already in proxy form
/// (either prefix, or an absolute URL at `proxy_authority`).
pub fn mask_reference(raw: &str, base: &Url, proxy_authority: Option<&str>) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || is_masked(trimmed) {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if PASSTHROUGH_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
        return None;
    }

    let resolved = base.join(trimmed).ok()?;
    if let Some(proxy) = proxy_authority {
        if normalize_authority(&url_authority(&resolved)) == normalize_authority(proxy) {
            return None;
        }
    }
    encode(&resolved)
}

/// Resolve an inbound request path (with optional query) to the origin URL
/// it stands for.
pub fn decode(path_and_query: &str, target: &Url) -> Result<Url, ConfigError> {
    decode_masked(path_and_query).unwrap_or_else(|| Ok(decode_target_relative(path_and_query, target)))
}

/// Decode a path that names its own origin. `None` when the path carries
/// neither prefix and has to be resolved against the target.
pub fn decode_masked(path_and_query: &str) -> Option<Result<Url, ConfigError>> {
    let (prefix, scheme) = if path_and_query.starts_with(HTTPS_PREFIX) {
        (HTTPS_PREFIX, "https")
    } else if path_and_query.starts_with(HTTP_PREFIX) {
        (HTTP_PREFIX, "http")
    } else {
        return None;
    };

    let rest = &path_and_query[prefix.len()..];
    let split = rest
        .find(|c| matches!(c, '/' | '?' | '#'))
        .unwrap_or(rest.len());
    let (authority, remainder) = rest.split_at(split);
    if authority.is_empty() {
        return Some(Err(ConfigError::InvalidUrl(format!(
            "{path_and_query}: masked path carries no host"
        ))));
    }

    let (path, query) = match remainder.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (remainder, None),
    };
    let mut raw = format!("{scheme}://{authority}{}", collapse_slashes(path));
    if let Some(query) = query {
        raw.push('?');
        raw.push_str(query);
    }
    Some(Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl(format!("{path_and_query}: {e}"))))
}

fn decode_target_relative(path_and_query: &str, target: &Url) -> Url {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };
    if (path.is_empty() || path == "/") && query.is_none() {
        return target.clone();
    }

    let mut url = target.clone();
    url.set_fragment(None);
    url.set_path(&collapse_slashes(path));
    url.set_query(query);
    url
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    if !path.starts_with('/') {
        out.push('/');
    }
    let mut previous_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.push(ch);
    }
    out
}
