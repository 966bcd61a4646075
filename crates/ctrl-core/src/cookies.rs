use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cookie held in the shared jar. The jar keeps at most one entry per
/// name; `domain` only decides which upstream hosts receive it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieEntry {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// What a single `Set-Cookie` header asks the jar to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CookieDirective {
    Upsert(CookieEntry),
    /// Expired on arrival (`Max-Age<=0` or a past `Expires`).
    Remove(String),
}

impl CookieDirective {
    pub fn name(&self) -> &str {
        match self {
            Self::Upsert(entry) => &entry.name,
            Self::Remove(name) => name,
        }
    }
}

/// Parse one `Set-Cookie` header value.
///
/// `response_host` becomes the domain when the header carries none.
/// Returns `None` for headers without a `name=value` pair.
pub fn parse_set_cookie(raw: &str, response_host: &str, now: DateTime<Utc>) -> Option<CookieDirective> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut domain = None;
    let mut path = None;
    let mut max_age = None;
    let mut expires = None;

    for attr in parts {
        let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
        let val = val.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => {
                domain = Some(val.trim_start_matches('.').to_ascii_lowercase());
            }
            "path" if !val.is_empty() => path = Some(val.to_string()),
            "max-age" => max_age = val.parse::<i64>().ok(),
            "expires" => expires = parse_expires(val),
            _ => {}
        }
    }

    let expired = match max_age {
        Some(age) => age <= 0,
        None => expires.is_some_and(|at| at <= now),
    };
    if expired {
        return Some(CookieDirective::Remove(name.to_string()));
    }

    Some(CookieDirective::Upsert(CookieEntry {
        name: name.to_string(),
        value: value.trim().to_string(),
        domain: domain.unwrap_or_else(|| host_without_port(response_host)),
        path: path.unwrap_or_else(|| "/".to_string()),
    }))
}

/// Whether a cookie scoped to `domain` should be sent to `host`.
/// An empty domain matches everything.
pub fn domain_matches(domain: &str, host: &str) -> bool {
    let domain = domain.trim_start_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return true;
    }
    let host = host_without_port(host);
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Join `name=value` pairs into a `Cookie` header value.
pub fn cookie_header<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Option<String> {
    let joined = pairs
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ");
    (!joined.is_empty()).then_some(joined)
}

/// RFC 1123 dates, plus the dashed `Thu, 01-Jan-1970 00:00:00 GMT` form
/// many servers still send when deleting a cookie.
fn parse_expires(val: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc2822(val) {
        return Some(at.with_timezone(&Utc));
    }
    // the weekday is redundant and often wrong
    let date = val.split_once(',').map_or(val, |(_, rest)| rest.trim());
    NaiveDateTime::parse_from_str(date, "%d-%b-%Y %H:%M:%S GMT")
        .ok()
        .map(|naive| naive.and_utc())
}

fn host_without_port(authority: &str) -> String {
    let lower = authority.trim().to_ascii_lowercase();
    if lower.starts_with('[') {
        // IPv6 literal, keep the brackets
        return match lower.find(']') {
            Some(end) => lower[..=end].to_string(),
            None => lower,
        };
    }
    match lower.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host.to_string(),
        _ => lower,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn parses_basic_cookie() {
        let directive = parse_set_cookie("sid=abc123; Path=/; HttpOnly", "example.com", now());
        assert_eq!(
            directive,
            Some(CookieDirective::Upsert(CookieEntry {
                name: "sid".into(),
                value: "abc123".into(),
                domain: "example.com".into(),
                path: "/".into(),
            }))
        );
    }

    #[test]
    fn domain_attribute_wins_over_host() {
        let Some(CookieDirective::Upsert(entry)) =
            parse_set_cookie("pref=1; Domain=.Example.com; Path=/app", "www.example.com:8443", now())
        else {
            panic!("expected upsert");
        };
        assert_eq!(entry.domain, "example.com");
        assert_eq!(entry.path, "/app");
    }

    #[test]
    fn host_port_is_stripped() {
        let Some(CookieDirective::Upsert(entry)) = parse_set_cookie("a=b", "intranet:8080", now()) else {
            panic!("expected upsert");
        };
        assert_eq!(entry.domain, "intranet");
    }

    #[test]
    fn value_may_contain_equals() {
        let Some(CookieDirective::Upsert(entry)) = parse_set_cookie("tok=a=b=c; Secure", "x.io", now()) else {
            panic!("expected upsert");
        };
        assert_eq!(entry.value, "a=b=c");
    }

    #[test]
    fn max_age_zero_removes() {
        assert_eq!(
            parse_set_cookie("sid=; Max-Age=0", "example.com", now()),
            Some(CookieDirective::Remove("sid".into()))
        );
    }

    #[test]
    fn past_expires_removes() {
        assert_eq!(
            parse_set_cookie("sid=x; Expires=Thu, 01 Jan 1970 00:00:00 GMT", "example.com", now()),
            Some(CookieDirective::Remove("sid".into()))
        );
    }

    #[test]
    fn dashed_expires_removes() {
        assert_eq!(
            parse_set_cookie("sid=deleted; Expires=Thu, 01-Jan-1970 00:00:00 GMT; Path=/", "example.com", now()),
            Some(CookieDirective::Remove("sid".into()))
        );
        let directive =
            parse_set_cookie("sid=x; expires=Wed, 21-Oct-2099 07:28:00 GMT", "example.com", now());
        assert!(matches!(directive, Some(CookieDirective::Upsert(_))));
    }

    #[test]
    fn future_expires_keeps() {
        let directive =
            parse_set_cookie("sid=x; Expires=Wed, 21 Oct 2099 07:28:00 GMT", "example.com", now());
        assert!(matches!(directive, Some(CookieDirective::Upsert(_))));
    }

    #[test]
    fn max_age_beats_expires() {
        let directive = parse_set_cookie(
            "sid=x; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=3600",
            "example.com",
            now(),
        );
        assert!(matches!(directive, Some(CookieDirective::Upsert(_))));
    }

    #[test]
    fn rejects_headers_without_pair() {
        assert_eq!(parse_set_cookie("garbage", "example.com", now()), None);
        assert_eq!(parse_set_cookie("=value", "example.com", now()), None);
    }

    #[test]
    fn domain_matching() {
        assert!(domain_matches("example.com", "example.com"));
        assert!(domain_matches("example.com", "www.example.com:443"));
        assert!(domain_matches(".example.com", "cdn.example.com"));
        assert!(!domain_matches("example.com", "badexample.com"));
        assert!(!domain_matches("example.com", "cdn.other.net"));
        assert!(domain_matches("", "anything.net"));
    }

    #[test]
    fn builds_cookie_header() {
        assert_eq!(
            cookie_header([("a", "1"), ("b", "2")]),
            Some("a=1; b=2".to_string())
        );
        assert_eq!(cookie_header(std::iter::empty()), None);
    }
}
