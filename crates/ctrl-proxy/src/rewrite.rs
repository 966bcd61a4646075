//! Best-effort textual rewriting of HTML, CSS and script bodies so that
//! every embedded resource reference routes back through the proxy.
//!
//! Bodies are handled as bytes; a document in a legacy charset survives
//! untouched apart from the references themselves. Tags are split into
//! attributes with quoting respected, so only real attribute names are
//! acted on. Text content or an attribute value that happens to read
//! `src="..."` is never altered.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::bytes::{Captures, Regex};
use url::Url;

use crate::masking::mask_reference;

static CSS_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i-u)url\(\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<uq>[^"'\)\s]*))\s*\)"#)
        .expect("valid css url regex")
});

/// `url("...")` as it appears in stylesheets embedded in script strings.
/// Lowercase and quoted only, so `new URL(path)` is never touched.
static SCRIPT_CSS_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?-u)\burl\(\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')\s*\)"#)
        .expect("valid script css url regex")
});

static CSS_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i-u)(?P<pre>@import\s+)(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)')"#)
        .expect("valid css import regex")
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?-u)<[A-Za-z](?:[^>"']|"[^"]*"|'[^']*')*>"#).expect("valid tag regex")
});

/// One attribute with the separator in front of it.
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?-u)(?P<sep>[\s/]*)(?P<name>[^\s"'>/=]+)(?:(?P<eq>\s*=\s*)(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<uq>[^\s"'>]+)))?"#,
    )
    .expect("valid attribute regex")
});

/// Attributes whose value is a single resource reference.
const URL_ATTRIBUTES: &[&[u8]] = &[b"href", b"src", b"action", b"poster", b"data"];

/// Attributes that pin a resource to its origin bytes or CORS mode.
const STRIPPED_ATTRIBUTES: &[&[u8]] = &[b"integrity", b"crossorigin"];

/// Which grammar a response body is rewritten with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Css,
    Script,
}

impl ContentKind {
    /// Classify a `Content-Type` value. `None` means the body is not rewritten.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let lower = content_type.to_ascii_lowercase();
        let mime = lower.split(';').next().unwrap_or_default().trim();
        if mime == "text/html" || mime == "application/xhtml+xml" {
            Some(Self::Html)
        } else if mime == "text/css" {
            Some(Self::Css)
        } else if mime.contains("javascript") || mime.contains("ecmascript") {
            Some(Self::Script)
        } else {
            None
        }
    }
}

/// Everything a rewrite pass needs to know about the document.
pub struct RewriteContext<'a> {
    /// Origin URL the body was fetched from; relative references resolve here.
    pub base: &'a Url,
    /// The proxy's own authority, so references to it are left alone.
    pub proxy_authority: Option<&'a str>,
}

impl RewriteContext<'_> {
    fn mask(&self, raw: &[u8]) -> Option<String> {
        let raw = std::str::from_utf8(raw).ok()?;
        mask_reference(raw, self.base, self.proxy_authority)
    }
}

/// Rewrite a full body of the given kind.
pub fn rewrite_body(kind: ContentKind, body: &[u8], ctx: &RewriteContext<'_>) -> Vec<u8> {
    let url_re = match kind {
        ContentKind::Script => &*SCRIPT_CSS_URL_RE,
        ContentKind::Html | ContentKind::Css => &*CSS_URL_RE,
    };
    let body = rewrite_css_urls(url_re, body, ctx);
    let body = rewrite_imports(&body, ctx);
    match kind {
        ContentKind::Html => rewrite_tags(&body, ctx),
        ContentKind::Css | ContentKind::Script => body.into_owned(),
    }
}

/// `url(...)` references matched by `re`, keeping the original quoting.
fn rewrite_css_urls<'b>(re: &Regex, body: &'b [u8], ctx: &RewriteContext<'_>) -> Cow<'b, [u8]> {
    re.replace_all(body, |caps: &Captures| {
        let (quote, value) = quoted_value(caps);
        match ctx.mask(value) {
            Some(masked) => [&b"url("[..], quote, masked.as_bytes(), quote, &b")"[..]].concat(),
            None => caps[0].to_vec(),
        }
    })
}

/// `@import "..."` targets. The `@import url(...)` form is covered by
/// the `url()` pass.
pub fn rewrite_imports<'b>(body: &'b [u8], ctx: &RewriteContext<'_>) -> Cow<'b, [u8]> {
    CSS_IMPORT_RE.replace_all(body, |caps: &Captures| {
        let (quote, value) = quoted_value(caps);
        match ctx.mask(value) {
            Some(masked) => [&caps["pre"], quote, masked.as_bytes(), quote].concat(),
            None => caps[0].to_vec(),
        }
    })
}

/// Reference attributes, srcset and integrity/crossorigin removal,
/// applied tag by tag.
pub fn rewrite_tags(body: &[u8], ctx: &RewriteContext<'_>) -> Vec<u8> {
    TAG_RE
        .replace_all(body, |caps: &Captures| rewrite_tag(&caps[0], ctx))
        .into_owned()
}

fn rewrite_tag(tag: &[u8], ctx: &RewriteContext<'_>) -> Vec<u8> {
    let name_end = tag
        .iter()
        .skip(1)
        .position(|&b| b.is_ascii_whitespace() || matches!(b, b'/' | b'>'))
        .map_or(tag.len(), |p| p + 1);
    let mut out = tag[..name_end].to_vec();

    let mut pos = name_end;
    while let Some(caps) = ATTR_RE.captures_at(tag, pos) {
        // anything the grammar cannot place ends attribute scanning
        let Some(whole) = caps.get(0).filter(|m| m.start() == pos) else {
            break;
        };
        pos = whole.end();
        rewrite_attribute(&caps, ctx, &mut out);
    }
    out.extend_from_slice(&tag[pos..]);
    out
}

fn rewrite_attribute(caps: &Captures<'_>, ctx: &RewriteContext<'_>, out: &mut Vec<u8>) {
    let name = caps["name"].to_ascii_lowercase();
    if STRIPPED_ATTRIBUTES.contains(&name.as_slice()) {
        return;
    }

    let rewritten = match caps.name("eq") {
        None => None,
        Some(_) if URL_ATTRIBUTES.contains(&name.as_slice()) => ctx.mask(quoted_value(caps).1),
        Some(_) if name == b"srcset" => std::str::from_utf8(quoted_value(caps).1)
            .ok()
            .map(|srcset| rewrite_srcset(srcset, ctx)),
        Some(_) => None,
    };
    match rewritten {
        Some(value) => {
            let (quote, _) = quoted_value(caps);
            out.extend_from_slice(&caps["sep"]);
            out.extend_from_slice(&caps["name"]);
            out.extend_from_slice(&caps["eq"]);
            out.extend_from_slice(quote);
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(quote);
        }
        None => out.extend_from_slice(&caps[0]),
    }
}

/// Rewrite only the URL token of each `url descriptor` candidate.
fn rewrite_srcset(srcset: &str, ctx: &RewriteContext<'_>) -> String {
    srcset
        .split(',')
        .map(|candidate| {
            let mut fields = candidate.split_whitespace();
            let Some(url) = fields.next() else {
                return String::new();
            };
            let url = mask_reference(url, ctx.base, ctx.proxy_authority).unwrap_or_else(|| url.to_string());
            std::iter::once(url.as_str())
                .chain(fields)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|candidate| !candidate.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The quote characters and raw value of a `dq`/`sq`/`uq` capture set.
fn quoted_value<'c>(caps: &Captures<'c>) -> (&'static [u8], &'c [u8]) {
    if let Some(m) = caps.name("dq") {
        (&b"\""[..], m.as_bytes())
    } else if let Some(m) = caps.name("sq") {
        (&b"'"[..], m.as_bytes())
    } else {
        (&b""[..], caps.name("uq").map(|m| m.as_bytes()).unwrap_or_default())
    }
}
