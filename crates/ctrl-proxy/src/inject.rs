//! Viewer-side additions to every proxied HTML page: the zoom stylesheet
//! and the client script (reload detection, interface lock, auto-scroll,
//! page-height beacon).

use std::sync::LazyLock;

use ctrl_core::Config;
use regex::bytes::Regex;
use serde_json::json;

static HEAD_CLOSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i-u)</head\s*>").expect("valid head close regex"));

static BODY_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i-u)<body(?:\s[^>]*)?>").expect("valid body open regex"));

/// Milliseconds the scroller rests at the top and bottom of each range.
pub const SCROLL_PAUSE_MS: u32 = 3_000;
/// Poll interval for `/api/version`.
pub const VERSION_POLL_MS: u32 = 5_000;
/// Delay after `load` before the page height is reported.
pub const HEIGHT_REPORT_DELAY_MS: u32 = 2_000;

/// `body{...}` rule that scales the page and widens it so the scaled
/// layout still fills the viewport.
pub fn scale_style(scale: f64) -> String {
    format!(
        "body{{transform:scale({});transform-origin:0 0;width:{}%;overflow-x:hidden;}}",
        css_number(scale),
        css_number(100.0 / scale)
    )
}

/// The `<style>` + `<script>` block for a page rendered under `config`.
pub fn injection_block(config: &Config) -> String {
    let client_config = json!({
        "autoScroll": config.auto_scroll,
        "scrollSpeed": config.scroll_speed,
        "scrollSequence": config.scroll_sequence,
        "interfaceLocked": config.interface_locked,
        "version": config.last_modified,
        "pauseMs": SCROLL_PAUSE_MS,
        "pollMs": VERSION_POLL_MS,
        "heightDelayMs": HEIGHT_REPORT_DELAY_MS,
    });
    // keep `</script>` inside string values from closing the tag
    let client_config = client_config.to_string().replace("</", "<\\/");

    format!(
        "<style id=\"ctrl-scale\">{}</style>\n<script id=\"ctrl-client\">\n(function(config){{{}}})({});\n</script>\n",
        scale_style(config.scale_factor),
        CLIENT_SCRIPT,
        client_config
    )
}

/// Insert `block` before `</head>`, else right after the opening `<body>`,
/// else at the very start of the document.
pub fn inject(body: &[u8], block: &str) -> Vec<u8> {
    let at = HEAD_CLOSE_RE
        .find(body)
        .map(|m| m.start())
        .or_else(|| BODY_OPEN_RE.find(body).map(|m| m.end()))
        .unwrap_or(0);

    let mut out = Vec::with_capacity(body.len() + block.len());
    out.extend_from_slice(&body[..at]);
    out.extend_from_slice(block.as_bytes());
    out.extend_from_slice(&body[at..]);
    out
}

/// Format a number for CSS without trailing zeros: `0.5`, `200`, `33.3333`.
fn css_number(value: f64) -> String {
    let fixed = format!("{value:.4}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

const CLIENT_SCRIPT: &str = r#"
  var version = config.version;
  var reloading = false;
  function maybeReload(next) {
    if (!reloading && typeof next === 'number' && next > version) {
      reloading = true;
      window.location.href = '/';
    }
  }

  setInterval(function () {
    fetch('/api/version', { cache: 'no-store' })
      .then(function (res) { return res.json(); })
      .then(function (data) { maybeReload(data.lastModified); })
      .catch(function () {});
  }, config.pollMs);

  (function connect() {
    if (!window.WebSocket) return;
    var proto = window.location.protocol === 'https:' ? 'wss://' : 'ws://';
    var socket;
    try { socket = new WebSocket(proto + window.location.host + '/api/ws'); } catch (e) { return; }
    socket.onmessage = function (event) {
      try {
        var msg = JSON.parse(event.data);
        if (msg.type === 'reload') maybeReload(msg.lastModified);
      } catch (e) {}
    };
    socket.onclose = function () { if (!reloading) setTimeout(connect, config.pollMs); };
  })();

  function whenReady(fn) {
    if (document.readyState === 'loading') document.addEventListener('DOMContentLoaded', fn);
    else fn();
  }

  if (config.interfaceLocked) {
    whenReady(function () {
      var overlay = document.createElement('div');
      overlay.style.cssText = 'position:fixed;top:0;left:0;width:100vw;height:100vh;z-index:2147483647;background:transparent;cursor:none;';
      document.body.appendChild(overlay);
      document.documentElement.style.cursor = 'none';
    });
    var swallow = function (e) {
      if (e.isTrusted) { e.preventDefault(); e.stopPropagation(); return false; }
    };
    ['click', 'dblclick', 'mousedown', 'mouseup', 'wheel', 'contextmenu', 'keydown', 'keyup', 'keypress', 'touchstart', 'touchmove', 'touchend']
      .forEach(function (type) { window.addEventListener(type, swallow, { capture: true, passive: false }); });
  }

  if (config.autoScroll) {
    whenReady(function () {
      var maxScroll = function () {
        return Math.max(0, document.documentElement.scrollHeight - window.innerHeight);
      };
      var ranges = String(config.scrollSequence || '').split(',')
        .map(function (part) { return part.trim().split('-').map(Number); })
        .filter(function (p) { return p.length === 2 && !isNaN(p[0]) && !isNaN(p[1]); })
        .map(function (p) { return { start: p[0], end: p[1] }; });
      var whole = ranges.length === 0;
      var index = 0;
      var state = 'top-pause';
      var stateSince = performance.now();
      var position = 0;
      var last = null;

      function current() {
        var limit = maxScroll();
        if (whole) return { start: 0, end: limit };
        var r = ranges[index];
        var end = Math.min(r.end, limit);
        return { start: Math.min(r.start, end), end: end };
      }
      function enter(next, now) { state = next; stateSince = now; }

      position = current().start;
      window.scrollTo(0, position);

      function step(now) {
        var range = current();
        var dt = last === null ? 0 : now - last;
        last = now;
        if (state === 'top-pause') {
          if (now - stateSince >= config.pauseMs) enter('scrolling', now);
        } else if (state === 'scrolling') {
          position += (config.scrollSpeed * dt) / 1000;
          if (position >= range.end) {
            position = range.end;
            enter('bottom-pause', now);
          }
          window.scrollTo(0, position);
        } else if (now - stateSince >= config.pauseMs) {
          if (!whole) index = (index + 1) % ranges.length;
          position = current().start;
          window.scrollTo(0, position);
          enter('top-pause', now);
        }
        window.requestAnimationFrame(step);
      }
      window.requestAnimationFrame(step);
    });
  }

  window.addEventListener('load', function () {
    setTimeout(function () {
      fetch('/api/report-height', {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify({ height: document.documentElement.scrollHeight })
      }).catch(function () {});
    }, config.heightDelayMs);
  });
"#;
