//! Settings loading with environment variable overrides.
//!
//! Each variable has strict parsing rules:
//! - Integers and floats must parse and fall within the stated range
//! - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
//! - Invalid values are ignored with a warning (the default stays)

use std::path::PathBuf;

use tracing::warn;

use crate::types::ProxySettings;

/// Compiled defaults with the process environment applied.
pub fn load_settings() -> ProxySettings {
    let mut settings = ProxySettings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut ProxySettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides using `lookup` to resolve variable names.
pub fn apply_overrides_from(settings: &mut ProxySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Listener ────────────────────────────────────────────────────
    if let Some(v) = env.string("CTRL_HOST") {
        settings.host = v;
    }
    if let Some(v) = env.u16("CTRL_PORT", 1, 65535).or_else(|| env.u16("PORT", 1, 65535)) {
        settings.port = v;
    }
    if let Some(v) = env.string("DATA_DIR") {
        settings.data_dir = PathBuf::from(v);
    }
    if let Some(v) = env.string("CTRL_PUBLIC_HOST") {
        settings.public_authority = Some(v);
    }
    if let Some(v) = env.bool("CTRL_LOG_JSON") {
        settings.log_json = v;
    }

    // ── Upstream ────────────────────────────────────────────────────
    if let Some(v) = env.u64("CTRL_CONNECT_TIMEOUT_MS", 100, 300_000) {
        settings.connect_timeout_ms = v;
    }
    if let Some(v) = env.u64("CTRL_UPSTREAM_TIMEOUT_MS", 1_000, 3_600_000) {
        settings.upstream_timeout_ms = v;
    }
    if let Some(v) = env.usize("CTRL_MAX_REQUEST_BODY", 1024, 1_073_741_824) {
        settings.max_request_body_bytes = v;
    }
    if let Some(v) = env.usize("CTRL_MAX_REWRITE_BODY", 1024, 1_073_741_824) {
        settings.max_rewrite_body_bytes = v;
    }

    // ── Display defaults ────────────────────────────────────────────
    if let Some(v) = env.string("TARGET_URL") {
        settings.defaults.target_url = v;
    }
    if let Some(v) = env.f64("SCALE_FACTOR", 0.0, 100.0) {
        settings.defaults.scale_factor = v;
    }
    if let Some(v) = env.bool("AUTO_SCROLL") {
        settings.defaults.auto_scroll = v;
    }
    if let Some(v) = env.u32("SCROLL_SPEED", 1, 10_000) {
        settings.defaults.scroll_speed = v;
    }
    if let Some(v) = env.string("SCROLL_SEQUENCE") {
        settings.defaults.scroll_sequence = v;
    }
    if let Some(v) = env.bool("INTERFACE_LOCKED") {
        settings.defaults.interface_locked = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a number within an inclusive range.
pub fn parse_in_range<T: std::str::FromStr + PartialOrd>(val: &str, min: T, max: T) -> Option<T> {
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a float strictly above `min` and at most `max`.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.trim().parse().ok()?;
    (n.is_finite() && n > min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name)
    }

    fn checked<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = self.raw(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid {kind} env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.checked(name, "boolean", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.checked(name, "u16", |v| parse_in_range(v, min, max))
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        self.checked(name, "u32", |v| parse_in_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.checked(name, "u64", |v| parse_in_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.checked(name, "usize", |v| parse_in_range(v, min, max))
    }

    fn f64(&self, name: &str, min: f64, max: f64) -> Option<f64> {
        self.checked(name, "float", |v| parse_f64_range(v, min, max))
    }
}
