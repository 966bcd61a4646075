use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::ConfigError;

pub const MIN_SCALE: f64 = 0.25;
pub const MAX_SCALE: f64 = 5.0;
pub const MAX_SCROLL_SPEED: u32 = 10_000;
/// Maximum number of remembered target URLs.
pub const HISTORY_LIMIT: usize = 20;

const DEFAULT_TARGET_URL: &str = "https://github.com/leraptor65/centralizedtransmissionandremoteloading";

/// One previously displayed target URL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub url: String,
    /// Unix milliseconds at which the URL became the target.
    pub timestamp: i64,
}

/// Initial values used at first boot and by a reset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDefaults {
    pub target_url: String,
    pub scale_factor: f64,
    pub auto_scroll: bool,
    pub scroll_speed: u32,
    pub scroll_sequence: String,
    pub interface_locked: bool,
}

impl Default for ConfigDefaults {
    fn default() -> Self {
        Self {
            target_url: DEFAULT_TARGET_URL.to_string(),
            scale_factor: 1.0,
            auto_scroll: false,
            scroll_speed: 50,
            scroll_sequence: String::new(),
            interface_locked: false,
        }
    }
}

/// The display configuration shared by every viewer.
///
/// `last_modified` is the version stamp viewers compare against to decide
/// whether to reload. It strictly increases with every committed change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub target_url: String,
    pub scale_factor: f64,
    pub auto_scroll: bool,
    /// Pixels per second.
    pub scroll_speed: u32,
    #[serde(default)]
    pub scroll_sequence: String,
    #[serde(default)]
    pub interface_locked: bool,
    #[serde(default)]
    pub history: Vec<HistoryItem>,
    pub last_modified: i64,
}

impl Config {
    /// Build a configuration from boot defaults.
    ///
    /// Defaults come from the environment, so out-of-range values are
    /// clamped instead of rejected and startup never fails on them.
    pub fn from_defaults(defaults: &ConfigDefaults, version: i64) -> Self {
        let target_url = parse_target(&defaults.target_url)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| defaults.target_url.clone());
        let scale_factor = clamp_scale(defaults.scale_factor).unwrap_or(1.0);
        let scroll_sequence =
            normalize_sequence(&defaults.scroll_sequence).unwrap_or_default();

        Self {
            target_url,
            scale_factor,
            auto_scroll: defaults.auto_scroll,
            scroll_speed: defaults.scroll_speed.clamp(1, MAX_SCROLL_SPEED),
            scroll_sequence,
            interface_locked: defaults.interface_locked,
            history: Vec::new(),
            last_modified: version,
        }
    }

    /// Parse the configured target. Fails for values persisted before
    /// validation existed or injected through defaults.
    pub fn target(&self) -> Result<Url, ConfigError> {
        parse_target(&self.target_url)
    }

    pub fn scroll_ranges(&self) -> Vec<ScrollRange> {
        ScrollRange::parse_sequence(&self.scroll_sequence).unwrap_or_default()
    }

    /// Merge a partial update field-by-field and produce the next committed
    /// state. Fields absent from `update` keep their current value.
    pub fn apply(
        &self,
        update: &ConfigUpdate,
        proxy_authority: Option<&str>,
        now_ms: i64,
    ) -> Result<Config, ConfigError> {
        let mut next = self.clone();

        if let Some(raw) = &update.target_url {
            next.target_url = validate_target(raw, proxy_authority)?.to_string();
        }
        if let Some(scale) = update.scale_factor {
            next.scale_factor = clamp_scale(scale)?;
        }
        if let Some(speed) = update.scroll_speed {
            next.scroll_speed = validate_speed(speed)?;
        }
        if let Some(sequence) = &update.scroll_sequence {
            next.scroll_sequence = normalize_sequence(sequence)?;
        }
        if let Some(auto_scroll) = update.auto_scroll {
            next.auto_scroll = auto_scroll;
        }
        if let Some(locked) = update.interface_locked {
            next.interface_locked = locked;
        }

        if next.target_url != self.target_url {
            record_history(&mut next.history, &next.target_url, now_ms);
        }
        next.last_modified = next_version(self.last_modified, now_ms);
        Ok(next)
    }

    /// Replace every settable field with `defaults`, keeping the history.
    pub fn reset_to(&self, defaults: &ConfigDefaults, now_ms: i64) -> Config {
        let mut next = Config::from_defaults(defaults, next_version(self.last_modified, now_ms));
        next.history = self.history.clone();
        if next.target_url != self.target_url {
            record_history(&mut next.history, &next.target_url, now_ms);
        }
        next
    }

    /// Same settings, newer version stamp.
    pub fn bumped(&self, now_ms: i64) -> Config {
        Config {
            last_modified: next_version(self.last_modified, now_ms),
            ..self.clone()
        }
    }
}

/// Partial configuration change as posted by a control surface.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    pub target_url: Option<String>,
    pub scale_factor: Option<f64>,
    pub auto_scroll: Option<bool>,
    pub scroll_speed: Option<u32>,
    pub scroll_sequence: Option<String>,
    pub interface_locked: Option<bool>,
}

/// A `start-end` pixel range the auto-scroller walks through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollRange {
    pub start: u32,
    pub end: u32,
}

impl ScrollRange {
    /// Parse `"0-800, 1200-2400"`. An empty string means the whole page
    /// and yields no ranges.
    pub fn parse_sequence(raw: &str) -> Result<Vec<ScrollRange>, ConfigError> {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let invalid = || {
                    ConfigError::InvalidValue(format!(
                        "scroll range '{part}' must look like start-end"
                    ))
                };
                let (start, end) = part.split_once('-').ok_or_else(invalid)?;
                let start: u32 = start.trim().parse().map_err(|_| invalid())?;
                let end: u32 = end.trim().parse().map_err(|_| invalid())?;
                if start > end {
                    return Err(ConfigError::InvalidValue(format!(
                        "scroll range '{part}' ends before it starts"
                    )));
                }
                Ok(ScrollRange { start, end })
            })
            .collect()
    }
}

impl fmt::Display for ScrollRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Next version stamp: wall-clock milliseconds, but never less than one
/// above the previous stamp so a clock step backwards cannot stall it.
pub fn next_version(previous: i64, now_ms: i64) -> i64 {
    now_ms.max(previous.saturating_add(1))
}

/// `host[:port]` of a URL, omitting the scheme's default port.
pub fn url_authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Lowercase an authority and drop an explicit default port so that
/// `Example.com:443` and `example.com` compare equal.
pub fn normalize_authority(authority: &str) -> String {
    let lower = authority.trim().to_ascii_lowercase();
    lower
        .strip_suffix(":80")
        .or_else(|| lower.strip_suffix(":443"))
        .map(str::to_string)
        .unwrap_or(lower)
}

fn parse_target(raw: &str) -> Result<Url, ConfigError> {
    let raw = raw.trim();
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(format!("{raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!(
            "{raw}: scheme must be http or https"
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidUrl(format!("{raw}: missing host")));
    }
    Ok(url)
}

/// Parse a target and refuse one that would make the proxy fetch itself.
pub fn validate_target(raw: &str, proxy_authority: Option<&str>) -> Result<Url, ConfigError> {
    let url = parse_target(raw)?;
    if let Some(proxy) = proxy_authority {
        let authority = url_authority(&url);
        if normalize_authority(&authority) == normalize_authority(proxy) {
            return Err(ConfigError::Loop(authority));
        }
    }
    Ok(url)
}

fn clamp_scale(scale: f64) -> Result<f64, ConfigError> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(ConfigError::InvalidValue(format!(
            "scaleFactor must be a positive number, got {scale}"
        )));
    }
    Ok(scale.clamp(MIN_SCALE, MAX_SCALE))
}

fn validate_speed(speed: u32) -> Result<u32, ConfigError> {
    if speed == 0 {
        return Err(ConfigError::InvalidValue(
            "scrollSpeed must be positive".into(),
        ));
    }
    Ok(speed.min(MAX_SCROLL_SPEED))
}

fn normalize_sequence(raw: &str) -> Result<String, ConfigError> {
    let ranges = ScrollRange::parse_sequence(raw)?;
    Ok(ranges
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(","))
}

/// Move `url` to the front of the history, dropping any older entry for it.
fn record_history(history: &mut Vec<HistoryItem>, url: &str, now_ms: i64) {
    history.retain(|item| item.url != url);
    history.insert(
        0,
        HistoryItem {
            url: url.to_string(),
            timestamp: now_ms,
        },
    );
    history.truncate(HISTORY_LIMIT);
}
