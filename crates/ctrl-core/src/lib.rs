pub mod config;
pub mod cookies;
pub mod errors;

pub use config::{
    next_version, normalize_authority, url_authority, validate_target, Config, ConfigDefaults,
    ConfigUpdate, HistoryItem, ScrollRange, HISTORY_LIMIT, MAX_SCALE, MIN_SCALE,
};
pub use cookies::{cookie_header, domain_matches, parse_set_cookie, CookieDirective, CookieEntry};
pub use errors::ConfigError;
