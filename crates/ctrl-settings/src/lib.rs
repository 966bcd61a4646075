//! # ctrl-settings
//!
//! Boot settings for the display proxy.
//!
//! Settings are resolved from three layers (in priority order):
//! 1. **Compiled defaults** — [`ProxySettings::default()`]
//! 2. **Environment variables** — `TARGET_URL`, `CTRL_PORT`, `DATA_DIR`, ...
//! 3. **Command-line flags** — applied by the binary on top of the result
//!
//! The `defaults` section is consumed once, at first boot, when no
//! persisted configuration exists yet, and again by an explicit reset.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, apply_overrides_from, load_settings};
pub use types::ProxySettings;
