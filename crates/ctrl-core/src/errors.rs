/// Rejections raised while validating a configuration change.
///
/// Every variant leaves the previously committed configuration untouched.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid target URL: {0}")]
    InvalidUrl(String),

    /// The target points back at the proxy itself.
    #[error("target {0} resolves to the proxy's own host")]
    Loop(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}
