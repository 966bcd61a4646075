//! # ctrl-proxy
//!
//! The rewriting reverse proxy behind every non-API request.
//!
//! A viewer request flows through [`Pipeline::handle`]: the masked path is
//! decoded into an upstream URL, the request is re-issued with a browser
//! identity and the shared cookie jar, and the response is sanitized,
//! decoded, rewritten so every reference points back at the proxy, and
//! (for HTML) injected with the viewer client.

pub mod blocklist;
pub mod decode;
pub mod director;
pub mod error;
pub mod inject;
pub mod masking;
pub mod pipeline;
pub mod rewrite;
pub mod transformer;

pub use error::ProxyError;
pub use pipeline::{Pipeline, PipelineOptions};
