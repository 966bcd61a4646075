pub mod client;
pub mod error;
pub mod handlers;
pub mod notifier;
pub mod server;

pub use error::{ApiError, ServerError};
pub use notifier::ReloadNotifier;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
