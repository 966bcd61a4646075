pub mod config_store;
pub mod cookie_jar;
pub mod database;
pub mod error;
pub mod schema;

pub use config_store::ConfigStore;
pub use cookie_jar::CookieJar;
pub use database::Database;
pub use error::StoreError;
