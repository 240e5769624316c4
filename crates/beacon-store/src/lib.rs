pub mod database;
pub mod error;
pub mod links;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use links::{LinkRepo, PlatformStatus};
