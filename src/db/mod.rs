// Re-export the Database struct and other public items
mod article;
mod claim;
mod cluster;
pub mod core;
mod schema;

pub use self::article::{Article, UpsertOutcome};
pub use self::claim::Stage;
pub use self::cluster::Cluster;
pub use self::core::Database;
pub use self::core::DbLockErrorExt;
pub use sqlx::Row;
