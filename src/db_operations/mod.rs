// Core database operations
pub mod core;

pub use self::core::SyncDb;
