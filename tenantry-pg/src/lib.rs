//! Tenantry PostgreSQL Engine
//!
//! A [`ConnectionScope`](tenantry_storage::ConnectionScope) backed by a
//! deadpool-postgres pool. Commands are rendered with
//! [`tenantry_storage::render`], prepared once per connection and bound
//! with the parameter types the server infers. SQLSTATEs are mapped onto
//! the store's error taxonomy.

pub mod config;
pub mod error;
pub mod scope;

pub use config::DbConfig;
pub use error::{classify, classify_code, classify_pool};
pub use scope::{PgHandle, PgScope};
