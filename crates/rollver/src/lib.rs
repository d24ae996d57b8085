//! Rolling API version migrations
//!
//! `rollver` lets a service keep a single current data model while
//! transparently serving many historical wire versions of its API. A
//! migration is registered per *data type* and version, not per endpoint;
//! at serialization time the engine discovers every type reachable from a
//! payload that has at least one applicable migration, builds a dependency
//! graph of those types, and walks the decoded payload applying the
//! transformations in the correct order and direction.
//!
//! # Overview
//!
//! - [`Versioner`]: application-owned engine; register migrations, then
//!   share it across request handlers
//! - [`Migrator`]: request-scoped handle bound to one caller version,
//!   exposing [`Migrator::marshal`] and [`Migrator::unmarshal`]
//! - [`TypeMigration`]: one bidirectional transformation for one type at
//!   one version
//! - [`Reflect`]: how application types describe their identity and shape
//!   to the graph builders; implemented with [`reflect_struct!`] and
//!   [`reflect_newtype!`]
//!
//! # Example
//!
//! ```
//! use rollver::{FnMigration, MigrationContext, Versioner, VersionerConfig, VersionFormat};
//! use serde::{Deserialize, Serialize};
//! use serde_json::{json, Value};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct User {
//!     email: String,
//!     username: String,
//! }
//!
//! rollver::reflect_struct!(User, "User", {
//!     email: String,
//!     username: String,
//! });
//!
//! # fn main() -> Result<(), rollver::RollverError> {
//! let versioner = Versioner::new(VersionerConfig {
//!     current_version: "2024-01-01".into(),
//!     format: VersionFormat::Date,
//! })?;
//!
//! // v2024-01-01 renamed `handle` to `username`.
//! versioner.register::<User>(
//!     "2024-01-01",
//!     FnMigration::new(
//!         |_ctx: &MigrationContext, mut value: Value| {
//!             if let Some(map) = value.as_object_mut() {
//!                 if let Some(handle) = map.remove("handle") {
//!                     map.insert("username".into(), handle);
//!                 }
//!             }
//!             Ok(value)
//!         },
//!         |_ctx: &MigrationContext, mut value: Value| {
//!             if let Some(map) = value.as_object_mut() {
//!                 if let Some(username) = map.remove("username") {
//!                     map.insert("handle".into(), username);
//!                 }
//!             }
//!             Ok(value)
//!         },
//!     ),
//! )?;
//!
//! // A caller still speaking the older shape.
//! let migrator = versioner.migrator(Some("2023-06-01"))?;
//! let user: User = migrator.unmarshal(br#"{"email":"e","handle":"ada"}"#)?;
//! assert_eq!(user.username, "ada");
//!
//! let bytes = migrator.marshal(&user)?;
//! let tree: Value = serde_json::from_slice(&bytes)?;
//! assert_eq!(tree, json!({"email": "e", "handle": "ada"}));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod migration;
pub mod reflect;
pub mod version;
pub mod versioner;

mod builder;
mod cache;
mod graph;
mod registry;

// Re-exports
pub use error::{MigrationError, RollverError, RollverResult};
pub use migration::{CancelHandle, FnMigration, MigrationContext, TypeMigration};
pub use reflect::{Dynamic, Field, Reflect, ReflectAny, Shape, TypeInfo, TypeKey, ValueShape};
pub use version::{Version, VersionFormat};
pub use versioner::{Migrator, Versioner, VersionerConfig, VersionSource};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for serving rolling API versions
    pub use crate::{
        Dynamic, FnMigration, MigrationContext, MigrationError, Migrator, Reflect, RollverError,
        RollverResult, TypeMigration, Version, VersionFormat, VersionSource, Versioner,
        VersionerConfig,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
