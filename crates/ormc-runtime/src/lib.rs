//! Object runtime for ormc plans.
//!
//! A [`Session`] executes the statements of a [`Plan`](ormc_plan::Plan)
//! against a [`Driver`], moving values between dynamic [`Object`]s and the
//! fixed [`Image`]s each prepared statement is bound to. [`SqliteDriver`]
//! is the bundled driver.

pub mod error;
pub mod value;
pub mod options;
pub mod image;
pub mod driver;
pub mod binding;
pub mod sqlite;
pub mod object;
pub mod registry;
pub mod session;
mod container;

// Re-export commonly used types
pub use error::RuntimeError;
pub use value::Value;
pub use options::{CacheMode, RuntimeOptions};
pub use image::Image;
pub use driver::{Driver, ExecResult, FetchStatus, StatementId};
pub use binding::{Binding, CachedStatement, StatementCache, StatementKey};
pub use sqlite::SqliteDriver;
pub use object::{ContainerValue, Element, Field, Object, ObjectRef, Pointer};
pub use registry::{ClassOps, Registry, RegistryBuilder};
pub use session::Session;
