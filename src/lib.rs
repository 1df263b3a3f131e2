//! Billing Tags
//!
//! Tag subsystem for a subscription-billing platform:
//! - Control policy table (reserved tags that switch off billing behavior)
//! - Per-tenant tag definition registry
//! - In-memory tag store answering billing predicates
//! - Durable tag membership with insert/delete history and audit log

pub mod api;
pub mod bus;
pub mod config;
pub mod context;
pub mod dao;
pub mod error;
pub mod tag;
pub mod utils;

// Re-exports for convenience
pub use api::TagUserApi;
pub use bus::{TagEvent, TagEventBus};
pub use config::TagStoreConfig;
pub use context::{CallContext, CallContextFactory, CallOrigin, Clock, MockClock, SystemClock, UserType};
pub use dao::{AuditLog, ChangeType, Database, SqliteTagDao, SqliteTagDefinitionDao, TagChanges, TagDao, TagDefinitionDao};
pub use error::{TagError, TagResult};
pub use tag::{BillingPredicate, ControlTagKind, ObjectType, Tag, TagDefinition, TagKind, TagStore, Target, TenantId};
