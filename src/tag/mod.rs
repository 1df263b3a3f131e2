//! Tag Domain Module
//!
//! Control policy table, tag definitions, tags and the in-memory tag store.

pub mod control;
pub mod definition;
pub mod model;
pub mod store;

pub use control::{is_reserved_name, BillingPredicate, ControlTagKind};
pub use definition::{validate_name, TagDefinition};
pub use model::{ObjectType, Tag, TagKind, Target, TenantId};
pub use store::TagStore;
