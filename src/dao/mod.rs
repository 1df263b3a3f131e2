//! Tag Persistence Module
//!
//! Storage interfaces for tag definitions and tag membership, with their
//! SQLite implementations and the audit log reader.

pub mod audit;
pub mod db;
pub mod definition;
pub mod schema;
pub mod tag;

pub use audit::{AuditLog, AuditLogEntry, ChangeType, DefinitionHistoryRecord, TagHistoryRecord};
pub use db::Database;
pub use definition::SqliteTagDefinitionDao;
pub use tag::SqliteTagDao;

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::context::CallContext;
use crate::error::TagResult;
use crate::tag::{Tag, TagDefinition, Target, TenantId};

/// Registry of tag definitions, scoped per tenant
#[async_trait]
pub trait TagDefinitionDao: Send + Sync {
    /// Register a user definition. Reserved and empty names are refused.
    async fn create(
        &self,
        tenant: TenantId,
        name: &str,
        description: &str,
        ctx: &CallContext,
    ) -> TagResult<TagDefinition>;

    /// Control names resolve without touching storage.
    async fn get_by_name(&self, tenant: TenantId, name: &str) -> TagResult<Option<TagDefinition>>;

    async fn get_by_id(&self, tenant: TenantId, id: Uuid) -> TagResult<Option<TagDefinition>>;

    /// Control definitions first, then user definitions by name.
    async fn list(&self, tenant: TenantId) -> TagResult<Vec<TagDefinition>>;

    /// Refused for control names and for definitions still referenced by a tag.
    async fn delete(&self, tenant: TenantId, name: &str, ctx: &CallContext) -> TagResult<()>;
}

/// Outcome of a write: what actually changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagChanges {
    pub inserted: Vec<Tag>,
    pub deleted: Vec<Tag>,
}

impl TagChanges {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.deleted.is_empty()
    }
}

/// Durable tag membership per target
#[async_trait]
pub trait TagDao: Send + Sync {
    /// Fails with `AlreadyTagged` when the target already carries the definition.
    async fn insert_tag(&self, target: &Target, definition: &TagDefinition, ctx: &CallContext) -> TagResult<Tag>;

    /// Returns the removed tag, or `None` when there was nothing to remove.
    async fn delete_tag(
        &self,
        target: &Target,
        definition: &TagDefinition,
        ctx: &CallContext,
    ) -> TagResult<Option<Tag>>;

    /// Live tags of `target`, keyed by definition name.
    async fn load_entities(&self, target: &Target) -> TagResult<HashMap<String, Tag>>;

    /// Make the live set of `target` match `desired` in one transaction.
    async fn save_entities(&self, target: &Target, desired: &[Tag], ctx: &CallContext) -> TagResult<TagChanges>;
}
