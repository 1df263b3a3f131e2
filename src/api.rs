//! Tag User API
//!
//! Name-based entry point used by billing code: resolves definitions,
//! attaches and detaches tags, and hands out `TagStore` snapshots that are
//! committed back through reconciliation.

use std::sync::Arc;

use tracing::debug;

use crate::bus::TagEventBus;
use crate::config::TagStoreConfig;
use crate::context::CallContext;
use crate::dao::{
    AuditLog, Database, SqliteTagDao, SqliteTagDefinitionDao, TagChanges, TagDao, TagDefinitionDao,
};
use crate::error::{TagError, TagResult};
use crate::tag::{Tag, TagDefinition, TagStore, Target, TenantId};

#[derive(Clone)]
pub struct TagUserApi {
    definitions: Arc<dyn TagDefinitionDao>,
    tags: Arc<dyn TagDao>,
    events: TagEventBus,
}

impl TagUserApi {
    /// `events` must be the bus the DAOs publish to.
    pub fn new(definitions: Arc<dyn TagDefinitionDao>, tags: Arc<dyn TagDao>, events: TagEventBus) -> Self {
        Self {
            definitions,
            tags,
            events,
        }
    }

    /// SQLite-backed API plus an audit reader over the same database.
    /// Changes are published on a bus sized by `event_capacity`.
    pub async fn open(config: &TagStoreConfig) -> TagResult<(Self, AuditLog)> {
        let db = Database::from_config(config).await?;
        let events = TagEventBus::new(config.event_capacity);
        let definitions = SqliteTagDefinitionDao::new(db.clone()).with_bus(events.clone());
        let tags = SqliteTagDao::new(db.clone()).with_bus(events.clone());
        Ok((
            Self::new(Arc::new(definitions), Arc::new(tags), events),
            AuditLog::new(db),
        ))
    }

    /// Committed tag and definition changes.
    pub fn events(&self) -> &TagEventBus {
        &self.events
    }

    pub async fn tag_definitions(&self, tenant: TenantId) -> TagResult<Vec<TagDefinition>> {
        self.definitions.list(tenant).await
    }

    pub async fn tag_definition(&self, tenant: TenantId, name: &str) -> TagResult<TagDefinition> {
        self.definitions
            .get_by_name(tenant, name)
            .await?
            .ok_or_else(|| TagError::NotFound(name.to_string()))
    }

    pub async fn create_tag_definition(
        &self,
        tenant: TenantId,
        name: &str,
        description: &str,
        ctx: &CallContext,
    ) -> TagResult<TagDefinition> {
        self.definitions.create(tenant, name, description, ctx).await
    }

    pub async fn delete_tag_definition(&self, tenant: TenantId, name: &str, ctx: &CallContext) -> TagResult<()> {
        self.definitions.delete(tenant, name, ctx).await
    }

    async fn resolve(&self, target: &Target, name: &str) -> TagResult<TagDefinition> {
        self.definitions
            .get_by_name(target.tenant, name)
            .await?
            .ok_or_else(|| TagError::DefinitionMissing(name.to_string()))
    }

    pub async fn add_tag(&self, target: &Target, name: &str, ctx: &CallContext) -> TagResult<Tag> {
        let definition = self.resolve(target, name).await?;
        self.tags.insert_tag(target, &definition, ctx).await
    }

    /// Attach every name not already present. Returns only the new tags.
    pub async fn add_tags(&self, target: &Target, names: &[&str], ctx: &CallContext) -> TagResult<Vec<Tag>> {
        let mut added = Vec::new();
        for name in names {
            match self.add_tag(target, name, ctx).await {
                Ok(tag) => added.push(tag),
                Err(TagError::AlreadyTagged { .. }) => debug!("{} already tagged with '{}'", target, name),
                Err(e) => return Err(e),
            }
        }
        Ok(added)
    }

    pub async fn remove_tag(&self, target: &Target, name: &str, ctx: &CallContext) -> TagResult<Option<Tag>> {
        let definition = self.resolve(target, name).await?;
        self.tags.delete_tag(target, &definition, ctx).await
    }

    pub async fn remove_tags(&self, target: &Target, names: &[&str], ctx: &CallContext) -> TagResult<Vec<Tag>> {
        let mut removed = Vec::new();
        for name in names {
            if let Some(tag) = self.remove_tag(target, name, ctx).await? {
                removed.push(tag);
            }
        }
        Ok(removed)
    }

    /// Live tags of `target`, ordered by definition name.
    pub async fn tags_for(&self, target: &Target) -> TagResult<Vec<Tag>> {
        let mut tags: Vec<Tag> = self.tags.load_entities(target).await?.into_values().collect();
        tags.sort_by(|a, b| a.definition_name.cmp(&b.definition_name));
        Ok(tags)
    }

    /// Snapshot of the live tags, ready to be edited and committed.
    pub async fn tag_store_for(&self, target: &Target) -> TagResult<TagStore> {
        let tags = self.tags.load_entities(target).await?;
        Ok(TagStore::from_tags(*target, tags.into_values()))
    }

    pub async fn commit(&self, store: &TagStore, ctx: &CallContext) -> TagResult<TagChanges> {
        self.tags.save_entities(store.target(), &store.members(), ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CallOrigin, UserType};
    use crate::tag::{ControlTagKind, ObjectType};
    use crate::bus::TagEvent;
    use chrono::Utc;
    use tempfile::tempdir;
    use tokio::sync::broadcast::error::RecvError;
    use uuid::Uuid;

    async fn api_in(dir: &std::path::Path) -> TagResult<TagUserApi> {
        let config = TagStoreConfig {
            database_path: dir.join("tags.db"),
            ..TagStoreConfig::default()
        };
        Ok(TagUserApi::open(&config).await?.0)
    }

    #[tokio::test]
    async fn test_add_and_remove_by_name() -> TagResult<()> {
        let dir = tempdir().unwrap();
        let api = api_in(dir.path()).await?;
        let ctx = CallContext::new("api", CallOrigin::Test, UserType::Test, Utc::now());
        let target = Target::of(Uuid::new_v4(), ObjectType::Account);

        api.create_tag_definition(TenantId::DEFAULT, "vip", "Very important", &ctx).await?;
        let added = api.add_tags(&target, &["vip", "AUTO_PAY_OFF", "vip"], &ctx).await?;
        assert_eq!(added.len(), 2);

        let names: Vec<String> = api.tags_for(&target).await?.into_iter().map(|t| t.definition_name).collect();
        assert_eq!(names, vec!["AUTO_PAY_OFF".to_string(), "vip".to_string()]);

        let removed = api.remove_tags(&target, &["vip", "vip"], &ctx).await?;
        assert_eq!(removed.len(), 1);

        assert!(matches!(
            api.add_tag(&target, "unknown", &ctx).await,
            Err(TagError::DefinitionMissing(_))
        ));
        assert!(matches!(
            api.tag_definition(TenantId::DEFAULT, "unknown").await,
            Err(TagError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_store_snapshot_and_commit() -> TagResult<()> {
        let dir = tempdir().unwrap();
        let api = api_in(dir.path()).await?;
        let ctx = CallContext::new("api", CallOrigin::Test, UserType::Test, Utc::now());
        let target = Target::of(Uuid::new_v4(), ObjectType::Account);

        let mut store = api.tag_store_for(&target).await?;
        assert!(store.generate_invoice());
        store.add_control(ControlTagKind::AutoInvoicingOff);
        let changes = api.commit(&store, &ctx).await?;
        assert_eq!(changes.inserted.len(), 1);

        let reloaded = api.tag_store_for(&target).await?;
        assert!(!reloaded.generate_invoice());
        assert!(reloaded.process_payment());

        // Committing an unchanged snapshot writes nothing
        assert!(api.commit(&reloaded, &ctx).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_event_bus_uses_configured_capacity() -> TagResult<()> {
        let dir = tempdir().unwrap();
        let config = TagStoreConfig {
            database_path: dir.path().join("tags.db"),
            event_capacity: 2,
            ..TagStoreConfig::default()
        };
        let (api, _audit) = TagUserApi::open(&config).await?;
        let mut rx = api.events().subscribe();
        let ctx = CallContext::new("api", CallOrigin::Test, UserType::Test, Utc::now());
        let target = Target::of(Uuid::new_v4(), ObjectType::Account);

        api.add_tags(&target, &["AUTO_PAY_OFF", "MANUAL_PAY", "TEST"], &ctx).await?;

        // Three events through a two-slot buffer: the oldest is dropped
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(1))));
        assert!(matches!(rx.recv().await, Ok(TagEvent::TagCreated { .. })));
        assert!(matches!(rx.recv().await, Ok(TagEvent::TagCreated { .. })));
        Ok(())
    }
}
