//! Tag Persistence (SQLite)
//!
//! Live tag membership per target plus append-only history. Each write
//! runs in one transaction that also writes the history and audit rows,
//! so a failed or abandoned write leaves neither live rows nor history
//! behind.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::audit::{decode_target, record_tag_change, ChangeType};
use super::db::Database;
use super::definition::definition_exists;
use super::schema::TAGS;
use super::{TagChanges, TagDao};
use crate::bus::{TagEvent, TagEventBus};
use crate::context::CallContext;
use crate::error::{is_unique_violation, TagError, TagResult};
use crate::tag::{Tag, TagDefinition, Target};
use crate::utils::time;

#[derive(Debug, Clone)]
pub struct SqliteTagDao {
    db: Database,
    bus: Option<TagEventBus>,
}

impl SqliteTagDao {
    pub fn new(db: Database) -> Self {
        Self { db, bus: None }
    }

    pub fn with_bus(mut self, bus: TagEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    fn publish_changes(&self, changes: &TagChanges, ctx: &CallContext) {
        let Some(bus) = &self.bus else { return };
        bus.publish_all(
            changes
                .inserted
                .iter()
                .map(|tag| TagEvent::created(tag, ctx.user_token, ctx.created_date))
                .chain(
                    changes
                        .deleted
                        .iter()
                        .map(|tag| TagEvent::deleted(tag, ctx.user_token, ctx.updated_date)),
                ),
        );
    }
}

fn already_tagged(target: &Target, name: &str) -> TagError {
    TagError::AlreadyTagged {
        object_id: target.object_id.to_string(),
        object_type: target.object_type.to_string(),
        name: name.to_string(),
    }
}

fn load_tx(conn: &Connection, target: &Target) -> TagResult<HashMap<String, Tag>> {
    let mut stmt = conn.prepare(
        "SELECT id, tag_definition_name, object_id, object_type FROM tags
         WHERE tenant_id = ?1 AND object_id = ?2 AND object_type = ?3",
    )?;
    let rows = stmt
        .query_map(
            params![
                target.tenant.to_string(),
                target.object_id.to_string(),
                target.object_type.as_str()
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut tags = HashMap::with_capacity(rows.len());
    for (id, name, object_id, object_type) in rows {
        let id = Uuid::parse_str(&id)
            .map_err(|e| TagError::corrupt(TAGS, format!("bad uuid '{}': {}", id, e)))?;
        let row_target = decode_target(TAGS, target.tenant, &object_id, &object_type)?;
        let tag = Tag::with_id(id, name, row_target);
        tags.insert(tag.definition_name.clone(), tag);
    }
    Ok(tags)
}

fn find_tx(conn: &Connection, target: &Target, name: &str) -> TagResult<Option<Tag>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM tags
             WHERE tenant_id = ?1 AND object_id = ?2 AND object_type = ?3 AND tag_definition_name = ?4",
            params![
                target.tenant.to_string(),
                target.object_id.to_string(),
                target.object_type.as_str(),
                name
            ],
            |row| row.get(0),
        )
        .optional()?;
    id.map(|id| {
        Uuid::parse_str(&id)
            .map(|id| Tag::with_id(id, name, *target))
            .map_err(|e| TagError::corrupt(TAGS, format!("bad uuid '{}': {}", id, e)))
    })
    .transpose()
}

/// Insert the live row and its history; the definition must already be validated.
fn insert_tx(tx: &Transaction<'_>, tag: &Tag, ctx: &CallContext) -> TagResult<()> {
    tx.execute(
        "INSERT INTO tags (id, tenant_id, tag_definition_name, object_id, object_type, created_by, created_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            tag.id.to_string(),
            tag.target.tenant.to_string(),
            &tag.definition_name,
            tag.target.object_id.to_string(),
            tag.target.object_type.as_str(),
            &ctx.user_name,
            time::encode(&ctx.created_date),
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            already_tagged(&tag.target, &tag.definition_name)
        } else {
            TagError::Storage(e)
        }
    })?;
    let record_id = record_tag_change(tx, tag, ChangeType::Insert, ctx)?;
    debug!("Inserted tag '{}' on {} (history {})", tag.definition_name, tag.target, record_id);
    Ok(())
}

fn delete_tx(tx: &Transaction<'_>, tag: &Tag, ctx: &CallContext) -> TagResult<()> {
    tx.execute(
        "DELETE FROM tags
         WHERE tenant_id = ?1 AND object_id = ?2 AND object_type = ?3 AND tag_definition_name = ?4",
        params![
            tag.target.tenant.to_string(),
            tag.target.object_id.to_string(),
            tag.target.object_type.as_str(),
            &tag.definition_name
        ],
    )?;
    let record_id = record_tag_change(tx, tag, ChangeType::Delete, ctx)?;
    debug!("Deleted tag '{}' on {} (history {})", tag.definition_name, tag.target, record_id);
    Ok(())
}

/// True once `id` has been attached anywhere, live or in history.
fn id_used_tx(conn: &Connection, id: Uuid) -> TagResult<bool> {
    let used = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM tag_history WHERE id = ?1)
             OR EXISTS(SELECT 1 FROM tags WHERE id = ?1)",
        params![id.to_string()],
        |row| row.get::<_, bool>(0),
    )?;
    Ok(used)
}

/// Bind a desired tag to `target`. A tag carried over from another target
/// is a different attachment and gets a fresh id.
fn bind_to(tag: &Tag, target: &Target) -> Tag {
    if tag.target == *target {
        tag.clone()
    } else {
        Tag::with_id(Uuid::new_v4(), tag.definition_name.clone(), *target)
    }
}

#[async_trait]
impl TagDao for SqliteTagDao {
    #[instrument(skip(self, definition, ctx), fields(target = %target, name = %definition.name))]
    async fn insert_tag(&self, target: &Target, definition: &TagDefinition, ctx: &CallContext) -> TagResult<Tag> {
        let target = *target;
        let tag = Tag::named(definition.name.clone(), target);
        let tag_for_tx = tag.clone();
        let ctx_owned = ctx.clone();

        self.db
            .write(move |tx| {
                if !definition_exists(tx, target.tenant, &tag_for_tx.definition_name)? {
                    return Err(TagError::DefinitionMissing(tag_for_tx.definition_name.clone()));
                }
                if find_tx(tx, &target, &tag_for_tx.definition_name)?.is_some() {
                    return Err(already_tagged(&target, &tag_for_tx.definition_name));
                }
                insert_tx(tx, &tag_for_tx, &ctx_owned)
            })
            .await?;

        info!("Tagged {} with '{}'", target, tag.definition_name);
        self.publish_changes(
            &TagChanges {
                inserted: vec![tag.clone()],
                deleted: Vec::new(),
            },
            ctx,
        );
        Ok(tag)
    }

    #[instrument(skip(self, definition, ctx), fields(target = %target, name = %definition.name))]
    async fn delete_tag(
        &self,
        target: &Target,
        definition: &TagDefinition,
        ctx: &CallContext,
    ) -> TagResult<Option<Tag>> {
        let target = *target;
        let name = definition.name.clone();
        let ctx_owned = ctx.clone();

        let removed = self
            .db
            .write(move |tx| {
                let Some(existing) = find_tx(tx, &target, &name)? else {
                    return Ok(None);
                };
                delete_tx(tx, &existing, &ctx_owned)?;
                Ok(Some(existing))
            })
            .await?;

        if let Some(tag) = &removed {
            info!("Removed '{}' from {}", tag.definition_name, target);
            self.publish_changes(
                &TagChanges {
                    inserted: Vec::new(),
                    deleted: vec![tag.clone()],
                },
                ctx,
            );
        }
        Ok(removed)
    }

    async fn load_entities(&self, target: &Target) -> TagResult<HashMap<String, Tag>> {
        let target = *target;
        self.db.read(move |conn| load_tx(conn, &target)).await
    }

    #[instrument(skip(self, desired, ctx), fields(target = %target, desired = desired.len()))]
    async fn save_entities(&self, target: &Target, desired: &[Tag], ctx: &CallContext) -> TagResult<TagChanges> {
        let target = *target;
        // First tag wins for a repeated name; BTreeMap keeps the write order stable
        let mut wanted: BTreeMap<String, Tag> = BTreeMap::new();
        for tag in desired {
            wanted
                .entry(tag.definition_name.clone())
                .or_insert_with(|| bind_to(tag, &target));
        }
        let ctx_owned = ctx.clone();

        let changes = self
            .db
            .write(move |tx| {
                let current = load_tx(tx, &target)?;
                let mut changes = TagChanges::default();

                let mut stale: Vec<Tag> = current
                    .values()
                    .filter(|tag| !wanted.contains_key(&tag.definition_name))
                    .cloned()
                    .collect();
                stale.sort_by(|a, b| a.definition_name.cmp(&b.definition_name));

                for (name, mut tag) in wanted {
                    if current.contains_key(&name) {
                        continue;
                    }
                    if !definition_exists(tx, target.tenant, &name)? {
                        return Err(TagError::DefinitionMissing(name));
                    }
                    // A re-attachment is a new attachment; never reuse an id
                    if id_used_tx(tx, tag.id)? {
                        tag.id = Uuid::new_v4();
                    }
                    insert_tx(tx, &tag, &ctx_owned)?;
                    changes.inserted.push(tag);
                }

                for tag in stale {
                    delete_tx(tx, &tag, &ctx_owned)?;
                    changes.deleted.push(tag);
                }

                Ok(changes)
            })
            .await?;

        if !changes.is_empty() {
            info!(
                "Reconciled {}: {} inserted, {} deleted",
                target,
                changes.inserted.len(),
                changes.deleted.len()
            );
            self.publish_changes(&changes, ctx);
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CallOrigin, UserType};
    use crate::dao::audit::AuditLog;
    use crate::dao::definition::SqliteTagDefinitionDao;
    use crate::dao::TagDefinitionDao;
    use crate::tag::{ControlTagKind, ObjectType, TenantId};
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    struct Fixture {
        _file: NamedTempFile,
        tags: SqliteTagDao,
        definitions: SqliteTagDefinitionDao,
        audit: AuditLog,
        ctx: CallContext,
    }

    async fn fixture() -> TagResult<Fixture> {
        let file = NamedTempFile::new().unwrap();
        let db = Database::open(file.path(), Duration::from_secs(1)).await?;
        Ok(Fixture {
            _file: file,
            tags: SqliteTagDao::new(db.clone()),
            definitions: SqliteTagDefinitionDao::new(db.clone()),
            audit: AuditLog::new(db),
            ctx: CallContext::new("Tag store test", CallOrigin::Test, UserType::Test, Utc::now()),
        })
    }

    #[tokio::test]
    async fn test_insert_and_delete_tag() -> TagResult<()> {
        let f = fixture().await?;
        let def = f.definitions.create(TenantId::DEFAULT, "test tag", "test", &f.ctx).await?;
        let target = Target::of(Uuid::new_v4(), ObjectType::Invoice);

        let tag = f.tags.insert_tag(&target, &def, &f.ctx).await?;
        let loaded = f.tags.load_entities(&target).await?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["test tag"].id, tag.id);

        let removed = f.tags.delete_tag(&target, &def, &f.ctx).await?;
        assert_eq!(removed.map(|t| t.id), Some(tag.id));
        assert!(f.tags.load_entities(&target).await?.is_empty());

        let history = f.audit.tag_history_for_target(&target).await?;
        let kinds: Vec<ChangeType> = history.iter().map(|h| h.change_type).collect();
        assert_eq!(kinds, vec![ChangeType::Insert, ChangeType::Delete]);
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_requires_definition() -> TagResult<()> {
        let f = fixture().await?;
        let target = Target::of(Uuid::new_v4(), ObjectType::Invoice);
        let unregistered = TagDefinition::new("test tag", "test");

        let result = f.tags.insert_tag(&target, &unregistered, &f.ctx).await;
        assert!(matches!(result, Err(TagError::DefinitionMissing(_))));
        assert!(f.audit.tag_history_for_target(&target).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_twice_is_already_tagged() -> TagResult<()> {
        let f = fixture().await?;
        let target = Target::of(Uuid::new_v4(), ObjectType::Account);
        let control = TagDefinition::control(ControlTagKind::AutoPayOff);

        f.tags.insert_tag(&target, &control, &f.ctx).await?;
        let again = f.tags.insert_tag(&target, &control, &f.ctx).await;
        assert!(matches!(again, Err(TagError::AlreadyTagged { .. })));
        assert_eq!(f.audit.tag_history_for_target(&target).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_absent_tag_writes_nothing() -> TagResult<()> {
        let f = fixture().await?;
        let target = Target::of(Uuid::new_v4(), ObjectType::Account);
        let control = TagDefinition::control(ControlTagKind::AutoInvoicingOff);

        assert!(f.tags.delete_tag(&target, &control, &f.ctx).await?.is_none());
        assert!(f.audit.tag_history_for_target(&target).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_save_entities_rolls_back_on_missing_definition() -> TagResult<()> {
        let f = fixture().await?;
        let target = Target::of(Uuid::new_v4(), ObjectType::Account);
        let desired = vec![
            Tag::control(ControlTagKind::AutoPayOff, target),
            Tag::named("never-registered", target),
        ];

        let result = f.tags.save_entities(&target, &desired, &f.ctx).await;
        assert!(matches!(result, Err(TagError::DefinitionMissing(_))));
        assert!(f.tags.load_entities(&target).await?.is_empty());
        assert!(f.audit.tag_history_for_target(&target).await?.is_empty());
        assert_eq!(f.audit.unaudited_history_count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_save_entities_keeps_desired_ids() -> TagResult<()> {
        let f = fixture().await?;
        let def = f.definitions.create(TenantId::DEFAULT, "testTag", "Second tag", &f.ctx).await?;
        let target = Target::of(Uuid::new_v4(), ObjectType::Account);
        let tag = Tag::descriptive(&def, target);

        let changes = f.tags.save_entities(&target, std::slice::from_ref(&tag), &f.ctx).await?;
        assert_eq!(changes.inserted.len(), 1);
        let loaded = f.tags.load_entities(&target).await?;
        assert_eq!(loaded["testTag"].id, tag.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_reattached_tag_gets_fresh_id() -> TagResult<()> {
        let f = fixture().await?;
        let target = Target::of(Uuid::new_v4(), ObjectType::Account);
        let tag = Tag::control(ControlTagKind::AutoPayOff, target);

        f.tags.save_entities(&target, std::slice::from_ref(&tag), &f.ctx).await?;
        f.tags.save_entities(&target, &[], &f.ctx).await?;
        let changes = f.tags.save_entities(&target, std::slice::from_ref(&tag), &f.ctx).await?;

        let live = f.tags.load_entities(&target).await?;
        let reattached = &live["AUTO_PAY_OFF"];
        assert_ne!(reattached.id, tag.id);
        assert_eq!(changes.inserted[0].id, reattached.id);

        // Each attachment keeps its own single INSERT and DELETE
        assert_eq!(f.audit.audit_for_tag(tag.id, ChangeType::Insert).await?.len(), 1);
        assert_eq!(f.audit.audit_for_tag(tag.id, ChangeType::Delete).await?.len(), 1);
        assert_eq!(f.audit.audit_for_tag(reattached.id, ChangeType::Insert).await?.len(), 1);
        assert!(f.audit.audit_for_tag(reattached.id, ChangeType::Delete).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_foreign_target_tag_gets_fresh_id() -> TagResult<()> {
        let f = fixture().await?;
        let first = Target::of(Uuid::new_v4(), ObjectType::Account);
        let second = Target::of(Uuid::new_v4(), ObjectType::Account);
        let tag = Tag::control(ControlTagKind::Test, first);

        f.tags.save_entities(&first, std::slice::from_ref(&tag), &f.ctx).await?;
        f.tags.save_entities(&second, std::slice::from_ref(&tag), &f.ctx).await?;

        let on_second = f.tags.load_entities(&second).await?;
        assert_ne!(on_second["TEST"].id, tag.id);
        assert_eq!(on_second["TEST"].target, second);
        Ok(())
    }

    #[tokio::test]
    async fn test_events_for_reconciliation() -> TagResult<()> {
        let f = fixture().await?;
        let bus = TagEventBus::new(16);
        let mut rx = bus.subscribe();
        let tags = f.tags.clone().with_bus(bus);
        let target = Target::of(Uuid::new_v4(), ObjectType::Account);

        tags.save_entities(&target, &[Tag::control(ControlTagKind::AutoPayOff, target)], &f.ctx)
            .await?;
        tags.save_entities(&target, &[], &f.ctx).await?;

        assert!(matches!(rx.try_recv(), Ok(TagEvent::TagCreated { .. })));
        assert!(matches!(rx.try_recv(), Ok(TagEvent::TagDeleted { .. })));
        assert!(rx.try_recv().is_err());
        Ok(())
    }
}
