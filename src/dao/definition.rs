//! Tag Definition Registry (SQLite)
//!
//! User definitions live in `tag_definitions`; control definitions are
//! synthesized from the policy table so every tenant always sees them.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, instrument};
use uuid::Uuid;

use super::audit::{record_definition_change, ChangeType};
use super::db::Database;
use super::schema::TAG_DEFINITIONS;
use super::TagDefinitionDao;
use crate::bus::{TagEvent, TagEventBus};
use crate::context::CallContext;
use crate::error::{is_unique_violation, TagError, TagResult};
use crate::tag::{validate_name, ControlTagKind, TagDefinition, TenantId};
use crate::utils::time;

const SELECT_DEFINITION: &str =
    "SELECT id, name, description, created_by, created_date FROM tag_definitions";

#[derive(Debug, Clone)]
pub struct SqliteTagDefinitionDao {
    db: Database,
    bus: Option<TagEventBus>,
}

impl SqliteTagDefinitionDao {
    pub fn new(db: Database) -> Self {
        Self { db, bus: None }
    }

    pub fn with_bus(mut self, bus: TagEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    fn publish(&self, event: TagEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }
}

type RawDefinition = (String, String, String, String, String);

fn read_definition_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawDefinition> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_definition(raw: RawDefinition) -> TagResult<TagDefinition> {
    let (id, name, description, created_by, created_date) = raw;
    let id = Uuid::parse_str(&id)
        .map_err(|e| TagError::corrupt(TAG_DEFINITIONS, format!("bad uuid '{}': {}", id, e)))?;
    Ok(TagDefinition {
        id,
        name,
        description,
        control_kind: None,
        created_by: Some(created_by),
        created_date: Some(time::decode(TAG_DEFINITIONS, &created_date)?),
    })
}

pub(crate) fn find_user_definition(
    conn: &Connection,
    tenant: TenantId,
    name: &str,
) -> TagResult<Option<TagDefinition>> {
    let raw = conn
        .query_row(
            &format!("{} WHERE tenant_id = ?1 AND name = ?2", SELECT_DEFINITION),
            params![tenant.to_string(), name],
            read_definition_row,
        )
        .optional()?;
    raw.map(decode_definition).transpose()
}

/// Control names always exist; user names must be registered for the tenant.
pub(crate) fn definition_exists(conn: &Connection, tenant: TenantId, name: &str) -> TagResult<bool> {
    if ControlTagKind::from_name(name).is_some() {
        return Ok(true);
    }
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM tag_definitions WHERE tenant_id = ?1 AND name = ?2",
            params![tenant.to_string(), name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

#[async_trait]
impl TagDefinitionDao for SqliteTagDefinitionDao {
    #[instrument(skip(self, description, ctx), fields(user = %ctx.user_name))]
    async fn create(
        &self,
        tenant: TenantId,
        name: &str,
        description: &str,
        ctx: &CallContext,
    ) -> TagResult<TagDefinition> {
        validate_name(name)?;

        let definition = TagDefinition {
            created_by: Some(ctx.user_name.clone()),
            created_date: Some(ctx.created_date),
            ..TagDefinition::new(name, description)
        };

        let def = definition.clone();
        let ctx_owned = ctx.clone();
        self.db
            .write(move |tx| {
                if find_user_definition(tx, tenant, &def.name)?.is_some() {
                    return Err(TagError::AlreadyExists(def.name.clone()));
                }
                tx.execute(
                    "INSERT INTO tag_definitions (id, tenant_id, name, description, is_control, created_by, created_date)
                     VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
                    params![
                        def.id.to_string(),
                        tenant.to_string(),
                        &def.name,
                        &def.description,
                        &ctx_owned.user_name,
                        time::encode(&ctx_owned.created_date),
                    ],
                )
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        TagError::AlreadyExists(def.name.clone())
                    } else {
                        TagError::Storage(e)
                    }
                })?;
                record_definition_change(tx, tenant, &def, ChangeType::Insert, &ctx_owned)?;
                Ok(())
            })
            .await?;

        info!("Created tag definition '{}' ({})", definition.name, definition.id);
        self.publish(TagEvent::definition_created(tenant, &definition, ctx.user_token));
        Ok(definition)
    }

    async fn get_by_name(&self, tenant: TenantId, name: &str) -> TagResult<Option<TagDefinition>> {
        if let Some(kind) = ControlTagKind::from_name(name) {
            return Ok(Some(TagDefinition::control(kind)));
        }
        let name = name.to_string();
        self.db
            .read(move |conn| find_user_definition(conn, tenant, &name))
            .await
    }

    async fn get_by_id(&self, tenant: TenantId, id: Uuid) -> TagResult<Option<TagDefinition>> {
        if let Some(kind) = ControlTagKind::ALL.into_iter().find(|k| k.definition_id() == id) {
            return Ok(Some(TagDefinition::control(kind)));
        }
        self.db
            .read(move |conn| {
                let raw = conn
                    .query_row(
                        &format!("{} WHERE tenant_id = ?1 AND id = ?2", SELECT_DEFINITION),
                        params![tenant.to_string(), id.to_string()],
                        read_definition_row,
                    )
                    .optional()?;
                raw.map(decode_definition).transpose()
            })
            .await
    }

    async fn list(&self, tenant: TenantId) -> TagResult<Vec<TagDefinition>> {
        let user_definitions = self
            .db
            .read(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE tenant_id = ?1 ORDER BY name",
                    SELECT_DEFINITION
                ))?;
                let rows = stmt
                    .query_map(params![tenant.to_string()], read_definition_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.into_iter().map(decode_definition).collect::<TagResult<Vec<_>>>()
            })
            .await?;

        let mut definitions = TagDefinition::all_controls();
        definitions.extend(user_definitions);
        Ok(definitions)
    }

    #[instrument(skip(self, ctx), fields(user = %ctx.user_name))]
    async fn delete(&self, tenant: TenantId, name: &str, ctx: &CallContext) -> TagResult<()> {
        if ControlTagKind::from_name(name).is_some() {
            return Err(TagError::Reserved(name.to_string()));
        }

        let name_owned = name.to_string();
        let ctx_owned = ctx.clone();
        let deleted = self
            .db
            .write(move |tx| {
                let def = find_user_definition(tx, tenant, &name_owned)?
                    .ok_or_else(|| TagError::NotFound(name_owned.clone()))?;

                let references: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM tags WHERE tenant_id = ?1 AND tag_definition_name = ?2",
                    params![tenant.to_string(), &name_owned],
                    |row| row.get(0),
                )?;
                if references > 0 {
                    return Err(TagError::InUse {
                        name: name_owned,
                        references,
                    });
                }

                tx.execute(
                    "DELETE FROM tag_definitions WHERE tenant_id = ?1 AND id = ?2",
                    params![tenant.to_string(), def.id.to_string()],
                )?;
                record_definition_change(tx, tenant, &def, ChangeType::Delete, &ctx_owned)?;
                Ok(def)
            })
            .await?;

        info!("Deleted tag definition '{}' ({})", deleted.name, deleted.id);
        self.publish(TagEvent::definition_deleted(tenant, &deleted, ctx.user_token));
        Ok(())
    }
}
