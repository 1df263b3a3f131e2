//! History and Audit Log
//!
//! Writers append one history row plus its audit row inside the caller's
//! transaction. `AuditLog` answers read-side questions over both.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Row, Transaction};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::db::Database;
use super::schema::{AUDIT_LOG, TAG_DEFINITION_HISTORY, TAG_HISTORY};
use crate::context::CallContext;
use crate::error::{TagError, TagResult};
use crate::tag::{ObjectType, Tag, TagDefinition, Target, TenantId};
use crate::utils::time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Insert,
    Delete,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Insert => "INSERT",
            ChangeType::Delete => "DELETE",
        }
    }

    /// INSERT rows are dated at context creation, DELETE rows at its update.
    fn date_from(self, ctx: &CallContext) -> &DateTime<Utc> {
        match self {
            ChangeType::Insert => &ctx.created_date,
            ChangeType::Delete => &ctx.updated_date,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(ChangeType::Insert),
            "DELETE" => Ok(ChangeType::Delete),
            other => Err(format!("unknown change type '{}'", other)),
        }
    }
}

/// One row of `audit_log`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub table_name: String,
    pub record_id: i64,
    pub change_type: ChangeType,
    pub change_date: DateTime<Utc>,
    pub changed_by: String,
    pub reason_code: Option<String>,
    pub comments: Option<String>,
    pub user_token: Option<Uuid>,
}

/// One row of `tag_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagHistoryRecord {
    pub record_id: i64,
    pub tag_id: Uuid,
    pub definition_name: String,
    pub target: Target,
    pub change_type: ChangeType,
    pub changed_by: String,
    pub change_date: DateTime<Utc>,
}

/// One row of `tag_definition_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionHistoryRecord {
    pub record_id: i64,
    pub definition_id: Uuid,
    pub name: String,
    pub description: String,
    pub change_type: ChangeType,
    pub changed_by: String,
    pub change_date: DateTime<Utc>,
}

pub(crate) fn record_tag_change(
    tx: &Transaction<'_>,
    tag: &Tag,
    change: ChangeType,
    ctx: &CallContext,
) -> TagResult<i64> {
    let date = time::encode(change.date_from(ctx));
    tx.execute(
        "INSERT INTO tag_history (id, tenant_id, tag_definition_name, object_id, object_type, change_type, changed_by, change_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            tag.id.to_string(),
            tag.target.tenant.to_string(),
            &tag.definition_name,
            tag.target.object_id.to_string(),
            tag.target.object_type.as_str(),
            change.as_str(),
            &ctx.user_name,
            &date,
        ],
    )?;
    let record_id = tx.last_insert_rowid();
    insert_audit_row(tx, TAG_HISTORY, record_id, change, &date, ctx)?;
    Ok(record_id)
}

pub(crate) fn record_definition_change(
    tx: &Transaction<'_>,
    tenant: TenantId,
    definition: &TagDefinition,
    change: ChangeType,
    ctx: &CallContext,
) -> TagResult<i64> {
    let date = time::encode(change.date_from(ctx));
    tx.execute(
        "INSERT INTO tag_definition_history (id, tenant_id, name, description, is_control, change_type, changed_by, change_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            definition.id.to_string(),
            tenant.to_string(),
            &definition.name,
            &definition.description,
            definition.is_control(),
            change.as_str(),
            &ctx.user_name,
            &date,
        ],
    )?;
    let record_id = tx.last_insert_rowid();
    insert_audit_row(tx, TAG_DEFINITION_HISTORY, record_id, change, &date, ctx)?;
    Ok(record_id)
}

fn insert_audit_row(
    tx: &Transaction<'_>,
    table_name: &str,
    record_id: i64,
    change: ChangeType,
    date: &str,
    ctx: &CallContext,
) -> TagResult<()> {
    tx.execute(
        "INSERT INTO audit_log (table_name, record_id, change_type, change_date, changed_by, reason_code, comments, user_token)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            table_name,
            record_id,
            change.as_str(),
            date,
            &ctx.user_name,
            &ctx.reason_code,
            &ctx.comments,
            ctx.user_token.to_string(),
        ],
    )?;
    Ok(())
}

fn parse_uuid(table: &'static str, raw: &str) -> TagResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| TagError::corrupt(table, format!("bad uuid '{}': {}", raw, e)))
}

fn parse_change(table: &'static str, raw: &str) -> TagResult<ChangeType> {
    raw.parse().map_err(|e: String| TagError::corrupt(table, e))
}

const AUDIT_COLUMNS: &str =
    "a.table_name, a.record_id, a.change_type, a.change_date, a.changed_by, a.reason_code, a.comments, a.user_token";

type RawAudit = (String, i64, String, String, String, Option<String>, Option<String>, Option<String>);

fn read_audit_row(row: &Row<'_>) -> rusqlite::Result<RawAudit> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn decode_audit(raw: RawAudit) -> TagResult<AuditLogEntry> {
    let (table_name, record_id, change_type, change_date, changed_by, reason_code, comments, user_token) = raw;
    Ok(AuditLogEntry {
        table_name,
        record_id,
        change_type: parse_change(AUDIT_LOG, &change_type)?,
        change_date: time::decode(AUDIT_LOG, &change_date)?,
        changed_by,
        reason_code,
        comments,
        user_token: user_token.as_deref().map(|t| parse_uuid(AUDIT_LOG, t)).transpose()?,
    })
}

/// Read access to tag history and the audit rows linked to it
#[derive(Debug, Clone)]
pub struct AuditLog {
    db: Database,
}

impl AuditLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// `audit_log ⋈ tag_history` for one tag id and change type.
    pub async fn audit_for_tag(&self, tag_id: Uuid, change: ChangeType) -> TagResult<Vec<AuditLogEntry>> {
        let sql = format!(
            "SELECT {} FROM audit_log a
             INNER JOIN tag_history th ON a.record_id = th.record_id
             WHERE a.table_name = ?1 AND th.id = ?2 AND a.change_type = ?3
             ORDER BY a.record_id",
            AUDIT_COLUMNS
        );
        self.db
            .read(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![TAG_HISTORY, tag_id.to_string(), change.as_str()], read_audit_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.into_iter().map(decode_audit).collect()
            })
            .await
    }

    /// `audit_log ⋈ tag_definition_history` for one definition id and change type.
    pub async fn audit_for_definition(
        &self,
        definition_id: Uuid,
        change: ChangeType,
    ) -> TagResult<Vec<AuditLogEntry>> {
        let sql = format!(
            "SELECT {} FROM audit_log a
             INNER JOIN tag_definition_history dh ON a.record_id = dh.record_id
             WHERE a.table_name = ?1 AND dh.id = ?2 AND a.change_type = ?3
             ORDER BY a.record_id",
            AUDIT_COLUMNS
        );
        self.db
            .read(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(
                        params![TAG_DEFINITION_HISTORY, definition_id.to_string(), change.as_str()],
                        read_audit_row,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.into_iter().map(decode_audit).collect()
            })
            .await
    }

    /// Tag history of one target, oldest first.
    pub async fn tag_history_for_target(&self, target: &Target) -> TagResult<Vec<TagHistoryRecord>> {
        let target = *target;
        self.db
            .read(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT record_id, id, tag_definition_name, change_type, changed_by, change_date
                     FROM tag_history
                     WHERE tenant_id = ?1 AND object_id = ?2 AND object_type = ?3
                     ORDER BY record_id",
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
                                row.get::<_, i64>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                                row.get::<_, String>(5)?,
                            ))
                        },
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                rows.into_iter()
                    .map(|(record_id, id, definition_name, change_type, changed_by, change_date)| -> TagResult<TagHistoryRecord> {
                        Ok(TagHistoryRecord {
                            record_id,
                            tag_id: parse_uuid(TAG_HISTORY, &id)?,
                            definition_name,
                            target,
                            change_type: parse_change(TAG_HISTORY, &change_type)?,
                            changed_by,
                            change_date: time::decode(TAG_HISTORY, &change_date)?,
                        })
                    })
                    .collect()
            })
            .await
    }

    /// History of every definition ever registered under `name`, oldest first.
    pub async fn definition_history(&self, tenant: TenantId, name: &str) -> TagResult<Vec<DefinitionHistoryRecord>> {
        let name = name.to_string();
        self.db
            .read(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT record_id, id, name, description, change_type, changed_by, change_date
                     FROM tag_definition_history
                     WHERE tenant_id = ?1 AND name = ?2
                     ORDER BY record_id",
                )?;
                let rows = stmt
                    .query_map(params![tenant.to_string(), &name], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, String>(6)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                rows.into_iter()
                    .map(|(record_id, id, name, description, change_type, changed_by, change_date)| -> TagResult<DefinitionHistoryRecord> {
                        Ok(DefinitionHistoryRecord {
                            record_id,
                            definition_id: parse_uuid(TAG_DEFINITION_HISTORY, &id)?,
                            name,
                            description,
                            change_type: parse_change(TAG_DEFINITION_HISTORY, &change_type)?,
                            changed_by,
                            change_date: time::decode(TAG_DEFINITION_HISTORY, &change_date)?,
                        })
                    })
                    .collect()
            })
            .await
    }

    /// History rows lacking their audit row. Zero in a healthy database.
    pub async fn unaudited_history_count(&self) -> TagResult<i64> {
        self.db
            .read(|conn| {
                let count = conn.query_row(
                    "SELECT
                        (SELECT COUNT(*) FROM tag_history h
                          WHERE NOT EXISTS (SELECT 1 FROM audit_log a
                                            WHERE a.table_name = 'tag_history' AND a.record_id = h.record_id))
                      + (SELECT COUNT(*) FROM tag_definition_history h
                          WHERE NOT EXISTS (SELECT 1 FROM audit_log a
                                            WHERE a.table_name = 'tag_definition_history' AND a.record_id = h.record_id))",
                    [],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }
}

/// Decode the object part of a target stored as text columns.
pub(crate) fn decode_target(
    table: &'static str,
    tenant: TenantId,
    object_id: &str,
    object_type: &str,
) -> TagResult<Target> {
    let object_type: ObjectType = object_type.parse().map_err(|e: String| TagError::corrupt(table, e))?;
    Ok(Target::new(tenant, parse_uuid(table, object_id)?, object_type))
}
