//! Tag Event Bus
//!
//! Broadcasts committed tag and definition changes. Events are published
//! only after the owning transaction commits; a failed publish never
//! affects the change itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::tag::{Tag, TagDefinition, Target, TenantId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TagEvent {
    TagCreated {
        tag_id: Uuid,
        definition_name: String,
        target: Target,
        user_token: Uuid,
        at: DateTime<Utc>,
    },
    TagDeleted {
        tag_id: Uuid,
        definition_name: String,
        target: Target,
        user_token: Uuid,
        at: DateTime<Utc>,
    },
    TagDefinitionCreated {
        tenant: TenantId,
        definition_id: Uuid,
        name: String,
        user_token: Uuid,
    },
    TagDefinitionDeleted {
        tenant: TenantId,
        definition_id: Uuid,
        name: String,
        user_token: Uuid,
    },
}

impl TagEvent {
    pub(crate) fn created(tag: &Tag, user_token: Uuid, at: DateTime<Utc>) -> Self {
        TagEvent::TagCreated {
            tag_id: tag.id,
            definition_name: tag.definition_name.clone(),
            target: tag.target,
            user_token,
            at,
        }
    }

    pub(crate) fn deleted(tag: &Tag, user_token: Uuid, at: DateTime<Utc>) -> Self {
        TagEvent::TagDeleted {
            tag_id: tag.id,
            definition_name: tag.definition_name.clone(),
            target: tag.target,
            user_token,
            at,
        }
    }

    pub(crate) fn definition_created(tenant: TenantId, def: &TagDefinition, user_token: Uuid) -> Self {
        TagEvent::TagDefinitionCreated {
            tenant,
            definition_id: def.id,
            name: def.name.clone(),
            user_token,
        }
    }

    pub(crate) fn definition_deleted(tenant: TenantId, def: &TagDefinition, user_token: Uuid) -> Self {
        TagEvent::TagDefinitionDeleted {
            tenant,
            definition_id: def.id,
            name: def.name.clone(),
            user_token,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TagEventBus {
    tx: broadcast::Sender<TagEvent>,
}

impl TagEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to all current subscribers. Returns how many received it.
    pub fn publish(&self, event: TagEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                debug!("No subscribers for tag event {:?}", event);
                0
            }
        }
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = TagEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TagEvent> {
        self.tx.subscribe()
    }
}
