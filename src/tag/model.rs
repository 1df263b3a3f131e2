//! Tag and Target types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::control::ControlTagKind;
use super::definition::TagDefinition;

/// Tenant owning definitions and tags. Part of every persisted key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl TenantId {
    /// Tenant used by single-tenant deployments.
    pub const DEFAULT: TenantId = TenantId(Uuid::nil());

    pub fn new() -> Self {
        TenantId(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        TenantId::DEFAULT
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Kind of business object a tag can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectType {
    Account,
    Bundle,
    Subscription,
    Invoice,
    InvoiceItem,
    Payment,
    PaymentMethod,
}

impl ObjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Account => "ACCOUNT",
            ObjectType::Bundle => "BUNDLE",
            ObjectType::Subscription => "SUBSCRIPTION",
            ObjectType::Invoice => "INVOICE",
            ObjectType::InvoiceItem => "INVOICE_ITEM",
            ObjectType::Payment => "PAYMENT",
            ObjectType::PaymentMethod => "PAYMENT_METHOD",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACCOUNT" => Ok(ObjectType::Account),
            "BUNDLE" => Ok(ObjectType::Bundle),
            "SUBSCRIPTION" => Ok(ObjectType::Subscription),
            "INVOICE" => Ok(ObjectType::Invoice),
            "INVOICE_ITEM" => Ok(ObjectType::InvoiceItem),
            "PAYMENT" => Ok(ObjectType::Payment),
            "PAYMENT_METHOD" => Ok(ObjectType::PaymentMethod),
            other => Err(format!("unknown object type '{}'", other)),
        }
    }
}

/// The annotated object: `(tenant, object id, object type)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub tenant: TenantId,
    pub object_id: Uuid,
    pub object_type: ObjectType,
}

impl Target {
    pub fn new(tenant: TenantId, object_id: Uuid, object_type: ObjectType) -> Self {
        Self {
            tenant,
            object_id,
            object_type,
        }
    }

    /// Target in the default tenant.
    pub fn of(object_id: Uuid, object_type: ObjectType) -> Self {
        Self::new(TenantId::DEFAULT, object_id, object_type)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.tenant, self.object_type, self.object_id)
    }
}

/// Descriptive or control variant of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "kind", rename_all = "snake_case")]
pub enum TagKind {
    Descriptive,
    Control(ControlTagKind),
}

impl TagKind {
    /// The variant is implied by the definition name.
    pub fn for_name(name: &str) -> Self {
        match ControlTagKind::from_name(name) {
            Some(kind) => TagKind::Control(kind),
            None => TagKind::Descriptive,
        }
    }
}

/// One attachment of a tag definition to one target.
/// The variant is never stored; it is always derived from `definition_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub definition_name: String,
    pub target: Target,
}

impl Tag {
    /// Attach a user-created definition.
    pub fn descriptive(definition: &TagDefinition, target: Target) -> Self {
        Self::named(definition.name.clone(), target)
    }

    pub fn control(kind: ControlTagKind, target: Target) -> Self {
        Self::named(kind.as_str(), target)
    }

    /// Build from a bare definition name; reserved names yield control tags.
    pub fn named(definition_name: impl Into<String>, target: Target) -> Self {
        Self::with_id(Uuid::new_v4(), definition_name, target)
    }

    /// Rebuild a persisted tag.
    pub fn with_id(id: Uuid, definition_name: impl Into<String>, target: Target) -> Self {
        Self {
            id,
            definition_name: definition_name.into(),
            target,
        }
    }

    pub fn kind(&self) -> TagKind {
        TagKind::for_name(&self.definition_name)
    }

    pub fn control_kind(&self) -> Option<ControlTagKind> {
        match self.kind() {
            TagKind::Control(kind) => Some(kind),
            TagKind::Descriptive => None,
        }
    }

    pub fn is_control(&self) -> bool {
        self.control_kind().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_follows_name() {
        let target = Target::of(Uuid::new_v4(), ObjectType::Account);
        let tag = Tag::named("AUTO_PAY_OFF", target);
        assert_eq!(tag.control_kind(), Some(ControlTagKind::AutoPayOff));

        let tag = Tag::named("vip", target);
        assert_eq!(tag.kind(), TagKind::Descriptive);
        assert!(!tag.is_control());
    }

    #[test]
    fn test_renamed_tag_cannot_keep_stale_kind() {
        let target = Target::of(Uuid::new_v4(), ObjectType::Account);
        let mut tag = Tag::control(ControlTagKind::AutoPayOff, target);
        assert_eq!(tag.kind(), TagKind::Control(ControlTagKind::AutoPayOff));

        tag.definition_name = "vip".to_string();
        assert_eq!(tag.kind(), TagKind::Descriptive);
        assert_eq!(tag.control_kind(), None);
    }

    #[test]
    fn test_object_type_round_trip() {
        for ty in [ObjectType::Account, ObjectType::InvoiceItem, ObjectType::PaymentMethod] {
            assert_eq!(ty.as_str().parse::<ObjectType>(), Ok(ty));
        }
        assert_eq!("invoice".parse::<ObjectType>(), Ok(ObjectType::Invoice));
        assert!("widget".parse::<ObjectType>().is_err());
    }

    #[test]
    fn test_target_display() {
        let id = Uuid::from_u128(7);
        let target = Target::of(id, ObjectType::Bundle);
        assert_eq!(
            target.to_string(),
            format!("{}/BUNDLE:{}", Uuid::nil(), id)
        );
    }
}
