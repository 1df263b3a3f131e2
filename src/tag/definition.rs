//! Tag Definitions
//!
//! Named schema entries that tags instantiate. Control definitions are
//! synthesized from the policy table and never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::control::{is_reserved_name, ControlTagKind};
use crate::error::{TagError, TagResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Set only for definitions mirroring the control policy table
    pub control_kind: Option<ControlTagKind>,
    /// Absent for synthesized control definitions
    pub created_by: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
}

impl TagDefinition {
    /// Definition for a user-created (descriptive) tag.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            control_kind: None,
            created_by: None,
            created_date: None,
        }
    }

    pub fn control(kind: ControlTagKind) -> Self {
        Self {
            id: kind.definition_id(),
            name: kind.as_str().to_string(),
            description: kind.description().to_string(),
            control_kind: Some(kind),
            created_by: None,
            created_date: None,
        }
    }

    pub fn is_control(&self) -> bool {
        self.control_kind.is_some()
    }

    /// Every reserved control definition, in policy table order.
    pub fn all_controls() -> Vec<TagDefinition> {
        ControlTagKind::ALL.into_iter().map(TagDefinition::control).collect()
    }
}

/// Check a name proposed for a new user definition.
pub fn validate_name(name: &str) -> TagResult<()> {
    if name.trim().is_empty() {
        return Err(TagError::InvalidName {
            name: name.to_string(),
            reason: "name must not be empty",
        });
    }
    if name.trim() != name {
        return Err(TagError::InvalidName {
            name: name.to_string(),
            reason: "name must not start or end with whitespace",
        });
    }
    if is_reserved_name(name) {
        return Err(TagError::InvalidName {
            name: name.to_string(),
            reason: "name is reserved for a control tag",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("vip").is_ok());
        assert!(matches!(validate_name(""), Err(TagError::InvalidName { .. })));
        assert!(matches!(validate_name("   "), Err(TagError::InvalidName { .. })));
        assert!(matches!(
            validate_name("AUTO_PAY_OFF"),
            Err(TagError::InvalidName { .. })
        ));
        assert!(validate_name("test tag").is_ok());
    }

    #[test]
    fn test_padded_names_are_refused() {
        for name in ["AUTO_PAY_OFF ", " AUTO_PAY_OFF", "vip\t", "\nvip"] {
            assert!(
                matches!(validate_name(name), Err(TagError::InvalidName { .. })),
                "accepted {:?}",
                name
            );
        }
    }

    #[test]
    fn test_control_definitions() {
        let defs = TagDefinition::all_controls();
        assert_eq!(defs.len(), ControlTagKind::ALL.len());
        assert!(defs.iter().all(|d| d.is_control()));
        let invoicing = TagDefinition::control(ControlTagKind::AutoInvoicingOff);
        assert_eq!(invoicing.name, "AUTO_INVOICING_OFF");
        assert_eq!(invoicing.id, ControlTagKind::AutoInvoicingOff.definition_id());
    }
}
