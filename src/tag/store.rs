//! Tag Store - in-memory tag set for one target
//!
//! Holds at most one tag per definition name and answers the billing
//! predicates from its current members. No I/O, no locking: a store is
//! confined to the request that built it and committed through
//! `TagDao::save_entities`.

use std::collections::BTreeMap;

use super::control::{BillingPredicate, ControlTagKind};
use super::model::{Tag, Target};

#[derive(Debug, Clone, PartialEq)]
pub struct TagStore {
    target: Target,
    /// Keyed by definition name; ordered so `members()` is deterministic
    tags: BTreeMap<String, Tag>,
}

impl TagStore {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            tags: BTreeMap::new(),
        }
    }

    /// Build a store from previously loaded tags.
    pub fn from_tags(target: Target, tags: impl IntoIterator<Item = Tag>) -> Self {
        let mut store = Self::new(target);
        for tag in tags {
            store.add(tag);
        }
        store
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Insert by definition name. Re-adding a name keeps the existing tag.
    /// Returns whether the tag was inserted.
    pub fn add(&mut self, mut tag: Tag) -> bool {
        if self.tags.contains_key(&tag.definition_name) {
            return false;
        }
        tag.target = self.target;
        self.tags.insert(tag.definition_name.clone(), tag);
        true
    }

    pub fn add_control(&mut self, kind: ControlTagKind) -> bool {
        self.add(Tag::control(kind, self.target))
    }

    pub fn remove(&mut self, tag: &Tag) -> Option<Tag> {
        self.remove_by_name(&tag.definition_name)
    }

    pub fn remove_by_name(&mut self, name: &str) -> Option<Tag> {
        self.tags.remove(name)
    }

    pub fn clear(&mut self) {
        self.tags.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.tags.get(name)
    }

    pub fn members(&self) -> Vec<Tag> {
        self.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.values()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn control_kinds(&self) -> impl Iterator<Item = ControlTagKind> + '_ {
        self.tags.values().filter_map(Tag::control_kind)
    }

    /// Starts at `true`, conjoined with every control member's effect.
    pub fn allows(&self, predicate: BillingPredicate) -> bool {
        self.control_kinds()
            .filter_map(|kind| kind.effect_on(predicate))
            .fold(true, |acc, value| acc && value)
    }

    pub fn generate_invoice(&self) -> bool {
        self.allows(BillingPredicate::GenerateInvoice)
    }

    pub fn process_payment(&self) -> bool {
        self.allows(BillingPredicate::ProcessPayment)
    }

    pub fn enforce_overdue(&self) -> bool {
        self.allows(BillingPredicate::EnforceOverdue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::definition::TagDefinition;
    use crate::tag::model::ObjectType;
    use uuid::Uuid;

    fn account_store() -> TagStore {
        TagStore::new(Target::of(Uuid::new_v4(), ObjectType::Account))
    }

    #[test]
    fn test_control_tags() {
        let mut store = account_store();
        assert!(store.generate_invoice());
        assert!(store.process_payment());

        store.add_control(ControlTagKind::AutoInvoicingOff);
        assert!(!store.generate_invoice());
        assert!(store.process_payment());

        store.add_control(ControlTagKind::AutoPayOff);
        assert!(!store.generate_invoice());
        assert!(!store.process_payment());
        assert!(store.enforce_overdue());
    }

    #[test]
    fn test_descriptive_tag_has_no_effect() {
        let mut store = account_store();
        let def = TagDefinition::new("tag1", "First tag");
        store.add(Tag::descriptive(&def, *store.target()));
        for predicate in BillingPredicate::ALL {
            assert!(store.allows(predicate));
        }
    }

    #[test]
    fn test_add_is_idempotent_by_name() {
        let mut store = account_store();
        let target = *store.target();
        let first = Tag::named("vip", target);
        let first_id = first.id;
        assert!(store.add(first));
        assert!(!store.add(Tag::named("vip", target)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("vip").map(|t| t.id), Some(first_id));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut store = account_store();
        let target = *store.target();
        let tag = Tag::named("vip", target);
        store.add(tag.clone());
        store.add_control(ControlTagKind::AutoPayOff);

        assert!(store.contains("vip"));
        let names: Vec<&str> = store.iter().map(|t| t.definition_name.as_str()).collect();
        assert_eq!(names, vec!["AUTO_PAY_OFF", "vip"]);

        assert!(store.remove(&tag).is_some());
        assert!(!store.contains("vip"));
        assert!(store.remove(&tag).is_none());
        assert!(store.remove_by_name("missing").is_none());
        assert!(!store.process_payment());

        store.clear();
        assert!(store.is_empty());
        assert!(store.process_payment());
    }

    #[test]
    fn test_add_rebinds_foreign_target() {
        let mut store = account_store();
        let other = Target::of(Uuid::new_v4(), ObjectType::Invoice);
        store.add(Tag::named("vip", other));
        assert_eq!(store.get("vip").map(|t| t.target), Some(*store.target()));
    }

    #[test]
    fn test_written_off_and_manual_pay() {
        let mut store = account_store();
        store.add_control(ControlTagKind::WrittenOff);
        assert!(!store.enforce_overdue());
        assert!(store.process_payment());
        store.add_control(ControlTagKind::ManualPay);
        assert!(!store.process_payment());
        assert!(store.generate_invoice());
    }
}
