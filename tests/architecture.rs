//! Architecture Verification Suite
//!
//! Storage handles are shared across tasks, so they must stay `Send + Sync`
//! and usable behind trait objects.

#[cfg(test)]
mod architecture_tests {
    use std::sync::Arc;

    use billing_tags::{
        AuditLog, Database, SqliteTagDao, SqliteTagDefinitionDao, TagDao, TagDefinitionDao, TagEventBus, TagStore,
        TagUserApi,
    };

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_storage_is_thread_safe() {
        assert_send_sync::<Database>();
        assert_send_sync::<SqliteTagDao>();
        assert_send_sync::<SqliteTagDefinitionDao>();
        assert_send_sync::<AuditLog>();
    }

    #[test]
    fn test_entry_points_are_thread_safe() {
        assert_send_sync::<TagUserApi>();
        assert_send_sync::<TagEventBus>();
        assert_send_sync::<TagStore>();
    }

    #[test]
    fn test_daos_are_object_safe() {
        fn assert_tag_dao(_: Option<Arc<dyn TagDao>>) {}
        fn assert_definition_dao(_: Option<Arc<dyn TagDefinitionDao>>) {}
        assert_tag_dao(None);
        assert_definition_dao(None);
    }

    #[test]
    fn test_tag_store_is_a_value() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<TagStore>();
        assert_clone::<TagUserApi>();
    }
}
