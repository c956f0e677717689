//! External collaborator traits (§3 `RuleStore`, `FieldConfigStore`,
//! `EntityTypeStore`).
//!
//! The engine core never owns persistence; it's handed implementations of
//! these traits by the embedding application (a database-backed store in
//! production, an in-memory fixture in tests — see [`memory`]).

use std::collections::HashMap;

use async_trait::async_trait;

use crate::field::FieldConfig;
use crate::rule::Rule;

/// An entity type: the named, typed shape a rule is evaluated against
/// (§3 `EntityType`). Opaque beyond its name and the fields it declares —
/// the orchestrator uses it only to resolve which `FieldConfig`s apply.
#[derive(Debug, Clone)]
pub struct EntityType {
    pub name: String,
    pub field_names: Vec<String>,
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get_rule_by_id(&self, id: &str) -> Result<Option<Rule>, String>;
    async fn find_rule_by_name(&self, name: &str) -> Result<Option<Rule>, String>;
}

#[async_trait]
pub trait FieldConfigStore: Send + Sync {
    async fn list_by_names(&self, names: &[String]) -> Result<Vec<FieldConfig>, String>;
    async fn find_by_field_name(&self, name: &str) -> Result<Option<FieldConfig>, String>;
}

#[async_trait]
pub trait EntityTypeStore: Send + Sync {
    async fn find_by_type_name(&self, name: &str) -> Result<Option<EntityType>, String>;
}

/// In-memory test doubles for the three store traits, used by the crate's
/// own integration tests and available to embedders wiring up a quick
/// proof of concept.
pub mod memory {
    use super::*;
    use parking_lot::RwLock;

    #[derive(Default)]
    pub struct InMemoryRuleStore {
        by_id: RwLock<HashMap<String, Rule>>,
        by_name: RwLock<HashMap<String, Rule>>,
    }

    impl InMemoryRuleStore {
        pub fn insert(&self, rule: Rule) {
            if let Some(id) = &rule.id {
                self.by_id.write().insert(id.clone(), rule.clone());
            }
            if let Some(name) = &rule.name {
                self.by_name.write().insert(name.clone(), rule);
            }
        }
    }

    #[async_trait]
    impl RuleStore for InMemoryRuleStore {
        async fn get_rule_by_id(&self, id: &str) -> Result<Option<Rule>, String> {
            Ok(self.by_id.read().get(id).cloned())
        }

        async fn find_rule_by_name(&self, name: &str) -> Result<Option<Rule>, String> {
            Ok(self.by_name.read().get(name).cloned())
        }
    }

    #[derive(Default)]
    pub struct InMemoryFieldConfigStore {
        configs: RwLock<HashMap<String, FieldConfig>>,
    }

    impl InMemoryFieldConfigStore {
        pub fn insert(&self, config: FieldConfig) {
            self.configs.write().insert(config.name.as_str().to_string(), config);
        }
    }

    #[async_trait]
    impl FieldConfigStore for InMemoryFieldConfigStore {
        async fn list_by_names(&self, names: &[String]) -> Result<Vec<FieldConfig>, String> {
            let configs = self.configs.read();
            Ok(names.iter().filter_map(|n| configs.get(n).cloned()).collect())
        }

        async fn find_by_field_name(&self, name: &str) -> Result<Option<FieldConfig>, String> {
            Ok(self.configs.read().get(name).cloned())
        }
    }

    #[derive(Default)]
    pub struct InMemoryEntityTypeStore {
        types: RwLock<HashMap<String, EntityType>>,
    }

    impl InMemoryEntityTypeStore {
        pub fn insert(&self, entity_type: EntityType) {
            self.types.write().insert(entity_type.name.clone(), entity_type);
        }
    }

    #[async_trait]
    impl EntityTypeStore for InMemoryEntityTypeStore {
        async fn find_by_type_name(&self, name: &str) -> Result<Option<EntityType>, String> {
            Ok(self.types.read().get(name).cloned())
        }
    }

}
