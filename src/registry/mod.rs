// Model Registry - runtime model descriptors and the shared lookup table
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::error::BrokerError;

/// Field kinds a descriptor can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Id,
    String,
    Number,
    Boolean,
    Date,
    Json,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Id => "id",
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::Json => "json",
        }
    }

    /// Kinds with a total order, usable with lt/lte/gt/gte and orderBy
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            FieldKind::Id | FieldKind::String | FieldKind::Number | FieldKind::Date
        )
    }

    /// Kinds usable with contains/startsWith/endsWith
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldKind::Id | FieldKind::String)
    }

    /// Does `value` fit this kind? Null is handled by callers, not here.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::Id | FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Date => value
                .as_str()
                .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
                .unwrap_or(false),
            FieldKind::Json => true,
        }
    }

    /// Human description of acceptable values, for validation errors
    pub fn expected(&self) -> &'static str {
        match self {
            FieldKind::Id => "a string id",
            FieldKind::String => "a string",
            FieldKind::Number => "a number",
            FieldKind::Boolean => "a boolean",
            FieldKind::Date => "an RFC 3339 date string",
            FieldKind::Json => "a JSON value",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared field of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default_value: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// One declared relation of a model; join topology lives in the store,
/// the descriptor only carries what projection validation needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationSpec {
    pub name: String,
    pub model: String,
    pub many: bool,
}

impl RelationSpec {
    pub fn many(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            many: true,
        }
    }

    pub fn one(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            many: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DescriptorError {
    #[error("invalid identifier '{0}': only alphanumerics, '_' and '-' are allowed")]
    InvalidName(String),
    #[error("duplicate field '{0}'")]
    DuplicateField(String),
    #[error("duplicate relation '{0}'")]
    DuplicateRelation(String),
    #[error("relation '{0}' shadows a field of the same name")]
    RelationShadowsField(String),
    #[error("model '{0}' has no 'id' field of kind id")]
    MissingIdField(String),
}

fn validate_identifier(name: &str) -> Result<(), DescriptorError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DescriptorError::InvalidName(name.to_string()))
    }
}

/// Immutable description of one model. Field order is registration order;
/// replaced only wholesale through the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    /// Store collection backing this model; defaults to the model name
    pub collection: String,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub relations: Vec<RelationSpec>,
}

impl ModelDescriptor {
    pub fn new(
        name: impl Into<String>,
        fields: Vec<FieldSpec>,
    ) -> Result<Self, DescriptorError> {
        let name = name.into();
        let descriptor = Self {
            collection: name.clone(),
            name,
            fields,
            relations: Vec::new(),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn with_relations(
        mut self,
        relations: Vec<RelationSpec>,
    ) -> Result<Self, DescriptorError> {
        self.relations = relations;
        self.validate()?;
        Ok(self)
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    fn validate(&self) -> Result<(), DescriptorError> {
        validate_identifier(&self.name)?;
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            validate_identifier(&field.name)?;
            if !seen.insert(field.name.as_str()) {
                return Err(DescriptorError::DuplicateField(field.name.clone()));
            }
        }
        let mut seen_rel = std::collections::HashSet::new();
        for relation in &self.relations {
            validate_identifier(&relation.name)?;
            if !seen_rel.insert(relation.name.as_str()) {
                return Err(DescriptorError::DuplicateRelation(relation.name.clone()));
            }
            if seen.contains(relation.name.as_str()) {
                return Err(DescriptorError::RelationShadowsField(relation.name.clone()));
            }
        }
        let has_id = self
            .fields
            .iter()
            .any(|f| f.name == crate::row::ID_FIELD && f.kind == FieldKind::Id);
        if !has_id {
            return Err(DescriptorError::MissingIdField(self.name.clone()));
        }
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationSpec> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }
}

/// Point-in-time view of the registry handed to clause translation so
/// relation recursion never takes a lock mid-call
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    models: HashMap<String, Arc<ModelDescriptor>>,
}

impl RegistrySnapshot {
    pub fn descriptor(&self, name: &str) -> Result<&Arc<ModelDescriptor>, BrokerError> {
        self.models
            .get(name)
            .ok_or_else(|| BrokerError::UnknownModel(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }
}

/// Shared name -> descriptor table. Lookups clone an `Arc`; registration and
/// hot reload swap entries under one write lock so readers never observe a
/// half-updated model.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<String, Arc<ModelDescriptor>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace one model. Re-registering a name swaps the whole
    /// descriptor; in-flight calls keep the `Arc` they already resolved.
    pub async fn register(&self, descriptor: ModelDescriptor) {
        let name = descriptor.name.clone();
        let mut models = self.models.write().await;
        let replaced = models.insert(name.clone(), Arc::new(descriptor)).is_some();
        if replaced {
            tracing::info!(model = %name, "replaced model descriptor");
        } else {
            tracing::info!(model = %name, "registered model descriptor");
        }
    }

    /// Replace the entire model table in one swap (hot schema reload)
    pub async fn replace_all(&self, descriptors: Vec<ModelDescriptor>) {
        let next: HashMap<String, Arc<ModelDescriptor>> = descriptors
            .into_iter()
            .map(|d| (d.name.clone(), Arc::new(d)))
            .collect();
        let count = next.len();
        let mut models = self.models.write().await;
        *models = next;
        tracing::info!(models = count, "reloaded model registry");
    }

    pub async fn get(&self, name: &str) -> Result<Arc<ModelDescriptor>, BrokerError> {
        let models = self.models.read().await;
        models
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownModel(name.to_string()))
    }

    pub async fn has(&self, name: &str) -> bool {
        self.models.read().await.contains_key(name)
    }

    /// All registered models, sorted by name for stable output
    pub async fn list_all(&self) -> Vec<(String, Arc<ModelDescriptor>)> {
        let models = self.models.read().await;
        let mut entries: Vec<_> = models
            .iter()
            .map(|(name, descriptor)| (name.clone(), descriptor.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            models: self.models.read().await.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_descriptor() -> ModelDescriptor {
        ModelDescriptor::new(
            "task",
            vec![
                FieldSpec::new("id", FieldKind::Id),
                FieldSpec::new("title", FieldKind::String).required(),
                FieldSpec::new("status", FieldKind::String).default_value(json!("OPEN")),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let result = ModelDescriptor::new(
            "task",
            vec![
                FieldSpec::new("id", FieldKind::Id),
                FieldSpec::new("title", FieldKind::String),
                FieldSpec::new("title", FieldKind::Number),
            ],
        );
        assert_eq!(
            result.unwrap_err(),
            DescriptorError::DuplicateField("title".to_string())
        );
    }

    #[test]
    fn test_missing_id_rejected() {
        let result =
            ModelDescriptor::new("task", vec![FieldSpec::new("title", FieldKind::String)]);
        assert!(matches!(result, Err(DescriptorError::MissingIdField(_))));
    }

    #[test]
    fn test_relation_cannot_shadow_field() {
        let result = task_descriptor().with_relations(vec![RelationSpec::many("title", "user")]);
        assert!(matches!(
            result,
            Err(DescriptorError::RelationShadowsField(_))
        ));
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = ModelRegistry::new();
        registry.register(task_descriptor()).await;

        assert!(registry.has("task").await);
        let descriptor = registry.get("task").await.unwrap();
        assert_eq!(descriptor.collection, "task");
        assert!(descriptor.field("title").unwrap().required);

        let err = registry.get("Task").await.unwrap_err();
        assert_eq!(err, BrokerError::UnknownModel("Task".to_string()));
    }

    #[tokio::test]
    async fn test_replace_all_swaps_table() {
        let registry = ModelRegistry::new();
        registry.register(task_descriptor()).await;

        let user = ModelDescriptor::new("user", vec![FieldSpec::new("id", FieldKind::Id)]).unwrap();
        registry.replace_all(vec![user]).await;

        assert!(!registry.has("task").await);
        assert!(registry.has("user").await);
        assert_eq!(registry.list_all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_reregister_replaces_descriptor() {
        let registry = ModelRegistry::new();
        registry.register(task_descriptor()).await;
        let before = registry.get("task").await.unwrap();

        let next = ModelDescriptor::new(
            "task",
            vec![
                FieldSpec::new("id", FieldKind::Id),
                FieldSpec::new("title", FieldKind::String),
            ],
        )
        .unwrap();
        registry.register(next).await;

        let after = registry.get("task").await.unwrap();
        assert!(before.field("status").is_some());
        assert!(after.field("status").is_none());
    }
}
