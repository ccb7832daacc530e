#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use modelbroker::broker::Broker;
use modelbroker::clause::FilterNode;
use modelbroker::config::BrokerConfig;
use modelbroker::registry::{FieldKind, FieldSpec, ModelDescriptor, ModelRegistry, RelationSpec};
use modelbroker::row::Row;
use modelbroker::store::{
    AggregatePlan, InsertOutcome, MemoryStore, RelationLink, Store, StoreError, StoreQuery,
};

/// Task model used across the suite: required title, defaulted status,
/// optional typed fields and an author relation
pub fn task_descriptor() -> ModelDescriptor {
    ModelDescriptor::new(
        "task",
        vec![
            FieldSpec::new("id", FieldKind::Id),
            FieldSpec::new("title", FieldKind::String).required(),
            FieldSpec::new("status", FieldKind::String).default_value(json!("OPEN")),
            FieldSpec::new("priority", FieldKind::Number),
            FieldSpec::new("done", FieldKind::Boolean),
            FieldSpec::new("due_at", FieldKind::Date),
            FieldSpec::new("tags", FieldKind::Json),
            FieldSpec::new("author_id", FieldKind::String),
        ],
    )
    .expect("task descriptor")
    .with_relations(vec![RelationSpec::one("author", "user")])
    .expect("task relations")
}

pub fn user_descriptor() -> ModelDescriptor {
    ModelDescriptor::new(
        "user",
        vec![
            FieldSpec::new("id", FieldKind::Id),
            FieldSpec::new("name", FieldKind::String).required(),
            FieldSpec::new("email", FieldKind::String),
        ],
    )
    .expect("user descriptor")
    .with_relations(vec![RelationSpec::many("tasks", "task")])
    .expect("user relations")
}

/// Route broker tracing through RUST_LOG; safe to call from every test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn registry() -> Arc<ModelRegistry> {
    init_tracing();
    let registry = ModelRegistry::new();
    registry.register(user_descriptor()).await;
    registry.register(task_descriptor()).await;
    Arc::new(registry)
}

/// Memory store with the task/user join topology declared
pub async fn memory_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store
        .declare_link(
            "task",
            RelationLink::belongs_to("author", "user", "author_id"),
        )
        .await;
    store
        .declare_link("user", RelationLink::has_many("tasks", "task", "author_id"))
        .await;
    Arc::new(store)
}

/// Broker over a fixed development profile, so tests never depend on
/// ambient BROKER_* variables
pub fn broker_over(registry: Arc<ModelRegistry>, store: Arc<dyn Store>) -> Broker {
    Broker::with_config(registry, store, BrokerConfig::development())
}

pub async fn task_broker() -> Broker {
    broker_over(registry().await, memory_store().await)
}

/// Create `n` tasks (task-01, task-02, ...) and return their ids in order
pub async fn seed_tasks(broker: &Broker, n: usize) -> Vec<String> {
    let data: Vec<Value> = (1..=n)
        .map(|i| {
            json!({
                "title": format!("task-{:02}", i),
                "priority": i,
                "done": i % 2 == 0,
            })
        })
        .collect();
    let result = broker
        .create_many("task", modelbroker::broker::CreateManyInput::new(data))
        .await
        .expect("seed tasks");
    assert_eq!(result.count as usize, n, "seed created fewer rows than asked");
    result
        .outcomes
        .into_iter()
        .map(|outcome| outcome.id.expect("seeded row id"))
        .collect()
}

/// Store wrapper that counts query calls and can hold every call for a
/// fixed delay, for de-duplication and timeout tests
pub struct InstrumentedStore {
    inner: MemoryStore,
    delay: Option<Duration>,
    query_calls: AtomicUsize,
}

impl InstrumentedStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            delay: None,
            query_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Store for InstrumentedStore {
    async fn query(&self, collection: &str, query: &StoreQuery) -> Result<Vec<Row>, StoreError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.inner.query(collection, query).await
    }

    async fn count(
        &self,
        collection: &str,
        filter: Option<&FilterNode>,
    ) -> Result<u64, StoreError> {
        self.pause().await;
        self.inner.count(collection, filter).await
    }

    async fn aggregate(
        &self,
        collection: &str,
        plan: &AggregatePlan,
    ) -> Result<Value, StoreError> {
        self.pause().await;
        self.inner.aggregate(collection, plan).await
    }

    async fn insert(
        &self,
        collection: &str,
        rows: Vec<Row>,
        skip_duplicates: bool,
    ) -> Result<Vec<InsertOutcome>, StoreError> {
        self.inner.insert(collection, rows, skip_duplicates).await
    }

    async fn update(
        &self,
        collection: &str,
        filter: Option<&FilterNode>,
        patch: &Row,
    ) -> Result<Vec<Row>, StoreError> {
        self.inner.update(collection, filter, patch).await
    }

    async fn delete(
        &self,
        collection: &str,
        filter: Option<&FilterNode>,
    ) -> Result<Vec<Row>, StoreError> {
        self.inner.delete(collection, filter).await
    }
}

/// Store whose reads always fail, for error-mapping tests
pub struct UnavailableStore;

#[async_trait]
impl Store for UnavailableStore {
    async fn query(&self, _: &str, _: &StoreQuery) -> Result<Vec<Row>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn count(&self, _: &str, _: Option<&FilterNode>) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn aggregate(&self, _: &str, _: &AggregatePlan) -> Result<Value, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn insert(
        &self,
        _: &str,
        _: Vec<Row>,
        _: bool,
    ) -> Result<Vec<InsertOutcome>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn update(
        &self,
        _: &str,
        _: Option<&FilterNode>,
        _: &Row,
    ) -> Result<Vec<Row>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _: &str, _: Option<&FilterNode>) -> Result<Vec<Row>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}
