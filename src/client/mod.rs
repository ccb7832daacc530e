// Client Binding Layer - cached, de-duplicated reads over the broker verbs
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, warn};

use crate::broker::{
    AggregateInput, Broker, CacheEvent, ClearCacheResult, CreateManyInput, CreateManyResult,
    CreateOneInput, DeleteManyInput, DeleteOneInput, FetchByIdOptions, FetchPaginatedRequest,
    MutationCount, UpdateManyInput, UpdateOneInput, UpsertInput, UpsertResult,
};
use crate::clause::ClauseSet;
use crate::error::BrokerError;
use crate::page::Paginated;
use crate::row::Row;
use crate::types::Verb;

/// Staleness policy for one read call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Serve a cached hit immediately, revalidate in the background
    CacheThenRevalidate,
    /// Skip the cache; still collapses into an identical in-flight read
    AlwaysFetch,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::CacheThenRevalidate
    }
}

/// Cache and single-flight key. Args are the serialized input, so two
/// clauses with different key order miss each other, never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueryKey {
    model: String,
    verb: &'static str,
    args: String,
}

impl QueryKey {
    fn new(model: &str, verb: Verb, args: &impl Serialize) -> Result<Self, BrokerError> {
        let args = serde_json::to_string(args).map_err(|e| {
            BrokerError::invalid_clause(format!("unserializable read input: {}", e))
        })?;
        Ok(Self {
            model: model.to_string(),
            verb: verb.as_str(),
            args,
        })
    }
}

/// One cached read result. Shared snapshots: callers get the `Arc`, never
/// a mutable view, so a refetch is the only way cached data changes.
#[derive(Clone)]
enum CachedValue {
    Rows(Arc<Vec<Row>>),
    Page(Arc<Paginated<Row>>),
    Maybe(Arc<Option<Row>>),
    Count(u64),
    Agg(Arc<Value>),
}

impl CachedValue {
    fn rows(&self) -> Option<Arc<Vec<Row>>> {
        match self {
            CachedValue::Rows(rows) => Some(rows.clone()),
            _ => None,
        }
    }

    fn page(&self) -> Option<Arc<Paginated<Row>>> {
        match self {
            CachedValue::Page(page) => Some(page.clone()),
            _ => None,
        }
    }

    fn maybe(&self) -> Option<Arc<Option<Row>>> {
        match self {
            CachedValue::Maybe(row) => Some(row.clone()),
            _ => None,
        }
    }

    fn count(&self) -> Option<u64> {
        match self {
            CachedValue::Count(count) => Some(*count),
            _ => None,
        }
    }

    fn agg(&self) -> Option<Arc<Value>> {
        match self {
            CachedValue::Agg(value) => Some(value.clone()),
            _ => None,
        }
    }
}

type FlightResult = Result<CachedValue, BrokerError>;

struct ClientInner {
    broker: Arc<Broker>,
    cache: RwLock<HashMap<QueryKey, CachedValue>>,
    inflight: Mutex<HashMap<QueryKey, broadcast::Sender<FlightResult>>>,
}

/// Typed per-verb accessors over a shared broker. Reads share a result
/// cache and a single-flight table; mutations call straight through and
/// drop the affected model's cached reads. Cached read state is never
/// patched with mutation results - refetching is the one source of truth.
#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<ClientInner>,
}

impl BrokerClient {
    pub fn new(broker: Arc<Broker>) -> Self {
        let inner = Arc::new(ClientInner {
            broker: broker.clone(),
            cache: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        });
        spawn_invalidation_listener(broker.subscribe_invalidation(), Arc::downgrade(&inner));
        Self { inner }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.inner.broker
    }

    /// Handle bound to one model name
    pub fn model(&self, name: impl Into<String>) -> ModelClient {
        ModelClient {
            client: self.clone(),
            model: name.into(),
        }
    }

    /// Number of cached read entries currently held
    pub async fn cached_reads(&self) -> usize {
        self.inner.cache.read().await.len()
    }

    // ---- reads ----

    pub async fn fetch_many(
        &self,
        model: &str,
        clauses: ClauseSet,
    ) -> Result<Arc<Vec<Row>>, BrokerError> {
        self.fetch_many_with(model, clauses, CachePolicy::default())
            .await
    }

    pub async fn fetch_many_with(
        &self,
        model: &str,
        clauses: ClauseSet,
        policy: CachePolicy,
    ) -> Result<Arc<Vec<Row>>, BrokerError> {
        let key = QueryKey::new(model, Verb::FetchMany, &clauses)?;
        let broker = self.inner.broker.clone();
        let model = model.to_string();
        let value = self
            .read(key, policy, async move {
                broker
                    .fetch_many(&model, clauses)
                    .await
                    .map(|rows| CachedValue::Rows(Arc::new(rows)))
            })
            .await?;
        value.rows().ok_or_else(shape_mismatch)
    }

    /// Re-execute a list read, replacing the cached entry
    pub async fn refetch_many(
        &self,
        model: &str,
        clauses: ClauseSet,
    ) -> Result<Arc<Vec<Row>>, BrokerError> {
        self.fetch_many_with(model, clauses, CachePolicy::AlwaysFetch)
            .await
    }

    pub async fn fetch_by_id(
        &self,
        model: &str,
        id: &str,
        options: FetchByIdOptions,
    ) -> Result<Arc<Option<Row>>, BrokerError> {
        self.fetch_by_id_with(model, id, options, CachePolicy::default())
            .await
    }

    pub async fn fetch_by_id_with(
        &self,
        model: &str,
        id: &str,
        options: FetchByIdOptions,
        policy: CachePolicy,
    ) -> Result<Arc<Option<Row>>, BrokerError> {
        let key = QueryKey::new(model, Verb::FetchById, &(id, &options))?;
        let broker = self.inner.broker.clone();
        let model = model.to_string();
        let id = id.to_string();
        let value = self
            .read(key, policy, async move {
                broker
                    .fetch_by_id(&model, &id, options)
                    .await
                    .map(|row| CachedValue::Maybe(Arc::new(row)))
            })
            .await?;
        value.maybe().ok_or_else(shape_mismatch)
    }

    pub async fn refetch_by_id(
        &self,
        model: &str,
        id: &str,
        options: FetchByIdOptions,
    ) -> Result<Arc<Option<Row>>, BrokerError> {
        self.fetch_by_id_with(model, id, options, CachePolicy::AlwaysFetch)
            .await
    }

    pub async fn fetch_paginated(
        &self,
        model: &str,
        request: FetchPaginatedRequest,
    ) -> Result<Arc<Paginated<Row>>, BrokerError> {
        self.fetch_paginated_with(model, request, CachePolicy::default())
            .await
    }

    pub async fn fetch_paginated_with(
        &self,
        model: &str,
        request: FetchPaginatedRequest,
        policy: CachePolicy,
    ) -> Result<Arc<Paginated<Row>>, BrokerError> {
        let key = QueryKey::new(model, Verb::FetchPaginated, &request)?;
        let broker = self.inner.broker.clone();
        let model = model.to_string();
        let value = self
            .read(key, policy, async move {
                broker
                    .fetch_paginated(&model, request)
                    .await
                    .map(|page| CachedValue::Page(Arc::new(page)))
            })
            .await?;
        value.page().ok_or_else(shape_mismatch)
    }

    pub async fn refetch_paginated(
        &self,
        model: &str,
        request: FetchPaginatedRequest,
    ) -> Result<Arc<Paginated<Row>>, BrokerError> {
        self.fetch_paginated_with(model, request, CachePolicy::AlwaysFetch)
            .await
    }

    pub async fn count(
        &self,
        model: &str,
        where_clause: Option<Value>,
        policy: CachePolicy,
    ) -> Result<u64, BrokerError> {
        let key = QueryKey::new(model, Verb::Count, &where_clause)?;
        let broker = self.inner.broker.clone();
        let model = model.to_string();
        let value = self
            .read(key, policy, async move {
                broker
                    .count(&model, where_clause)
                    .await
                    .map(CachedValue::Count)
            })
            .await?;
        value.count().ok_or_else(shape_mismatch)
    }

    pub async fn aggregate(
        &self,
        model: &str,
        input: AggregateInput,
        policy: CachePolicy,
    ) -> Result<Arc<Value>, BrokerError> {
        let key = QueryKey::new(model, Verb::Aggregate, &input)?;
        let broker = self.inner.broker.clone();
        let model = model.to_string();
        let value = self
            .read(key, policy, async move {
                broker
                    .aggregate(&model, input)
                    .await
                    .map(|v| CachedValue::Agg(Arc::new(v)))
            })
            .await?;
        value.agg().ok_or_else(shape_mismatch)
    }

    // ---- mutations ----

    pub async fn create_one(&self, model: &str, input: CreateOneInput) -> Result<Row, BrokerError> {
        let row = self.inner.broker.create_one(model, input).await?;
        self.invalidate_model(model).await;
        Ok(row)
    }

    pub async fn create_many(
        &self,
        model: &str,
        input: CreateManyInput,
    ) -> Result<CreateManyResult, BrokerError> {
        let result = self.inner.broker.create_many(model, input).await?;
        self.invalidate_model(model).await;
        Ok(result)
    }

    pub async fn update_one(&self, model: &str, input: UpdateOneInput) -> Result<Row, BrokerError> {
        let row = self.inner.broker.update_one(model, input).await?;
        self.invalidate_model(model).await;
        Ok(row)
    }

    pub async fn update_many(
        &self,
        model: &str,
        input: UpdateManyInput,
    ) -> Result<MutationCount, BrokerError> {
        let result = self.inner.broker.update_many(model, input).await?;
        self.invalidate_model(model).await;
        Ok(result)
    }

    pub async fn delete_one(&self, model: &str, input: DeleteOneInput) -> Result<Row, BrokerError> {
        let row = self.inner.broker.delete_one(model, input).await?;
        self.invalidate_model(model).await;
        Ok(row)
    }

    pub async fn delete_many(
        &self,
        model: &str,
        input: DeleteManyInput,
    ) -> Result<MutationCount, BrokerError> {
        let result = self.inner.broker.delete_many(model, input).await?;
        self.invalidate_model(model).await;
        Ok(result)
    }

    pub async fn upsert(&self, model: &str, input: UpsertInput) -> Result<UpsertResult, BrokerError> {
        let result = self.inner.broker.upsert(model, input).await?;
        self.invalidate_model(model).await;
        Ok(result)
    }

    /// Broadcast the broker-wide invalidation and drop the local cache now,
    /// so this client's next read misses without waiting on the listener
    pub async fn clear_cache(&self) -> ClearCacheResult {
        let result = self.inner.broker.clear_cache();
        self.inner.cache.write().await.clear();
        result
    }

    pub async fn list_available_models(&self) -> Vec<String> {
        self.inner.broker.list_available_models().await
    }

    // ---- internals ----

    async fn read(
        &self,
        key: QueryKey,
        policy: CachePolicy,
        load: impl Future<Output = FlightResult> + Send + 'static,
    ) -> FlightResult {
        if policy == CachePolicy::CacheThenRevalidate {
            let hit = self.inner.cache.read().await.get(&key).cloned();
            if let Some(value) = hit {
                // Serve the hit now; the dropped receiver detaches only this
                // caller, the revalidation flight still lands in the cache
                drop(self.join_flight(key, load).await);
                return Ok(value);
            }
        }
        let mut rx = self.join_flight(key, load).await;
        match rx.recv().await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::StoreUnavailable(
                "read task dropped before completing".to_string(),
            )),
        }
    }

    /// Join the in-flight read for `key`, or start one. The flight runs in
    /// its own task: a caller going away never cancels it for the others.
    async fn join_flight(
        &self,
        key: QueryKey,
        load: impl Future<Output = FlightResult> + Send + 'static,
    ) -> broadcast::Receiver<FlightResult> {
        let mut inflight = self.inner.inflight.lock().await;
        if let Some(tx) = inflight.get(&key) {
            return tx.subscribe();
        }
        let (tx, rx) = broadcast::channel(1);
        inflight.insert(key.clone(), tx.clone());

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let result = load.await;
            if let Some(inner) = weak.upgrade() {
                // Cache before unregistering, so a reader that just missed
                // the flight table finds the fresh entry
                if let Ok(value) = &result {
                    inner.cache.write().await.insert(key.clone(), value.clone());
                }
                inner.inflight.lock().await.remove(&key);
            }
            // Every waiter may have detached; a failed send is fine
            let _ = tx.send(result);
        });
        rx
    }

    async fn invalidate_model(&self, model: &str) {
        let mut cache = self.inner.cache.write().await;
        cache.retain(|key, _| key.model != model);
        debug!(model, "cached reads dropped after mutation");
    }
}

fn spawn_invalidation_listener(
    mut events: broadcast::Receiver<CacheEvent>,
    inner: Weak<ClientInner>,
) {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "invalidation events lagged, dropping whole cache");
                    CacheEvent::ClearAll
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let inner = match inner.upgrade() {
                Some(inner) => inner,
                None => break,
            };
            match event {
                CacheEvent::ClearAll => inner.cache.write().await.clear(),
                CacheEvent::Model(model) => {
                    inner.cache.write().await.retain(|key, _| key.model != model)
                }
            }
        }
    });
}

fn shape_mismatch() -> BrokerError {
    BrokerError::StoreUnavailable("cached read has an unexpected shape".to_string())
}

/// Accessors for one model, forwarding to the shared client
#[derive(Clone)]
pub struct ModelClient {
    client: BrokerClient,
    model: String,
}

impl ModelClient {
    pub fn name(&self) -> &str {
        &self.model
    }

    pub async fn fetch_many(&self, clauses: ClauseSet) -> Result<Arc<Vec<Row>>, BrokerError> {
        self.client.fetch_many(&self.model, clauses).await
    }

    pub async fn refetch_many(&self, clauses: ClauseSet) -> Result<Arc<Vec<Row>>, BrokerError> {
        self.client.refetch_many(&self.model, clauses).await
    }

    pub async fn fetch_by_id(
        &self,
        id: &str,
        options: FetchByIdOptions,
    ) -> Result<Arc<Option<Row>>, BrokerError> {
        self.client.fetch_by_id(&self.model, id, options).await
    }

    pub async fn refetch_by_id(
        &self,
        id: &str,
        options: FetchByIdOptions,
    ) -> Result<Arc<Option<Row>>, BrokerError> {
        self.client.refetch_by_id(&self.model, id, options).await
    }

    pub async fn fetch_paginated(
        &self,
        request: FetchPaginatedRequest,
    ) -> Result<Arc<Paginated<Row>>, BrokerError> {
        self.client.fetch_paginated(&self.model, request).await
    }

    pub async fn refetch_paginated(
        &self,
        request: FetchPaginatedRequest,
    ) -> Result<Arc<Paginated<Row>>, BrokerError> {
        self.client.refetch_paginated(&self.model, request).await
    }

    pub async fn count(&self, where_clause: Option<Value>) -> Result<u64, BrokerError> {
        self.client
            .count(&self.model, where_clause, CachePolicy::default())
            .await
    }

    pub async fn aggregate(&self, input: AggregateInput) -> Result<Arc<Value>, BrokerError> {
        self.client
            .aggregate(&self.model, input, CachePolicy::default())
            .await
    }

    pub async fn create_one(&self, input: CreateOneInput) -> Result<Row, BrokerError> {
        self.client.create_one(&self.model, input).await
    }

    pub async fn create_many(&self, input: CreateManyInput) -> Result<CreateManyResult, BrokerError> {
        self.client.create_many(&self.model, input).await
    }

    pub async fn update_one(&self, input: UpdateOneInput) -> Result<Row, BrokerError> {
        self.client.update_one(&self.model, input).await
    }

    pub async fn update_many(&self, input: UpdateManyInput) -> Result<MutationCount, BrokerError> {
        self.client.update_many(&self.model, input).await
    }

    pub async fn delete_one(&self, input: DeleteOneInput) -> Result<Row, BrokerError> {
        self.client.delete_one(&self.model, input).await
    }

    pub async fn delete_many(&self, input: DeleteManyInput) -> Result<MutationCount, BrokerError> {
        self.client.delete_many(&self.model, input).await
    }

    pub async fn upsert(&self, input: UpsertInput) -> Result<UpsertResult, BrokerError> {
        self.client.upsert(&self.model, input).await
    }
}
