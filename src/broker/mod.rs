// Verb Dispatcher - model name + verb + clauses in, validated store work out
pub mod inputs;
pub mod results;

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::clause::{
    ClauseSet, FilterNode, PayloadValidator, Projection, ProjectionTranslator, Translator,
    WhereTranslator,
};
use crate::config::{BrokerConfig, CONFIG};
use crate::error::BrokerError;
use crate::page::{self, Paginated};
use crate::registry::{ModelDescriptor, ModelRegistry, RegistrySnapshot};
use crate::row::{row_id, Row};
use crate::store::{InsertOutcome, Store, StoreError, StoreQuery};
use crate::types::Verb;

pub use inputs::{
    AggregateInput, CreateManyInput, CreateOneInput, DeleteManyInput, DeleteOneInput,
    FetchByIdOptions, FetchPaginatedRequest, UpdateManyInput, UpdateOneInput, UpsertInput,
};
pub use results::{
    ClearCacheResult, ConflictDetail, CreateManyResult, MutationCount, RowOutcome, RowStatus,
    UpsertBranch, UpsertResult,
};

/// Invalidation events fanned out to subscribed clients
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// Drop everything (explicit clearCache)
    ClearAll,
    /// Drop cached reads for one model (after a mutation)
    Model(String),
}

/// The verb dispatcher. Stateless between calls: every verb resolves the
/// model, translates and validates the clauses, then talks to the store.
/// Validation failures never reach the store.
pub struct Broker {
    registry: Arc<ModelRegistry>,
    store: Arc<dyn Store>,
    config: BrokerConfig,
    invalidation: broadcast::Sender<CacheEvent>,
}

impl Broker {
    pub fn new(registry: Arc<ModelRegistry>, store: Arc<dyn Store>) -> Self {
        Self::with_config(registry, store, CONFIG.clone())
    }

    pub fn with_config(
        registry: Arc<ModelRegistry>,
        store: Arc<dyn Store>,
        config: BrokerConfig,
    ) -> Self {
        let (invalidation, _) = broadcast::channel(64);
        Self {
            registry,
            store,
            config,
            invalidation,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Subscribe to cache invalidation events
    pub fn subscribe_invalidation(&self) -> broadcast::Receiver<CacheEvent> {
        self.invalidation.subscribe()
    }

    // ---- reads ----

    pub async fn fetch_many(&self, model: &str, clauses: ClauseSet) -> Result<Vec<Row>, BrokerError> {
        let (snapshot, descriptor) = self.model_view(model).await?;
        let mut query = self
            .translator(&snapshot)
            .translate(&descriptor, &clauses, Verb::FetchMany)?;
        self.cap_take(&mut query);
        if self.config.debug_logging {
            debug!(model, query = ?query, "fetchMany translated");
        }
        self.run_store(
            Verb::FetchMany,
            self.store.query(&descriptor.collection, &query),
        )
        .await
    }

    /// Point read; absence is `Ok(None)`, not an error
    pub async fn fetch_by_id(
        &self,
        model: &str,
        id: &str,
        options: FetchByIdOptions,
    ) -> Result<Option<Row>, BrokerError> {
        if id.trim().is_empty() {
            return Err(BrokerError::MissingId);
        }
        let (snapshot, descriptor) = self.model_view(model).await?;
        let projection = ProjectionTranslator::new(&snapshot).translate(
            &descriptor,
            options.select.as_ref(),
            options.include.as_ref(),
        )?;
        let query = StoreQuery {
            filter: Some(FilterNode::id_equals(id)),
            take: Some(1),
            projection,
            ..Default::default()
        };
        let rows = self
            .run_store(
                Verb::FetchById,
                self.store.query(&descriptor.collection, &query),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn fetch_paginated(
        &self,
        model: &str,
        request: FetchPaginatedRequest,
    ) -> Result<Paginated<Row>, BrokerError> {
        if request.clauses.skip.is_some() || request.clauses.take.is_some() {
            return Err(BrokerError::invalid_clause(
                "fetchPaginated derives skip/take from page/limit",
            ));
        }
        let (page_no, mut limit) = page::normalize(request.page, request.limit)?;
        if let Some(cap) = self.config.max_take {
            if limit > cap {
                warn!(requested = limit, cap, "page limit exceeds cap, clamping");
                limit = cap;
            }
        }

        let (snapshot, descriptor) = self.model_view(model).await?;
        let mut query =
            self.translator(&snapshot)
                .translate(&descriptor, &request.clauses, Verb::FetchPaginated)?;
        let (skip, take) = page::to_skip_take(page_no, limit);
        query.skip = Some(skip);
        query.take = Some(take);
        let filter = query.filter.clone();

        // Page read and count run concurrently; skew under concurrent
        // writers is accepted, the meta reflects the count's instant
        let collection = descriptor.collection.as_str();
        let (rows, total) = self
            .run_store(Verb::FetchPaginated, async {
                futures::try_join!(
                    self.store.query(collection, &query),
                    self.store.count(collection, filter.as_ref())
                )
            })
            .await?;

        let meta = page::to_meta(total, page_no, limit, rows.len());
        Ok(Paginated { data: rows, meta })
    }

    pub async fn count(&self, model: &str, where_clause: Option<Value>) -> Result<u64, BrokerError> {
        let (snapshot, descriptor) = self.model_view(model).await?;
        let clauses = ClauseSet {
            where_clause,
            ..Default::default()
        };
        let query = self
            .translator(&snapshot)
            .translate(&descriptor, &clauses, Verb::Count)?;
        self.run_store(
            Verb::Count,
            self.store.count(&descriptor.collection, query.filter.as_ref()),
        )
        .await
    }

    pub async fn aggregate(&self, model: &str, input: AggregateInput) -> Result<Value, BrokerError> {
        let (snapshot, descriptor) = self.model_view(model).await?;
        let plan = self.translator(&snapshot).translate_aggregate(
            &descriptor,
            input.where_clause.as_ref(),
            &input.group_by,
            &input.aggregate,
            input.having.as_ref(),
        )?;
        if self.config.debug_logging {
            debug!(model, plan = ?plan, "aggregate translated");
        }
        self.run_store(
            Verb::Aggregate,
            self.store.aggregate(&descriptor.collection, &plan),
        )
        .await
    }

    // ---- mutations ----

    pub async fn create_one(&self, model: &str, input: CreateOneInput) -> Result<Row, BrokerError> {
        let (snapshot, descriptor) = self.model_view(model).await?;
        let row = PayloadValidator::new(&descriptor).validate_create(&input.data)?;
        let projection = ProjectionTranslator::new(&snapshot).translate(
            &descriptor,
            input.select.as_ref(),
            input.include.as_ref(),
        )?;

        let outcomes = self
            .run_store(
                Verb::CreateOne,
                self.store.insert(&descriptor.collection, vec![row], false),
            )
            .await?;
        let row = match outcomes.into_iter().next() {
            Some(InsertOutcome::Created(row)) => row,
            _ => return Err(BrokerError::StoreUnavailable("insert returned no row".to_string())),
        };
        self.notify_model(model);
        self.shape_written(&descriptor, row, projection, Verb::CreateOne)
            .await
    }

    pub async fn create_many(
        &self,
        model: &str,
        input: CreateManyInput,
    ) -> Result<CreateManyResult, BrokerError> {
        let (_snapshot, descriptor) = self.model_view(model).await?;
        if input.data.is_empty() {
            return Ok(CreateManyResult {
                count: 0,
                outcomes: Vec::new(),
            });
        }

        let validator = PayloadValidator::new(&descriptor);
        let mut rows = Vec::with_capacity(input.data.len());
        for (index, data) in input.data.iter().enumerate() {
            // Abort before any store work, naming the offending row
            let row = validator
                .validate_create(data)
                .map_err(|e| BrokerError::invalid_clause(format!("data[{}]: {}", index, e)))?;
            rows.push(row);
        }

        let outcomes = self
            .run_store(
                Verb::CreateMany,
                self.store
                    .insert(&descriptor.collection, rows, input.skip_duplicates),
            )
            .await?;

        let mut result = CreateManyResult {
            count: 0,
            outcomes: Vec::with_capacity(outcomes.len()),
        };
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                InsertOutcome::Created(row) => {
                    result.count += 1;
                    result
                        .outcomes
                        .push(RowOutcome::created(index, row_id(&row).map(str::to_string)));
                }
                InsertOutcome::Duplicate { field, value } => {
                    result.outcomes.push(RowOutcome::duplicate(index, field, value));
                }
            }
        }
        if result.count > 0 {
            self.notify_model(model);
        }
        debug!(model, created = result.count, "createMany");
        Ok(result)
    }

    pub async fn update_one(&self, model: &str, input: UpdateOneInput) -> Result<Row, BrokerError> {
        if input.id.trim().is_empty() {
            return Err(BrokerError::MissingId);
        }
        let (snapshot, descriptor) = self.model_view(model).await?;
        let patch = PayloadValidator::new(&descriptor).validate_update(&input.data)?;
        let projection = ProjectionTranslator::new(&snapshot).translate(
            &descriptor,
            input.select.as_ref(),
            input.include.as_ref(),
        )?;

        let filter = FilterNode::id_equals(&input.id);
        let mut rows = self
            .run_store(
                Verb::UpdateOne,
                self.store
                    .update(&descriptor.collection, Some(&filter), &patch),
            )
            .await?;
        let row = rows
            .pop()
            .ok_or_else(|| BrokerError::not_found(format!("{} '{}'", model, input.id)))?;
        self.notify_model(model);
        self.shape_written(&descriptor, row, projection, Verb::UpdateOne)
            .await
    }

    pub async fn update_many(
        &self,
        model: &str,
        input: UpdateManyInput,
    ) -> Result<MutationCount, BrokerError> {
        let (_snapshot, descriptor) = self.model_view(model).await?;
        let filter = self.optional_filter(&descriptor, input.where_clause.as_ref())?;
        let patch = PayloadValidator::new(&descriptor).validate_update(&input.data)?;

        let rows = self
            .run_store(
                Verb::UpdateMany,
                self.store
                    .update(&descriptor.collection, filter.as_ref(), &patch),
            )
            .await?;
        if !rows.is_empty() {
            self.notify_model(model);
        }
        Ok(MutationCount {
            count: rows.len() as u64,
        })
    }

    pub async fn delete_one(&self, model: &str, input: DeleteOneInput) -> Result<Row, BrokerError> {
        if input.id.trim().is_empty() {
            return Err(BrokerError::MissingId);
        }
        let (snapshot, descriptor) = self.model_view(model).await?;
        let projection =
            ProjectionTranslator::new(&snapshot).translate(&descriptor, input.select.as_ref(), None)?;

        let filter = FilterNode::id_equals(&input.id);
        let mut rows = self
            .run_store(
                Verb::DeleteOne,
                self.store.delete(&descriptor.collection, Some(&filter)),
            )
            .await?;
        let row = rows
            .pop()
            .ok_or_else(|| BrokerError::not_found(format!("{} '{}'", model, input.id)))?;
        self.notify_model(model);
        // The row is gone; shape locally from what the store handed back
        Ok(match projection {
            Some(projection) => trim_row(&row, &projection),
            None => row,
        })
    }

    pub async fn delete_many(
        &self,
        model: &str,
        input: DeleteManyInput,
    ) -> Result<MutationCount, BrokerError> {
        let (_snapshot, descriptor) = self.model_view(model).await?;
        let filter = self.optional_filter(&descriptor, input.where_clause.as_ref())?;

        let rows = self
            .run_store(
                Verb::DeleteMany,
                self.store.delete(&descriptor.collection, filter.as_ref()),
            )
            .await?;
        if !rows.is_empty() {
            self.notify_model(model);
        }
        Ok(MutationCount {
            count: rows.len() as u64,
        })
    }

    /// Update the first row matching `where`, create from `create` when
    /// nothing matches. The result names the branch that ran.
    pub async fn upsert(&self, model: &str, input: UpsertInput) -> Result<UpsertResult, BrokerError> {
        let (snapshot, descriptor) = self.model_view(model).await?;
        let filter = self.optional_filter(&descriptor, Some(&input.where_clause))?;
        let projection = ProjectionTranslator::new(&snapshot).translate(
            &descriptor,
            input.select.as_ref(),
            input.include.as_ref(),
        )?;

        let probe = StoreQuery {
            filter: filter.clone(),
            take: Some(1),
            ..Default::default()
        };
        let mut matches = self
            .run_store(Verb::Upsert, self.store.query(&descriptor.collection, &probe))
            .await?;

        match matches.pop() {
            Some(existing) => {
                let id = row_id(&existing).map(str::to_string).ok_or_else(|| {
                    BrokerError::StoreUnavailable("store returned a row without an id".to_string())
                })?;
                let patch = PayloadValidator::new(&descriptor).validate_update(&input.update)?;
                let id_filter = FilterNode::id_equals(&id);
                let mut rows = self
                    .run_store(
                        Verb::Upsert,
                        self.store
                            .update(&descriptor.collection, Some(&id_filter), &patch),
                    )
                    .await?;
                let row = rows
                    .pop()
                    .ok_or_else(|| BrokerError::not_found(format!("{} '{}'", model, id)))?;
                self.notify_model(model);
                let row = self
                    .shape_written(&descriptor, row, projection, Verb::Upsert)
                    .await?;
                Ok(UpsertResult {
                    branch: UpsertBranch::Updated,
                    row,
                })
            }
            None => {
                let row = PayloadValidator::new(&descriptor).validate_create(&input.create)?;
                let outcomes = self
                    .run_store(
                        Verb::Upsert,
                        self.store.insert(&descriptor.collection, vec![row], false),
                    )
                    .await?;
                let row = match outcomes.into_iter().next() {
                    Some(InsertOutcome::Created(row)) => row,
                    _ => {
                        return Err(BrokerError::StoreUnavailable(
                            "insert returned no row".to_string(),
                        ))
                    }
                };
                self.notify_model(model);
                let row = self
                    .shape_written(&descriptor, row, projection, Verb::Upsert)
                    .await?;
                Ok(UpsertResult {
                    branch: UpsertBranch::Created,
                    row,
                })
            }
        }
    }

    // ---- cache + registry surface ----

    /// Broadcast a full cache reset to every subscribed client.
    /// Fire-and-forget: nobody listening is fine.
    pub fn clear_cache(&self) -> ClearCacheResult {
        let receivers = self.invalidation.send(CacheEvent::ClearAll).unwrap_or(0);
        info!(receivers, "cache clear broadcast");
        ClearCacheResult { success: true }
    }

    pub async fn list_available_models(&self) -> Vec<String> {
        self.registry
            .list_all()
            .await
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    // ---- internals ----

    async fn model_view(
        &self,
        model: &str,
    ) -> Result<(RegistrySnapshot, Arc<ModelDescriptor>), BrokerError> {
        let snapshot = self.registry.snapshot().await;
        let descriptor = snapshot.descriptor(model)?.clone();
        Ok((snapshot, descriptor))
    }

    fn translator<'a>(&self, snapshot: &'a RegistrySnapshot) -> Translator<'a> {
        Translator::new(snapshot, self.config.max_where_depth)
    }

    fn optional_filter(
        &self,
        descriptor: &ModelDescriptor,
        where_clause: Option<&Value>,
    ) -> Result<Option<FilterNode>, BrokerError> {
        match where_clause {
            Some(where_clause) => WhereTranslator::new(descriptor, self.config.max_where_depth)
                .translate(where_clause),
            None => Ok(None),
        }
    }

    /// Apply the store-enforced take cap to a list read
    fn cap_take(&self, query: &mut StoreQuery) {
        if let Some(cap) = self.config.max_take {
            match query.take {
                Some(take) if take > cap => {
                    warn!(requested = take, cap, "take exceeds configured cap, clamping");
                    query.take = Some(cap);
                }
                None => query.take = Some(cap),
                _ => {}
            }
        }
    }

    /// Wrap a store call in the configured timeout policy
    async fn run_store<T, F>(&self, verb: Verb, op: F) -> Result<T, BrokerError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match self.config.op_timeout() {
            Some(limit) => match timeout(limit, op).await {
                Ok(result) => result.map_err(BrokerError::from),
                Err(_) => {
                    warn!(verb = verb.as_str(), limit_ms = limit.as_millis() as u64, "store call timed out");
                    Err(BrokerError::Timeout(format!(
                        "{} exceeded {}ms",
                        verb.as_str(),
                        limit.as_millis()
                    )))
                }
            },
            None => op.await.map_err(BrokerError::from),
        }
    }

    /// Re-shape a written row per the requested projection. Scalar selects
    /// trim locally; relation projections re-read through the store so the
    /// declared links resolve.
    async fn shape_written(
        &self,
        descriptor: &ModelDescriptor,
        row: Row,
        projection: Option<Projection>,
        verb: Verb,
    ) -> Result<Row, BrokerError> {
        let projection = match projection {
            Some(projection) => projection,
            None => return Ok(row),
        };
        if projection.relations.is_empty() {
            return Ok(trim_row(&row, &projection));
        }
        let id = match row_id(&row).map(str::to_string) {
            Some(id) => id,
            None => return Ok(trim_row(&row, &projection)),
        };
        let query = StoreQuery {
            filter: Some(FilterNode::id_equals(&id)),
            take: Some(1),
            projection: Some(projection.clone()),
            ..Default::default()
        };
        let mut rows = self
            .run_store(verb, self.store.query(&descriptor.collection, &query))
            .await?;
        match rows.pop() {
            Some(shaped) => Ok(shaped),
            // Row vanished between write and re-read; fall back to the write result
            None => Ok(trim_row(&row, &projection)),
        }
    }

    fn notify_model(&self, model: &str) {
        let _ = self.invalidation.send(CacheEvent::Model(model.to_string()));
    }
}

fn trim_row(row: &Row, projection: &Projection) -> Row {
    match &projection.fields {
        Some(fields) => fields
            .iter()
            .map(|field| {
                (
                    field.clone(),
                    row.get(field).cloned().unwrap_or(Value::Null),
                )
            })
            .collect(),
        None => row.clone(),
    }
}
