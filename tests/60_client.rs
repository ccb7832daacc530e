mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};

use modelbroker::broker::{
    AggregateInput, CreateOneInput, DeleteOneInput, FetchByIdOptions, UpdateOneInput,
};
use modelbroker::clause::ClauseSet;
use modelbroker::client::{BrokerClient, CachePolicy};
use modelbroker::row::into_row;
use modelbroker::store::Store;

// Client binding layer: request de-duplication, cache policies and the
// rule that mutations invalidate rather than patch cached reads.

async fn instrumented_client(delay: Duration) -> (BrokerClient, Arc<common::InstrumentedStore>) {
    let store = Arc::new(common::InstrumentedStore::new().with_delay(delay));
    let broker = common::broker_over(common::registry().await, store.clone());
    (BrokerClient::new(Arc::new(broker)), store)
}

#[tokio::test]
async fn identical_concurrent_reads_share_one_store_call() -> Result<()> {
    let (client, store) = instrumented_client(Duration::from_millis(100)).await;

    let (a, b) = tokio::join!(
        client.fetch_many("task", ClauseSet::default()),
        client.fetch_many("task", ClauseSet::default()),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(store.query_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn different_clauses_never_share_a_flight() -> Result<()> {
    let (client, store) = instrumented_client(Duration::from_millis(50)).await;

    let narrowed = ClauseSet {
        take: Some(5),
        ..Default::default()
    };
    let (a, b) = tokio::join!(
        client.fetch_many("task", ClauseSet::default()),
        client.fetch_many("task", narrowed),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(store.query_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn a_cancelled_caller_does_not_cancel_the_shared_read() -> Result<()> {
    let (client, store) = instrumented_client(Duration::from_millis(150)).await;

    let handle = tokio::spawn({
        let client = client.clone();
        async move { client.fetch_many("task", ClauseSet::default()).await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.abort();

    // The flight the aborted caller started is still running; join it
    let rows = client.fetch_many("task", ClauseSet::default()).await?;
    assert!(rows.is_empty());
    assert_eq!(store.query_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn cache_then_revalidate_serves_stale_then_catches_up() -> Result<()> {
    let store = common::memory_store().await;
    let broker = Arc::new(common::broker_over(common::registry().await, store.clone()));
    common::seed_tasks(&broker, 3).await;
    let client = BrokerClient::new(broker);

    let cold = client.fetch_many("task", ClauseSet::default()).await?;
    assert_eq!(cold.len(), 3);

    // Write behind the broker's back: no invalidation fires
    let row = into_row(json!({ "title": "direct", "status": "OPEN" })).unwrap();
    store.insert("task", vec![row], false).await?;

    let stale = client.fetch_many("task", ClauseSet::default()).await?;
    assert_eq!(stale.len(), 3, "hit should serve the cached snapshot");

    // The hit kicked off a background revalidation; give it a beat
    tokio::time::sleep(Duration::from_millis(100)).await;
    let fresh = client.fetch_many("task", ClauseSet::default()).await?;
    assert_eq!(fresh.len(), 4);
    Ok(())
}

#[tokio::test]
async fn refetch_and_always_fetch_skip_the_cache() -> Result<()> {
    let store = common::memory_store().await;
    let broker = Arc::new(common::broker_over(common::registry().await, store.clone()));
    common::seed_tasks(&broker, 3).await;
    let client = BrokerClient::new(broker);

    let cold = client.fetch_many("task", ClauseSet::default()).await?;
    assert_eq!(cold.len(), 3);

    let row = into_row(json!({ "title": "direct", "status": "OPEN" })).unwrap();
    store.insert("task", vec![row], false).await?;

    let refetched = client.refetch_many("task", ClauseSet::default()).await?;
    assert_eq!(refetched.len(), 4);

    assert_eq!(
        client
            .count("task", None, CachePolicy::AlwaysFetch)
            .await?,
        4
    );
    Ok(())
}

#[tokio::test]
async fn mutations_invalidate_only_their_model() -> Result<()> {
    let broker = Arc::new(common::task_broker().await);
    common::seed_tasks(&broker, 3).await;
    let client = BrokerClient::new(broker);

    client.fetch_many("task", ClauseSet::default()).await?;
    client.fetch_many("user", ClauseSet::default()).await?;
    assert_eq!(client.cached_reads().await, 2);

    client
        .create_one("user", CreateOneInput::new(json!({ "name": "ada" })))
        .await?;

    // The task read survived, the user read did not
    assert_eq!(client.cached_reads().await, 1);

    let tasks = client.fetch_many("task", ClauseSet::default()).await?;
    assert_eq!(tasks.len(), 3);
    Ok(())
}

#[tokio::test]
async fn a_mutation_is_visible_on_the_very_next_fetch() -> Result<()> {
    let broker = Arc::new(common::task_broker().await);
    common::seed_tasks(&broker, 3).await;
    let client = BrokerClient::new(broker);

    let before = client.fetch_many("task", ClauseSet::default()).await?;
    assert_eq!(before.len(), 3);

    client
        .create_one("task", CreateOneInput::new(json!({ "title": "task-04" })))
        .await?;

    // Invalidation is synchronous on the mutating client: no sleep needed
    let after = client.fetch_many("task", ClauseSet::default()).await?;
    assert_eq!(after.len(), 4);

    // The earlier snapshot was never patched in place
    assert_eq!(before.len(), 3);
    Ok(())
}

#[tokio::test]
async fn point_reads_reflect_updates_after_invalidation() -> Result<()> {
    let client = BrokerClient::new(Arc::new(common::task_broker().await));
    let tasks = client.model("task");
    assert_eq!(tasks.name(), "task");

    let created = tasks
        .create_one(CreateOneInput::new(json!({ "title": "point read" })))
        .await?;
    let id = created.get("id").and_then(Value::as_str).unwrap().to_string();

    let fetched = tasks.fetch_by_id(&id, FetchByIdOptions::default()).await?;
    let row = (*fetched).clone().expect("created row should be readable");
    assert_eq!(row.get("status"), Some(&json!("OPEN")));

    tasks
        .update_one(UpdateOneInput::new(&id, json!({ "status": "DONE" })))
        .await?;

    let fetched = tasks.fetch_by_id(&id, FetchByIdOptions::default()).await?;
    let row = (*fetched).clone().expect("updated row should be readable");
    assert_eq!(row.get("status"), Some(&json!("DONE")));

    tasks.delete_one(DeleteOneInput::new(&id)).await?;
    let fetched = tasks.fetch_by_id(&id, FetchByIdOptions::default()).await?;
    assert_eq!(*fetched, None);
    Ok(())
}

#[tokio::test]
async fn clear_cache_empties_this_client_immediately() -> Result<()> {
    let broker = Arc::new(common::task_broker().await);
    common::seed_tasks(&broker, 2).await;
    let client = BrokerClient::new(broker);

    client.fetch_many("task", ClauseSet::default()).await?;
    assert_eq!(client.cached_reads().await, 1);

    let result = client.clear_cache().await;
    assert!(result.success);
    assert_eq!(client.cached_reads().await, 0);
    Ok(())
}

#[tokio::test]
async fn broker_broadcast_reaches_every_subscribed_client() -> Result<()> {
    let broker = Arc::new(common::task_broker().await);
    common::seed_tasks(&broker, 2).await;
    let client = BrokerClient::new(broker.clone());
    let other = BrokerClient::new(broker.clone());

    client.fetch_many("task", ClauseSet::default()).await?;
    other.fetch_many("task", ClauseSet::default()).await?;
    assert_eq!(client.cached_reads().await, 1);
    assert_eq!(other.cached_reads().await, 1);

    broker.clear_cache();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(client.cached_reads().await, 0);
    assert_eq!(other.cached_reads().await, 0);
    Ok(())
}

#[tokio::test]
async fn counts_and_aggregates_cache_like_other_reads() -> Result<()> {
    let store = common::memory_store().await;
    let broker = Arc::new(common::broker_over(common::registry().await, store.clone()));
    common::seed_tasks(&broker, 3).await;
    let client = BrokerClient::new(broker);

    let cold = client
        .count("task", None, CachePolicy::CacheThenRevalidate)
        .await?;
    assert_eq!(cold, 3);

    let row = into_row(json!({ "title": "direct", "status": "OPEN" })).unwrap();
    store.insert("task", vec![row], false).await?;

    let stale = client
        .count("task", None, CachePolicy::CacheThenRevalidate)
        .await?;
    assert_eq!(stale, 3);
    assert_eq!(
        client
            .count("task", None, CachePolicy::AlwaysFetch)
            .await?,
        4
    );

    let input = AggregateInput {
        where_clause: None,
        group_by: Vec::new(),
        aggregate: json!({ "count": true }),
        having: None,
    };
    let result = client.model("task").aggregate(input).await?;
    assert_eq!(*result, json!({ "count": 4 }));
    Ok(())
}

#[tokio::test]
async fn read_errors_are_not_cached() -> Result<()> {
    let client = BrokerClient::new(Arc::new(common::task_broker().await));

    let clauses = ClauseSet {
        where_clause: Some(json!({ "bogus": 1 })),
        ..Default::default()
    };
    let err = client
        .fetch_many("task", clauses.clone())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "UNKNOWN_FIELD");
    assert_eq!(client.cached_reads().await, 0);

    // Same failing read again still surfaces the error, not a stale Ok
    let err = client.fetch_many("task", clauses).await.unwrap_err();
    assert_eq!(err.kind(), "UNKNOWN_FIELD");
    Ok(())
}

#[tokio::test]
async fn list_available_models_passes_through() -> Result<()> {
    let client = BrokerClient::new(Arc::new(common::task_broker().await));
    assert_eq!(
        client.list_available_models().await,
        vec!["task".to_string(), "user".to_string()]
    );
    Ok(())
}
