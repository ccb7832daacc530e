mod common;

use anyhow::Result;
use serde_json::{json, Value};

use modelbroker::broker::{Broker, FetchPaginatedRequest};
use modelbroker::clause::ClauseSet;
use modelbroker::config::{BrokerConfig, Environment};

// fetchPaginated: page math, metadata and clause interaction.

fn page_request(page: i64, limit: i64, clauses: ClauseSet) -> FetchPaginatedRequest {
    FetchPaginatedRequest {
        clauses,
        page: Some(page),
        limit: Some(limit),
    }
}

fn titles(rows: &[modelbroker::row::Row]) -> Vec<String> {
    rows.iter()
        .filter_map(|r| r.get("title").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn middle_page_carries_full_metadata() -> Result<()> {
    let broker = common::task_broker().await;
    common::seed_tasks(&broker, 25).await;

    let clauses = ClauseSet {
        order_by: Some(json!({ "priority": "asc" })),
        ..Default::default()
    };
    let page = broker
        .fetch_paginated("task", page_request(2, 10, clauses))
        .await?;

    assert_eq!(page.meta.page, 2);
    assert_eq!(page.meta.limit, 10);
    assert_eq!(page.meta.total, 25);
    assert_eq!(page.meta.total_pages, 3);
    assert!(page.meta.has_next_page);
    assert!(page.meta.has_prev_page);

    assert_eq!(page.data.len(), 10);
    let expected: Vec<String> = (11..=20).map(|i| format!("task-{:02}", i)).collect();
    assert_eq!(titles(&page.data), expected);
    Ok(())
}

#[tokio::test]
async fn missing_page_coordinates_fall_back_to_defaults() -> Result<()> {
    let broker = common::task_broker().await;
    common::seed_tasks(&broker, 15).await;

    let page = broker
        .fetch_paginated("task", FetchPaginatedRequest::default())
        .await?;
    assert_eq!(page.meta.page, 1);
    assert_eq!(page.meta.limit, 10);
    assert_eq!(page.data.len(), 10);
    assert!(page.meta.has_next_page);
    assert!(!page.meta.has_prev_page);
    Ok(())
}

#[tokio::test]
async fn page_coordinates_below_one_are_rejected() -> Result<()> {
    let broker = common::task_broker().await;

    let err = broker
        .fetch_paginated("task", page_request(0, 10, ClauseSet::default()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_RANGE");

    let err = broker
        .fetch_paginated("task", page_request(1, -1, ClauseSet::default()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_RANGE");
    Ok(())
}

#[tokio::test]
async fn pages_past_the_end_are_empty_not_errors() -> Result<()> {
    let broker = common::task_broker().await;
    common::seed_tasks(&broker, 25).await;

    let page = broker
        .fetch_paginated("task", page_request(9, 10, ClauseSet::default()))
        .await?;
    assert!(page.data.is_empty());
    assert_eq!(page.meta.total, 25);
    assert_eq!(page.meta.total_pages, 3);
    assert!(!page.meta.has_next_page);
    assert!(page.meta.has_prev_page);
    Ok(())
}

#[tokio::test]
async fn total_counts_the_filtered_set_not_the_table() -> Result<()> {
    let broker = common::task_broker().await;
    common::seed_tasks(&broker, 25).await;

    // Even-numbered seeds are done: 12 of 25
    let clauses = ClauseSet {
        where_clause: Some(json!({ "done": true })),
        order_by: Some(json!({ "priority": "asc" })),
        ..Default::default()
    };
    let page = broker
        .fetch_paginated("task", page_request(2, 5, clauses))
        .await?;

    assert_eq!(page.meta.total, 12);
    assert_eq!(page.meta.total_pages, 3);
    assert_eq!(page.data.len(), 5);
    assert_eq!(
        titles(&page.data),
        vec!["task-12", "task-14", "task-16", "task-18", "task-20"]
    );
    Ok(())
}

#[tokio::test]
async fn explicit_skip_take_conflict_with_page_coordinates() -> Result<()> {
    let broker = common::task_broker().await;

    let clauses = ClauseSet {
        skip: Some(5),
        ..Default::default()
    };
    let err = broker
        .fetch_paginated("task", page_request(1, 10, clauses))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_CLAUSE");

    let clauses = ClauseSet {
        take: Some(5),
        ..Default::default()
    };
    let err = broker
        .fetch_paginated("task", page_request(1, 10, clauses))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_CLAUSE");
    Ok(())
}

#[tokio::test]
async fn oversized_limits_are_clamped_to_the_cap() -> Result<()> {
    let config = BrokerConfig {
        environment: Environment::Development,
        max_take: Some(5),
        max_where_depth: 10,
        op_timeout_ms: None,
        debug_logging: false,
    };
    let broker = Broker::with_config(
        common::registry().await,
        common::memory_store().await,
        config,
    );
    common::seed_tasks(&broker, 12).await;

    let page = broker
        .fetch_paginated("task", page_request(1, 50, ClauseSet::default()))
        .await?;
    assert_eq!(page.meta.limit, 5);
    assert_eq!(page.data.len(), 5);
    assert_eq!(page.meta.total, 12);
    assert_eq!(page.meta.total_pages, 3);
    Ok(())
}

#[tokio::test]
async fn request_deserializes_from_the_wire_shape() -> Result<()> {
    let request: FetchPaginatedRequest = serde_json::from_value(json!({
        "page": 2,
        "limit": 10,
        "where": { "done": false },
        "orderBy": { "priority": "desc" }
    }))?;
    assert_eq!(request.page, Some(2));
    assert_eq!(request.limit, Some(10));
    assert_eq!(request.clauses.where_clause, Some(json!({ "done": false })));
    assert_eq!(
        request.clauses.order_by,
        Some(json!({ "priority": "desc" }))
    );
    Ok(())
}
