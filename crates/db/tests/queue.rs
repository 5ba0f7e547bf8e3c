use assert_matches::assert_matches;
use circus_core::queue::{JobQueue, QueueError, QueueFilter, QueueState};
use circus_db::{PgJobQueue, PluginJobRepo, QueueRepo};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Payload {
    name: String,
}

fn payload(name: &str) -> Payload {
    Payload { name: name.into() }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_claim_order_is_priority_then_insertion(pool: PgPool) {
    let queue = PgJobQueue::<Payload>::new(pool);
    queue.enqueue("A", payload("a"), 0).await.unwrap();
    queue.enqueue("B", payload("b"), 0).await.unwrap();
    queue.enqueue("C", payload("c"), 5).await.unwrap();

    let mut order = Vec::new();
    while let Some(item) = queue.dequeue().await.unwrap() {
        assert_eq!(item.state, QueueState::Processing);
        assert!(item.started_at.is_some());
        order.push(item.job_id);
    }
    assert_eq!(order, ["C", "A", "B"]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_payload_round_trips_through_jsonb(pool: PgPool) {
    let queue = PgJobQueue::<Payload>::new(pool);
    queue.enqueue("job.1", payload("lung"), 1).await.unwrap();

    let item = queue.dequeue().await.unwrap().unwrap();
    assert_eq!(item.payload, payload("lung"));
    assert_eq!(item.priority, 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_duplicate_job_id_is_rejected(pool: PgPool) {
    let queue = PgJobQueue::<Payload>::new(pool);
    queue.enqueue("dup", payload("a"), 0).await.unwrap();
    let err = queue.enqueue("dup", payload("b"), 0).await.unwrap_err();
    assert_matches!(err, QueueError::DuplicateJobId(id) if id == "dup");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_settle_requires_processing_state(pool: PgPool) {
    let queue = PgJobQueue::<Payload>::new(pool);
    queue.enqueue("job.1", payload("a"), 0).await.unwrap();

    let err = queue.settle("job.1").await.unwrap_err();
    assert_matches!(err, QueueError::NotStarted(_));

    queue.dequeue().await.unwrap().unwrap();
    queue.settle("job.1").await.unwrap();
    assert!(queue.list(QueueFilter::All).await.unwrap().is_empty());

    let err = queue.settle("job.1").await.unwrap_err();
    assert_matches!(err, QueueError::NotStarted(_));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_empty_queue_dequeues_none(pool: PgPool) {
    let queue = PgJobQueue::<Payload>::new(pool);
    assert!(queue.dequeue().await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_list_filters_by_state(pool: PgPool) {
    let queue = PgJobQueue::<Payload>::new(pool.clone());
    queue.enqueue("one", payload("a"), 0).await.unwrap();
    queue.enqueue("two", payload("b"), 0).await.unwrap();
    queue.dequeue().await.unwrap();

    let waiting = queue.list(QueueFilter::State(QueueState::Wait)).await.unwrap();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].job_id, "two");

    let rows = QueueRepo::list(&pool, Some(QueueState::Processing)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].job_id, "one");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_undecodable_payload_is_reported_with_job_id(pool: PgPool) {
    QueueRepo::insert(&pool, "odd", &serde_json::json!([1, 2, 3]), 0)
        .await
        .unwrap();
    let queue = PgJobQueue::<Payload>::new(pool);

    let err = queue.dequeue().await.unwrap_err();
    assert_matches!(err, QueueError::Payload { job_id, .. } if job_id == "odd");

    // The row was claimed, so it can still be settled.
    queue.settle("odd").await.unwrap();
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_concurrent_claims_never_share_a_job(pool: PgPool) {
    let queue = std::sync::Arc::new(PgJobQueue::<Payload>::new(pool));
    for i in 0..20 {
        queue.enqueue(&format!("job.{i}"), payload("x"), 0).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(item) = queue.dequeue().await.unwrap() {
                claimed.push(item.job_id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 20);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_job_status_lifecycle(pool: PgPool) {
    PluginJobRepo::mark_processing(&pool, "job.9").await.unwrap();
    PluginJobRepo::store_results(&pool, "job.9", &serde_json::json!({"volume": 12}))
        .await
        .unwrap();
    PluginJobRepo::mark_finished(&pool, "job.9").await.unwrap();

    let job = PluginJobRepo::find_by_job_id(&pool, "job.9").await.unwrap().unwrap();
    assert_eq!(job.status, "finished");
    assert_eq!(job.results.unwrap()["volume"], 12);
    assert!(job.started_at.is_some());
    assert!(job.finished_at.is_some());

    PluginJobRepo::mark_failed(&pool, "job.10", "plugin crashed").await.unwrap();
    let job = PluginJobRepo::find_by_job_id(&pool, "job.10").await.unwrap().unwrap();
    assert_eq!(job.status, "failed");
    assert_eq!(job.error_message.as_deref(), Some("plugin crashed"));
}
