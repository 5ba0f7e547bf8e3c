//! In-process queue backed by a mutex-guarded vector.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{JobQueue, QueueError, QueueFilter, QueueItem, QueueState};
use crate::types::DbId;

/// Non-durable [`JobQueue`] for single-process deployments and tests.
///
/// Every operation runs under one lock, which makes the claim atomic.
pub struct MemoryQueue<P> {
    inner: Mutex<Inner<P>>,
}

struct Inner<P> {
    next_id: DbId,
    items: Vec<QueueItem<P>>,
}

impl<P> MemoryQueue<P> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                items: Vec::new(),
            }),
        }
    }
}

impl<P> Default for MemoryQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Dequeue order: higher priority first, then lower (earlier) id.
fn sort_key<P>(item: &QueueItem<P>) -> (std::cmp::Reverse<i32>, DbId) {
    (std::cmp::Reverse(item.priority), item.id)
}

#[async_trait]
impl<P> JobQueue<P> for MemoryQueue<P>
where
    P: Clone + Send + Sync + 'static,
{
    async fn enqueue(&self, job_id: &str, payload: P, priority: i32) -> Result<DbId, QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.items.iter().any(|i| i.job_id == job_id) {
            return Err(QueueError::DuplicateJobId(job_id.to_string()));
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let now = Utc::now();
        inner.items.push(QueueItem {
            id,
            job_id: job_id.to_string(),
            priority,
            payload,
            state: QueueState::Wait,
            created_at: now,
            updated_at: now,
            started_at: None,
        });
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<QueueItem<P>>, QueueError> {
        let mut inner = self.inner.lock().await;
        let Some(item) = inner
            .items
            .iter_mut()
            .filter(|i| i.state == QueueState::Wait)
            .min_by_key(|i| sort_key(i))
        else {
            return Ok(None);
        };

        let now = Utc::now();
        item.state = QueueState::Processing;
        item.started_at = Some(now);
        item.updated_at = now;
        Ok(Some(item.clone()))
    }

    async fn settle(&self, job_id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let position = inner
            .items
            .iter()
            .position(|i| i.job_id == job_id && i.state == QueueState::Processing)
            .ok_or_else(|| QueueError::NotStarted(job_id.to_string()))?;
        inner.items.remove(position);
        Ok(())
    }

    async fn list(&self, filter: QueueFilter) -> Result<Vec<QueueItem<P>>, QueueError> {
        let inner = self.inner.lock().await;
        let mut items: Vec<QueueItem<P>> = inner
            .items
            .iter()
            .filter(|i| filter.matches(i.state))
            .cloned()
            .collect();
        items.sort_by_key(sort_key);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;

    use super::*;

    fn queue() -> MemoryQueue<String> {
        MemoryQueue::new()
    }

    #[tokio::test]
    async fn dequeue_respects_priority_then_insertion() {
        let q = queue();
        q.enqueue("A", "a".into(), 0).await.unwrap();
        q.enqueue("B", "b".into(), 0).await.unwrap();
        q.enqueue("C", "c".into(), 1).await.unwrap();

        let order: Vec<String> = [
            q.dequeue().await.unwrap().unwrap(),
            q.dequeue().await.unwrap().unwrap(),
            q.dequeue().await.unwrap().unwrap(),
        ]
        .into_iter()
        .map(|i| i.job_id)
        .collect();
        assert_eq!(order, ["C", "A", "B"]);
    }

    #[tokio::test]
    async fn duplicate_job_id_is_rejected() {
        let q = queue();
        q.enqueue("A", "a".into(), 0).await.unwrap();
        assert_matches!(
            q.enqueue("A", "again".into(), 5).await,
            Err(QueueError::DuplicateJobId(id)) if id == "A"
        );
    }

    #[tokio::test]
    async fn settle_requires_processing_state() {
        let q = queue();
        q.enqueue("X", "x".into(), 0).await.unwrap();

        let err = q.settle("X").await.unwrap_err();
        assert!(err.to_string().contains("before it gets started"));

        let claimed = q.dequeue().await.unwrap().unwrap();
        assert_eq!(claimed.state, QueueState::Processing);
        assert!(claimed.started_at.is_some());

        q.settle("X").await.unwrap();
        assert!(q.list(QueueFilter::All).await.unwrap().is_empty());

        // Settling twice is the same bug class as settling too early.
        assert_matches!(q.settle("X").await, Err(QueueError::NotStarted(_)));
    }

    #[tokio::test]
    async fn empty_dequeue_returns_none_repeatedly() {
        let q = queue();
        for _ in 0..5 {
            assert!(q.dequeue().await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn list_filters_by_state_in_dequeue_order() {
        let q = queue();
        q.enqueue("low", "l".into(), -1).await.unwrap();
        q.enqueue("mid", "m".into(), 0).await.unwrap();
        q.enqueue("high", "h".into(), 3).await.unwrap();
        q.dequeue().await.unwrap();

        let waiting: Vec<_> = q
            .list(QueueFilter::State(QueueState::Wait))
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.job_id)
            .collect();
        assert_eq!(waiting, ["mid", "low"]);

        let processing = q.list(QueueFilter::State(QueueState::Processing)).await.unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].job_id, "high");

        assert_eq!(q.list(QueueFilter::All).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn concurrent_claims_never_share_an_item() {
        let q: Arc<MemoryQueue<String>> = Arc::new(queue());
        for i in 0..20 {
            q.enqueue(&format!("job{i}"), String::new(), 0).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let q = Arc::clone(&q);
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                while let Some(item) = q.dequeue().await.unwrap() {
                    mine.push(item.job_id);
                }
                mine
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 20);
    }
}
