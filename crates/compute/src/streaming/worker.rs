use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use rayon::prelude::*;
use rota_core::{ConfigurationError, StreamItemError};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{error, info};

/// Background compute for stream items.
///
/// Must return exactly one result per input item, in input order. A length
/// mismatch fails the whole stream.
#[async_trait]
pub trait BatchWorker: Send + Sync {
    async fn process_batch(&self, items: &[Value]) -> Vec<Result<Value, StreamItemError>>;
}

/// Per-item function run by a [`PoolWorker`].
pub type ItemFn = dyn Fn(&Value) -> Result<Value, StreamItemError> + Send + Sync;

/// Runs a CPU-bound per-item function on a rayon pool, off the loop.
///
/// The loop only awaits the answer; a panicking item becomes an item error.
pub struct PoolWorker {
    pool: Arc<rayon::ThreadPool>,
    f: Arc<ItemFn>,
}

impl PoolWorker {
    pub fn new(
        threads: usize,
        f: impl Fn(&Value) -> Result<Value, StreamItemError> + Send + Sync + 'static,
    ) -> Result<Self, ConfigurationError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("rota-worker-{i}"))
            .build()
            .map_err(|e| ConfigurationError::Invalid(format!("worker pool: {e}")))?;
        info!(threads = pool.current_num_threads(), "Worker pool started");
        Ok(Self {
            pool: Arc::new(pool),
            f: Arc::new(f),
        })
    }
}

#[async_trait]
impl BatchWorker for PoolWorker {
    async fn process_batch(&self, items: &[Value]) -> Vec<Result<Value, StreamItemError>> {
        let batch: Vec<Value> = items.to_vec();
        let len = batch.len();
        let f = Arc::clone(&self.f);
        let (tx, rx) = oneshot::channel();

        self.pool.spawn(move || {
            let results: Vec<_> = batch
                .par_iter()
                .map(|item| {
                    catch_unwind(AssertUnwindSafe(|| f(item))).unwrap_or_else(|_| {
                        Err(StreamItemError::Failed("item computation panicked".into()))
                    })
                })
                .collect();
            let _ = tx.send(results);
        });

        match rx.await {
            Ok(results) => results,
            Err(_) => {
                error!(items = len, "Worker pool dropped a batch");
                (0..len)
                    .map(|_| Err(StreamItemError::Failed("worker pool dropped the batch".into())))
                    .collect()
            }
        }
    }
}

impl std::fmt::Debug for PoolWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolWorker")
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn pool_worker_preserves_order_and_isolates_failures() {
        let worker = PoolWorker::new(2, |v| {
            let n = v.as_i64().unwrap_or_default();
            if n == 3 {
                Err(StreamItemError::Failed("three".into()))
            } else {
                Ok(json!(n * 10))
            }
        })
        .unwrap();

        let items: Vec<Value> = (0..6).map(|i| json!(i)).collect();
        let results = worker.process_batch(&items).await;
        assert_eq!(results.len(), 6);
        assert_eq!(results[0], Ok(json!(0)));
        assert_eq!(results[5], Ok(json!(50)));
        assert!(results[3].is_err());
    }

    #[tokio::test]
    async fn panicking_item_becomes_item_error() {
        let worker = PoolWorker::new(1, |v| {
            if v.is_null() {
                panic!("null item");
            }
            Ok(v.clone())
        })
        .unwrap();
        let results = worker.process_batch(&[json!(1), Value::Null]).await;
        assert_eq!(results[0], Ok(json!(1)));
        assert!(matches!(results[1], Err(StreamItemError::Failed(_))));
    }
}
