use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rota_core::{Priority, TaskProcessorError};
use serde_json::Value;

use super::types::{CancellationFlag, SliceOutcome, TaskId};

/// Read-only view handed to a task body for one slice.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub payload: Arc<Value>,
    /// Current queue level; drops by one after each failed attempt.
    pub priority: Priority,
    /// Budget for this slice. Bodies should return `Pending` once it is spent.
    pub slice: Duration,
    /// Failed attempts so far.
    pub failure_count: u32,
    pub cancellation: CancellationFlag,
}

impl TaskContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// A unit of sliced work the scheduler drives.
///
/// Each call runs one slice. Returning [`SliceOutcome::Pending`] hands control
/// back to the scheduler, which may preempt or requeue the task before the next
/// call. State kept in `self` survives interruption.
#[async_trait]
pub trait TaskProcessor: Send {
    async fn run_slice(&mut self, ctx: &TaskContext) -> Result<SliceOutcome, TaskProcessorError>;
}

/// Processor backed by a synchronous closure; one call per slice.
pub struct FnProcessor<F> {
    f: F,
}

/// Wrap a per-slice closure as a [`TaskProcessor`].
pub fn from_fn<F>(f: F) -> FnProcessor<F>
where
    F: FnMut(&TaskContext) -> Result<SliceOutcome, TaskProcessorError> + Send,
{
    FnProcessor { f }
}

/// Single-slice processor: the closure's value completes the task.
pub fn once<F>(
    mut f: F,
) -> FnProcessor<impl FnMut(&TaskContext) -> Result<SliceOutcome, TaskProcessorError> + Send>
where
    F: FnMut(&TaskContext) -> Result<Value, TaskProcessorError> + Send,
{
    from_fn(move |ctx| f(ctx).map(SliceOutcome::Complete))
}

#[async_trait]
impl<F> TaskProcessor for FnProcessor<F>
where
    F: FnMut(&TaskContext) -> Result<SliceOutcome, TaskProcessorError> + Send,
{
    async fn run_slice(&mut self, ctx: &TaskContext) -> Result<SliceOutcome, TaskProcessorError> {
        if ctx.is_cancelled() {
            return Err(TaskProcessorError::Cancelled);
        }
        (self.f)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> TaskContext {
        TaskContext {
            task_id: TaskId::new("t"),
            payload: Arc::new(json!({"n": 3})),
            priority: Priority::Normal,
            slice: Duration::from_millis(10),
            failure_count: 0,
            cancellation: CancellationFlag::new(),
        }
    }

    #[tokio::test]
    async fn once_completes_with_closure_value() {
        let mut p = once(|ctx| Ok(ctx.payload["n"].clone()));
        let out = p.run_slice(&ctx()).await.unwrap();
        assert_eq!(out, SliceOutcome::Complete(json!(3)));
    }

    #[tokio::test]
    async fn from_fn_keeps_state_between_slices() {
        let mut remaining = 2;
        let mut p = from_fn(move |_| {
            if remaining == 0 {
                Ok(SliceOutcome::Complete(json!("done")))
            } else {
                remaining -= 1;
                Ok(SliceOutcome::Pending)
            }
        });
        let c = ctx();
        assert_eq!(p.run_slice(&c).await.unwrap(), SliceOutcome::Pending);
        assert_eq!(p.run_slice(&c).await.unwrap(), SliceOutcome::Pending);
        assert_eq!(
            p.run_slice(&c).await.unwrap(),
            SliceOutcome::Complete(json!("done"))
        );
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let mut p = once(|_| Ok(json!(1)));
        let c = ctx();
        c.cancellation.cancel();
        assert!(matches!(
            p.run_slice(&c).await,
            Err(TaskProcessorError::Cancelled)
        ));
    }
}
