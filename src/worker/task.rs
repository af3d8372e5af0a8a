//! Task types and handler traits.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TaskError;
use crate::worker::state::TaskStatus;

/// Executes the payload of every task of one type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run the task. An `Err` marks the task as failed.
    async fn handle(&self, payload: Value) -> anyhow::Result<Value>;
}

/// Invoked with the result once a task has completed.
#[async_trait]
pub trait TaskCallback: Send + Sync {
    async fn on_complete(&self, task_id: &str, result: &Value) -> anyhow::Result<()>;
}

/// Adapts an async closure into a [`TaskHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn handle(&self, payload: Value) -> anyhow::Result<Value> {
        (self.f)(payload).await
    }
}

/// Adapts an async closure into a [`TaskCallback`].
pub struct FnCallback<F> {
    f: F,
}

impl<F, Fut> FnCallback<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskCallback for FnCallback<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn on_complete(&self, task_id: &str, result: &Value) -> anyhow::Result<()> {
        (self.f)(task_id.to_string(), result.clone()).await
    }
}

/// A unit of work tracked by the scheduler.
pub struct Task {
    pub id: String,
    pub task_type: String,
    pub payload: Value,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub callback: Option<Arc<dyn TaskCallback>>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(
        id: impl Into<String>,
        task_type: impl Into<String>,
        payload: Value,
        callback: Option<Arc<dyn TaskCallback>>,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            payload,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            callback,
        }
    }

    /// Transition to a new state, stamping the matching timestamp.
    pub fn transition_to(&mut self, target: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition_to(target) {
            return Err(TaskError::InvalidTransition {
                id: self.id.clone(),
                state: self.status.to_string(),
                target: target.to_string(),
            });
        }

        self.status = target;
        match target {
            TaskStatus::Running => self.started_at = Some(Utc::now()),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            TaskStatus::Pending => {}
        }
        Ok(())
    }

    /// Record a successful result.
    pub fn complete(&mut self, result: Value) -> Result<(), TaskError> {
        self.transition_to(TaskStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    /// Record a failure.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        self.transition_to(TaskStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Cloneable view without the callback.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            task_type: self.task_type.clone(),
            payload: self.payload.clone(),
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("task_type", &self.task_type)
            .field("status", &self.status)
            .field("created_at", &self.created_at)
            .field("started_at", &self.started_at)
            .field("completed_at", &self.completed_at)
            .field("error", &self.error)
            .field("has_callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub task_type: String,
    pub payload: Value,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl TaskSnapshot {
    /// Wall-clock time between dispatch and completion.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end.signed_duration_since(start)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_task_is_pending() {
        let task = Task::new("t1", "echo", json!({"x": 1}), None);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.started_at.is_none());
        assert!(task.result.is_none());
    }

    #[test]
    fn complete_stamps_timestamps() {
        let mut task = Task::new("t1", "echo", json!({}), None);
        task.transition_to(TaskStatus::Running).unwrap();
        assert!(task.started_at.is_some());

        task.complete(json!("done")).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
        assert_eq!(task.result, Some(json!("done")));
        assert!(task.snapshot().elapsed().is_some());
    }

    #[test]
    fn cannot_complete_pending_task() {
        let mut task = Task::new("t1", "echo", json!({}), None);
        let err = task.complete(json!(null)).unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.result.is_none());
    }

    #[test]
    fn fail_records_error() {
        let mut task = Task::new("t1", "echo", json!({}), None);
        task.transition_to(TaskStatus::Running).unwrap();
        task.fail("boom").unwrap();
        let snapshot = task.snapshot();
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn fn_handler_runs_closure() {
        let handler = FnHandler::new(|payload: Value| async move {
            Ok::<_, anyhow::Error>(json!({"got": payload}))
        });
        let out = handler.handle(json!(5)).await.unwrap();
        assert_eq!(out, json!({"got": 5}));
    }

    #[tokio::test]
    async fn fn_callback_receives_task_id() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let callback = FnCallback::new(move |id: String, result: Value| {
            let tx = tx.clone();
            async move {
                tx.send((id, result))?;
                Ok::<_, anyhow::Error>(())
            }
        });
        callback.on_complete("t9", &json!(1)).await.unwrap();
        assert_eq!(rx.recv().await, Some(("t9".to_string(), json!(1))));
    }
}
