//! Task scheduler: FIFO queue, bounded concurrency, handler dispatch.
//!
//! The scheduler owns three containers: the pending queue, the running set
//! and the completed set. A task lives in exactly one of them; every move
//! between containers happens under a single write lock on the task book.
//!
//! `run()` is the dispatch loop. It moves tasks from the head of the queue
//! into the running set while fewer than `max_concurrent_tasks` are running,
//! and executes each one on its own tokio task. It then sleeps until a
//! submit, a completion or `stop()` wakes it, or the poll interval elapses.
//!
//! The completed set is never pruned.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Notify, RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{ConfigError, TaskError};
use crate::worker::registry::HandlerRegistry;
use crate::worker::state::TaskStatus;
use crate::worker::task::{Task, TaskCallback, TaskHandler, TaskSnapshot};

/// Counts of tasks per container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
}

/// Lifecycle events broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Started { id: String },
    Completed { id: String },
    Failed { id: String, error: String },
    Cancelled { id: String },
    /// The task stays completed; only the callback failed.
    CallbackFailed { id: String, error: String },
}

impl TaskEvent {
    /// ID of the task the event refers to.
    pub fn task_id(&self) -> &str {
        match self {
            Self::Started { id }
            | Self::Completed { id }
            | Self::Failed { id, .. }
            | Self::Cancelled { id }
            | Self::CallbackFailed { id, .. } => id,
        }
    }
}

#[derive(Default)]
struct TaskBook {
    pending: VecDeque<Task>,
    running: HashMap<String, Task>,
    completed: HashMap<String, Task>,
}

impl TaskBook {
    /// Running first, then completed, then pending.
    fn find(&self, id: &str) -> Option<&Task> {
        self.running
            .get(id)
            .or_else(|| self.completed.get(id))
            .or_else(|| self.pending.iter().find(|t| t.id == id))
    }
}

/// A task moved into the running set, ready to execute.
struct Dispatch {
    id: String,
    task_type: String,
    payload: Value,
}

/// Schedules tasks onto registered handlers with at most K running at once.
#[derive(Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
    handlers: Arc<HandlerRegistry>,
    book: Arc<RwLock<TaskBook>>,
    active: Arc<AtomicBool>,
    wake: Arc<Notify>,
    events: broadcast::Sender<TaskEvent>,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(config: SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events, _rx) = broadcast::channel(config.event_capacity);
        Ok(Self {
            config,
            handlers: Arc::new(HandlerRegistry::new()),
            book: Arc::new(RwLock::new(TaskBook::default())),
            active: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            events,
        })
    }

    /// Register the handler for a task type, replacing any existing one.
    pub async fn register_handler(
        &self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) {
        self.handlers.register(task_type, handler).await;
    }

    /// Access the handler registry.
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Queue a task. Returns immediately; rejects IDs already known.
    pub async fn submit(
        &self,
        id: impl Into<String>,
        task_type: impl Into<String>,
        payload: Value,
        callback: Option<Arc<dyn TaskCallback>>,
    ) -> Result<TaskSnapshot, TaskError> {
        let task = Task::new(id, task_type, payload, callback);
        let snapshot = task.snapshot();

        {
            let mut book = self.book.write().await;
            if book.find(&task.id).is_some() {
                return Err(TaskError::Duplicate { id: task.id });
            }
            book.pending.push_back(task);
        }

        info!(
            task_id = %snapshot.id,
            task_type = %snapshot.task_type,
            "Added task"
        );
        self.wake.notify_one();
        Ok(snapshot)
    }

    /// Queue a task under a freshly generated ID.
    pub async fn submit_new(
        &self,
        task_type: impl Into<String>,
        payload: Value,
        callback: Option<Arc<dyn TaskCallback>>,
    ) -> Result<TaskSnapshot, TaskError> {
        self.submit(Uuid::new_v4().to_string(), task_type, payload, callback)
            .await
    }

    /// Current status of a task.
    pub async fn status(&self, id: &str) -> Option<TaskStatus> {
        self.book.read().await.find(id).map(|t| t.status)
    }

    /// Result of a completed task. `None` for any other state.
    pub async fn result(&self, id: &str) -> Option<Value> {
        self.book
            .read()
            .await
            .completed
            .get(id)
            .filter(|t| t.status == TaskStatus::Completed)
            .and_then(|t| t.result.clone())
    }

    /// Full view of a task, including the error of a failed one.
    pub async fn task(&self, id: &str) -> Option<TaskSnapshot> {
        self.book.read().await.find(id).map(Task::snapshot)
    }

    /// Count tasks per container.
    pub async fn queue_status(&self) -> QueueStatus {
        let book = self.book.read().await;
        QueueStatus {
            queued: book.pending.len(),
            running: book.running.len(),
            completed: book.completed.len(),
        }
    }

    /// Cancel a task that has not been dispatched yet.
    ///
    /// Returns `Ok(false)` if the task is already running or terminal.
    pub async fn cancel(&self, id: &str) -> Result<bool, TaskError> {
        {
            let mut book = self.book.write().await;
            if let Some(pos) = book.pending.iter().position(|t| t.id == id) {
                if let Some(task) = book.pending.get_mut(pos) {
                    task.transition_to(TaskStatus::Cancelled)?;
                }
                if let Some(task) = book.pending.remove(pos) {
                    book.completed.insert(task.id.clone(), task);
                }
            } else if book.running.contains_key(id) || book.completed.contains_key(id) {
                return Ok(false);
            } else {
                return Err(TaskError::NotFound { id: id.to_string() });
            }
        }

        info!(task_id = %id, "Cancelled task");
        let _ = self.events.send(TaskEvent::Cancelled { id: id.to_string() });
        Ok(true)
    }

    /// Subscribe to task lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Wait until the task reaches a terminal state.
    pub async fn wait_for(&self, id: &str) -> Result<TaskSnapshot, TaskError> {
        let mut rx = self.events.subscribe();
        loop {
            match self.task(id).await {
                None => return Err(TaskError::NotFound { id: id.to_string() }),
                Some(snapshot) if snapshot.status.is_terminal() => return Ok(snapshot),
                Some(_) => {}
            }

            loop {
                match rx.recv().await {
                    Ok(event) if event.task_id() == id => break,
                    Ok(_) => continue,
                    // Missed events or shutdown: re-read the book.
                    Err(_) => break,
                }
            }
        }
    }

    /// Whether the dispatch loop is marked active.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Run the dispatch loop until `stop()` is called.
    pub async fn run(&self) {
        self.active.store(true, Ordering::SeqCst);
        self.run_loop().await;
    }

    /// Run the dispatch loop on a background tokio task.
    pub fn spawn(&self) -> JoinHandle<()> {
        self.active.store(true, Ordering::SeqCst);
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run_loop().await })
    }

    /// Stop dispatching. In-flight tasks keep running to completion.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.wake.notify_one();
        info!("Task scheduler stopped");
    }

    async fn run_loop(&self) {
        info!(
            max_concurrent_tasks = self.config.max_concurrent_tasks,
            "Task scheduler started"
        );

        while self.is_active() {
            for dispatch in self.dispatch_ready().await {
                let _ = self.events.send(TaskEvent::Started {
                    id: dispatch.id.clone(),
                });
                let scheduler = self.clone();
                tokio::spawn(async move { scheduler.execute(dispatch).await });
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        debug!("Dispatch loop exited");
    }

    /// Move queued tasks into the running set while capacity allows.
    async fn dispatch_ready(&self) -> Vec<Dispatch> {
        let mut book = self.book.write().await;
        let mut ready = Vec::new();

        while book.running.len() < self.config.max_concurrent_tasks {
            let Some(mut task) = book.pending.pop_front() else {
                break;
            };
            if let Err(e) = task.transition_to(TaskStatus::Running) {
                // Only pending tasks are queued; keep the task visible anyway.
                error!(task_id = %task.id, error = %e, "Queued task not dispatchable");
                book.completed.insert(task.id.clone(), task);
                continue;
            }
            ready.push(Dispatch {
                id: task.id.clone(),
                task_type: task.task_type.clone(),
                payload: task.payload.clone(),
            });
            book.running.insert(task.id.clone(), task);
        }

        ready
    }

    async fn execute(&self, dispatch: Dispatch) {
        info!(task_id = %dispatch.id, task_type = %dispatch.task_type, "Executing task");

        let outcome = match self.handlers.get(&dispatch.task_type).await {
            Some(handler) => {
                match AssertUnwindSafe(handler.handle(dispatch.payload))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(format!("{e:#}")),
                    Err(panic) => Err(panic_message(panic)),
                }
            }
            None => {
                warn!(
                    task_id = %dispatch.id,
                    task_type = %dispatch.task_type,
                    "No handler found for task type"
                );
                Ok(json!({
                    "message": format!("No handler for {}", dispatch.task_type),
                    "payload": dispatch.payload,
                }))
            }
        };

        self.finish(&dispatch.id, outcome).await;
    }

    /// Record the outcome and hand the task from running to completed.
    async fn finish(&self, id: &str, outcome: Result<Value, String>) {
        let callback = {
            let mut book = self.book.write().await;
            let Some(mut task) = book.running.remove(id) else {
                error!(task_id = %id, "Finished task missing from running set");
                return;
            };

            let recorded = match outcome {
                Ok(value) => task.complete(value),
                Err(reason) => task.fail(reason),
            };
            if let Err(e) = recorded {
                error!(task_id = %id, error = %e, "Failed to record task outcome");
            }

            let callback = match task.status {
                TaskStatus::Completed => task.callback.clone().zip(task.result.clone()),
                _ => None,
            };
            let event = match task.status {
                TaskStatus::Failed => TaskEvent::Failed {
                    id: id.to_string(),
                    error: task.error.clone().unwrap_or_default(),
                },
                _ => TaskEvent::Completed { id: id.to_string() },
            };

            match &event {
                TaskEvent::Failed { error, .. } => {
                    error!(task_id = %id, error = %error, "Task failed");
                }
                _ => info!(task_id = %id, "Task completed"),
            }

            book.completed.insert(id.to_string(), task);
            let _ = self.events.send(event);
            callback
        };

        self.wake.notify_one();

        if let Some((callback, result)) = callback {
            let outcome = AssertUnwindSafe(callback.on_complete(id, &result))
                .catch_unwind()
                .await;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{e:#}")),
                Err(panic) => Some(panic_message(panic)),
            };
            if let Some(error) = failure {
                warn!(task_id = %id, error = %error, "Task callback failed");
                let _ = self.events.send(TaskEvent::CallbackFailed {
                    id: id.to_string(),
                    error,
                });
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
