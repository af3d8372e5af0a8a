use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};

use agent_core::config::{MemoryConfig, SchedulerConfig};
use agent_core::memory::{MemoryRegistry, StoreOptions};
use agent_core::worker::{FnHandler, Scheduler, TaskStatus};

/// One line of stdin: `{"id": "...", "type": "...", "payload": {...}}`.
#[derive(Debug, Deserialize)]
struct TaskLine {
    id: Option<String>,
    #[serde(rename = "type")]
    task_type: String,
    #[serde(default)]
    payload: Value,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let scheduler_config = SchedulerConfig::from_env();
    let memory_config = MemoryConfig::from_env();

    eprintln!("agent-core v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Scheduler: {} concurrent, poll {:?}",
        scheduler_config.max_concurrent_tasks, scheduler_config.poll_interval
    );
    eprintln!(
        "   Memory: {} entries per agent, sweep at {:.0}%",
        memory_config.max_entries,
        memory_config.cleanup_threshold * 100.0
    );
    eprintln!("   Reading tasks as JSON lines from stdin. Ctrl-C or EOF to stop.");

    let scheduler = Scheduler::new(scheduler_config)?;
    let memory = Arc::new(MemoryRegistry::new(memory_config)?);

    // ── Handlers ─────────────────────────────────────────────────────────
    scheduler
        .register_handler(
            "echo",
            Arc::new(FnHandler::new(|payload: Value| async move {
                Ok::<_, anyhow::Error>(payload)
            })),
        )
        .await;

    let registry = Arc::clone(&memory);
    scheduler
        .register_handler(
            "remember",
            Arc::new(FnHandler::new(move |payload: Value| {
                let registry = Arc::clone(&registry);
                async move {
                    let agent_id = payload["agent_id"]
                        .as_str()
                        .ok_or_else(|| anyhow::anyhow!("missing `agent_id`"))?;
                    let key = payload["key"]
                        .as_str()
                        .ok_or_else(|| anyhow::anyhow!("missing `key`"))?;

                    let mut options = StoreOptions::new();
                    if let Some(category) = payload["category"].as_str() {
                        options = options.category(category);
                    }
                    if let Some(ttl) = payload["ttl"].as_f64() {
                        options = options.ttl(Duration::try_from_secs_f64(ttl)?);
                    }

                    let link = registry.get_or_create(agent_id).await;
                    link.lock()
                        .await
                        .store(key, payload["value"].clone(), options)?;
                    Ok::<_, anyhow::Error>(json!({"stored": key, "agent_id": agent_id}))
                }
            })),
        )
        .await;

    let registry = Arc::clone(&memory);
    scheduler
        .register_handler(
            "recall",
            Arc::new(FnHandler::new(move |payload: Value| {
                let registry = Arc::clone(&registry);
                async move {
                    let agent_id = payload["agent_id"]
                        .as_str()
                        .ok_or_else(|| anyhow::anyhow!("missing `agent_id`"))?;
                    let query = payload["query"].as_str().unwrap_or_default();

                    let Some(link) = registry.get(agent_id).await else {
                        return Ok::<_, anyhow::Error>(json!({}));
                    };
                    let found = link
                        .lock()
                        .await
                        .search(query, payload["category"].as_str());
                    Ok(serde_json::to_value(found)?)
                }
            })),
        )
        .await;

    eprintln!("   Handlers: {}\n", scheduler.handlers().list().await.join(", "));
    let dispatch = scheduler.spawn();

    // ── Input loop ───────────────────────────────────────────────────────
    let mut submitted = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let task: TaskLine = match serde_json::from_str(&line) {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed task line");
                continue;
            }
        };

        if !scheduler.handlers().has(&task.task_type).await {
            tracing::warn!(task_type = %task.task_type, "No handler registered for task type");
        }

        let submission = match task.id {
            Some(id) => scheduler.submit(id, task.task_type, task.payload, None).await,
            None => scheduler.submit_new(task.task_type, task.payload, None).await,
        };
        match submission {
            Ok(snapshot) => submitted.push(snapshot.id),
            Err(e) => tracing::warn!(error = %e, "Task rejected"),
        }
    }

    // ── Drain ────────────────────────────────────────────────────────────
    for id in &submitted {
        let done = scheduler.wait_for(id).await?;
        let elapsed_ms = done.elapsed().map(|d| d.num_milliseconds());
        let line = match done.status {
            TaskStatus::Completed => json!({
                "id": done.id,
                "status": done.status,
                "result": done.result,
                "elapsed_ms": elapsed_ms,
            }),
            _ => json!({
                "id": done.id,
                "status": done.status,
                "error": done.error,
                "elapsed_ms": elapsed_ms,
            }),
        };
        println!("{line}");
    }

    scheduler.stop();
    dispatch.await?;

    let queue = scheduler.queue_status().await;
    let stats = memory.global_stats().await;
    tracing::info!(
        completed = queue.completed,
        agents = stats.total_agents,
        memories = stats.total_memories,
        "Shutting down"
    );

    Ok(())
}
