//! In-memory queue system for testing and single-process deployments.
//!
//! Backed by tokio mpsc channels, one per named queue. Job records track
//! every accepted command so a periodic cleaner can prune completed work,
//! and the [`Instrumentation`] hook observes produce/consume events.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::instrument::{
    ConsumeEvent, DestinationType, Instrumentation, NoopInstrumentation, ProduceEvent,
};
use super::{Consumer, QueueSystem};
use crate::command::Command;
use crate::error::QueueError;
use crate::stopper::Stopper;

/// Tuning for the in-memory backend.
#[derive(Clone, Copy, Debug)]
pub struct QueueConfig {
    /// How often the cleaner wakes up.
    pub cleaner_interval: Duration,
    /// How long completed job records are retained before pruning.
    pub completed_retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            cleaner_interval: Duration::from_secs(30),
            completed_retention: Duration::from_secs(60),
        }
    }
}

/// Lifecycle of a job record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JobState {
    Pending,
    Completed,
}

/// Metadata kept per accepted command, enough for the cleaner and for
/// instrumentation to work without re-parsing payloads.
#[derive(Debug)]
struct JobRecord {
    command_id: String,
    queue_name: String,
    state: JobState,
    completed_at: Option<Instant>,
}

struct QueueSlot {
    tx: mpsc::UnboundedSender<Command>,
    /// Shared by all consumers of this queue; locking it to `recv` is what
    /// makes consumption competing.
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Command>>>,
}

struct Shared {
    config: QueueConfig,
    queues: Mutex<HashMap<String, QueueSlot>>,
    subscribers: Mutex<HashMap<String, HashSet<String>>>,
    jobs: Arc<Mutex<Vec<JobRecord>>>,
    consumers: Mutex<HashMap<String, Vec<(u64, Arc<JoinHandle<()>>)>>>,
    consumer_seq: AtomicU64,
    cleaner_started: AtomicBool,
    cleaner: Mutex<Option<JoinHandle<()>>>,
    instrumentation: Arc<dyn Instrumentation>,
}

/// In-memory [`QueueSystem`] reference backend.
///
/// ```
/// use serde_json::json;
/// use stellar_rust::queue::{consumer, InMemoryQueueSystem, QueueSystem};
/// use stellar_rust::Command;
///
/// # async fn demo() -> Result<(), stellar_rust::QueueError> {
/// let queue = InMemoryQueueSystem::new();
/// queue
///     .process("inbox", consumer(|cmd: Command| async move {
///         println!("got {}", cmd.headers.id);
///     }))
///     .await?;
/// queue.enqueue("inbox", Command::request("svc:thing:get", "1", json!({}))).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryQueueSystem {
    shared: Arc<Shared>,
}

impl Default for InMemoryQueueSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueueSystem {
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        Self::with_instrumentation(config, Arc::new(NoopInstrumentation))
    }

    /// Attach an instrumentation hook observing produce/consume events.
    pub fn with_instrumentation(
        config: QueueConfig,
        instrumentation: Arc<dyn Instrumentation>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                queues: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(HashMap::new()),
                jobs: Arc::new(Mutex::new(Vec::new())),
                consumers: Mutex::new(HashMap::new()),
                consumer_seq: AtomicU64::new(0),
                cleaner_started: AtomicBool::new(false),
                cleaner: Mutex::new(None),
                instrumentation,
            }),
        }
    }

    /// Start the background cleaner pruning completed job records.
    ///
    /// Started once per instance; calling again is a no-op.
    pub fn start_cleaner(&self) {
        if self.shared.cleaner_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let jobs = Arc::clone(&self.shared.jobs);
        let config = self.shared.config;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.cleaner_interval);
            // The first tick fires immediately; skip it so freshly completed
            // jobs get their full retention window.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let mut jobs = jobs.lock().unwrap_or_else(|p| p.into_inner());
                let before = jobs.len();
                jobs.retain(|job| match (job.state, job.completed_at) {
                    (JobState::Completed, Some(done)) => {
                        now.duration_since(done) < config.completed_retention
                    }
                    _ => true,
                });
                let pruned = before - jobs.len();
                if pruned > 0 {
                    debug!(pruned, "queue cleaner pruned completed jobs");
                }
            }
        });
        *self
            .shared
            .cleaner
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(handle);
    }

    /// Total job records currently tracked.
    pub fn job_count(&self) -> usize {
        self.shared
            .jobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    /// Job records in the completed state.
    pub fn completed_job_count(&self) -> usize {
        self.shared
            .jobs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|j| j.state == JobState::Completed)
            .count()
    }

    fn slot_sender(&self, queue_name: &str) -> mpsc::UnboundedSender<Command> {
        let mut queues = self
            .shared
            .queues
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        queues
            .entry(queue_name.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                QueueSlot {
                    tx,
                    rx: Arc::new(tokio::sync::Mutex::new(rx)),
                }
            })
            .tx
            .clone()
    }

    fn slot_receiver(
        &self,
        queue_name: &str,
    ) -> Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Command>>> {
        let mut queues = self
            .shared
            .queues
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        Arc::clone(
            &queues
                .entry(queue_name.to_string())
                .or_insert_with(|| {
                    let (tx, rx) = mpsc::unbounded_channel();
                    QueueSlot {
                        tx,
                        rx: Arc::new(tokio::sync::Mutex::new(rx)),
                    }
                })
                .rx,
        )
    }

    fn mark_completed(shared: &Shared, command_id: &str) {
        let mut jobs = shared.jobs.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(job) = jobs
            .iter_mut()
            .find(|j| j.command_id == command_id && j.state == JobState::Pending)
        {
            job.state = JobState::Completed;
            job.completed_at = Some(Instant::now());
        }
    }
}

#[async_trait]
impl QueueSystem for InMemoryQueueSystem {
    async fn enqueue(&self, queue_name: &str, command: Command) -> Result<(), QueueError> {
        if queue_name.is_empty() {
            return Err(QueueError::InvalidName(queue_name.to_string()));
        }

        self.shared.instrumentation.on_produce(ProduceEvent {
            destination_name: queue_name,
            destination_type: DestinationType::Queue,
            headers: &command.headers,
            parameters: &command.body,
        });

        {
            let mut jobs = self
                .shared
                .jobs
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            jobs.push(JobRecord {
                command_id: command.headers.id.clone(),
                queue_name: queue_name.to_string(),
                state: JobState::Pending,
                completed_at: None,
            });
        }

        self.slot_sender(queue_name)
            .send(command)
            .map_err(|_| QueueError::Closed(queue_name.to_string()))
    }

    async fn process(&self, queue_name: &str, consumer: Consumer) -> Result<Stopper, QueueError> {
        if queue_name.is_empty() {
            return Err(QueueError::InvalidName(queue_name.to_string()));
        }

        let rx = self.slot_receiver(queue_name);
        let shared = Arc::clone(&self.shared);
        let destination = queue_name.to_string();

        let worker = tokio::spawn(async move {
            loop {
                // Take the lock only to receive; competing consumers of the
                // same queue each win individual deliveries.
                let command = { rx.lock().await.recv().await };
                let Some(command) = command else { break };

                shared.instrumentation.on_consume(ConsumeEvent {
                    destination_name: &destination,
                    destination_type: DestinationType::Queue,
                    headers: &command.headers,
                });
                Self::mark_completed(&shared, &command.headers.id);
                consumer(command).await;
            }
        });

        let worker = Arc::new(worker);
        let consumer_id = self.shared.consumer_seq.fetch_add(1, Ordering::SeqCst);
        self.shared
            .consumers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(queue_name.to_string())
            .or_default()
            .push((consumer_id, Arc::clone(&worker)));

        let shared = Arc::clone(&self.shared);
        let queue = queue_name.to_string();
        Ok(Stopper::new(move || async move {
            worker.abort();
            let mut consumers = shared
                .consumers
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            if let Some(entries) = consumers.get_mut(&queue) {
                entries.retain(|(id, _)| *id != consumer_id);
            }
        }))
    }

    async fn stop_processing(&self, queue_name: &str) -> Result<(), QueueError> {
        let entries = self
            .shared
            .consumers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(queue_name);
        if let Some(entries) = entries {
            for (_, worker) in entries {
                worker.abort();
            }
        }
        Ok(())
    }

    async fn get_subscribers(&self, channel: &str) -> Result<HashSet<String>, QueueError> {
        Ok(self
            .shared
            .subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(channel)
            .cloned()
            .unwrap_or_default())
    }

    async fn register_subscriber(
        &self,
        channel: &str,
        queue_name: &str,
    ) -> Result<Stopper, QueueError> {
        if channel.is_empty() || queue_name.is_empty() {
            return Err(QueueError::InvalidName(format!(
                "{}/{}",
                channel, queue_name
            )));
        }

        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(channel.to_string())
            .or_default()
            .insert(queue_name.to_string());

        let shared = Arc::clone(&self.shared);
        let channel = channel.to_string();
        let queue_name = queue_name.to_string();
        Ok(Stopper::new(move || async move {
            let mut subscribers = shared
                .subscribers
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            // The channel's set is emptied, never deleted.
            if let Some(set) = subscribers.get_mut(&channel) {
                set.remove(&queue_name);
            }
        }))
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(cleaner) = self
            .cleaner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            cleaner.abort();
        }
        for entries in self
            .consumers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
        {
            for (_, worker) in entries {
                worker.abort();
            }
        }
    }
}
