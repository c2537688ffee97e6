use super::event::{DomainEvent, EventKind};
use crate::observability::mutation_metrics;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A consumer of domain events with its own failure domain.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &str;

    /// Events of other kinds are skipped without reaching `handle`
    fn accepts(&self, kind: EventKind) -> bool {
        let _ = kind;
        true
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Event fan-out has been shut down")]
    Closed,
    #[error("Subscribers no longer receiving events: {0}")]
    SubscriberGone(String),
}

/// Fire-and-forget event handoff used by the coordinator
pub trait EventPublisher: Send + Sync {
    /// Enqueue an event for every subscriber and return immediately
    fn publish(&self, event: DomainEvent) -> Result<(), PublishError>;
}

#[derive(Debug, Default)]
struct SubscriberCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Per-subscriber delivery counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberStats {
    pub name: String,
    pub delivered: u64,
    pub failed: u64,
}

struct SubscriberChannel {
    name: String,
    sender: mpsc::UnboundedSender<Arc<DomainEvent>>,
    counters: Arc<SubscriberCounters>,
}

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn finish_one(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Channel-per-subscriber dispatcher.
///
/// Each subscriber owns an unbounded queue drained by one worker task, so a subscriber sees
/// events in emission order and a slow or failing subscriber never delays the others or the
/// publisher. Handler errors and panics are logged and counted, then the worker moves on.
pub struct EventFanout {
    channels: RwLock<Option<Vec<SubscriberChannel>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    in_flight: Arc<InFlight>,
}

impl EventFanout {
    /// Spawn one worker per subscriber. Must be called inside a Tokio runtime.
    pub fn new(subscribers: Vec<Arc<dyn EventSubscriber>>) -> Self {
        let in_flight = Arc::new(InFlight::default());
        let mut channels = Vec::with_capacity(subscribers.len());
        let mut workers = Vec::with_capacity(subscribers.len());

        for subscriber in subscribers {
            let (sender, receiver) = mpsc::unbounded_channel();
            let counters = Arc::new(SubscriberCounters::default());
            let name = subscriber.name().to_string();

            workers.push(tokio::spawn(run_worker(
                subscriber,
                receiver,
                Arc::clone(&counters),
                Arc::clone(&in_flight),
            )));
            info!(subscriber = %name, "Event subscriber registered");
            channels.push(SubscriberChannel {
                name,
                sender,
                counters,
            });
        }

        Self {
            channels: RwLock::new(Some(channels)),
            workers: Mutex::new(workers),
            in_flight,
        }
    }

    pub fn subscriber_stats(&self) -> Vec<SubscriberStats> {
        let channels = match self.channels.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels
            .iter()
            .flatten()
            .map(|channel| SubscriberStats {
                name: channel.name.clone(),
                delivered: channel.counters.delivered.load(Ordering::Relaxed),
                failed: channel.counters.failed.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Wait until every event handed over so far has been processed by every subscriber
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            if self.in_flight.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Close every subscriber queue and wait up to `timeout` for workers to drain them.
    pub async fn shutdown(&self, timeout: Duration) -> anyhow::Result<()> {
        let closed = match self.channels.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(closed);

        let workers: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        info!(workers = workers.len(), "Draining event subscribers");

        tokio::time::timeout(timeout, futures::future::join_all(workers))
            .await
            .map_err(|_| anyhow::anyhow!("Timeout waiting for event subscribers to drain"))?;

        info!("Event subscribers drained");
        Ok(())
    }
}

impl EventPublisher for EventFanout {
    fn publish(&self, event: DomainEvent) -> Result<(), PublishError> {
        let guard = match self.channels.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let channels = guard.as_ref().ok_or(PublishError::Closed)?;

        let event = Arc::new(event);
        let mut gone = Vec::new();
        for channel in channels {
            self.in_flight.count.fetch_add(1, Ordering::AcqRel);
            if channel.sender.send(Arc::clone(&event)).is_err() {
                self.in_flight.finish_one();
                gone.push(channel.name.clone());
            }
        }

        debug!(
            event_id = %event.id,
            kind = %event.kind,
            task_id = %event.task_id(),
            subscribers = channels.len(),
            "Event handed to subscribers"
        );
        mutation_metrics().record_event_published();

        if gone.is_empty() {
            Ok(())
        } else {
            Err(PublishError::SubscriberGone(gone.join(", ")))
        }
    }
}

async fn run_worker(
    subscriber: Arc<dyn EventSubscriber>,
    mut receiver: mpsc::UnboundedReceiver<Arc<DomainEvent>>,
    counters: Arc<SubscriberCounters>,
    in_flight: Arc<InFlight>,
) {
    while let Some(event) = receiver.recv().await {
        if subscriber.accepts(event.kind) {
            match AssertUnwindSafe(subscriber.handle(&event)).catch_unwind().await {
                Ok(Ok(())) => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    mutation_metrics().record_subscriber_failure();
                    error!(
                        subscriber = %subscriber.name(),
                        event_id = %event.id,
                        kind = %event.kind,
                        task_id = %event.task_id(),
                        error = %e,
                        "Subscriber failed to process event"
                    );
                }
                Err(_) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    mutation_metrics().record_subscriber_failure();
                    error!(
                        subscriber = %subscriber.name(),
                        event_id = %event.id,
                        kind = %event.kind,
                        task_id = %event.task_id(),
                        "Subscriber panicked while processing event"
                    );
                }
            }
        }
        in_flight.finish_one();
    }
    warn!(subscriber = %subscriber.name(), "Event subscriber worker stopped");
}
