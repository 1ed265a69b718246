//! Dispatcher actor.
//!
//! Broadcasts are delivered one at a time, to one subscriber at a time. A
//! subscriber whose queue stays full past `delivery_timeout` misses that
//! broadcast; the others are only held up for as long as the deadline.

use std::collections::HashMap;
use std::future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use kc_proto::{BroadcastAction, BroadcastPayload};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcaster stopped")]
    Stopped,
    #[error("encode broadcast: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T, E = BroadcastError> = std::result::Result<T, E>;

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Broadcasts buffered ahead of the dispatcher before `send` waits.
    pub source_capacity: usize,
    /// Per-connection queue depth.
    pub subscriber_capacity: usize,
    /// How long one subscriber may hold up a delivery. `None` waits forever.
    pub delivery_timeout: Option<Duration>,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            source_capacity: 5,
            subscriber_capacity: 1,
            delivery_timeout: Some(Duration::from_secs(1)),
        }
    }
}

/// One committed change, already serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub team: String,
    pub vault: String,
    pub message: Bytes,
}

#[derive(Debug, Default)]
pub struct BroadcastStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl BroadcastStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Deliveries abandoned at the deadline.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

enum Control {
    Subscribe {
        id: String,
        generation: u64,
        queue: mpsc::Sender<Broadcast>,
        ack: oneshot::Sender<()>,
    },
    Count(oneshot::Sender<usize>),
    Stop(oneshot::Sender<()>),
}

/// A connection's inbound queue. `recv` yields `None` once the connection
/// has been unsubscribed, replaced by a newer subscription, or the
/// broadcaster stopped.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    generation: u64,
    queue: mpsc::Receiver<Broadcast>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Distinguishes this subscription from earlier or later ones under the
    /// same id.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn recv(&mut self) -> Option<Broadcast> {
        self.queue.recv().await
    }
}

/// Cloneable handle to the dispatcher.
#[derive(Clone)]
pub struct Broadcaster {
    control: mpsc::Sender<Control>,
    source: mpsc::Sender<Broadcast>,
    unsubscribe: mpsc::UnboundedSender<Unsubscribe>,
    subscriber_capacity: usize,
    generations: Arc<AtomicU64>,
    stats: Arc<BroadcastStats>,
}

/// `generation: None` removes whatever is registered under `id`.
struct Unsubscribe {
    id: String,
    generation: Option<u64>,
}

struct Entry {
    generation: u64,
    queue: mpsc::Sender<Broadcast>,
}

impl Broadcaster {
    /// Start the dispatcher on the current runtime.
    pub fn spawn(config: BroadcastConfig) -> (Self, JoinHandle<()>) {
        let (control_tx, control_rx) = mpsc::channel(16);
        let (source_tx, source_rx) = mpsc::channel(config.source_capacity.max(1));
        let (unsub_tx, unsub_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(BroadcastStats::default());

        let dispatcher = Dispatcher {
            control: control_rx,
            source: source_rx,
            unsubscribe: unsub_rx,
            subscribers: HashMap::new(),
            delivery_timeout: config.delivery_timeout,
            stats: stats.clone(),
        };
        let handle = tokio::spawn(dispatcher.run());

        let broadcaster = Self {
            control: control_tx,
            source: source_tx,
            unsubscribe: unsub_tx,
            subscriber_capacity: config.subscriber_capacity.max(1),
            generations: Arc::new(AtomicU64::new(0)),
            stats,
        };
        (broadcaster, handle)
    }

    /// Register `connection_id`. Returns once the dispatcher has it, so any
    /// broadcast sent after this call is seen. An existing subscription with
    /// the same id is closed and replaced.
    pub async fn subscribe(&self, connection_id: &str) -> Result<Subscription> {
        let (queue_tx, queue_rx) = mpsc::channel(self.subscriber_capacity);
        let (ack_tx, ack_rx) = oneshot::channel();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        self.control
            .send(Control::Subscribe {
                id: connection_id.to_owned(),
                generation,
                queue: queue_tx,
                ack: ack_tx,
            })
            .await
            .map_err(|_| BroadcastError::Stopped)?;
        ack_rx.await.map_err(|_| BroadcastError::Stopped)?;
        Ok(Subscription {
            id: connection_id.to_owned(),
            generation,
            queue: queue_rx,
        })
    }

    /// Never blocks. Unknown ids are ignored.
    pub fn unsubscribe(&self, connection_id: &str) {
        self.request_removal(connection_id, None);
    }

    /// Unsubscribe `sub` only. A newer subscription under the same id stays.
    pub fn release(&self, sub: &Subscription) {
        self.request_removal(&sub.id, Some(sub.generation));
    }

    fn request_removal(&self, id: &str, generation: Option<u64>) {
        // a closed channel means the dispatcher is gone and the queue with it
        let _ = self.unsubscribe.send(Unsubscribe {
            id: id.to_owned(),
            generation,
        });
    }

    /// Queue a change for fan-out. Waits only while the source buffer is full.
    pub async fn send<S: Serialize + ?Sized>(
        &self,
        team: &str,
        vault: &str,
        action: BroadcastAction,
        secret: Option<&S>,
    ) -> Result<()> {
        let message = BroadcastPayload::change(action, team, vault, secret)?.to_bytes()?;
        self.publish(Broadcast {
            team: team.to_owned(),
            vault: vault.to_owned(),
            message: Bytes::from(message),
        })
        .await
    }

    pub async fn publish(&self, broadcast: Broadcast) -> Result<()> {
        self.source
            .send(broadcast)
            .await
            .map_err(|_| BroadcastError::Stopped)
    }

    pub async fn subscriber_count(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Control::Count(tx))
            .await
            .map_err(|_| BroadcastError::Stopped)?;
        rx.await.map_err(|_| BroadcastError::Stopped)
    }

    /// Close every subscriber queue and end the dispatcher. Broadcasts still
    /// buffered are discarded.
    pub async fn stop(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Control::Stop(tx))
            .await
            .map_err(|_| BroadcastError::Stopped)?;
        rx.await.map_err(|_| BroadcastError::Stopped)
    }

    pub fn stats(&self) -> &BroadcastStats {
        &self.stats
    }
}

struct Dispatcher {
    control: mpsc::Receiver<Control>,
    source: mpsc::Receiver<Broadcast>,
    unsubscribe: mpsc::UnboundedReceiver<Unsubscribe>,
    subscribers: HashMap<String, Entry>,
    delivery_timeout: Option<Duration>,
    stats: Arc<BroadcastStats>,
}

impl Dispatcher {
    async fn run(mut self) {
        info!("broadcast dispatcher started");
        loop {
            tokio::select! {
                biased;
                // before control: an unsubscribe always lands ahead of a
                // later re-subscribe of the same id
                Some(gone) = self.unsubscribe.recv() => self.remove(&gone.id, gone.generation),
                ctl = self.control.recv() => match ctl {
                    Some(Control::Subscribe { id, generation, queue, ack }) => {
                        let entry = Entry { generation, queue };
                        if self.subscribers.insert(id.clone(), entry).is_some() {
                            debug!(connection = %id, "subscription replaced");
                        } else {
                            debug!(connection = %id, "subscribed");
                        }
                        let _ = ack.send(());
                    }
                    Some(Control::Count(reply)) => {
                        let _ = reply.send(self.subscribers.len());
                    }
                    Some(Control::Stop(ack)) => {
                        self.shutdown();
                        let _ = ack.send(());
                        return;
                    }
                    None => break,
                },
                next = self.source.recv() => match next {
                    Some(broadcast) => self.dispatch(broadcast).await,
                    None => break,
                },
            }
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.control.close();
        self.source.close();
        self.subscribers.clear();
        info!(
            delivered = self.stats.delivered(),
            dropped = self.stats.dropped(),
            "broadcast dispatcher stopped"
        );
    }

    fn remove(&mut self, id: &str, generation: Option<u64>) {
        let matches = self
            .subscribers
            .get(id)
            .is_some_and(|e| generation.map_or(true, |g| g == e.generation));
        if matches {
            self.subscribers.remove(id);
            debug!(connection = %id, "unsubscribed");
        }
    }

    fn is_current(&self, id: &str, generation: u64) -> bool {
        self.subscribers.get(id).is_some_and(|e| e.generation == generation)
    }

    async fn dispatch(&mut self, broadcast: Broadcast) {
        let targets: Vec<(String, u64, mpsc::Sender<Broadcast>)> = self
            .subscribers
            .iter()
            .map(|(id, e)| (id.clone(), e.generation, e.queue.clone()))
            .collect();
        debug!(team = %broadcast.team, vault = %broadcast.vault, targets = targets.len(), "dispatching");

        for (id, generation, queue) in targets {
            // may have unsubscribed or been replaced while an earlier
            // delivery was blocked
            if !self.is_current(&id, generation) {
                continue;
            }
            self.deliver(&id, generation, &queue, broadcast.clone()).await;
        }
    }

    async fn deliver(&mut self, id: &str, generation: u64, queue: &mpsc::Sender<Broadcast>, broadcast: Broadcast) {
        let deadline = expire(self.delivery_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                permit = queue.reserve() => {
                    match permit {
                        Ok(permit) => {
                            permit.send(broadcast);
                            self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            debug!(connection = %id, "subscriber queue closed");
                            self.remove(id, Some(generation));
                        }
                    }
                    return;
                }
                Some(gone) = self.unsubscribe.recv() => {
                    self.remove(&gone.id, gone.generation);
                    if !self.is_current(id, generation) {
                        return;
                    }
                }
                _ = &mut deadline => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(connection = %id, "delivery timed out, broadcast dropped");
                    return;
                }
            }
        }
    }
}

async fn expire(after: Option<Duration>) {
    match after {
        Some(d) => tokio::time::sleep(d).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_absorb_short_bursts() {
        let c = BroadcastConfig::default();
        assert_eq!(c.source_capacity, 5);
        assert_eq!(c.subscriber_capacity, 1);
        assert_eq!(c.delivery_timeout, Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn send_encodes_the_payload() {
        let (b, _task) = Broadcaster::spawn(BroadcastConfig::default());
        let mut sub = b.subscribe("c1").await.unwrap();
        b.send(
            "t1",
            "Generic",
            BroadcastAction::SecretRemove,
            Some(&serde_json::json!({"id": "s1"})),
        )
        .await
        .unwrap();

        let got = sub.recv().await.unwrap();
        assert_eq!((got.team.as_str(), got.vault.as_str()), ("t1", "Generic"));
        let v: serde_json::Value = serde_json::from_slice(&got.message).unwrap();
        assert_eq!(v["action"], "secret:remove");
        assert_eq!(v["secret"]["id"], "s1");
        assert_eq!(b.subscriber_count().await.unwrap(), 1);
        assert_eq!(b.stats().delivered(), 1);
    }
}
