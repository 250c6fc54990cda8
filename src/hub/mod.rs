//! Realtime notification hub.
//!
//! One coordinating task owns the offline mailboxes and applies every
//! connect, disconnect and routed message in arrival order. The live
//! connection map is shared behind a read/write lock so `send_to_user` can
//! look up a recipient without a round trip through the loop.

pub mod message;
pub mod session;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;

pub use message::{MessageKind, NotificationMessage};

use crate::config::HubConfig;

#[derive(Debug, thiserror::Error)]
#[error("Notification hub has shut down")]
pub struct HubClosed;

struct LiveConnection {
    id: u64,
    outbound: mpsc::Sender<NotificationMessage>,
}

type LiveMap = Arc<RwLock<HashMap<i64, LiveConnection>>>;

enum Command {
    Connect {
        user_id: i64,
        connection_id: u64,
        outbound: mpsc::Sender<NotificationMessage>,
        registered: oneshot::Sender<()>,
    },
    Disconnect {
        user_id: i64,
        connection_id: u64,
    },
    Route(NotificationMessage),
    MailboxLen {
        user_id: i64,
        reply: oneshot::Sender<usize>,
    },
}

/// A registered connection's end of its outbound queue.
pub struct Subscription {
    pub user_id: i64,
    pub connection_id: u64,
    pub receiver: mpsc::Receiver<NotificationMessage>,
}

/// Cloneable handle to the hub loop.
#[derive(Clone)]
pub struct ConnectionHub {
    commands: mpsc::Sender<Command>,
    live: LiveMap,
    next_connection: Arc<AtomicU64>,
    outbound_buffer: usize,
}

impl ConnectionHub {
    /// Start the hub loop on the current runtime.
    pub fn spawn(config: &HubConfig) -> Self {
        let (commands, rx) = mpsc::channel(config.command_buffer.max(1));
        let live: LiveMap = Arc::new(RwLock::new(HashMap::new()));

        let hub_loop = HubLoop {
            live: Arc::clone(&live),
            mailboxes: Mailboxes::new(config.mailbox_capacity, config.mailbox_ttl()),
        };
        tokio::spawn(hub_loop.run(rx));

        Self {
            commands,
            live,
            next_connection: Arc::new(AtomicU64::new(1)),
            outbound_buffer: config.outbound_buffer.max(1),
        }
    }

    /// Register a connection for `user_id`. Any buffered offline messages
    /// are queued on the returned receiver, oldest first. A newer connection
    /// for the same user replaces the older one.
    pub async fn connect(&self, user_id: i64) -> Result<Subscription, HubClosed> {
        let connection_id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (outbound, receiver) = mpsc::channel(self.outbound_buffer);
        let (registered, ack) = oneshot::channel();

        self.send(Command::Connect {
            user_id,
            connection_id,
            outbound,
            registered,
        })
        .await?;
        ack.await.map_err(|_| HubClosed)?;

        Ok(Subscription {
            user_id,
            connection_id,
            receiver,
        })
    }

    pub async fn disconnect(&self, user_id: i64, connection_id: u64) {
        if self
            .send(Command::Disconnect {
                user_id,
                connection_id,
            })
            .await
            .is_err()
        {
            tracing::debug!(user_id, "Hub already closed on disconnect");
        }
    }

    /// Deliver to a live recipient, or buffer for them until they connect.
    pub async fn route(&self, message: NotificationMessage) -> Result<(), HubClosed> {
        self.send(Command::Route(message)).await
    }

    /// Deliver only if the recipient is online right now. Returns whether
    /// the message was queued; offline recipients are never buffered.
    pub async fn send_to_user(&self, message: NotificationMessage) -> bool {
        let live = self.live.read().await;
        let Some(conn) = live.get(&message.to) else {
            return false;
        };
        match conn.outbound.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(user_id = msg.to, "Outbound queue full, dropping notification");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.live.read().await.contains_key(&user_id)
    }

    pub async fn online_count(&self) -> usize {
        self.live.read().await.len()
    }

    /// Messages currently buffered for an offline user.
    pub async fn mailbox_len(&self, user_id: i64) -> Result<usize, HubClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::MailboxLen { user_id, reply }).await?;
        rx.await.map_err(|_| HubClosed)
    }

    async fn send(&self, command: Command) -> Result<(), HubClosed> {
        self.commands.send(command).await.map_err(|_| HubClosed)
    }
}

struct Mailboxes {
    capacity: usize,
    ttl: Duration,
    boxes: HashMap<i64, VecDeque<(Instant, NotificationMessage)>>,
}

impl Mailboxes {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            boxes: HashMap::new(),
        }
    }

    fn push(&mut self, message: NotificationMessage) {
        let queue = self.boxes.entry(message.to).or_default();
        if queue.len() >= self.capacity {
            queue.pop_front();
            tracing::debug!(user_id = message.to, "Offline mailbox full, evicted oldest");
        }
        queue.push_back((Instant::now(), message));
    }

    /// Remove and return a user's unexpired messages, oldest first.
    fn take(&mut self, user_id: i64) -> Vec<NotificationMessage> {
        let ttl = self.ttl;
        self.boxes
            .remove(&user_id)
            .map(|queue| {
                queue
                    .into_iter()
                    .filter(|(at, _)| at.elapsed() < ttl)
                    .map(|(_, msg)| msg)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn len(&self, user_id: i64) -> usize {
        self.boxes.get(&user_id).map_or(0, VecDeque::len)
    }

    fn sweep(&mut self) {
        let ttl = self.ttl;
        self.boxes.retain(|_, queue| {
            while queue.front().is_some_and(|(at, _)| at.elapsed() >= ttl) {
                queue.pop_front();
            }
            !queue.is_empty()
        });
    }
}

struct HubLoop {
    live: LiveMap,
    mailboxes: Mailboxes,
}

impl HubLoop {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let sweep_every = self.mailboxes.ttl.clamp(Duration::from_secs(1), Duration::from_secs(60));
        let mut sweep = tokio::time::interval(sweep_every);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = sweep.tick() => self.mailboxes.sweep(),
            }
        }
        tracing::debug!("Notification hub stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Connect {
                user_id,
                connection_id,
                outbound,
                registered,
            } => {
                let pending = self.mailboxes.take(user_id);
                self.live.write().await.insert(
                    user_id,
                    LiveConnection {
                        id: connection_id,
                        outbound: outbound.clone(),
                    },
                );
                let _ = registered.send(());
                tracing::info!(user_id, connection_id, pending = pending.len(), "Subscriber connected");

                for message in pending {
                    if outbound.send(message).await.is_err() {
                        break;
                    }
                }
            }
            Command::Disconnect {
                user_id,
                connection_id,
            } => {
                let mut live = self.live.write().await;
                if live.get(&user_id).is_some_and(|c| c.id == connection_id) {
                    live.remove(&user_id);
                    tracing::info!(user_id, connection_id, "Subscriber disconnected");
                }
            }
            Command::Route(message) => {
                let outbound = self
                    .live
                    .read()
                    .await
                    .get(&message.to)
                    .map(|c| c.outbound.clone());
                match outbound {
                    // Blocks the loop while the recipient's queue is full.
                    Some(outbound) => {
                        if let Err(mpsc::error::SendError(message)) = outbound.send(message).await {
                            self.mailboxes.push(message);
                        }
                    }
                    None => self.mailboxes.push(message),
                }
            }
            Command::MailboxLen { user_id, reply } => {
                let _ = reply.send(self.mailboxes.len(user_id));
            }
        }
    }
}
