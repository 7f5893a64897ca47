//! Connection registry: the live client directory and its routing indices.
//!
//! [`ConnectionRegistry`] owns one entry per connected client plus three
//! secondary indices (session membership, region, role). A single
//! [`tokio::sync::RwLock`] guards the directory and every index as one
//! unit, so each operation observes and leaves a consistent view.
//!
//! # Concurrency
//!
//! - Target resolution takes the read lock, clones the outbound senders
//!   of the resolved clients and releases the lock.
//! - Enqueueing happens after the lock is released and never blocks: a
//!   full queue drops the incoming payload.
//! - Register, unregister, subscribe and unsubscribe take the write lock.

use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use utoipa::ToSchema;

use super::{ClientId, ClientMetadata, SessionId};

/// Outbound queue capacity used when zero is requested.
pub const DEFAULT_SEND_QUEUE_SIZE: usize = 256;

/// Largest outbound queue capacity a bounded tokio channel accepts.
pub const MAX_SEND_QUEUE_SIZE: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Identifies one registration of a client.
///
/// A client id can be registered many times over its life; each
/// registration gets a fresh `ConnectionId` so a replaced connection can
/// be told apart from its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(u64);

/// A freshly registered connection handed back to the caller.
///
/// Carries the transport handle and the consuming end of the outbound
/// queue. The caller drives the delivery pumps with it.
#[derive(Debug)]
pub struct ClientConnection<T> {
    client_id: ClientId,
    connection_id: ConnectionId,
    transport: T,
    outbound: mpsc::Receiver<Bytes>,
    metadata: ClientMetadata,
}

impl<T> ClientConnection<T> {
    /// The client this connection belongs to.
    #[must_use]
    pub const fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// The registration this connection corresponds to.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Metadata supplied at registration.
    #[must_use]
    pub const fn metadata(&self) -> &ClientMetadata {
        &self.metadata
    }

    /// Splits the connection into its transport and outbound queue.
    #[must_use]
    pub fn into_parts(self) -> (T, mpsc::Receiver<Bytes>) {
        (self.transport, self.outbound)
    }
}

/// Result of a single enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The payload was queued for the client's write loop.
    Enqueued,
    /// The client's queue was full; the payload was discarded.
    Dropped,
    /// The client is not connected (or its queue is already closed).
    Offline,
}

/// Tally of enqueue attempts made by one or more broadcast calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct DeliveryReport {
    /// Payloads queued.
    pub enqueued: usize,
    /// Payloads discarded because a queue was full.
    pub dropped: usize,
    /// Targets that were not connected.
    pub offline: usize,
}

impl DeliveryReport {
    /// Counts one enqueue attempt.
    pub fn record(&mut self, outcome: SendOutcome) {
        match outcome {
            SendOutcome::Enqueued => self.enqueued += 1,
            SendOutcome::Dropped => self.dropped += 1,
            SendOutcome::Offline => self.offline += 1,
        }
    }

    /// Adds another report's counts to this one.
    pub fn merge(&mut self, other: Self) {
        self.enqueued += other.enqueued;
        self.dropped += other.dropped;
        self.offline += other.offline;
    }

    /// Total number of enqueue attempts.
    #[must_use]
    pub const fn attempted(&self) -> usize {
        self.enqueued + self.dropped + self.offline
    }
}

/// Point-in-time registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct RegistryStats {
    /// Live connections.
    pub connections: usize,
    /// Sessions with at least one member.
    pub sessions: usize,
    /// Distinct regions among live connections.
    pub regions: usize,
    /// Distinct roles among live connections.
    pub roles: usize,
    /// Payloads queued since startup.
    pub enqueued_total: u64,
    /// Payloads dropped on full queues since startup.
    pub dropped_total: u64,
}

#[derive(Debug)]
struct ClientSlot {
    connection_id: ConnectionId,
    outbound: mpsc::Sender<Bytes>,
    metadata: ClientMetadata,
    connected_at: DateTime<Utc>,
}

type Index<K> = HashMap<K, HashSet<ClientId>>;

type Target = (ClientId, Option<mpsc::Sender<Bytes>>);

#[derive(Debug, Default)]
struct Directory {
    clients: HashMap<ClientId, ClientSlot>,
    sessions: Index<SessionId>,
    regions: Index<String>,
    roles: Index<String>,
}

impl Directory {
    fn insert(&mut self, client_id: ClientId, slot: ClientSlot) {
        if let Some(region) = slot.metadata.region() {
            self.regions
                .entry(region.to_owned())
                .or_default()
                .insert(client_id);
        }
        for role in slot.metadata.roles() {
            self.roles.entry(role.clone()).or_default().insert(client_id);
        }
        self.clients.insert(client_id, slot);
    }

    /// Removes the client from the directory and every index. Session
    /// memberships are purged even when no live entry exists.
    fn remove(&mut self, client_id: ClientId) -> Option<ClientSlot> {
        self.sessions.retain(|_, members| {
            members.remove(&client_id);
            !members.is_empty()
        });
        let slot = self.clients.remove(&client_id)?;
        if let Some(region) = slot.metadata.region() {
            remove_member(&mut self.regions, region, client_id);
        }
        for role in slot.metadata.roles() {
            remove_member(&mut self.roles, role.as_str(), client_id);
        }
        Some(slot)
    }

    fn sender(&self, client_id: ClientId) -> Option<mpsc::Sender<Bytes>> {
        self.clients.get(&client_id).map(|slot| slot.outbound.clone())
    }

    fn targets<I>(&self, ids: I) -> Vec<Target>
    where
        I: IntoIterator<Item = ClientId>,
    {
        ids.into_iter().map(|id| (id, self.sender(id))).collect()
    }
}

/// Union of the members of every listed bucket, first-seen order, each
/// client at most once. Blank keys are skipped.
fn union_of(index: &Index<String>, keys: &[String]) -> Vec<ClientId> {
    let mut seen = HashSet::new();
    keys.iter()
        .filter(|key| !key.is_empty())
        .filter_map(|key| index.get(key.as_str()))
        .flatten()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect()
}

fn remove_member<K, Q>(index: &mut Index<K>, key: &Q, client_id: ClientId)
where
    K: Borrow<Q> + Hash + Eq,
    Q: Hash + Eq + ?Sized,
{
    if let Some(members) = index.get_mut(key) {
        members.remove(&client_id);
        if members.is_empty() {
            index.remove(key);
        }
    }
}

/// Directory of live client connections with session, region and role
/// indices.
///
/// Constructed once and shared behind an `Arc` with every collaborator:
/// HTTP handlers, WebSocket pumps and the event source loop.
#[derive(Debug)]
pub struct ConnectionRegistry {
    directory: RwLock<Directory>,
    send_queue_size: usize,
    next_connection_id: AtomicU64,
    enqueued_total: AtomicU64,
    dropped_total: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates an empty registry whose outbound queues hold
    /// `send_queue_size` payloads (0 selects [`DEFAULT_SEND_QUEUE_SIZE`];
    /// larger values are capped at [`MAX_SEND_QUEUE_SIZE`]).
    #[must_use]
    pub fn new(send_queue_size: usize) -> Self {
        let send_queue_size = match send_queue_size {
            0 => DEFAULT_SEND_QUEUE_SIZE,
            n => n.min(MAX_SEND_QUEUE_SIZE),
        };
        Self {
            directory: RwLock::new(Directory::default()),
            send_queue_size,
            next_connection_id: AtomicU64::new(1),
            enqueued_total: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// Capacity of each outbound queue.
    #[must_use]
    pub const fn send_queue_size(&self) -> usize {
        self.send_queue_size
    }

    /// Registers `client_id`, replacing any live connection it already has.
    ///
    /// The replaced connection's queue is closed and it is removed from
    /// every index before the new entry is inserted.
    pub async fn register<T>(
        &self,
        client_id: ClientId,
        transport: T,
        metadata: ClientMetadata,
    ) -> ClientConnection<T> {
        let (tx, rx) = mpsc::channel(self.send_queue_size);
        let connection_id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let slot = ClientSlot {
            connection_id,
            outbound: tx,
            metadata: metadata.clone(),
            connected_at: Utc::now(),
        };

        let replaced = {
            let mut dir = self.directory.write().await;
            let replaced = if dir.clients.contains_key(&client_id) {
                dir.remove(client_id)
            } else {
                None
            };
            dir.insert(client_id, slot);
            replaced
        };

        if let Some(old) = replaced {
            tracing::info!(
                %client_id,
                old_connection = old.connection_id.0,
                new_connection = connection_id.0,
                "replaced existing connection"
            );
        } else {
            tracing::debug!(%client_id, connection = connection_id.0, "client registered");
        }

        ClientConnection {
            client_id,
            connection_id,
            transport,
            outbound: rx,
            metadata,
        }
    }

    /// Removes `client_id` from the directory and every index, closing its
    /// outbound queue. Returns `true` if a live connection was removed;
    /// unregistering an absent client is a no-op.
    pub async fn unregister(&self, client_id: ClientId) -> bool {
        let removed = self.directory.write().await.remove(client_id);
        self.log_removed(client_id, removed)
    }

    /// Like [`Self::unregister`], but only if `connection_id` is still the
    /// client's current registration.
    pub async fn unregister_connection(
        &self,
        client_id: ClientId,
        connection_id: ConnectionId,
    ) -> bool {
        let removed = {
            let mut dir = self.directory.write().await;
            let current = dir
                .clients
                .get(&client_id)
                .is_some_and(|slot| slot.connection_id == connection_id);
            if current { dir.remove(client_id) } else { None }
        };
        self.log_removed(client_id, removed)
    }

    fn log_removed(&self, client_id: ClientId, removed: Option<ClientSlot>) -> bool {
        let Some(slot) = removed else {
            return false;
        };
        let connected_for = Utc::now() - slot.connected_at;
        tracing::debug!(
            %client_id,
            connection = slot.connection_id.0,
            connected_secs = connected_for.num_seconds(),
            "client unregistered"
        );
        true
    }

    /// Adds `client_id` to `session_id`. No existence check is made
    /// against the directory. Returns `true` if the membership is new.
    pub async fn subscribe_session(&self, session_id: SessionId, client_id: ClientId) -> bool {
        self.directory
            .write()
            .await
            .sessions
            .entry(session_id)
            .or_default()
            .insert(client_id)
    }

    /// Removes `client_id` from `session_id`, pruning the session when it
    /// empties. Returns `true` if a membership was removed.
    pub async fn unsubscribe_session(&self, session_id: SessionId, client_id: ClientId) -> bool {
        let mut dir = self.directory.write().await;
        let was_member = dir
            .sessions
            .get(&session_id)
            .is_some_and(|members| members.contains(&client_id));
        remove_member(&mut dir.sessions, &session_id, client_id);
        was_member
    }

    /// Attempts a non-blocking enqueue of `payload` for `client_id`.
    pub async fn send_to_client(&self, client_id: ClientId, payload: Bytes) -> SendOutcome {
        let sender = self.directory.read().await.sender(client_id);
        match sender {
            Some(tx) => self.enqueue(client_id, &tx, payload),
            None => SendOutcome::Offline,
        }
    }

    /// Sends `payload` to each id in order. Duplicate ids produce
    /// duplicate enqueue attempts.
    pub async fn broadcast_to_users(&self, client_ids: &[ClientId], payload: Bytes) -> DeliveryReport {
        let targets = self
            .directory
            .read()
            .await
            .targets(client_ids.iter().copied());
        self.deliver(targets, &payload)
    }

    /// Sends `payload` to every current member of `session_id`. An unknown
    /// or empty session enqueues nothing.
    pub async fn broadcast_to_session(&self, session_id: SessionId, payload: Bytes) -> DeliveryReport {
        let targets = {
            let dir = self.directory.read().await;
            match dir.sessions.get(&session_id) {
                Some(members) => dir.targets(members.iter().copied()),
                None => return DeliveryReport::default(),
            }
        };
        self.deliver(targets, &payload)
    }

    /// Sends `payload` once to every client in the union of `regions`.
    pub async fn broadcast_to_regions(&self, regions: &[String], payload: Bytes) -> DeliveryReport {
        let targets = {
            let dir = self.directory.read().await;
            dir.targets(union_of(&dir.regions, regions))
        };
        self.deliver(targets, &payload)
    }

    /// Sends `payload` once to every client in the union of `roles`.
    pub async fn broadcast_to_roles(&self, roles: &[String], payload: Bytes) -> DeliveryReport {
        let targets = {
            let dir = self.directory.read().await;
            dir.targets(union_of(&dir.roles, roles))
        };
        self.deliver(targets, &payload)
    }

    fn deliver(&self, targets: Vec<Target>, payload: &Bytes) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for (client_id, sender) in targets {
            let outcome = match sender {
                Some(tx) => self.enqueue(client_id, &tx, payload.clone()),
                None => SendOutcome::Offline,
            };
            report.record(outcome);
        }
        report
    }

    fn enqueue(&self, client_id: ClientId, tx: &mpsc::Sender<Bytes>, payload: Bytes) -> SendOutcome {
        match tx.try_send(payload) {
            Ok(()) => {
                self.enqueued_total.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Enqueued
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped_total.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(%client_id, dropped_total = dropped, "send queue full, payload dropped");
                SendOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Offline,
        }
    }

    /// Returns `true` if `client_id` has a live connection.
    pub async fn is_connected(&self, client_id: ClientId) -> bool {
        self.directory.read().await.clients.contains_key(&client_id)
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.directory.read().await.clients.len()
    }

    /// Current members of `session_id`, sorted.
    pub async fn session_members(&self, session_id: SessionId) -> Vec<ClientId> {
        let mut members: Vec<ClientId> = self
            .directory
            .read()
            .await
            .sessions
            .get(&session_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();
        members.sort_unstable();
        members
    }

    /// Metadata of the live connection for `client_id`.
    pub async fn metadata_of(&self, client_id: ClientId) -> Option<ClientMetadata> {
        self.directory
            .read()
            .await
            .clients
            .get(&client_id)
            .map(|slot| slot.metadata.clone())
    }

    /// Snapshot of the registry counters.
    pub async fn stats(&self) -> RegistryStats {
        let dir = self.directory.read().await;
        RegistryStats {
            connections: dir.clients.len(),
            sessions: dir.sessions.len(),
            regions: dir.regions.len(),
            roles: dir.roles.len(),
            enqueued_total: self.enqueued_total.load(Ordering::Relaxed),
            dropped_total: self.dropped_total.load(Ordering::Relaxed),
        }
    }

    /// Closes every outbound queue and clears all indices. Write loops
    /// drain what is already queued and then close their transports.
    /// Returns the number of connections closed.
    pub async fn close_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.directory.write().await);
        let closed = drained.clients.len();
        tracing::info!(closed, "closed all live connections");
        closed
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_QUEUE_SIZE)
    }
}
