// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session Hub: registers/unregisters long-lived client sessions, routes by
//! user id or room id, and holds room membership (spec §4.1).
//!
//! Grounded on `coopmux::state::MuxState` + `coopmux::transport::ws` — the
//! read/write-lock-guarded session map generalizes `MuxState::sessions`, and
//! the bounded per-session mpsc queue is the Rust shape of the teacher's
//! per-connection `tokio::select!` loop in `handle_ws`. There is no separate
//! "central loop actor": the RwLock plus bounded queue already gives the
//! serialization spec §4.1/§9 call for ("single central loop... snapshot
//! recipients under the lock, release, then enqueue outside").

pub mod session;
pub mod ws;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::model::{Message, Role};

pub use session::Session;

/// Send queue capacity per session (spec §3 "Session" invariant).
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// A registered handler for one inbound message type.
///
/// Mirrors the "callback-style event handlers... re-express as a handler
/// registry indexed by type tag" REDESIGN FLAG in spec §9: `(session,
/// message) -> ()`, total over its declared type.
pub type HandlerFn =
    Arc<dyn Fn(Arc<Session>, Message) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Shared session hub state.
pub struct SessionHub {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    rooms: RwLock<HashMap<String, HashSet<String>>>,
    handlers: RwLock<HashMap<String, HandlerFn>>,
}

impl SessionHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
        })
    }

    /// Install the handler for one inbound message type. Last registration
    /// for a given type wins, matching `register_handler` in spec §4.1.
    pub async fn register_handler(&self, message_type: impl Into<String>, handler: HandlerFn) {
        self.handlers.write().await.insert(message_type.into(), handler);
    }

    /// Dispatch an inbound message to its registered handler, if any.
    /// Unknown types are logged and dropped (spec §4.2 error policy) —
    /// they never terminate the session.
    pub async fn dispatch(self: &Arc<Self>, session: Arc<Session>, message: Message) {
        let handler = self.handlers.read().await.get(&message.kind).cloned();
        match handler {
            Some(handler) => handler(session, message).await,
            None => tracing::debug!(kind = %message.kind, "dispatch: no handler registered, dropping"),
        }
    }

    /// Register a session. Idempotent by id: an existing session under the
    /// same id is replaced — its send queue closed and room membership
    /// dropped — before the new one becomes visible (spec §4.1, §8
    /// "Session uniqueness").
    pub async fn register(self: &Arc<Self>, session: Arc<Session>) {
        let prior = {
            let mut sessions = self.sessions.write().await;
            let prior = sessions.get(&session.id).cloned();
            if let Some(prior) = &prior {
                prior.close();
            }
            sessions.insert(session.id.clone(), Arc::clone(&session));
            prior
        };
        if let Some(prior) = prior {
            self.drop_from_room(&prior).await;
        }
        tracing::info!(session_id = %session.id, role = ?session.role, "session registered");
    }

    /// Remove a session from the id index, its room, and close its queue.
    /// Safe to call multiple times (spec §8 round-trip law).
    pub async fn unregister(self: &Arc<Self>, session: &Arc<Session>) {
        let removed = self.sessions.write().await.remove(&session.id).is_some();
        if !removed {
            return;
        }
        self.drop_from_room(session).await;
        session.close();
        tracing::info!(session_id = %session.id, "session unregistered");
    }

    /// Add a session to a room. A session may belong to at most one room —
    /// joining a new one first leaves the old one.
    pub async fn add_to_room(self: &Arc<Self>, id: &str, ride_id: &str) {
        let Some(session) = self.sessions.read().await.get(id).cloned() else { return };
        self.drop_from_room(&session).await;
        self.rooms.write().await.entry(ride_id.to_owned()).or_default().insert(id.to_owned());
        *session.room.write().await = Some(ride_id.to_owned());
    }

    /// Remove a session from its current room, if any. Garbage collects the
    /// room entry once its last member leaves (spec §8 "Room closure").
    pub async fn remove_from_room(self: &Arc<Self>, id: &str, ride_id: &str) {
        let Some(session) = self.sessions.read().await.get(id).cloned() else { return };
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(ride_id) {
            members.remove(id);
            if members.is_empty() {
                rooms.remove(ride_id);
            }
        }
        drop(rooms);
        *session.room.write().await = None;
    }

    async fn drop_from_room(self: &Arc<Self>, session: &Arc<Session>) {
        let current = session.room.read().await.clone();
        if let Some(ride_id) = current {
            self.remove_from_room(&session.id, &ride_id).await;
        }
    }

    /// Enqueue `msg` to a single user's session. Non-blocking: if the
    /// session's queue is saturated, it is forcibly unregistered (spec §4.1
    /// slow-consumer policy) rather than blocking the sender.
    pub async fn send_to_user(self: &Arc<Self>, user_id: &str, msg: Message) {
        let Some(session) = self.sessions.read().await.get(user_id).cloned() else { return };
        self.send_or_evict(session, msg).await;
    }

    /// Enqueue `msg` to every session in `ride_id`'s room.
    pub async fn send_to_room(self: &Arc<Self>, ride_id: &str, msg: Message) {
        self.send_to_room_excluding(ride_id, None, msg).await;
    }

    /// Enqueue `msg` to every session in `ride_id`'s room except `exclude_id`.
    pub async fn send_to_room_excluding(
        self: &Arc<Self>,
        ride_id: &str,
        exclude_id: Option<&str>,
        msg: Message,
    ) {
        // Snapshot recipients under the lock, release, then enqueue outside —
        // never hold the lock across the per-session send (spec §5/§9).
        let recipients: Vec<Arc<Session>> = {
            let rooms = self.rooms.read().await;
            let Some(members) = rooms.get(ride_id) else { return };
            let sessions = self.sessions.read().await;
            members
                .iter()
                .filter(|id| exclude_id != Some(id.as_str()))
                .filter_map(|id| sessions.get(id).cloned())
                .collect()
        };
        for session in recipients {
            self.send_or_evict(session, msg.clone()).await;
        }
    }

    /// Enqueue `msg` to every currently registered session.
    pub async fn send_to_all(self: &Arc<Self>, msg: Message) {
        let recipients: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        for session in recipients {
            self.send_or_evict(session, msg.clone()).await;
        }
    }

    async fn send_or_evict(self: &Arc<Self>, session: Arc<Session>, msg: Message) {
        if session.try_send(msg).is_err() {
            tracing::warn!(session_id = %session.id, "send queue saturated, evicting slow consumer");
            self.unregister(&session).await;
        }
    }

    /// Number of currently registered sessions.
    pub async fn client_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Number of currently non-empty rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Look up a session by id.
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Members of a room, for tests and introspection.
    pub async fn room_members(&self, ride_id: &str) -> HashSet<String> {
        self.rooms.read().await.get(ride_id).cloned().unwrap_or_default()
    }

    /// Close every currently registered session. First step of the
    /// graceful shutdown sequence (spec §5: "drain hub, then drain bus,
    /// then close connections") — each session's own read/write loop
    /// observes its cancellation token and unregisters itself.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            session.close();
        }
    }
}

impl Default for SessionHub {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            handlers: RwLock::new(HashMap::new()),
        }
    }
}

/// Role accessor kept on `Session` for handler authorization checks
/// (spec §4.2 `location_update`: "only honored when session.role = driver").
pub fn role_of(session: &Session) -> Role {
    session.role
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
