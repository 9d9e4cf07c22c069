// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::model::{Message, Role};

use super::SEND_QUEUE_CAPACITY;

/// One live bidirectional client connection, addressable by user id (spec §3).
///
/// Owned exclusively by the `SessionHub`; everything else holds `Arc<Session>`
/// references obtained through the hub. The transport itself (the actual
/// WebSocket split sink/stream) lives in `hub::ws`, which is the only module
/// that needs to know it's axum underneath — `Session` only knows about its
/// outbound queue and cancellation, matching the teacher's separation between
/// `SessionEntry` (hub-owned bookkeeping) and the WS upgrade handler that owns
/// the actual socket halves.
pub struct Session {
    pub id: String,
    pub role: Role,
    pub room: RwLock<Option<String>>,
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl Session {
    /// Construct a new session and its outbound queue. The caller (the WS
    /// upgrade handler) retains the paired `Receiver` to drive the write
    /// task, and the `CancellationToken` to know when to stop.
    pub fn new(id: impl Into<String>, role: Role) -> (std::sync::Arc<Self>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let session = std::sync::Arc::new(Self {
            id: id.into(),
            role,
            room: RwLock::new(None),
            tx,
            cancel: CancellationToken::new(),
        });
        (session, rx)
    }

    /// Non-blocking enqueue. Returns `Err` if the queue is full or closed —
    /// callers (the hub's send paths) treat that as "evict this session".
    pub fn try_send(&self, msg: Message) -> Result<(), ()> {
        self.tx.try_send(msg).map_err(|_| ())
    }

    /// Signal the owning read/write tasks to stop and close the transport.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Token the write task selects on alongside queue receives.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_send_fails_once_closed() {
        let (session, mut rx) = Session::new("u1", Role::Rider);
        session.try_send(Message::new("ping")).unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, "ping");

        session.close();
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn try_send_fails_when_queue_full() {
        let (session, _rx) = Session::new("u1", Role::Rider);
        for _ in 0..SEND_QUEUE_CAPACITY {
            session.try_send(Message::new("m")).unwrap();
        }
        assert!(session.try_send(Message::new("overflow")).is_err());
    }
}
