// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trait-object boundaries for the out-of-scope collaborators named in spec §6:
//! the HTTP/auth layer, persistent ride storage, and notification channels.
//! Injected at construction rather than reached for as globals (REDESIGN FLAG
//! in spec §9: "global loggers and singletons... make these explicit
//! collaborators").

use async_trait::async_trait;

/// Opaque ride status as reported by the ride store. Only the values the
/// Matcher's pending check cares about are named; anything else the ride
/// store returns is treated as "exists" without further interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RideStatus(pub String);

impl RideStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self.0.as_str(), "pending" | "searching")
    }
}

/// Read-only collaborator for ride-room authorization and the delayed-wave
/// pending check (spec §4.3, §6).
#[async_trait]
pub trait RideStore: Send + Sync {
    async fn ride_is_participant(&self, ride_id: &str, user_id: &str) -> anyhow::Result<bool>;

    /// `None` means the ride store has no record of the ride at all.
    async fn ride_status(&self, ride_id: &str) -> anyhow::Result<Option<RideStatus>>;
}

/// Best-effort outbound notification sink (push/SMS/email). Never called from
/// a path whose correctness depends on delivery — only from paths spec §7
/// explicitly marks best-effort.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, user_id: &str, title: &str, body: &str) -> anyhow::Result<()>;
}

/// No-op `RideStore` for standalone operation and tests. Authorization always
/// fails closed; the pending check reports no record, so the Matcher's
/// delayed wave is skipped rather than guessed at.
pub struct NullRideStore;

#[async_trait]
impl RideStore for NullRideStore {
    async fn ride_is_participant(&self, _ride_id: &str, _user_id: &str) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn ride_status(&self, _ride_id: &str) -> anyhow::Result<Option<RideStatus>> {
        Ok(None)
    }
}

/// No-op `NotificationSink` for standalone operation and tests.
pub struct NullNotificationSink;

#[async_trait]
impl NotificationSink for NullNotificationSink {
    async fn notify(&self, _user_id: &str, _title: &str, _body: &str) -> anyhow::Result<()> {
        Ok(())
    }
}
