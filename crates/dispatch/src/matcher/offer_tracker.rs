// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offer Tracker: a narrow typed view over the Geo Cache's generic KV
//! surface, holding `(ride, driver)` offer records and a per-ride driver
//! set for cancellation (spec §4.4).
//!
//! Grounded on the `SessionEntry.cached_status`/`cached_screen` pattern in
//! `mux::state`: a thin struct wrapping a shared cache rather than owning
//! storage itself. No locking here — the Matcher is the sole writer per
//! ride (spec §5 "Shared-resource policy"), and the set/key split is
//! reconciled only at cancellation time (spec §9: "orphan offer keys... are
//! harmless stale data").

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoCache;

fn offer_key(ride_id: &str, driver_id: &str) -> String {
    format!("ride_offer:{ride_id}:{driver_id}")
}

fn offer_drivers_key(ride_id: &str) -> String {
    format!("ride_offer_drivers:{ride_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OfferRecord {
    driver_id: String,
    sent_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

pub struct OfferTracker {
    cache: Arc<dyn GeoCache>,
}

impl OfferTracker {
    pub fn new(cache: Arc<dyn GeoCache>) -> Self {
        Self { cache }
    }

    /// Write the per-(ride,driver) offer record and grow the per-ride
    /// driver set, both TTL'd to the offer's remaining lifetime.
    ///
    /// Read-modify-write on the set is tolerated: the Matcher is the sole
    /// writer per ride (spec §4.3).
    pub async fn track_offer(
        &self,
        ride_id: &str,
        driver_id: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let ttl_seconds = (expires_at - Utc::now()).num_seconds().max(1);

        let record = OfferRecord { driver_id: driver_id.to_owned(), sent_at: Utc::now(), expires_at };
        self.cache.set_ex(&offer_key(ride_id, driver_id), &serde_json::to_string(&record)?, ttl_seconds).await?;

        let mut drivers = self.list_offered_drivers(ride_id).await?;
        if !drivers.contains(&driver_id.to_owned()) {
            drivers.push(driver_id.to_owned());
        }
        self.cache.set_ex(&offer_drivers_key(ride_id), &serde_json::to_string(&drivers)?, ttl_seconds).await?;

        Ok(())
    }

    /// The set of driver ids that received an offer for `ride_id`, or empty
    /// if absent.
    pub async fn list_offered_drivers(&self, ride_id: &str) -> anyhow::Result<Vec<String>> {
        match self.cache.get_string(&offer_drivers_key(ride_id)).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    /// Delete the per-(ride,driver) offer key. A no-op if already absent —
    /// at-least-once redelivery means cancellation must be idempotent.
    pub async fn clear_offer(&self, ride_id: &str, driver_id: &str) -> anyhow::Result<()> {
        self.cache.delete(&[offer_key(ride_id, driver_id)]).await
    }

    /// Delete the per-ride driver set.
    pub async fn clear_all(&self, ride_id: &str) -> anyhow::Result<()> {
        self.cache.delete(&[offer_drivers_key(ride_id)]).await
    }
}

#[cfg(test)]
#[path = "offer_tracker_tests.rs"]
mod tests;
