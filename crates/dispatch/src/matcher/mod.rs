// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Matcher: reacts to ride lifecycle events, drives driver selection,
//! batched offer dispatch, and cancellation (spec §4.3).
//!
//! The bus-subscription loop is the generalization of
//! `cli::transport::inbox::InboxConsumer::run`'s durable pull-consumer loop
//! to three subjects instead of one. The delayed second wave is an
//! independently spawned task holding no lock while it sleeps, grounded on
//! the teacher's free-running interval-task pattern over shared state
//! (`upstream::health`'s probe loop).

pub mod offer_tracker;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventHandler, NatsEventBus, run_subscription};
use crate::collaborators::RideStore;
use crate::config::DispatchConfig;
use crate::geo::{self, GeoCache};
use crate::hub::SessionHub;
use crate::model::{DriverCandidate, Event, Location, Message};

use offer_tracker::OfferTracker;

/// Average assumed driving speed used for the ETA estimate (spec §4.3:
/// "distance ÷ 30 km/h, rounded up").
const ASSUMED_SPEED_KMH: f64 = 30.0;

#[allow(dead_code)]
#[derive(Debug, Clone, Deserialize)]
struct RideRequested {
    ride_id: String,
    rider_id: String,
    rider_name: String,
    rider_rating: f64,
    pickup: Location,
    #[serde(default)]
    dropoff: Option<Location>,
    ride_type_id: String,
    ride_type_name: String,
    estimated_fare: f64,
    estimated_distance_km: f64,
    estimated_duration_min: f64,
    currency: String,
    requested_at: DateTime<Utc>,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct RideAccepted {
    ride_id: String,
    driver_id: String,
    #[serde(default)]
    rider_id: Option<String>,
    accepted_at: DateTime<Utc>,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CancelledBy {
    Rider,
    Driver,
    System,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct RideCancelled {
    ride_id: String,
    cancelled_by: CancelledBy,
    #[serde(default)]
    reason: Option<String>,
    cancelled_at: DateTime<Utc>,
}

pub struct Matcher {
    geo: Arc<dyn GeoCache>,
    tracker: OfferTracker,
    hub: Arc<SessionHub>,
    ride_store: Arc<dyn RideStore>,
    config: Arc<DispatchConfig>,
}

impl Matcher {
    pub fn new(
        geo: Arc<dyn GeoCache>,
        hub: Arc<SessionHub>,
        ride_store: Arc<dyn RideStore>,
        config: Arc<DispatchConfig>,
    ) -> Arc<Self> {
        Arc::new(Self { tracker: OfferTracker::new(Arc::clone(&geo)), geo, hub, ride_store, config })
    }

    /// Start the three durable bus subscriptions (spec §4.3) as independent
    /// tasks; each runs until `shutdown` fires.
    pub async fn run(self: Arc<Self>, bus: Arc<NatsEventBus>, shutdown: CancellationToken) -> anyhow::Result<()> {
        self.spawn_subscription(&bus, "rides.requested", "requested", shutdown.clone(), {
            let matcher = Arc::clone(&self);
            move |event| {
                let matcher = Arc::clone(&matcher);
                Box::pin(async move { matcher.on_ride_requested(event).await })
            }
        })
        .await?;

        self.spawn_subscription(&bus, "rides.accepted", "accepted", shutdown.clone(), {
            let matcher = Arc::clone(&self);
            move |event| {
                let matcher = Arc::clone(&matcher);
                Box::pin(async move { matcher.on_ride_accepted(event).await })
            }
        })
        .await?;

        self.spawn_subscription(&bus, "rides.cancelled", "cancelled", shutdown, {
            let matcher = Arc::clone(&self);
            move |event| {
                let matcher = Arc::clone(&matcher);
                Box::pin(async move { matcher.on_ride_cancelled(event).await })
            }
        })
        .await?;

        Ok(())
    }

    async fn spawn_subscription(
        &self,
        bus: &Arc<NatsEventBus>,
        subject: &str,
        consumer_suffix: &str,
        shutdown: CancellationToken,
        handler: EventHandler,
    ) -> anyhow::Result<()> {
        let consumer_name = format!("{}-{consumer_suffix}", self.config.bus_consumer_prefix);
        let consumer = bus.durable_consumer(subject, &consumer_name, &self.config).await?;
        tokio::spawn(run_subscription(consumer, subject.to_owned(), handler, shutdown));
        Ok(())
    }

    async fn on_ride_requested(self: &Arc<Self>, event: Event) -> anyhow::Result<()> {
        let req: RideRequested = event.decode()?;

        let candidates = self
            .geo
            .find_available_drivers(req.pickup.lat, req.pickup.lng, self.config.max_drivers_to_notify, self.config.max_search_radius_km)
            .await?;

        if candidates.is_empty() {
            self.hub.send_to_user(&req.rider_id, Message::new("ride.no_drivers").with_ride(&req.ride_id)).await;
            return Ok(());
        }

        let expires_at = Utc::now() + self.config.offer_timeout();
        let batch_size = self.config.first_batch_size.min(candidates.len());
        let (first_batch, remainder) = candidates.split_at(batch_size);

        for candidate in first_batch {
            self.dispatch_offer(&req, candidate, expires_at).await;
        }

        if !remainder.is_empty() {
            self.spawn_delayed_wave(req, remainder.to_vec(), expires_at);
        }

        Ok(())
    }

    /// Schedule the delayed second wave on an independent task holding no
    /// lock while it sleeps (spec §5).
    fn spawn_delayed_wave(self: &Arc<Self>, req: RideRequested, remainder: Vec<DriverCandidate>, expires_at: DateTime<Utc>) {
        let matcher = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(matcher.config.retry_delay()).await;

            match matcher.is_ride_pending(&req.ride_id).await {
                Ok(true) => {
                    for candidate in &remainder {
                        matcher.dispatch_offer(&req, candidate, expires_at).await;
                    }
                }
                Ok(false) => {
                    tracing::debug!(ride_id = %req.ride_id, "ride no longer pending, skipping delayed wave");
                }
                Err(err) => {
                    tracing::warn!(ride_id = %req.ride_id, %err, "pending check failed, aborting delayed wave");
                }
            }
        });
    }

    /// Dispatch a single offer: compute distance/ETA, track it, and enqueue
    /// the `ride.offer` message. Tracking-write failures are logged but do
    /// not block the send (spec §4.3 failure semantics).
    async fn dispatch_offer(&self, req: &RideRequested, candidate: &DriverCandidate, expires_at: DateTime<Utc>) {
        let distance_km = geo::calculate_distance(req.pickup.lat, req.pickup.lng, candidate.latitude, candidate.longitude);
        let eta_minutes = (distance_km / ASSUMED_SPEED_KMH * 60.0).ceil() as i64;

        if let Err(err) = self.tracker.track_offer(&req.ride_id, &candidate.driver_id, expires_at).await {
            tracing::warn!(ride_id = %req.ride_id, driver_id = %candidate.driver_id, %err, "offer tracking write failed, sending offer anyway");
        }

        let mut data = serde_json::Map::new();
        data.insert("rider_name".to_owned(), json!(req.rider_name));
        data.insert("rider_rating".to_owned(), json!(req.rider_rating));
        data.insert("pickup_location".to_owned(), json!(req.pickup));
        if let Some(ref dropoff) = req.dropoff {
            data.insert("dropoff_location".to_owned(), json!(dropoff));
        }
        data.insert("ride_type_id".to_owned(), json!(req.ride_type_id));
        data.insert("ride_type_name".to_owned(), json!(req.ride_type_name));
        data.insert("estimated_fare".to_owned(), json!(req.estimated_fare));
        data.insert("currency".to_owned(), json!(req.currency));
        data.insert("distance_to_pickup_km".to_owned(), json!(distance_km));
        data.insert("eta_minutes".to_owned(), json!(eta_minutes));
        data.insert("expires_at".to_owned(), json!(expires_at.to_rfc3339()));
        data.insert("timeout_seconds".to_owned(), json!(self.config.offer_timeout_seconds));

        let msg = Message::new("ride.offer").with_ride(&req.ride_id).with_user(&candidate.driver_id).with_data(data);
        self.hub.send_to_user(&candidate.driver_id, msg).await;
    }

    async fn on_ride_accepted(self: &Arc<Self>, event: Event) -> anyhow::Result<()> {
        let accepted: RideAccepted = event.decode()?;
        self.cancel_offers(&accepted.ride_id, Some(&accepted.driver_id), "accepted_elsewhere").await
    }

    async fn on_ride_cancelled(self: &Arc<Self>, event: Event) -> anyhow::Result<()> {
        let cancelled: RideCancelled = event.decode()?;
        self.cancel_offers(&cancelled.ride_id, None, "cancelled").await
    }

    /// Cancel outstanding offers for a ride, excluding `exclude_driver` if
    /// given. Safe to re-run: deleting an absent key is a no-op (spec §4.3
    /// "at-least-once delivery... cancellation path must be safe to
    /// re-run").
    async fn cancel_offers(&self, ride_id: &str, exclude_driver: Option<&str>, cause: &str) -> anyhow::Result<()> {
        let drivers = self.tracker.list_offered_drivers(ride_id).await?;

        for driver_id in &drivers {
            if Some(driver_id.as_str()) == exclude_driver {
                continue;
            }
            let mut data = serde_json::Map::new();
            data.insert("cause".to_owned(), json!(cause));
            let msg = Message::new("ride.offer_cancelled").with_ride(ride_id).with_user(driver_id).with_data(data);
            self.hub.send_to_user(driver_id, msg).await;
            self.tracker.clear_offer(ride_id, driver_id).await?;
        }

        self.tracker.clear_all(ride_id).await?;
        Ok(())
    }

    /// Pending check used by the delayed wave (spec §4.3). The ride-status
    /// cache key takes priority; the Ride Store fallback requires a real
    /// status check rather than treating "ride exists" as pending (the
    /// source's placeholder behavior spec §9 flags as an open question —
    /// resolved here in favor of the real check).
    async fn is_ride_pending(&self, ride_id: &str) -> anyhow::Result<bool> {
        if let Some(raw) = self.geo.get_string(&format!("ride_status:{ride_id}")).await? {
            return Ok(matches!(raw.as_str(), "pending" | "searching"));
        }
        match self.ride_store.ride_status(ride_id).await? {
            Some(status) => Ok(status.is_pending()),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
