// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Realtime Router: one handler per inbound message type, installed on the
//! Session Hub at construction (spec §4.2).
//!
//! Grounded on `mux::transport::ws_mux::handle_client_input`'s `match event
//! { ... }` dispatch — generalized per spec §9's REDESIGN FLAG from a fixed
//! match arm list to a registry so new message types are additive rather
//! than requiring a new match arm.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::collaborators::RideStore;
use crate::geo::GeoCache;
use crate::hub::{Session, SessionHub};
use crate::model::{ChatMessage, DriverStatus, Message, Role};

const LOCATION_TTL_SECONDS: i64 = 300;
const CHAT_TTL_SECONDS: i64 = 24 * 3600;

fn chat_key(ride_id: &str) -> String {
    format!("ride:chat:{ride_id}")
}

fn error_message(reason: impl Into<String>) -> Message {
    let mut data = serde_json::Map::new();
    data.insert("message".to_owned(), json!(reason.into()));
    Message::new("error").with_data(data)
}

/// Installs the Realtime Router's handlers on a `SessionHub`.
pub struct Router {
    geo: Arc<dyn GeoCache>,
    ride_store: Arc<dyn RideStore>,
}

impl Router {
    pub fn new(geo: Arc<dyn GeoCache>, ride_store: Arc<dyn RideStore>) -> Arc<Self> {
        Arc::new(Self { geo, ride_store })
    }

    /// Register all six inbound handlers on `hub`.
    pub async fn install(self: &Arc<Self>, hub: &Arc<SessionHub>) {
        macro_rules! register {
            ($type:literal, $method:ident) => {{
                let router = Arc::clone(self);
                let hub = Arc::clone(hub);
                hub.register_handler(
                    $type,
                    Arc::new(move |session, message| {
                        let router = Arc::clone(&router);
                        let hub = Arc::clone(&hub);
                        Box::pin(async move { router.$method(&hub, session, message).await })
                    }),
                )
                .await;
            }};
        }

        register!("location_update", on_location_update);
        register!("ride_status", on_ride_status);
        register!("chat_message", on_chat_message);
        register!("typing", on_typing);
        register!("join_ride", on_join_ride);
        register!("leave_ride", on_leave_ride);
    }

    async fn on_location_update(&self, hub: &Arc<SessionHub>, session: Arc<Session>, message: Message) {
        if session.role != Role::Driver {
            return;
        }
        let (Some(lat), Some(lng)) = (
            message.data.get("latitude").and_then(|v| v.as_f64()),
            message.data.get("longitude").and_then(|v| v.as_f64()),
        ) else {
            tracing::debug!(session_id = %session.id, "location_update missing latitude/longitude, dropping");
            return;
        };
        let heading = message.data.get("heading").and_then(|v| v.as_f64());
        let speed = message.data.get("speed").and_then(|v| v.as_f64());

        // Flip offline -> available before upserting position, so the
        // availability index only ever gains an entry whose status is
        // already (or about to be) `available`.
        match self.geo.get_status(&session.id).await {
            Ok(DriverStatus::Offline) => {
                if let Err(err) = self.geo.set_status(&session.id, DriverStatus::Available).await {
                    tracing::warn!(session_id = %session.id, %err, "failed to mark driver available");
                }
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(session_id = %session.id, %err, "failed to read driver status"),
        }

        if let Err(err) = self.geo.upsert_driver_location(&session.id, lat, lng, heading, speed).await {
            tracing::warn!(session_id = %session.id, %err, "failed to upsert driver location");
            return;
        }
        let _ = self.geo.expire(&format!("driver:location:{}", session.id), LOCATION_TTL_SECONDS).await;

        let Some(ride_id) = session.room.read().await.clone() else { return };
        let mut data = serde_json::Map::new();
        data.insert("driver_id".to_owned(), json!(session.id));
        data.insert("latitude".to_owned(), json!(lat));
        data.insert("longitude".to_owned(), json!(lng));
        if let Some(heading) = heading {
            data.insert("heading".to_owned(), json!(heading));
        }
        if let Some(speed) = speed {
            data.insert("speed".to_owned(), json!(speed));
        }
        let relay = Message::new("driver_location").with_ride(ride_id.clone()).with_user(session.id.clone()).with_data(data);
        self.send_to_room_role(hub, &ride_id, Role::Rider, relay).await;
    }

    async fn on_ride_status(&self, hub: &Arc<SessionHub>, session: Arc<Session>, message: Message) {
        let (Some(ride_id), Some(status)) =
            (message.ride_id.clone(), message.data.get("status").and_then(|v| v.as_str()).map(str::to_owned))
        else {
            tracing::debug!(session_id = %session.id, "ride_status missing ride_id/status, dropping");
            return;
        };

        let mut data = serde_json::Map::new();
        data.insert("status".to_owned(), json!(status));
        data.insert("updated_by".to_owned(), json!(session.id));
        data.insert("role".to_owned(), json!(session.role));
        let update = Message::new("ride_status_update").with_ride(ride_id.clone()).with_user(session.id.clone()).with_data(data);
        hub.send_to_room(&ride_id, update).await;
    }

    async fn on_chat_message(&self, hub: &Arc<SessionHub>, session: Arc<Session>, message: Message) {
        let Some(ride_id) = session.room.read().await.clone() else {
            tracing::debug!(session_id = %session.id, "chat_message from session not in a ride room, dropping");
            return;
        };
        let Some(body) = message.data.get("body").and_then(|v| v.as_str()).filter(|s| !s.is_empty()) else {
            tracing::debug!(session_id = %session.id, "chat_message with empty body, dropping");
            return;
        };

        let entry = ChatMessage {
            ride_id: ride_id.clone(),
            sender_id: session.id.clone(),
            sender_role: session.role,
            body: body.to_owned(),
            timestamp: Utc::now(),
        };
        if let Ok(encoded) = serde_json::to_string(&entry) {
            if let Err(err) = self.geo.rpush(&chat_key(&ride_id), &encoded).await {
                tracing::warn!(ride_id = %ride_id, %err, "failed to persist chat message");
            }
            let _ = self.geo.expire(&chat_key(&ride_id), CHAT_TTL_SECONDS).await;
        }

        let mut data = serde_json::Map::new();
        data.insert("body".to_owned(), json!(body));
        data.insert("sender_role".to_owned(), json!(session.role));
        let relay = Message::new("chat_message").with_ride(ride_id.clone()).with_user(session.id.clone()).with_data(data);
        hub.send_to_room_excluding(&ride_id, Some(&session.id), relay).await;
    }

    async fn on_typing(&self, hub: &Arc<SessionHub>, session: Arc<Session>, message: Message) {
        let Some(ride_id) = session.room.read().await.clone() else { return };
        let is_typing = message.data.get("is_typing").and_then(|v| v.as_bool()).unwrap_or(false);

        let mut data = serde_json::Map::new();
        data.insert("is_typing".to_owned(), json!(is_typing));
        let relay = Message::new("typing").with_ride(ride_id.clone()).with_user(session.id.clone()).with_data(data);
        hub.send_to_room_excluding(&ride_id, Some(&session.id), relay).await;
    }

    async fn on_join_ride(&self, hub: &Arc<SessionHub>, session: Arc<Session>, message: Message) {
        let Some(ride_id) = message.ride_id.clone() else {
            hub.send_to_user(&session.id, error_message("join_ride requires ride_id")).await;
            return;
        };

        let authorized = match self.ride_store.ride_is_participant(&ride_id, &session.id).await {
            Ok(authorized) => authorized,
            Err(err) => {
                tracing::warn!(session_id = %session.id, ride_id = %ride_id, %err, "ride store lookup failed");
                hub.send_to_user(&session.id, error_message("authorization check failed")).await;
                return;
            }
        };

        if !authorized {
            hub.send_to_user(&session.id, error_message("not a participant of this ride")).await;
            return;
        }

        hub.add_to_room(&session.id, &ride_id).await;
        hub.send_to_user(&session.id, Message::new("joined_ride").with_ride(ride_id.clone())).await;

        let mut data = serde_json::Map::new();
        data.insert("user_id".to_owned(), json!(session.id));
        data.insert("role".to_owned(), json!(session.role));
        let announce = Message::new("user_joined").with_ride(ride_id.clone()).with_user(session.id.clone()).with_data(data);
        hub.send_to_room_excluding(&ride_id, Some(&session.id), announce).await;
    }

    async fn on_leave_ride(&self, hub: &Arc<SessionHub>, session: Arc<Session>, message: Message) {
        let Some(ride_id) = message.ride_id.clone().or(session.room.read().await.clone()) else { return };

        let mut data = serde_json::Map::new();
        data.insert("user_id".to_owned(), json!(session.id));
        let announce = Message::new("user_left").with_ride(ride_id.clone()).with_user(session.id.clone()).with_data(data);
        hub.send_to_room_excluding(&ride_id, Some(&session.id), announce).await;

        hub.remove_from_room(&session.id, &ride_id).await;
        hub.send_to_user(&session.id, Message::new("left_ride").with_ride(ride_id)).await;
    }

    /// Send `msg` to every room member whose role matches `role` — used for
    /// the driver→rider location relay (spec §4.2 does not fan location
    /// updates back out to other drivers in the room).
    async fn send_to_room_role(&self, hub: &Arc<SessionHub>, ride_id: &str, role: Role, msg: Message) {
        for member_id in hub.room_members(ride_id).await {
            if let Some(member) = hub.get(&member_id).await {
                if member.role == role {
                    hub.send_to_user(&member_id, msg.clone()).await;
                }
            }
        }
    }

    /// Decoded ordered chat history for a ride, bounded by the stored
    /// window (spec §4.2).
    pub async fn get_chat_history(&self, ride_id: &str) -> anyhow::Result<Vec<ChatMessage>> {
        let raw = self.geo.lrange(&chat_key(ride_id), 0, -1).await?;
        Ok(raw.iter().filter_map(|entry| serde_json::from_str(entry).ok()).collect())
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
