// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire types shared by the hub, router, matcher, and bus/geo adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A session role, delivered by the HTTP handshake layer (opaque to this crate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Rider,
    Driver,
    Admin,
}

impl Default for Role {
    /// Unauthenticated/unspecified connections default to rider — a driver
    /// session only exists once the handshake layer asserts it.
    fn default() -> Self {
        Role::Rider
    }
}

/// Envelope sent over a session in either direction.
///
/// `data` is an open string-keyed map — individual handlers pick the fields
/// they need out of it rather than the envelope enforcing a closed schema,
/// matching the wire contract in spec §3 and §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ride_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ride_id: None,
            user_id: None,
            timestamp: Utc::now(),
            data: serde_json::Map::new(),
        }
    }

    pub fn with_ride(mut self, ride_id: impl Into<String>) -> Self {
        self.ride_id = Some(ride_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Map<String, serde_json::Value>) -> Self {
        self.data = data;
        self
    }
}

/// Bus envelope. `id` is the idempotency key — consumers must dedupe on it
/// because the bus is at-least-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "serde_bytes_as_base64")]
    pub data: Vec<u8>,
}

impl Event {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, source: impl Into<String>, data: Vec<u8>) -> Self {
        Self { id: id.into(), kind: kind.into(), source: source.into(), timestamp: Utc::now(), data }
    }

    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.data)
    }
}

/// `data: bytes` round-trips as base64 over JSON transports; over NATS the raw
/// bytes are the message payload and this codec is bypassed entirely (see
/// `bus::publish`/`bus::decode_payload`).
mod serde_bytes_as_base64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        use base64::Engine as _;
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        use base64::Engine as _;
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A driver's live location and status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Offline,
    Available,
    OnRide,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Available => "available",
            Self::OnRide => "on_ride",
        }
    }
}

impl std::str::FromStr for DriverStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(Self::Offline),
            "available" => Ok(Self::Available),
            "on_ride" => Ok(Self::OnRide),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverLocation {
    pub driver_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: DriverStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

/// A lat/lng pair, optionally with a human-readable address — used for pickup
/// and (optionally) dropoff locations on a ride request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// A driver candidate returned by the geo cache, already distance-sorted.
#[derive(Debug, Clone)]
pub struct DriverCandidate {
    pub driver_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
}

/// An outstanding offer to a driver for a ride. Ephemeral — lives in the
/// offer tracker only for the duration of `offer_timeout_seconds`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideOffer {
    pub ride_id: String,
    pub driver_id: String,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A single chat message persisted to the per-ride chat list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub ride_id: String,
    pub sender_id: String,
    pub sender_role: Role,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}
