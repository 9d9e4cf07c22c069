// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for the ride-dispatch engine.
#[derive(Debug, Clone, clap::Parser)]
pub struct DispatchConfig {
    /// Host to bind the WS/health surface on.
    #[arg(long, default_value = "127.0.0.1", env = "DISPATCH_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9900, env = "DISPATCH_PORT")]
    pub port: u16,

    /// Bearer/query token expected on the WS upgrade. If unset, auth is disabled
    /// (the HTTP handshake layer is assumed to have already validated the caller).
    #[arg(long, env = "DISPATCH_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// NATS server URL for the event bus.
    #[arg(long, default_value = "nats://127.0.0.1:4222", env = "DISPATCH_BUS_URL")]
    pub bus_url: String,

    /// NATS auth token.
    #[arg(long, env = "DISPATCH_BUS_TOKEN")]
    pub bus_token: Option<String>,

    /// JetStream stream name backing the `rides.*` subjects.
    #[arg(long, default_value = "RIDES", env = "DISPATCH_BUS_STREAM")]
    pub bus_stream: String,

    /// Durable consumer name prefix; one durable consumer is created per subject.
    #[arg(long, default_value = "matcher", env = "DISPATCH_BUS_CONSUMER_PREFIX")]
    pub bus_consumer_prefix: String,

    /// Redis URL backing the geo cache / offer tracker / chat store.
    #[arg(long, default_value = "redis://127.0.0.1:6379", env = "DISPATCH_GEO_URL")]
    pub geo_url: String,

    /// Initial search radius in kilometers for candidate drivers.
    #[arg(long, default_value_t = 5.0, env = "DISPATCH_MAX_SEARCH_RADIUS_KM")]
    pub max_search_radius_km: f64,

    /// Upper bound on candidates fetched from the geo cache per ride.
    #[arg(long, default_value_t = 20, env = "DISPATCH_MAX_DRIVERS_TO_NOTIFY")]
    pub max_drivers_to_notify: usize,

    /// Closest-N drivers to receive the initial offer wave.
    #[arg(long, default_value_t = 3, env = "DISPATCH_FIRST_BATCH_SIZE")]
    pub first_batch_size: usize,

    /// Offer validity window and offer-key TTL, in seconds.
    #[arg(long, default_value_t = 15, env = "DISPATCH_OFFER_TIMEOUT_SECONDS")]
    pub offer_timeout_seconds: i64,

    /// Delay before the second offer wave, in seconds.
    #[arg(long, default_value_t = 8, env = "DISPATCH_RETRY_DELAY_SECONDS")]
    pub retry_delay_seconds: u64,

    /// JetStream ack-wait before redelivery, in seconds.
    #[arg(long, default_value_t = 30, env = "DISPATCH_ACK_WAIT_SECONDS")]
    pub ack_wait_seconds: u64,

    /// Maximum redelivery attempts before a message is dead-lettered.
    #[arg(long, default_value_t = 5, env = "DISPATCH_MAX_DELIVER")]
    pub max_deliver: i64,

    /// Maximum number of unacked messages per consumer (flow control).
    #[arg(long, default_value_t = 256, env = "DISPATCH_MAX_ACK_PENDING")]
    pub max_ack_pending: i64,

    /// Seconds the server waits for a client PONG before closing the session.
    #[arg(long, default_value_t = 60, env = "DISPATCH_PONG_WAIT_SECONDS")]
    pub pong_wait_seconds: u64,

    /// Seconds allotted for a single write to complete before closing the session.
    #[arg(long, default_value_t = 10, env = "DISPATCH_WRITE_WAIT_SECONDS")]
    pub write_wait_seconds: u64,

    /// Maximum incoming frame size, in bytes.
    #[arg(long, default_value_t = 512 * 1024, env = "DISPATCH_MAX_FRAME_BYTES")]
    pub max_frame_bytes: usize,
}

impl DispatchConfig {
    pub fn offer_timeout(&self) -> Duration {
        Duration::from_secs(self.offer_timeout_seconds.max(0) as u64)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_seconds)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_seconds)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_seconds)
    }

    /// Server ping period is 9/10 of the pong-wait window, per spec.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }
}
