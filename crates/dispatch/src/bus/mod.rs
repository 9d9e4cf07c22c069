// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event Bus Adapter: durable, at-least-once, ordered-per-subject pub/sub
//! over an `async-nats` JetStream stream (spec §4/§6).
//!
//! Grounded on `cli::transport::inbox::InboxConsumer` (durable pull-consumer
//! loop, `fetch().max_messages(N).messages()`, explicit ack/nak) generalized
//! from one subject to many, and `mux::transport::nats_pub::NatsPublisher`
//! for the connect/publish shape. Idempotent publish uses the JetStream
//! `Nats-Msg-Id` header instead of hand-rolled dedupe bookkeeping, per
//! spec.md §3's "id is stable under redelivery" invariant.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::{AckPolicy, Consumer, DeliverPolicy};
use async_nats::jetstream::{AckKind, Context as JetStreamContext};
use async_nats::HeaderMap;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;
use crate::model::Event;

/// A handler for one bus subject. Returning `Err` naks the message so
/// JetStream redelivers it (spec §7 "Upstream transient"); returning `Ok`
/// acks it.
pub type EventHandler =
    Arc<dyn Fn(Event) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

/// Publish-side contract, kept as a trait so the Matcher's tests can inject
/// an in-memory fake instead of a live NATS connection.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, subject: &str, event: &Event) -> anyhow::Result<()>;
}

/// JetStream-backed event bus.
pub struct NatsEventBus {
    js: JetStreamContext,
    stream_name: String,
}

impl NatsEventBus {
    /// Connect to NATS and bind to the configured JetStream stream.
    pub async fn connect(config: &DispatchConfig) -> anyhow::Result<Self> {
        let mut opts = async_nats::ConnectOptions::new().retry_on_initial_connect();
        if let Some(ref token) = config.bus_token {
            opts = opts.token(token.clone());
        }

        tracing::info!(url = %config.bus_url, stream = %config.bus_stream, "connecting event bus");
        let client = opts.connect(&config.bus_url).await?;
        let js = async_nats::jetstream::new(client);
        tracing::info!("event bus connected");

        Ok(Self { js, stream_name: config.bus_stream.clone() })
    }

    /// Create (or bind to) a durable pull consumer filtered to `subject`.
    ///
    /// One durable consumer per `(subject, consumer_name)` per spec §6.
    pub async fn durable_consumer(
        &self,
        subject: &str,
        consumer_name: &str,
        config: &DispatchConfig,
    ) -> anyhow::Result<Consumer<PullConfig>> {
        let stream = self.js.get_stream(&self.stream_name).await?;

        let pull_config = PullConfig {
            durable_name: Some(consumer_name.to_owned()),
            filter_subject: subject.to_owned(),
            deliver_policy: DeliverPolicy::New,
            ack_policy: AckPolicy::Explicit,
            ack_wait: config.ack_wait(),
            max_deliver: config.max_deliver,
            max_ack_pending: config.max_ack_pending,
            ..Default::default()
        };

        Ok(stream.get_or_create_consumer(consumer_name, pull_config).await?)
    }
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(&self, subject: &str, event: &Event) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(event)?;
        let mut headers = HeaderMap::new();
        headers.insert("Nats-Msg-Id", event.id.as_str());
        self.js.publish_with_headers(subject.to_owned(), headers, payload.into()).await?.await?;
        Ok(())
    }
}

/// Drive one durable consumer until `shutdown` fires, decoding each message
/// as an [`Event`] and dispatching it to `handler`.
///
/// Malformed payloads are acked-and-dropped (spec §7 "Decode error": no
/// retry); handler errors nak the message so JetStream redelivers it up to
/// `max_deliver`, after which NATS itself dead-letters it — no custom DLQ
/// bookkeeping is needed (spec §5.5).
pub async fn run_subscription(
    consumer: Consumer<PullConfig>,
    subject: String,
    handler: EventHandler,
    shutdown: CancellationToken,
) {
    tracing::info!(subject = %subject, "event bus subscription started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(subject = %subject, "event bus subscription shutting down");
                break;
            }
            batch = consumer.fetch().max_messages(10).messages() => {
                let mut messages = match batch {
                    Ok(messages) => messages,
                    Err(err) => {
                        tracing::debug!(subject = %subject, %err, "fetch error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                while let Some(msg_result) = messages.next().await {
                    let msg = match msg_result {
                        Ok(msg) => msg,
                        Err(err) => {
                            tracing::debug!(subject = %subject, %err, "message error");
                            continue;
                        }
                    };

                    let event: Event = match serde_json::from_slice(&msg.payload) {
                        Ok(event) => event,
                        Err(err) => {
                            tracing::warn!(subject = %subject, %err, "failed to decode event, dropping");
                            let _ = msg.ack().await;
                            continue;
                        }
                    };

                    match handler(event).await {
                        Ok(()) => {
                            if let Err(err) = msg.ack().await {
                                tracing::warn!(subject = %subject, %err, "ack failed");
                            }
                        }
                        Err(err) => {
                            tracing::warn!(subject = %subject, %err, "handler failed, nak for redelivery");
                            let _ = msg.ack_with(AckKind::Nak(None)).await;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
