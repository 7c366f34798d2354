//! Messenger demo.
//!
//! Runs publish, subscribe and request/reply against the in-process bus and
//! exits non-zero if any of them misbehaves.

use anyhow::{ensure, Context, Result};
use messenger::{MessageContext, Messenger, MessengerConfig};
use serde_json::{json, Value};
use shared_bus::InMemoryTopicBus;
use shared_types::ExchangeOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

async fn greet(payload: Value, message: MessageContext) -> Result<()> {
    info!(payload = %payload, routing_key = message.routing_key(), "Request received");
    message.resolve(json!({ "world": "hello" })).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load configuration
    let config = MessengerConfig::from_env();
    info!(
        timeout_ms = config.request_timeout.as_millis() as u64,
        reply_exchange = %config.reply_exchange,
        "Starting messenger demo"
    );

    let bus = Arc::new(InMemoryTopicBus::new());
    let messenger = Messenger::new(bus.clone(), config)?;
    messenger.exchange("test", ExchangeOptions::topic()).await?;

    // 1. Publish with nobody listening
    messenger
        .publish("test", "test", &json!({ "hello": "world" }), None)
        .await
        .context("publish without subscribers")?;
    info!("Publish without subscribers accepted");

    // 2. Publish to a wildcard subscriber
    let (tx, mut rx) = mpsc::channel(1);
    let listener = messenger
        .subscribe(
            "test",
            "#",
            move |payload: Value, _message: MessageContext| {
                let tx = tx.clone();
                async move {
                    tx.send(payload).await?;
                    Ok::<(), anyhow::Error>(())
                }
            },
            None,
        )
        .await?;
    messenger
        .publish("test", "test", &json!({ "hello": "world" }), None)
        .await?;
    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .context("subscriber did not receive the message")?;
    ensure!(
        received == Some(json!({ "hello": "world" })),
        "unexpected delivery: {:?}",
        received
    );
    info!("Subscriber received the published message");
    listener.dispose().await;

    // 3. Request/reply
    messenger.subscribe("test", "#", greet, None).await?;
    let reply = messenger
        .request("test", "test", &json!({ "hello": "world" }), None)
        .await
        .context("request failed")?;
    ensure!(reply == json!({ "world": "hello" }), "unexpected reply: {}", reply);
    info!(reply = %reply, "Request resolved");

    messenger.stop().await;
    bus.close();
    info!(published = bus.messages_published(), "Messenger demo complete");
    Ok(())
}
