//! # Request / Reply Flows
//!
//! Correlation, timeouts, rejections and shutdown through the public
//! `Messenger` surface, including several messengers sharing one bus.

#[cfg(test)]
mod tests {
    use crate::support::{init_tracing, messenger_with_test_exchange, RecordingTransport};
    use messenger::{
        ErrorEvent, IpAddressShape, MessageContext, Messenger, MessengerConfig, MessengerError,
        RequestOptions, Typed,
    };
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};
    use shared_bus::InMemoryTopicBus;
    use shared_types::{ExchangeOptions, ReplyStatus, HEADER_TRACE_ID};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{timeout, Instant};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sum {
        a: i64,
        b: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Total {
        total: i64,
    }

    async fn world_hello(_payload: Value, message: MessageContext) -> anyhow::Result<()> {
        message.resolve(json!({ "world": "hello" })).await?;
        Ok(())
    }

    async fn echo(payload: Value, message: MessageContext) -> anyhow::Result<()> {
        message.resolve(payload).await?;
        Ok(())
    }

    async fn add(payload: Value, message: MessageContext) -> anyhow::Result<()> {
        let sum: Sum = serde_json::from_value(payload)?;
        message.resolve(Total { total: sum.a + sum.b }).await?;
        Ok(())
    }

    async fn refuse(_payload: Value, message: MessageContext) -> anyhow::Result<()> {
        message.reject(anyhow::anyhow!("world hello")).await?;
        Ok(())
    }

    async fn explode(_payload: Value, _message: MessageContext) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("database unavailable").context("lookup failed"))
    }

    async fn slow_echo(payload: Value, message: MessageContext) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(150)).await;
        message.resolve(payload).await?;
        Ok(())
    }

    async fn trace_echo(_payload: Value, message: MessageContext) -> anyhow::Result<()> {
        let trace_id = message.trace_id().unwrap_or_default().to_string();
        message.resolve(json!({ "trace": trace_id })).await?;
        Ok(())
    }

    // =============================================================================
    // BASIC OUTCOMES
    // =============================================================================

    #[tokio::test]
    async fn test_request_resolves_with_handler_reply() {
        let messenger = messenger_with_test_exchange().await;
        messenger.subscribe("test", "#", world_hello, None).await.unwrap();

        let reply = messenger
            .request("test", "test", &json!({ "hello": "world" }), None)
            .await
            .unwrap();

        assert_eq!(reply, json!({ "world": "hello" }));
        assert_eq!(messenger.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_rejected_with_error_event() {
        let messenger = messenger_with_test_exchange().await;
        messenger.subscribe("test", "#", refuse, None).await.unwrap();

        let err = messenger
            .request("test", "test", &json!({ "hello": "world" }), None)
            .await
            .unwrap_err();

        let event = err.error_event().expect("handler rejection");
        assert_eq!(event.message, "world hello");
        assert_eq!(event.name, "Error");
    }

    #[tokio::test]
    async fn test_handler_error_reaches_requester_with_causes() {
        let messenger = messenger_with_test_exchange().await;
        messenger.subscribe("test", "#", explode, None).await.unwrap();

        let err = messenger
            .request("test", "test", &json!(null), None)
            .await
            .unwrap_err();

        let event: &ErrorEvent = err.error_event().expect("handler error");
        assert_eq!(event.message, "lookup failed");
        assert_eq!(
            event.context.as_ref().unwrap()["causes"][0],
            "database unavailable"
        );
    }

    #[tokio::test]
    async fn test_request_timeout_after_deadline() {
        let messenger = messenger_with_test_exchange().await;
        messenger.set_timeout(Duration::from_millis(100));

        let started = Instant::now();
        let err = messenger
            .request("test", "nobody.home", &json!({}), None)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, MessengerError::Timeout));
        assert_eq!(err.to_string(), "Request Timed Out.");
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(2));
        assert_eq!(messenger.pending_count(), 0);
        assert_eq!(messenger.stats().total_timeouts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_late_reply_is_discarded() {
        let messenger = messenger_with_test_exchange().await;
        messenger.subscribe("test", "slow", slow_echo, None).await.unwrap();

        let options = RequestOptions::new().timeout(Duration::from_millis(50));
        let err = messenger
            .request_with("test", "slow", &json!(1), &options)
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(messenger.stats().total_discarded.load(Ordering::Relaxed), 1);
        assert_eq!(messenger.pending_count(), 0);
    }

    // =============================================================================
    // SHAPES
    // =============================================================================

    #[tokio::test]
    async fn test_invalid_request_type_skips_handler() {
        let messenger = messenger_with_test_exchange().await;
        messenger
            .subscribe("test", "ip", echo, Some(Arc::new(IpAddressShape)))
            .await
            .unwrap();

        let err = messenger
            .request("test", "ip", &json!({ "hello": "world" }), None)
            .await
            .unwrap_err();

        let event = err.error_event().expect("validation rejection");
        assert_eq!(event.message, "Invalid Request Type.");
        assert_eq!(event.name, "ValidationError");
    }

    #[tokio::test]
    async fn test_invalid_response_type() {
        let messenger = messenger_with_test_exchange().await;
        messenger.subscribe("test", "#", world_hello, None).await.unwrap();

        let err = messenger
            .request("test", "test", &json!({}), Some(Arc::new(IpAddressShape)))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Invalid Response Type.");
        assert_eq!(messenger.stats().total_rejected.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_typed_shapes_on_both_sides() {
        let messenger = messenger_with_test_exchange().await;
        messenger
            .subscribe("test", "math.add", add, Some(Arc::new(Typed::<Sum>::new())))
            .await
            .unwrap();

        let options = RequestOptions::new()
            .request_shape(Arc::new(Typed::<Sum>::new()))
            .response_shape(Arc::new(Typed::<Total>::new()));
        let reply = messenger
            .request_with("test", "math.add", &Sum { a: 2, b: 40 }, &options)
            .await
            .unwrap();

        let total: Total = serde_json::from_value(reply).unwrap();
        assert_eq!(total, Total { total: 42 });

        let err = messenger
            .request_with("test", "math.add", &json!({ "a": "two" }), &options)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid Payload Type.");
    }

    // =============================================================================
    // CONCURRENCY
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_routed_by_correlation_id() {
        let messenger = messenger_with_test_exchange().await;
        messenger.subscribe("test", "echo.*", echo, None).await.unwrap();

        let requests = (0..50).map(|i| {
            let messenger = Arc::clone(&messenger);
            async move {
                let key = format!("echo.{}", i % 5);
                messenger.request("test", &key, &json!({ "n": i }), None).await
            }
        });
        let replies = futures::future::join_all(requests).await;

        for (i, reply) in replies.into_iter().enumerate() {
            assert_eq!(reply.unwrap(), json!({ "n": i }));
        }
        assert_eq!(messenger.pending_count(), 0);
        assert_eq!(messenger.stats().total_fulfilled.load(Ordering::Relaxed), 50);
    }

    #[tokio::test]
    async fn test_two_messengers_share_one_bus() {
        init_tracing();
        let bus = Arc::new(InMemoryTopicBus::new());
        let client = Messenger::with_defaults(bus.clone());
        let server = Messenger::with_defaults(bus.clone());
        for messenger in [&client, &server] {
            messenger.exchange("rpc", ExchangeOptions::topic()).await.unwrap();
        }
        server.subscribe("rpc", "greet", world_hello, None).await.unwrap();

        // Each messenger listens on its own reply key.
        client.start().await.unwrap();
        server.start().await.unwrap();

        let reply = client.request("rpc", "greet", &json!({}), None).await.unwrap();
        assert_eq!(reply, json!({ "world": "hello" }));
        assert_eq!(server.stats().total_discarded.load(Ordering::Relaxed), 0);
    }

    // =============================================================================
    // HEADERS AND CONFIGURATION
    // =============================================================================

    #[tokio::test]
    async fn test_trace_id_travels_to_handler_and_back() {
        init_tracing();
        let transport = Arc::new(RecordingTransport::new());
        let messenger = Messenger::with_defaults(transport.clone());
        messenger.exchange("test", ExchangeOptions::topic()).await.unwrap();
        messenger.subscribe("test", "#", trace_echo, None).await.unwrap();

        let options = RequestOptions::new().trace_id("trace-123");
        let reply = messenger
            .request_with("test", "traced", &json!({}), &options)
            .await
            .unwrap();
        assert_eq!(reply, json!({ "trace": "trace-123" }));

        let replies = transport.published_to("messenger.replies");
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].headers.get(HEADER_TRACE_ID).unwrap(), "trace-123");
        assert_eq!(
            ReplyStatus::from_header(replies[0].headers.get("x-reply-status").map(String::as_str)),
            ReplyStatus::Ok
        );
    }

    #[tokio::test]
    async fn test_custom_reply_exchange() {
        init_tracing();
        let transport = Arc::new(RecordingTransport::new());
        let config = MessengerConfig {
            reply_exchange: "rpc.replies".into(),
            request_timeout: Duration::from_secs(1),
            ..MessengerConfig::default()
        };
        let messenger = Messenger::new(transport.clone(), config).unwrap();
        messenger.exchange("test", ExchangeOptions::topic()).await.unwrap();
        messenger.subscribe("test", "#", echo, None).await.unwrap();

        messenger.request("test", "x", &json!(7), None).await.unwrap();

        assert_eq!(transport.published_to("rpc.replies").len(), 1);
        assert!(!messenger.registry().contains("rpc.replies"));
    }

    #[tokio::test]
    async fn test_reply_exchange_cannot_be_declared_or_published_to() {
        let messenger = messenger_with_test_exchange().await;
        messenger.subscribe("test", "#", echo, None).await.unwrap();

        let err = messenger
            .exchange("messenger.replies", ExchangeOptions::topic())
            .await
            .unwrap_err();
        assert!(matches!(err, MessengerError::Configuration(_)));

        // Requests still work after the refused declare.
        let reply = messenger.request("test", "x", &json!(1), None).await.unwrap();
        assert_eq!(reply, json!(1));

        let err = messenger
            .publish("messenger.replies", "reply.anything", &json!(2), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid Exchange Specified for Publish.");
    }

    // =============================================================================
    // SHUTDOWN
    // =============================================================================

    #[tokio::test]
    async fn test_stop_fails_in_flight_requests() {
        let messenger = messenger_with_test_exchange().await;

        let in_flight = {
            let messenger = Arc::clone(&messenger);
            tokio::spawn(async move { messenger.request("test", "void", &json!({}), None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(messenger.pending_count(), 1);

        messenger.stop().await;

        let err = timeout(Duration::from_secs(1), in_flight)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert_eq!(err.to_string(), "Messenger Stopped.");
        assert_eq!(messenger.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_messenger_usable_after_stop() {
        let messenger = messenger_with_test_exchange().await;
        messenger.subscribe("test", "#", echo, None).await.unwrap();
        messenger.stop().await;

        messenger.subscribe("test", "#", echo, None).await.unwrap();
        let reply = messenger.request("test", "again", &json!("ok"), None).await.unwrap();
        assert_eq!(reply, json!("ok"));
    }
}
