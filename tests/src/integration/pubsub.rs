//! # Publish / Subscribe Flows
//!
//! Exchanges, routing patterns and subscription lifecycle through the
//! public `Messenger` surface.

#[cfg(test)]
mod tests {
    use crate::support::{init_tracing, messenger_with_test_exchange, RecordingTransport};
    use messenger::{
        IpAddressShape, MessageContext, MessageHandler, Messenger, MessengerError,
        PublishOptions, RequiredFields,
    };
    use serde_json::{json, Value};
    use shared_types::{ExchangeKind, ExchangeOptions, HEADER_TRACE_ID};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_millis(200);
    const QUIET: Duration = Duration::from_millis(50);

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Handler forwarding every payload and routing key into a channel.
    fn forward(tx: mpsc::Sender<(String, Value)>) -> impl MessageHandler {
        move |payload: Value, message: MessageContext| {
            let tx = tx.clone();
            async move {
                tx.send((message.routing_key().to_string(), payload)).await?;
                Ok::<(), anyhow::Error>(())
            }
        }
    }

    async fn ignore(_payload: Value, _message: MessageContext) -> anyhow::Result<()> {
        Ok(())
    }

    // =============================================================================
    // EXCHANGES
    // =============================================================================

    #[tokio::test]
    async fn test_exchange_declaration_contract() {
        let messenger = messenger_with_test_exchange().await;

        let err = messenger
            .exchange("invalid", None::<ExchangeOptions>)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unable to Create Exchange without Options.");

        let err = messenger
            .exchange("kindless", ExchangeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MessengerError::Configuration(_)));

        let exchange = messenger
            .exchange("test", ExchangeOptions::topic())
            .await
            .unwrap();
        assert_eq!(exchange.kind, ExchangeKind::Topic);
        assert_eq!(messenger.registry().names(), vec!["test"]);
    }

    #[tokio::test]
    async fn test_exchange_options_from_json() {
        let messenger = messenger_with_test_exchange().await;
        let options: ExchangeOptions =
            serde_json::from_value(json!({ "type": "fanout", "durable": true })).unwrap();

        let exchange = messenger.exchange("broadcast", options).await.unwrap();
        assert_eq!(exchange.kind, ExchangeKind::Fanout);
        assert!(exchange.options.durable);
    }

    // =============================================================================
    // ROUTING
    // =============================================================================

    #[tokio::test]
    async fn test_publish_with_no_subscribers_succeeds() {
        let messenger = messenger_with_test_exchange().await;
        messenger
            .publish("test", "test", &json!({ "hello": "world" }), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wildcard_literal_and_non_matching_patterns() {
        let messenger = messenger_with_test_exchange().await;
        let (all_tx, mut all_rx) = mpsc::channel(4);
        let (exact_tx, mut exact_rx) = mpsc::channel(4);
        let (miss_tx, mut miss_rx) = mpsc::channel(4);

        messenger.subscribe("test", "#", forward(all_tx), None).await.unwrap();
        messenger.subscribe("test", "test", forward(exact_tx), None).await.unwrap();
        messenger.subscribe("test", "not-test", forward(miss_tx), None).await.unwrap();

        messenger
            .publish("test", "test", &json!({ "hello": "world" }), None)
            .await
            .unwrap();

        let expected = ("test".to_string(), json!({ "hello": "world" }));
        assert_eq!(timeout(WAIT, all_rx.recv()).await.unwrap(), Some(expected.clone()));
        assert_eq!(timeout(WAIT, exact_rx.recv()).await.unwrap(), Some(expected));
        assert!(timeout(QUIET, miss_rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_single_word_wildcard() {
        let messenger = messenger_with_test_exchange().await;
        let (tx, mut rx) = mpsc::channel(8);
        messenger
            .subscribe("test", "orders.*.created", forward(tx), None)
            .await
            .unwrap();

        for key in ["orders.eu.created", "orders.created", "orders.eu.west.created"] {
            messenger.publish("test", key, &json!(key), None).await.unwrap();
        }

        let (key, _) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(key, "orders.eu.created");
        assert!(timeout(QUIET, rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_direct_and_fanout_exchanges() {
        let messenger = messenger_with_test_exchange().await;
        messenger.exchange("jobs", ExchangeOptions::direct()).await.unwrap();
        messenger.exchange("broadcast", ExchangeOptions::fanout()).await.unwrap();

        let (direct_tx, mut direct_rx) = mpsc::channel(4);
        let (fanout_tx, mut fanout_rx) = mpsc::channel(4);
        messenger.subscribe("jobs", "resize", forward(direct_tx), None).await.unwrap();
        messenger.subscribe("broadcast", "ignored", forward(fanout_tx), None).await.unwrap();

        messenger.publish("jobs", "resize.#", &json!(1), None).await.unwrap();
        messenger.publish("jobs", "resize", &json!(2), None).await.unwrap();
        messenger.publish("broadcast", "anything", &json!(3), None).await.unwrap();

        assert_eq!(timeout(WAIT, direct_rx.recv()).await.unwrap().unwrap().1, json!(2));
        assert!(timeout(QUIET, direct_rx.recv()).await.is_err());
        assert_eq!(timeout(WAIT, fanout_rx.recv()).await.unwrap().unwrap().1, json!(3));
    }

    // =============================================================================
    // VALIDATION
    // =============================================================================

    #[tokio::test]
    async fn test_publish_shape_failure_emits_nothing() {
        init_tracing();
        let transport = Arc::new(RecordingTransport::new());
        let messenger = Messenger::with_defaults(transport.clone());
        messenger.exchange("test", ExchangeOptions::topic()).await.unwrap();

        let shape = RequiredFields::new("Greeting", ["hello"]);
        let err = messenger
            .publish("test", "test", &json!({ "bye": "world" }), Some(&shape))
            .await
            .unwrap_err();

        assert!(matches!(err, MessengerError::Validation { .. }));
        assert!(transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_subscriber_shape_filters_plain_messages() {
        let messenger = messenger_with_test_exchange().await;
        let (tx, mut rx) = mpsc::channel(4);
        messenger
            .subscribe("test", "ip", forward(tx), Some(Arc::new(IpAddressShape)))
            .await
            .unwrap();

        messenger.publish("test", "ip", &json!({ "value": "localhost" }), None).await.unwrap();
        messenger.publish("test", "ip", &json!({ "value": "127.0.0.1" }), None).await.unwrap();

        let (_, payload) = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(payload, json!({ "value": "127.0.0.1" }));
        assert!(timeout(QUIET, rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_failing_handler_keeps_subscription_alive() {
        let messenger = messenger_with_test_exchange().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        messenger
            .subscribe(
                "test",
                "#",
                move |_payload: Value, _message: MessageContext| {
                    let seen = seen.clone();
                    async move {
                        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                            anyhow::bail!("first message fails");
                        }
                        Ok(())
                    }
                },
                None,
            )
            .await
            .unwrap();

        messenger.publish("test", "a", &json!(1), None).await.unwrap();
        messenger.publish("test", "b", &json!(2), None).await.unwrap();

        tokio::time::sleep(QUIET).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(messenger.active_subscriptions(), 1);
    }

    // =============================================================================
    // TRACING HEADERS
    // =============================================================================

    #[tokio::test]
    async fn test_every_publish_carries_trace_id() {
        init_tracing();
        let transport = Arc::new(RecordingTransport::new());
        let messenger = Messenger::with_defaults(transport.clone());
        messenger.exchange("test", ExchangeOptions::topic()).await.unwrap();

        messenger.publish("test", "one", &json!(1), None).await.unwrap();
        messenger
            .publish_with("test", "two", &json!(2), PublishOptions::new().trace_id("abc"))
            .await
            .unwrap();

        let published = transport.published_to("test");
        assert_eq!(published.len(), 2);
        assert!(published[0].headers.contains_key(HEADER_TRACE_ID));
        assert_eq!(published[1].headers.get(HEADER_TRACE_ID).unwrap(), "abc");
    }

    // =============================================================================
    // DISPOSE
    // =============================================================================

    #[tokio::test]
    async fn test_dispose_twice_resolves() {
        let messenger = messenger_with_test_exchange().await;
        let subscription = messenger.subscribe("test", "#", ignore, None).await.unwrap();

        subscription.dispose().await;
        subscription.dispose().await;

        assert!(!subscription.is_active());
        assert_eq!(messenger.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_dispose_swallows_transport_errors() {
        init_tracing();
        let transport = Arc::new(RecordingTransport::new());
        let messenger = Messenger::with_defaults(transport.clone());
        messenger.exchange("test", ExchangeOptions::topic()).await.unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let subscription = messenger.subscribe("test", "#", forward(tx), None).await.unwrap();

        transport.fail_unsubscribes();
        subscription.dispose().await;
        assert!(!subscription.is_active());

        // The binding survived on the transport, but nothing reaches the handler.
        assert_eq!(transport.binding_count(), 1);
        messenger.publish("test", "test", &json!(1), None).await.unwrap();
        assert!(timeout(QUIET, rx.recv()).await.unwrap_or(None).is_none());
    }

    #[tokio::test]
    async fn test_dispose_after_stop() {
        let messenger = messenger_with_test_exchange().await;
        let subscription = messenger.subscribe("test", "#", ignore, None).await.unwrap();

        messenger.stop().await;
        subscription.dispose().await;

        assert_eq!(messenger.active_subscriptions(), 0);
    }
}
