//! The relay loop for one gateway session.
//!
//! [`drive`] knows nothing about the transport. It owns three inputs: the
//! gateway future, which completes when the connection ends; the queue of
//! message events; and the shutdown receiver. Checked in that order of
//! priority:
//!
//! 1. shutdown ends the session, even with events queued
//! 2. a finished gateway ends the session; anything still queued belongs to
//!    the dead connection and is left for the caller to drop
//! 3. otherwise the next event is relayed, and if the gateway finishes
//!    while that is in flight the message is abandoned where it stands
//!
//! Events are taken one at a time, so no two messages are ever relayed
//! concurrently.

use crate::admin::AdminConsole;
use crate::dispatch::ChatClient;
use crate::engine::RelayEngine;
use crate::message::InboundMessage;
use crate::shutdown::ShutdownReason;
use async_trait::async_trait;
use std::future::Future;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// A queued message event from the chat transport.
#[async_trait]
pub trait GatewayEvent: Send {
    type Client: ChatClient;

    /// Build the message and the client that delivers on its behalf.
    async fn resolve(self) -> (Self::Client, InboundMessage);
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome<T> {
    Shutdown,

    /// The gateway future completed, carrying its output
    GatewayEnded(T),
}

/// Relay queued events until shutdown or until `gateway` completes.
pub async fn drive<G, E>(
    gateway: &mut G,
    events: &mut mpsc::Receiver<E>,
    stop: &mut broadcast::Receiver<ShutdownReason>,
    engine: &mut RelayEngine,
    console: &mut AdminConsole,
) -> SessionOutcome<G::Output>
where
    G: Future + Unpin,
    E: GatewayEvent,
{
    loop {
        tokio::select! {
            biased;
            reason = stop.recv() => {
                info!(reason = ?reason.ok(), "Session stopping");
                return SessionOutcome::Shutdown;
            }
            result = &mut *gateway => {
                return SessionOutcome::GatewayEnded(result);
            }
            Some(event) = events.recv() => {
                tokio::select! {
                    biased;
                    result = &mut *gateway => {
                        warn!("Gateway ended mid-message, abandoning it");
                        return SessionOutcome::GatewayEnded(result);
                    }
                    _ = async {
                        let (client, message) = event.resolve().await;
                        relay(engine, console, &client, &message).await;
                    } => {}
                }
            }
        }
    }
}

async fn relay(
    engine: &mut RelayEngine,
    console: &mut AdminConsole,
    client: &dyn ChatClient,
    message: &InboundMessage,
) {
    if let Some(action) = console.handle(engine, client, message).await {
        debug!(action = ?action, "Handled admin command");
        return;
    }

    engine.handle_message(client, message).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{validate, ConfigSource, ValidatedConfig};
    use crate::dispatch::{ChannelInfo, DeliveryError};
    use crate::message::OutboundMessage;
    use crate::shutdown::ShutdownSignal;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct Inner {
        sent: Mutex<Vec<(String, String)>>,

        /// When set, the next send fires this and then never completes
        stall: Mutex<Option<oneshot::Sender<&'static str>>>,
    }

    #[derive(Clone, Default)]
    struct TestClient {
        inner: Arc<Inner>,
    }

    impl TestClient {
        fn stalling(gateway_lost: oneshot::Sender<&'static str>) -> Self {
            let client = Self::default();
            *client.inner.stall.lock().unwrap() = Some(gateway_lost);
            client
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.inner.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatClient for TestClient {
        async fn channel(&self, channel_id: &str) -> Option<ChannelInfo> {
            Some(ChannelInfo::text(channel_id, channel_id, None))
        }

        async fn send(&self, channel: &ChannelInfo, message: OutboundMessage) -> Result<(), DeliveryError> {
            let stall = self.inner.stall.lock().unwrap().take();
            if let Some(gateway_lost) = stall {
                let _ = gateway_lost.send("connection reset");
                std::future::pending::<()>().await;
            }

            self.inner
                .sent
                .lock()
                .unwrap()
                .push((channel.id.clone(), message.content.as_text().to_string()));
            Ok(())
        }
    }

    struct TestEvent {
        client: TestClient,
        message: InboundMessage,
    }

    #[async_trait]
    impl GatewayEvent for TestEvent {
        type Client = TestClient;

        async fn resolve(self) -> (TestClient, InboundMessage) {
            (self.client, self.message)
        }
    }

    fn config() -> ValidatedConfig {
        validate(&json!({
            "token": "t",
            "redirects": [{ "sources": ["C1"], "destinations": ["C2", "C3"] }],
            "admin": { "admins": ["42"] }
        }))
        .unwrap()
    }

    struct Harness {
        engine: RelayEngine,
        console: AdminConsole,
        shutdown: ShutdownSignal,
        stop: broadcast::Receiver<ShutdownReason>,
        events: mpsc::Receiver<TestEvent>,
        queue: mpsc::Sender<TestEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let config = config();
            let shutdown = ShutdownSignal::new();
            let (queue, events) = mpsc::channel(16);
            Self {
                engine: RelayEngine::new(&config),
                console: AdminConsole::new(&config, ConfigSource::Inline("{}".into()), shutdown.clone()),
                stop: shutdown.subscribe(),
                shutdown,
                events,
                queue,
            }
        }

        async fn push(&self, client: &TestClient, author: &str, text: &str) {
            let event = TestEvent {
                client: client.clone(),
                message: InboundMessage::new("C1", author, text),
            };
            assert!(self.queue.send(event).await.is_ok());
        }

        async fn drive<G: Future + Unpin>(&mut self, gateway: &mut G) -> SessionOutcome<G::Output> {
            drive(
                gateway,
                &mut self.events,
                &mut self.stop,
                &mut self.engine,
                &mut self.console,
            )
            .await
        }
    }

    #[tokio::test]
    async fn test_messages_relayed_in_queue_order() {
        let mut harness = Harness::new();
        let client = TestClient::default();
        for text in ["a", "a", "b"] {
            harness.push(&client, "7", text).await;
        }
        harness.push(&client, "42", ".eb exit").await;

        let mut gateway = std::future::pending::<()>();
        let outcome = harness.drive(&mut gateway).await;

        assert!(matches!(outcome, SessionOutcome::Shutdown));
        let relayed: Vec<_> = client
            .sent()
            .into_iter()
            .filter(|(dest, _)| dest == "C2")
            .map(|(_, text)| text)
            .collect();
        assert_eq!(relayed, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_gateway_failure_mid_message_abandons_it() {
        let mut harness = Harness::new();
        let (gateway_lost, mut gateway) = oneshot::channel();
        let client = TestClient::stalling(gateway_lost);
        harness.push(&client, "7", "hello").await;

        let outcome = harness.drive(&mut gateway).await;

        assert!(matches!(
            outcome,
            SessionOutcome::GatewayEnded(Ok("connection reset"))
        ));
        // the first send never completed, so nothing was recorded or sent on
        assert!(client.sent().is_empty());
        assert_eq!(harness.engine.dispatcher().dedup().last("C2"), None);
        assert_eq!(harness.engine.dispatcher().dedup().last("C3"), None);
    }

    #[tokio::test]
    async fn test_queued_messages_of_dead_session_are_not_relayed() {
        let mut harness = Harness::new();
        let client = TestClient::default();
        harness.push(&client, "7", "one").await;
        harness.push(&client, "7", "two").await;

        let (gateway_lost, mut gateway) = oneshot::channel();
        let _ = gateway_lost.send("connection reset");

        let outcome = harness.drive(&mut gateway).await;

        assert!(matches!(outcome, SessionOutcome::GatewayEnded(_)));
        assert!(client.sent().is_empty());
        // still sitting in the old session's queue, which the caller drops
        assert!(harness.events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_wins_over_gateway_and_queue() {
        let mut harness = Harness::new();
        let client = TestClient::default();
        harness.push(&client, "7", "one").await;

        let (gateway_lost, mut gateway) = oneshot::channel();
        let _ = gateway_lost.send("connection reset");
        harness.shutdown.trigger();

        let outcome = harness.drive(&mut gateway).await;

        assert!(matches!(outcome, SessionOutcome::Shutdown));
        assert!(client.sent().is_empty());
    }

    /// The binary runs on the current-thread runtime, where the gateway's
    /// per-event handler tasks run in spawn order and bounded senders are
    /// woken in arrival order, so the queue sees messages as they arrived.
    #[tokio::test]
    async fn test_handler_tasks_enqueue_in_spawn_order() {
        let (tx, mut rx) = mpsc::channel(1);
        for i in 0..8 {
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(i).await;
            });
        }
        drop(tx);

        let mut order = Vec::new();
        while let Some(i) = rx.recv().await {
            order.push(i);
        }
        assert_eq!(order, (0..8).collect::<Vec<_>>());
    }
}
