//! One-peer facade combining the invocation client, its capability cache and
//! the event hub.
//!
//! Embedding code builds an [`McpBridge`] per peer it needs and passes that
//! handle to whatever consumes it.

use crate::mcp::capability::{validate_arguments, CapabilityDescriptor, CapabilityKind};
use crate::mcp::client::McpPeer;
use crate::mcp::content::{InvocationResult, PromptResult};
use crate::mcp::error::BridgeError;
use crate::mcp::events::{BridgeEvent, EventHub, InvocationOutcome, PeerNotification};
use crate::mcp::registry::{CapabilityRegistry, Snapshot};
use crate::mcp::subscriber::ChangeSubscriber;
use crate::mcp::value::Arguments;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

pub struct McpBridge {
    peer: Arc<McpPeer>,
    registry: Arc<CapabilityRegistry>,
    events: EventHub,
    next_call_id: AtomicU64,
}

impl McpBridge {
    pub fn new(peer: McpPeer) -> Self {
        Self::with_events(peer, EventHub::new())
    }

    /// Shares `events` with other bridges so one subscriber sees them all.
    pub fn with_events(peer: McpPeer, events: EventHub) -> Self {
        let peer = Arc::new(peer);
        let registry = Arc::new(CapabilityRegistry::new(peer.clone()));
        Self {
            peer,
            registry,
            events,
            next_call_id: AtomicU64::new(1),
        }
    }

    pub fn peer(&self) -> &McpPeer {
        &self.peer
    }

    pub fn peer_id(&self) -> &str {
        self.peer.id()
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    pub async fn list_tools(&self) -> Result<Snapshot, BridgeError> {
        self.registry.list_tools().await
    }

    pub async fn list_resources(&self) -> Result<Snapshot, BridgeError> {
        self.registry.list_resources().await
    }

    pub async fn list_prompts(&self) -> Result<Snapshot, BridgeError> {
        self.registry.list_prompts().await
    }

    pub async fn find(
        &self,
        kind: CapabilityKind,
        name: &str,
    ) -> Result<CapabilityDescriptor, BridgeError> {
        self.registry.find(kind, name).await
    }

    /// Resolves `name` in the cache, checks `arguments` against its declared
    /// parameters and calls it. Arguments that fail the check come back as an
    /// error-flagged result and are never sent.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: &Arguments,
    ) -> Result<InvocationResult, BridgeError> {
        let call = self.start(CapabilityKind::Tool, name);
        let result = async {
            let descriptor = self.registry.find(CapabilityKind::Tool, name).await?;
            if let Err(diagnostic) = validate_arguments(&descriptor, arguments) {
                debug!(peer_id = %self.peer_id(), tool = %name, "Rejected arguments before dispatch");
                return Ok(InvocationResult::error(diagnostic));
            }
            self.peer.call_tool(&descriptor.name, arguments).await
        }
        .await;
        self.finish(call, result.as_ref().map(|result| result.is_error));
        result
    }

    pub async fn read_resource(&self, uri: &str) -> Result<InvocationResult, BridgeError> {
        let call = self.start(CapabilityKind::Resource, uri);
        let result = async {
            let descriptor = self.registry.find(CapabilityKind::Resource, uri).await?;
            self.peer.read_resource(descriptor.key()).await
        }
        .await;
        self.finish(call, result.as_ref().map(|result| result.is_error));
        result
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: &Arguments,
    ) -> Result<PromptResult, BridgeError> {
        let call = self.start(CapabilityKind::Prompt, name);
        let result = async {
            let descriptor = self.registry.find(CapabilityKind::Prompt, name).await?;
            if let Err(diagnostic) = validate_arguments(&descriptor, arguments) {
                return Ok(PromptResult::error(diagnostic));
            }
            self.peer.get_prompt(&descriptor.name, arguments).await
        }
        .await;
        self.finish(call, result.as_ref().map(|result| result.is_error));
        result
    }

    pub async fn invalidate<I, S>(&self, kind: CapabilityKind, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registry.invalidate(kind, names).await;
    }

    pub async fn invalidate_all(&self, kind: CapabilityKind) {
        self.registry.invalidate_all(kind).await;
    }

    pub async fn refresh(&self, kind: CapabilityKind) -> Result<Snapshot, BridgeError> {
        self.registry.refresh(kind).await
    }

    /// Starts applying this peer's change notifications to the cache.
    pub fn spawn_subscriber(
        &self,
        notifications: mpsc::UnboundedReceiver<PeerNotification>,
    ) -> ChangeSubscriber {
        ChangeSubscriber::spawn(Arc::clone(&self.registry), self.events.clone(), notifications)
    }

    pub async fn close(&self) {
        self.peer.close().await;
    }

    fn start(&self, kind: CapabilityKind, name: &str) -> PendingCall {
        let call_id = self.next_call_id.fetch_add(1, Ordering::SeqCst);
        self.events.emit(BridgeEvent::InvocationStarted {
            peer_id: self.peer_id().to_string(),
            kind,
            name: name.to_string(),
            call_id,
        });
        PendingCall {
            call_id,
            kind,
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    fn finish(&self, call: PendingCall, is_error: Result<bool, &BridgeError>) {
        let outcome = match is_error {
            Ok(false) => InvocationOutcome::Success,
            Ok(true) => InvocationOutcome::Failed,
            Err(_) => InvocationOutcome::Fault,
        };
        let elapsed = call.started.elapsed();
        debug!(
            peer_id = %self.peer_id(),
            kind = %call.kind,
            name = %call.name,
            call_id = call.call_id,
            outcome = ?outcome,
            elapsed_ms = elapsed.as_millis() as u64,
            "MCP invocation finished"
        );
        self.events.emit(BridgeEvent::InvocationFinished {
            peer_id: self.peer_id().to_string(),
            kind: call.kind,
            name: call.name,
            call_id: call.call_id,
            outcome,
            elapsed,
        });
    }
}

struct PendingCall {
    call_id: u64,
    kind: CapabilityKind,
    name: String,
    started: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::mcp::capability::TypeHint;
    use crate::mcp::events::ChangeDetail;
    use crate::mcp::server::{McpServer, ToolSpec};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_server(calls: Arc<AtomicUsize>) -> McpServer {
        McpServer::builder("counter")
            .tool(
                ToolSpec::new("add", "Adds two integers")
                    .required("a", TypeHint::Integer, "left")
                    .required("b", TypeHint::Integer, "right"),
                move |arguments| {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let a = arguments.get("a").and_then(|value| value.as_i64());
                        let b = arguments.get("b").and_then(|value| value.as_i64());
                        match (a, b) {
                            (Some(a), Some(b)) if a.checked_add(b).is_some() => {
                                InvocationResult::success_text((a + b).to_string())
                            }
                            _ => InvocationResult::error("Overflow"),
                        }
                    }
                },
            )
            .build()
    }

    async fn bridge_for(server: McpServer) -> (McpBridge, mpsc::UnboundedReceiver<PeerNotification>) {
        let (peer, notifications) = McpPeer::connect_in_process("counter", server)
            .await
            .expect("peer should connect");
        (McpBridge::new(peer), notifications)
    }

    async fn wait_for<F>(receiver: &mut broadcast::Receiver<BridgeEvent>, mut wanted: F) -> BridgeEvent
    where
        F: FnMut(&BridgeEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(event) = receiver.recv().await {
                    if wanted(&event) {
                        return event;
                    }
                }
            }
        })
        .await
        .expect("event should arrive")
    }

    #[tokio::test]
    async fn calls_resolve_validate_and_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (bridge, _notifications) = bridge_for(counting_server(calls.clone())).await;

        let result = bridge
            .call_tool("add", &args! { "a" => 2_i64, "b" => 3_i64 })
            .await
            .expect("delivered");
        assert!(!result.is_error);
        assert_eq!(result.as_text(), "5");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let rejected = bridge
            .call_tool("add", &args! { "a" => "two", "b" => 3_i64 })
            .await
            .expect("validation failures are results");
        assert!(rejected.is_error);
        assert!(rejected.as_text().contains("Invalid arguments for tool `add`"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let failed = bridge
            .call_tool("add", &args! { "a" => i64::MAX, "b" => 1_i64 })
            .await
            .expect("delivered");
        assert!(failed.is_error);
        assert_eq!(failed.as_text(), "Overflow");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_names_fail_locally() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (bridge, _notifications) = bridge_for(counting_server(calls.clone())).await;

        let err = bridge
            .call_tool("subtract", &Arguments::new())
            .await
            .expect_err("not advertised");
        assert_eq!(
            err,
            BridgeError::not_found("counter", CapabilityKind::Tool, "subtract")
        );
        let err = bridge
            .read_resource("users://stats")
            .await
            .expect_err("no resources");
        assert!(matches!(err, BridgeError::NotFound { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invocations_are_observable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (bridge, _notifications) = bridge_for(counting_server(calls)).await;
        let mut events = bridge.subscribe();

        bridge
            .call_tool("add", &args! { "a" => 1_i64, "b" => 1_i64 })
            .await
            .expect("delivered");
        let _ = bridge.call_tool("missing", &Arguments::new()).await;

        let started = wait_for(&mut events, |event| {
            matches!(event, BridgeEvent::InvocationStarted { .. })
        })
        .await;
        let BridgeEvent::InvocationStarted { call_id, name, .. } = started else {
            panic!("expected start");
        };
        assert_eq!(name, "add");

        let finished = wait_for(&mut events, |event| {
            matches!(event, BridgeEvent::InvocationFinished { .. })
        })
        .await;
        match finished {
            BridgeEvent::InvocationFinished {
                call_id: finished_id,
                outcome,
                ..
            } => {
                assert_eq!(finished_id, call_id);
                assert_eq!(outcome, InvocationOutcome::Success);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let fault = wait_for(&mut events, |event| {
            matches!(event, BridgeEvent::InvocationFinished { .. })
        })
        .await;
        assert!(matches!(
            fault,
            BridgeEvent::InvocationFinished {
                outcome: InvocationOutcome::Fault,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn subscriber_keeps_cache_in_step_with_the_peer() {
        let server = counting_server(Arc::new(AtomicUsize::new(0)));
        let (bridge, notifications) = bridge_for(server.clone()).await;
        let mut events = bridge.subscribe();
        let subscriber = bridge.spawn_subscriber(notifications);

        assert_eq!(bridge.list_tools().await.expect("tools").len(), 1);

        server
            .add_tool(ToolSpec::new("negate", "Negates"), |_| async {
                InvocationResult::success_text("-0")
            })
            .await;
        server.notify_list_changed(CapabilityKind::Tool, None).await;
        wait_for(&mut events, |event| {
            matches!(event, BridgeEvent::CacheRefreshed { entries: 2, .. })
        })
        .await;
        let result = bridge
            .call_tool("negate", &Arguments::new())
            .await
            .expect("new tool is callable");
        assert_eq!(result.as_text(), "-0");

        server.remove_tool("add").await;
        server
            .notify_list_changed(
                CapabilityKind::Tool,
                Some(ChangeDetail::new("removed", &["add"], None)),
            )
            .await;
        wait_for(&mut events, |event| {
            matches!(event, BridgeEvent::CacheInvalidated { .. })
        })
        .await;
        let err = bridge
            .call_tool("add", &args! { "a" => 1_i64, "b" => 2_i64 })
            .await
            .expect_err("removed tool");
        assert!(matches!(err, BridgeError::NotFound { .. }));

        assert_eq!(subscriber.history().len().await, 2);
        subscriber.shutdown().await;
    }
}
