//! Reacts to a peer's `list_changed` notifications.
//!
//! One dispatcher task drains the peer's notification channel. Every
//! notification is appended to the [`ChangeHistory`] as it arrives, then
//! queued to the worker owning its capability kind. Workers apply events
//! one at a time, so each kind runs its own Idle -> Notified -> Refreshed
//! cycle and a burst is replayed in order rather than coalesced.
//!
//! A bare signal refreshes the whole kind. A detailed one only marks the
//! affected names stale; the registry refreshes lazily on the next lookup.

use crate::mcp::capability::CapabilityKind;
use crate::mcp::events::{BridgeEvent, ChangeEvent, ChangeHistory, EventHub, PeerNotification};
use crate::mcp::registry::CapabilityRegistry;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Where one kind's change cycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Idle,
    Notified,
    Refreshed,
}

impl SubscriberState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SubscriberState::Notified,
            2 => SubscriberState::Refreshed,
            _ => SubscriberState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SubscriberState::Idle => 0,
            SubscriberState::Notified => 1,
            SubscriberState::Refreshed => 2,
        }
    }
}

#[derive(Debug, Default)]
struct KindStates([AtomicU8; 3]);

impl KindStates {
    fn slot(kind: CapabilityKind) -> usize {
        match kind {
            CapabilityKind::Tool => 0,
            CapabilityKind::Resource => 1,
            CapabilityKind::Prompt => 2,
        }
    }

    fn get(&self, kind: CapabilityKind) -> SubscriberState {
        SubscriberState::from_u8(self.0[Self::slot(kind)].load(Ordering::SeqCst))
    }

    fn set(&self, kind: CapabilityKind, state: SubscriberState) {
        self.0[Self::slot(kind)].store(state.as_u8(), Ordering::SeqCst);
    }
}

/// Handle to a running subscriber. Dropping it stops the tasks.
pub struct ChangeSubscriber {
    peer_id: String,
    history: Arc<ChangeHistory>,
    states: Arc<KindStates>,
    shutdown: CancellationToken,
    dispatcher: Option<JoinHandle<()>>,
}

impl ChangeSubscriber {
    pub fn spawn(
        registry: Arc<CapabilityRegistry>,
        events: EventHub,
        notifications: mpsc::UnboundedReceiver<PeerNotification>,
    ) -> Self {
        let peer_id = registry.peer_id().to_string();
        let history = Arc::new(ChangeHistory::new());
        let states = Arc::new(KindStates::default());
        let shutdown = CancellationToken::new();

        let dispatcher = tokio::spawn(dispatch(
            notifications,
            Dispatch {
                registry,
                events,
                history: Arc::clone(&history),
                states: Arc::clone(&states),
                shutdown: shutdown.clone(),
            },
        ));
        debug!(peer_id = %peer_id, "Change subscriber started");

        Self {
            peer_id,
            history,
            states,
            shutdown,
            dispatcher: Some(dispatcher),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn history(&self) -> Arc<ChangeHistory> {
        Arc::clone(&self.history)
    }

    pub fn state(&self, kind: CapabilityKind) -> SubscriberState {
        self.states.get(kind)
    }

    /// Stops the dispatcher and workers. Queued events that have not been
    /// applied yet are discarded; history already recorded stays.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher
            .as_ref()
            .is_some_and(|dispatcher| !dispatcher.is_finished())
    }
}

impl Drop for ChangeSubscriber {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[derive(Clone)]
struct Dispatch {
    registry: Arc<CapabilityRegistry>,
    events: EventHub,
    history: Arc<ChangeHistory>,
    states: Arc<KindStates>,
    shutdown: CancellationToken,
}

async fn dispatch(
    mut notifications: mpsc::UnboundedReceiver<PeerNotification>,
    context: Dispatch,
) {
    let mut workers: [Option<mpsc::UnboundedSender<Arc<ChangeEvent>>>; 3] = Default::default();

    loop {
        let notification = tokio::select! {
            _ = context.shutdown.cancelled() => break,
            notification = notifications.recv() => match notification {
                Some(notification) => notification,
                None => break,
            },
        };

        let event = context.history.record(&notification).await;
        debug!(
            peer_id = %event.peer_id,
            kind = %event.kind,
            sequence = event.sequence,
            change_type = %event.change_type,
            "Recorded capability change"
        );
        context
            .events
            .emit(BridgeEvent::ChangeRecorded(Arc::clone(&event)));

        let kind = event.kind;
        context.states.set(kind, SubscriberState::Notified);
        let worker = workers[KindStates::slot(kind)].get_or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(apply_changes(kind, rx, context.clone()));
            tx
        });
        if worker.send(event).is_err() {
            warn!(peer_id = %notification.peer_id, kind = %kind, "Change worker stopped");
        }
    }

    debug!(peer_id = %context.registry.peer_id(), "Change subscriber stopped");
}

async fn apply_changes(
    kind: CapabilityKind,
    mut queue: mpsc::UnboundedReceiver<Arc<ChangeEvent>>,
    context: Dispatch,
) {
    loop {
        let event = tokio::select! {
            _ = context.shutdown.cancelled() => break,
            event = queue.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        context.states.set(kind, SubscriberState::Notified);
        apply_change(&event, &context).await;
        context.states.set(kind, SubscriberState::Refreshed);
        if queue.is_empty() {
            context.states.set(kind, SubscriberState::Idle);
        }
    }
}

async fn apply_change(event: &ChangeEvent, context: &Dispatch) {
    let peer_id = event.peer_id.clone();
    let kind = event.kind;

    if event.is_detailed() {
        let names: Vec<String> = event.affected_names.iter().cloned().collect();
        context.registry.invalidate(kind, names.iter().cloned()).await;
        context.events.emit(BridgeEvent::CacheInvalidated {
            peer_id,
            kind,
            names,
        });
        return;
    }

    match context.registry.refresh(kind).await {
        Ok(snapshot) => context.events.emit(BridgeEvent::CacheRefreshed {
            peer_id,
            kind,
            entries: snapshot.len(),
        }),
        Err(err) => {
            warn!(
                peer_id = %peer_id,
                kind = %kind,
                sequence = event.sequence,
                error = %err,
                "Capability refresh failed; keeping cached entries"
            );
            context.events.emit(BridgeEvent::RefreshFailed {
                peer_id,
                kind,
                message: err.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::events::ChangeDetail;
    use crate::mcp::test_support::{names, tools, unreachable, ScriptedSource};
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn bare(kind: CapabilityKind) -> PeerNotification {
        PeerNotification {
            peer_id: "users".to_string(),
            kind,
            detail: None,
        }
    }

    fn detailed(kind: CapabilityKind, names: &[&str]) -> PeerNotification {
        PeerNotification {
            peer_id: "users".to_string(),
            kind,
            detail: Some(ChangeDetail::new("updated", names, None)),
        }
    }

    /// Waits for the next cache outcome (refresh or invalidation).
    async fn next_outcome(receiver: &mut broadcast::Receiver<BridgeEvent>) -> BridgeEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
                .await
                .expect("outcome should arrive")
                .expect("hub open");
            match event {
                BridgeEvent::ChangeRecorded(_) => continue,
                other => return other,
            }
        }
    }

    #[tokio::test]
    async fn burst_with_failed_refresh_keeps_every_event() {
        let source = ScriptedSource::with_delay(
            vec![
                tools(&["createUser"]),
                tools(&["createUser", "deleteUser"]),
                unreachable("peer restarting"),
                tools(&["createUser", "deleteUser", "searchUsers"]),
            ],
            Duration::from_millis(20),
        );
        let registry = Arc::new(CapabilityRegistry::new(source.clone()));
        registry.list_tools().await.expect("initial population");

        let hub = EventHub::new();
        let mut outcomes = hub.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = ChangeSubscriber::spawn(Arc::clone(&registry), hub, rx);

        for _ in 0..3 {
            tx.send(bare(CapabilityKind::Tool)).expect("send");
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(next_outcome(&mut outcomes).await);
        }
        assert!(matches!(seen[0], BridgeEvent::CacheRefreshed { entries: 2, .. }));
        assert!(matches!(seen[1], BridgeEvent::RefreshFailed { .. }));
        assert!(matches!(seen[2], BridgeEvent::CacheRefreshed { entries: 3, .. }));

        let history = subscriber.history().snapshot().await;
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|event| !event.is_detailed()));

        let cached = registry.cached(CapabilityKind::Tool).await.expect("cache");
        assert_eq!(names(&cached), vec!["createUser", "deleteUser", "searchUsers"]);
        // Initial population plus the two successful refreshes.
        assert_eq!(registry.generation(CapabilityKind::Tool).await, 3);
        assert_eq!(source.fetches(), 4);

        subscriber.shutdown().await;
    }

    #[tokio::test]
    async fn failed_refresh_leaves_prior_cache() {
        let source = ScriptedSource::new(vec![tools(&["createUser"]), unreachable("down")]);
        let registry = Arc::new(CapabilityRegistry::new(source));
        registry.list_tools().await.expect("initial population");

        let hub = EventHub::new();
        let mut outcomes = hub.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = ChangeSubscriber::spawn(Arc::clone(&registry), hub, rx);
        tx.send(bare(CapabilityKind::Tool)).expect("send");

        match next_outcome(&mut outcomes).await {
            BridgeEvent::RefreshFailed { peer_id, kind, message } => {
                assert_eq!(peer_id, "users");
                assert_eq!(kind, CapabilityKind::Tool);
                assert!(message.contains("down"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let cached = registry.cached(CapabilityKind::Tool).await.expect("cache");
        assert_eq!(names(&cached), vec!["createUser"]);
        assert_eq!(subscriber.history().len().await, 1);
    }

    #[tokio::test]
    async fn detailed_change_marks_only_affected_names() {
        let source = ScriptedSource::new(vec![
            tools(&["createUser", "deleteUser"]),
            tools(&["createUser", "deleteUser"]),
        ]);
        let registry = Arc::new(CapabilityRegistry::new(source.clone()));
        registry.list_tools().await.expect("initial population");

        let hub = EventHub::new();
        let mut outcomes = hub.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = ChangeSubscriber::spawn(Arc::clone(&registry), hub, rx);
        tx.send(detailed(CapabilityKind::Tool, &["deleteUser"]))
            .expect("send");

        match next_outcome(&mut outcomes).await {
            BridgeEvent::CacheInvalidated { names, .. } => assert_eq!(names, vec!["deleteUser"]),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(source.fetches(), 1);

        registry
            .find(CapabilityKind::Tool, "createUser")
            .await
            .expect("cached");
        assert_eq!(source.fetches(), 1);
        registry
            .find(CapabilityKind::Tool, "deleteUser")
            .await
            .expect("refreshed");
        assert_eq!(source.fetches(), 2);

        let history = subscriber.history().snapshot().await;
        assert!(history[0].is_detailed());
        assert_eq!(history[0].change_type, "updated");
    }

    #[tokio::test]
    async fn history_records_every_kind_in_arrival_order() {
        let source = ScriptedSource::new(Vec::new());
        let registry = Arc::new(CapabilityRegistry::new(source));
        let hub = EventHub::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = ChangeSubscriber::spawn(registry, hub, rx);

        let kinds = [
            CapabilityKind::Tool,
            CapabilityKind::Resource,
            CapabilityKind::Prompt,
        ];
        for index in 0..30 {
            let name = format!("entry-{index}");
            tx.send(detailed(kinds[index % 3], &[name.as_str()]))
                .expect("send");
        }

        let history = subscriber.history();
        tokio::time::timeout(Duration::from_secs(5), async {
            while history.len().await < 30 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("all events recorded");

        let events = history.snapshot().await;
        for (index, event) in events.iter().enumerate() {
            assert_eq!(event.sequence, index as u64 + 1);
            assert_eq!(event.kind, kinds[index % 3]);
            assert!(event.affected_names.contains(&format!("entry-{index}")));
        }
    }

    #[tokio::test]
    async fn shutdown_stops_the_dispatcher() {
        let registry = Arc::new(CapabilityRegistry::new(ScriptedSource::new(Vec::new())));
        let (_tx, rx) = mpsc::unbounded_channel();
        let subscriber = ChangeSubscriber::spawn(registry, EventHub::new(), rx);
        assert!(subscriber.is_running());
        assert_eq!(subscriber.state(CapabilityKind::Tool), SubscriberState::Idle);
        subscriber.shutdown().await;
    }
}
