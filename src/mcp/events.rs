//! Change notifications, the append-only change history and the bridge's
//! observability hook.

use crate::mcp::capability::CapabilityKind;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};

/// `changeType` recorded for notifications that carry no detail.
pub const BARE_CHANGE_TYPE: &str = "list_changed";
const EVENT_HUB_CAPACITY: usize = 256;

/// Detail a peer may attach to a `list_changed` notification.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangeDetail {
    pub change_type: Option<String>,
    pub affected_names: BTreeSet<String>,
    pub description: Option<String>,
}

impl ChangeDetail {
    pub fn new(change_type: &str, affected_names: &[&str], description: Option<&str>) -> Self {
        Self {
            change_type: Some(change_type.to_string()),
            affected_names: affected_names.iter().map(|name| name.to_string()).collect(),
            description: description.map(str::to_string),
        }
    }

    /// Returns `None` for bare signals. `affectedResources` and `reason` are
    /// accepted as aliases of `affectedNames` and `description`.
    pub fn from_params(params: Option<&Value>) -> Option<Self> {
        let params = params?.as_object()?;
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| params.get(*key).and_then(Value::as_str))
                .map(str::to_string)
        };
        let affected_names: BTreeSet<String> = ["affectedNames", "affectedResources"]
            .iter()
            .filter_map(|key| params.get(*key).and_then(Value::as_array))
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        let detail = Self {
            change_type: text(&["changeType"]),
            affected_names,
            description: text(&["description", "reason"]),
        };
        (detail != Self::default()).then_some(detail)
    }

    pub fn to_params(&self) -> Value {
        let mut params = Map::new();
        if let Some(change_type) = &self.change_type {
            params.insert("changeType".to_string(), json!(change_type));
        }
        params.insert("affectedNames".to_string(), json!(self.affected_names));
        if let Some(description) = &self.description {
            params.insert("description".to_string(), json!(description));
        }
        Value::Object(params)
    }
}

/// A `list_changed` notification received from one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerNotification {
    pub peer_id: String,
    pub kind: CapabilityKind,
    pub detail: Option<ChangeDetail>,
}

/// Recognizes `notifications/<kind>/list_changed` messages; anything else is ignored.
pub fn notification_from_value(peer_id: &str, value: &Value) -> Option<PeerNotification> {
    if value.get("id").is_some() {
        return None;
    }
    let method = value.get("method")?.as_str()?;
    let kind = CapabilityKind::from_list_changed_method(method)?;
    Some(PeerNotification {
        peer_id: peer_id.to_string(),
        kind,
        detail: ChangeDetail::from_params(value.get("params")),
    })
}

/// One recorded registry mutation. Never modified once recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Arrival order across every kind, starting at 1.
    pub sequence: u64,
    pub peer_id: String,
    pub kind: CapabilityKind,
    pub captured_at: Instant,
    pub timestamp: DateTime<Utc>,
    pub change_type: String,
    pub affected_names: BTreeSet<String>,
    pub description: Option<String>,
}

impl ChangeEvent {
    pub fn is_detailed(&self) -> bool {
        !self.affected_names.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ChangeHistory {
    events: RwLock<Vec<Arc<ChangeEvent>>>,
}

impl ChangeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event. The sequence number is assigned under the write lock
    /// so it always matches the position in the log.
    pub async fn record(&self, notification: &PeerNotification) -> Arc<ChangeEvent> {
        let mut events = self.events.write().await;
        let detail = notification.detail.clone().unwrap_or_default();
        let event = Arc::new(ChangeEvent {
            sequence: events.len() as u64 + 1,
            peer_id: notification.peer_id.clone(),
            kind: notification.kind,
            captured_at: Instant::now(),
            timestamp: Utc::now(),
            change_type: detail
                .change_type
                .unwrap_or_else(|| BARE_CHANGE_TYPE.to_string()),
            affected_names: detail.affected_names,
            description: detail.description,
        });
        events.push(Arc::clone(&event));
        event
    }

    pub async fn snapshot(&self) -> Vec<Arc<ChangeEvent>> {
        self.events.read().await.clone()
    }

    pub async fn for_kind(&self, kind: CapabilityKind) -> Vec<Arc<ChangeEvent>> {
        self.events
            .read()
            .await
            .iter()
            .filter(|event| event.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationOutcome {
    Success,
    /// The peer reported the failure in an error-flagged result.
    Failed,
    /// The call raised a fault (connectivity or lookup).
    Fault,
}

/// Emitted through [`EventHub`] for embedding applications to observe.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    InvocationStarted {
        peer_id: String,
        kind: CapabilityKind,
        name: String,
        call_id: u64,
    },
    InvocationFinished {
        peer_id: String,
        kind: CapabilityKind,
        name: String,
        call_id: u64,
        outcome: InvocationOutcome,
        elapsed: Duration,
    },
    ChangeRecorded(Arc<ChangeEvent>),
    /// Names marked stale by a detailed notification.
    CacheInvalidated {
        peer_id: String,
        kind: CapabilityKind,
        names: Vec<String>,
    },
    CacheRefreshed {
        peer_id: String,
        kind: CapabilityKind,
        entries: usize,
    },
    RefreshFailed {
        peer_id: String,
        kind: CapabilityKind,
        message: String,
    },
}

/// Broadcast hub for [`BridgeEvent`]s. Emitting never blocks and is a no-op
/// while nobody is subscribed; slow subscribers see `Lagged` instead of
/// holding the bridge back.
#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<BridgeEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_HUB_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: BridgeEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_notifications_have_no_detail() {
        let notification = notification_from_value(
            "users",
            &json!({"jsonrpc": "2.0", "method": "notifications/tools/list_changed"}),
        )
        .expect("notification should parse");
        assert_eq!(notification.kind, CapabilityKind::Tool);
        assert_eq!(notification.detail, None);
    }

    #[test]
    fn detailed_notifications_accept_aliases() {
        let notification = notification_from_value(
            "users",
            &json!({
                "jsonrpc": "2.0",
                "method": "notifications/resources/list_changed",
                "params": {
                    "changeType": "updated",
                    "affectedResources": ["users://stats"],
                    "reason": "user created"
                }
            }),
        )
        .expect("notification should parse");
        let detail = notification.detail.expect("detail");
        assert_eq!(detail.change_type.as_deref(), Some("updated"));
        assert!(detail.affected_names.contains("users://stats"));
        assert_eq!(detail.description.as_deref(), Some("user created"));
    }

    #[test]
    fn requests_and_other_methods_are_ignored() {
        assert!(notification_from_value(
            "users",
            &json!({"jsonrpc": "2.0", "id": 3, "method": "notifications/tools/list_changed"})
        )
        .is_none());
        assert!(notification_from_value(
            "users",
            &json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}})
        )
        .is_none());
    }

    #[test]
    fn detail_round_trips_through_params() {
        let detail = ChangeDetail::new("removed", &["deleteUser"], Some("retired"));
        assert_eq!(
            ChangeDetail::from_params(Some(&detail.to_params())),
            Some(detail)
        );
    }

    #[tokio::test]
    async fn history_keeps_arrival_order() {
        let history = ChangeHistory::new();
        for kind in [
            CapabilityKind::Tool,
            CapabilityKind::Prompt,
            CapabilityKind::Tool,
        ] {
            history
                .record(&PeerNotification {
                    peer_id: "users".to_string(),
                    kind,
                    detail: None,
                })
                .await;
        }

        let events = history.snapshot().await;
        let sequences: Vec<u64> = events.iter().map(|event| event.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(events[0].change_type, BARE_CHANGE_TYPE);
        assert_eq!(history.for_kind(CapabilityKind::Tool).await.len(), 2);
    }

    #[tokio::test]
    async fn hub_emits_without_subscribers() {
        let hub = EventHub::new();
        hub.emit(BridgeEvent::RefreshFailed {
            peer_id: "users".to_string(),
            kind: CapabilityKind::Tool,
            message: "down".to_string(),
        });

        let mut receiver = hub.subscribe();
        hub.emit(BridgeEvent::CacheRefreshed {
            peer_id: "users".to_string(),
            kind: CapabilityKind::Tool,
            entries: 2,
        });
        assert!(matches!(
            receiver.recv().await,
            Ok(BridgeEvent::CacheRefreshed { entries: 2, .. })
        ));
    }
}
