//! ---
//! wamp_section: "04-session-core"
//! wamp_subsection: "module"
//! wamp_type: "source"
//! wamp_scope: "code"
//! wamp_description: "Session protocol state machine and async runtime."
//! wamp_version: "v0.0.0-prealpha"
//! wamp_owner: "tbd"
//! ---
//! Subscription bookkeeping.
//!
//! Subscriptions are keyed by the request identifier that created them. A
//! second map indexes confirmed subscriptions by broker subscription id so an
//! EVENT reaches every local subscriber sharing that id.
use std::collections::HashMap;
use std::fmt;

use r_wamp_msg::{Details, PublicationId, RequestId, SubscriptionId};
use serde_json::Value as JsonValue;

/// Publication delivered to a subscription callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub subscription: SubscriptionId,
    pub publication: PublicationId,
    pub details: Details,
    /// Positional payload; empty when the publisher sent none.
    pub args: Vec<JsonValue>,
    /// Keyword payload; empty when the publisher sent none.
    pub kwargs: Details,
}

/// Callback invoked for every event of a subscription.
pub type EventHandler = Box<dyn FnMut(&Event) + Send>;

/// Progress of one subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// SUBSCRIBE frame is still in the outbound queue.
    Queued,
    /// SUBSCRIBE frame was written to the transport.
    Requested,
    /// Broker confirmed with this subscription id.
    Active(SubscriptionId),
}

pub struct Subscription {
    topic: String,
    status: SubscriptionStatus,
    handler: EventHandler,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Result of applying a SUBSCRIBED confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    UnknownRequest,
    AlreadyConfirmed,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    by_request: HashMap<RequestId, Subscription>,
    by_subscription: HashMap<SubscriptionId, Vec<RequestId>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new subscription whose SUBSCRIBE frame has just been queued.
    pub fn insert(&mut self, request: RequestId, topic: impl Into<String>, handler: EventHandler) {
        self.by_request.insert(
            request,
            Subscription {
                topic: topic.into(),
                status: SubscriptionStatus::Queued,
                handler,
            },
        );
    }

    /// Note that the SUBSCRIBE frame for `request` reached the transport.
    pub fn mark_requested(&mut self, request: RequestId) {
        if let Some(subscription) = self.by_request.get_mut(&request) {
            if subscription.status == SubscriptionStatus::Queued {
                subscription.status = SubscriptionStatus::Requested;
            }
        }
    }

    /// Attach a broker subscription id. Each subscription accepts one confirmation.
    pub fn confirm(&mut self, request: RequestId, subscription: SubscriptionId) -> ConfirmOutcome {
        let Some(entry) = self.by_request.get_mut(&request) else {
            return ConfirmOutcome::UnknownRequest;
        };
        if let SubscriptionStatus::Active(_) = entry.status {
            return ConfirmOutcome::AlreadyConfirmed;
        }
        entry.status = SubscriptionStatus::Active(subscription);
        self.by_subscription
            .entry(subscription)
            .or_default()
            .push(request);
        ConfirmOutcome::Confirmed
    }

    /// Invoke every callback attached to `event.subscription`. Returns how many ran.
    pub fn dispatch(&mut self, event: &Event) -> usize {
        let Some(requests) = self.by_subscription.get(&event.subscription) else {
            return 0;
        };
        let mut delivered = 0;
        for request in requests {
            if let Some(subscription) = self.by_request.get_mut(request) {
                (subscription.handler)(event);
                delivered += 1;
            }
        }
        delivered
    }

    /// Remove every subscription whose SUBSCRIBE already left the queue.
    ///
    /// Returns the removed topics and callbacks in request order so the
    /// caller can re-register them under fresh request ids.
    pub fn drain_sent(&mut self) -> Vec<(String, EventHandler)> {
        let mut sent: Vec<RequestId> = self
            .by_request
            .iter()
            .filter(|(_, subscription)| subscription.status != SubscriptionStatus::Queued)
            .map(|(request, _)| *request)
            .collect();
        sent.sort_unstable();
        self.by_subscription.clear();
        sent.into_iter()
            .filter_map(|request| self.by_request.remove(&request))
            .map(|subscription| (subscription.topic, subscription.handler))
            .collect()
    }

    pub fn clear(&mut self) {
        self.by_request.clear();
        self.by_subscription.clear();
    }

    pub fn get(&self, request: RequestId) -> Option<&Subscription> {
        self.by_request.get(&request)
    }

    pub fn status(&self, request: RequestId) -> Option<SubscriptionStatus> {
        self.by_request.get(&request).map(Subscription::status)
    }

    pub fn len(&self) -> usize {
        self.by_request.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_request.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.by_subscription.values().map(Vec::len).sum()
    }
}
