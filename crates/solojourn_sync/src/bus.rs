//! Typed publish-subscribe for inbound events.
//!
//! Handlers are keyed by [`EventKind`] and invoked in registration order.
//! Dispatch clones the handler list and releases the lock before invoking,
//! so a handler may subscribe or unsubscribe re-entrantly.

use parking_lot::RwLock;
use solojourn_protocol::{
    EventKind, InboundEvent, LocationShared, Message, MessageRead, Notification, PostCommented,
    PostLiked, ReconnectFailed, SocketConnected, SocketDisconnected, TypingUpdate,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned by [`EventBus::on`], used to deregister one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// A payload type carried by exactly one inbound event kind.
pub trait InboundPayload: Sized + 'static {
    /// Event kind carrying this payload.
    const KIND: EventKind;

    /// Borrows the payload out of an event of kind [`Self::KIND`].
    fn extract(event: &InboundEvent) -> Option<&Self>;
}

macro_rules! inbound_payload {
    ($ty:ty, $kind:ident, $variant:ident) => {
        impl InboundPayload for $ty {
            const KIND: EventKind = EventKind::$kind;

            fn extract(event: &InboundEvent) -> Option<&Self> {
                match event {
                    InboundEvent::$variant(payload) => Some(payload),
                    _ => None,
                }
            }
        }
    };
}

inbound_payload!(SocketConnected, SocketConnected, Connected);
inbound_payload!(SocketDisconnected, SocketDisconnected, Disconnected);
inbound_payload!(ReconnectFailed, ReconnectFailed, ReconnectFailed);
inbound_payload!(Message, MessageNew, MessageNew);
inbound_payload!(MessageRead, MessageRead, MessageRead);
inbound_payload!(TypingUpdate, MessageTyping, Typing);
inbound_payload!(Notification, NotificationNew, NotificationNew);
inbound_payload!(PostLiked, PostLiked, PostLiked);
inbound_payload!(PostCommented, PostCommented, PostCommented);
inbound_payload!(LocationShared, LocationShared, LocationShared);

/// Event name → ordered handler list.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Registers a handler receiving the typed payload of `T::KIND`.
    pub fn subscribe<T, F>(&self, handler: F) -> SubscriptionId
    where
        T: InboundPayload,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.on(T::KIND, move |event| {
            if let Some(payload) = T::extract(event) {
                handler(payload);
            }
        })
    }

    /// Deregisters one handler, or every handler for `kind` when `id` is `None`.
    ///
    /// Returns the number of handlers removed.
    pub fn off(&self, kind: EventKind, id: Option<SubscriptionId>) -> usize {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&kind) else {
            return 0;
        };
        let before = list.len();
        match id {
            Some(id) => list.retain(|(sub, _)| *sub != id),
            None => list.clear(),
        }
        let removed = before - list.len();
        if list.is_empty() {
            handlers.remove(&kind);
        }
        removed
    }

    /// Invokes every handler registered for the event's kind.
    ///
    /// Returns the number of handlers invoked.
    pub fn emit(&self, event: &InboundEvent) -> usize {
        let snapshot: Vec<Handler> = match self.handlers.read().get(&event.kind()) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };
        for handler in &snapshot {
            handler(event);
        }
        snapshot.len()
    }

    /// Returns the number of handlers registered for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map(Vec::len).unwrap_or(0)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("EventBus")
            .field("kinds", &handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
