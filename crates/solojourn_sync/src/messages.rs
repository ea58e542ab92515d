//! Messages / conversations synchronization store.
//!
//! Owns the conversation summaries, one message list per fetched
//! conversation, the typing projection and the single "active" conversation.
//!
//! A message is inserted into a list only when its `message:new` event
//! arrives (or a history fetch contains it), never on submit; the event is
//! keyed by message id so local and remote origins de-duplicate naturally.
//! Until then an outgoing message is visible through
//! [`MessageStore::pending_messages`].

use crate::api::ApiClient;
use crate::bus::SubscriptionId;
use crate::client::SocketClient;
use crate::error::{SyncError, SyncResult};
use crate::pending::{CorrelationId, Rollback};
use crate::typing::TypingTracker;
use parking_lot::Mutex;
use solojourn_protocol::{
    Conversation, EventKind, InboundEvent, Message, MessageKind, MessageReaction, MessageRead,
    TypingUpdate,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An outgoing message awaiting its echo.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    /// Local correlation id.
    pub correlation_id: CorrelationId,
    /// Target conversation.
    pub conversation_id: String,
    /// Payload.
    pub content: String,
    /// Payload kind.
    pub kind: MessageKind,
    /// Server id, once the send request succeeded.
    pub server_id: Option<String>,
}

#[derive(Debug, Default)]
struct Thread {
    messages: Vec<Message>,
    ids: HashSet<String>,
    /// False until the first history fetch lands.
    fetched: bool,
}

impl Thread {
    fn push(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }

    fn get_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        if !self.ids.contains(message_id) {
            return None;
        }
        self.messages.iter_mut().find(|m| m.id == message_id)
    }
}

#[derive(Debug)]
struct MessageState {
    conversations: Vec<Conversation>,
    threads: HashMap<String, Thread>,
    active: Option<String>,
    pending_sends: Vec<PendingMessage>,
    pending_reads: HashMap<String, CorrelationId>,
    loading: bool,
    stale: bool,
    conversations_epoch: u64,
    last_error: Option<String>,
}

impl MessageState {
    fn conversation_mut(&mut self, conversation_id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == conversation_id)
    }

    /// Finds a message in any thread, falling back to conversation summaries.
    fn find_message(&self, message_id: &str) -> Option<&Message> {
        self.threads
            .values()
            .filter(|t| t.ids.contains(message_id))
            .find_map(|t| t.messages.iter().find(|m| m.id == message_id))
            .or_else(|| {
                self.conversations
                    .iter()
                    .filter_map(|c| c.last_message.as_ref())
                    .find(|m| m.id == message_id)
            })
    }

    /// Applies `f` to every local copy of a message. Returns the number of
    /// copies touched.
    fn for_each_copy(&mut self, message_id: &str, mut f: impl FnMut(&mut Message)) -> usize {
        let mut touched = 0;
        for thread in self.threads.values_mut() {
            if let Some(message) = thread.get_mut(message_id) {
                f(message);
                touched += 1;
            }
        }
        for conv in self.conversations.iter_mut() {
            if let Some(message) = conv.last_message.as_mut().filter(|m| m.id == message_id) {
                f(message);
                touched += 1;
            }
        }
        touched
    }

    /// True once the server copy of `message_id` is known locally.
    fn has_landed(&self, message_id: &str) -> bool {
        self.threads.values().any(|t| t.ids.contains(message_id))
            || self
                .conversations
                .iter()
                .any(|c| c.last_message.as_ref().map(|m| m.id.as_str()) == Some(message_id))
    }

    /// Ids of every message some local copy shows as read.
    fn read_ids(&self) -> HashSet<String> {
        let in_threads = self.threads.values().flat_map(|t| t.messages.iter());
        let in_summaries = self
            .conversations
            .iter()
            .filter_map(|c| c.last_message.as_ref());
        in_threads
            .chain(in_summaries)
            .filter(|m| m.is_read)
            .map(|m| m.id.clone())
            .collect()
    }

    /// A conversation summary with in-flight reads applied.
    fn summary_view(&self, conv: &Conversation) -> Conversation {
        let mut conv = conv.clone();
        if let Some(message) = conv.last_message.as_mut() {
            if self.pending_reads.contains_key(&message.id) {
                message.is_read = true;
            }
        }
        conv
    }

    fn discard_unfetched(&mut self, conversation_id: &str) {
        if self.threads.get(conversation_id).map(|t| !t.fetched).unwrap_or(false) {
            self.threads.remove(conversation_id);
        }
    }

    fn drop_send(&mut self, correlation_id: CorrelationId) {
        self.pending_sends.retain(|p| p.correlation_id != correlation_id);
    }

    fn clear_pending_read(&mut self, message_id: &str, correlation_id: CorrelationId) {
        if self.pending_reads.get(message_id) == Some(&correlation_id) {
            self.pending_reads.remove(message_id);
        }
    }

    fn resolve_pending(&mut self, message_id: &str) {
        self.pending_sends
            .retain(|p| p.server_id.as_deref() != Some(message_id));
    }
}

struct MessageInner {
    client: SocketClient,
    api: Arc<dyn ApiClient>,
    page_size: u32,
    typing: TypingTracker,
    state: Mutex<MessageState>,
    cancel: CancellationToken,
    subscriptions: Mutex<Vec<(EventKind, SubscriptionId)>>,
}

/// Client-side projection of conversations and their messages.
pub struct MessageStore {
    inner: Arc<MessageInner>,
}

impl MessageStore {
    /// Creates an empty store subscribed to `message:new`, `message:read`,
    /// `message:typing` and `socket:disconnected`.
    pub fn new(client: SocketClient, api: Arc<dyn ApiClient>) -> Self {
        let page_size = client.config().message_page_size;
        let typing = TypingTracker::new(client.config().typing_timeout);
        let inner = Arc::new(MessageInner {
            client,
            api,
            page_size,
            typing,
            state: Mutex::new(MessageState {
                conversations: Vec::new(),
                threads: HashMap::new(),
                active: None,
                pending_sends: Vec::new(),
                pending_reads: HashMap::new(),
                loading: false,
                stale: false,
                conversations_epoch: 0,
                last_error: None,
            }),
            cancel: CancellationToken::new(),
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&inner);
        let client = &inner.client;
        let subscriptions = [
            (
                EventKind::MessageNew,
                client.subscribe::<Message, _>(with_inner(&weak, MessageInner::on_message_new)),
            ),
            (
                EventKind::MessageRead,
                client.subscribe::<MessageRead, _>(with_inner(&weak, MessageInner::on_message_read)),
            ),
            (
                EventKind::MessageTyping,
                client.subscribe::<TypingUpdate, _>(with_inner(&weak, MessageInner::on_typing)),
            ),
            (
                EventKind::SocketDisconnected,
                client.on(
                    EventKind::SocketDisconnected,
                    with_inner::<InboundEvent, _>(&weak, |inner, _| inner.on_disconnected()),
                ),
            ),
        ];
        inner.subscriptions.lock().extend(subscriptions);

        Self { inner }
    }

    /// Fetches the conversation list, replacing local summaries.
    pub async fn load_conversations(&self) -> SyncResult<()> {
        let epoch = {
            let mut st = self.inner.state.lock();
            st.conversations_epoch += 1;
            st.loading = true;
            st.conversations_epoch
        };
        let rollback = Rollback::new(|| {
            let mut st = self.inner.state.lock();
            if st.conversations_epoch == epoch {
                st.loading = false;
            }
        });

        let result = tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(SyncError::Cancelled),
            r = self.inner.api.get_conversations() => r,
        };
        if self.inner.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        rollback.disarm();

        let mut st = self.inner.state.lock();
        if st.conversations_epoch != epoch {
            return Err(SyncError::Cancelled);
        }
        st.loading = false;
        match result {
            Ok(mut conversations) => {
                debug!(count = conversations.len(), "conversations loaded");
                let read = st.read_ids();
                for message in conversations.iter_mut().filter_map(|c| c.last_message.as_mut()) {
                    message.is_read |= read.contains(&message.id);
                }
                st.conversations = conversations;
                st.stale = false;
                st.last_error = None;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "loading conversations failed");
                st.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Fetches the first page of a conversation's history.
    ///
    /// Messages that arrived by event and are not in the fetched page are
    /// kept after it.
    ///
    /// Read flags never regress: a message shown as read locally stays read
    /// even if the fetched copy predates the receipt.
    pub async fn load_messages(&self, conversation_id: &str) -> SyncResult<()> {
        self.inner
            .state
            .lock()
            .threads
            .entry(conversation_id.to_string())
            .or_default();
        // An unfetched placeholder would make the next join skip its fetch.
        let rollback = Rollback::new(|| {
            self.inner.state.lock().discard_unfetched(conversation_id);
        });

        let result = tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(SyncError::Cancelled),
            r = self.inner.api.get_messages(conversation_id, 1, self.inner.page_size) => r,
        };
        if self.inner.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        rollback.disarm();

        let mut st = self.inner.state.lock();
        let history = match result {
            Ok(page) => page.data,
            Err(e) => {
                warn!(conversation_id, error = %e, "loading messages failed");
                st.discard_unfetched(conversation_id);
                st.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let read = st.read_ids();
        let previous = st.threads.remove(conversation_id).unwrap_or_default();
        let mut thread = Thread {
            fetched: true,
            ..Thread::default()
        };
        for mut message in history.into_iter().chain(previous.messages) {
            message.is_read |= read.contains(&message.id);
            thread.push(message);
        }
        let landed: Vec<String> = thread.ids.iter().cloned().collect();
        debug!(conversation_id, messages = thread.messages.len(), "messages loaded");
        st.threads.insert(conversation_id.to_string(), thread);
        for id in landed {
            st.resolve_pending(&id);
        }
        Ok(())
    }

    /// Makes a conversation active and joins its room. History is fetched
    /// only the first time a conversation is joined.
    pub async fn join_conversation(&self, conversation_id: &str) -> SyncResult<()> {
        let needs_fetch = {
            let mut st = self.inner.state.lock();
            st.active = Some(conversation_id.to_string());
            !st.threads.contains_key(conversation_id)
        };
        self.inner.client.join_conversation(conversation_id);
        if needs_fetch {
            self.load_messages(conversation_id).await?;
        }
        Ok(())
    }

    /// Leaves a conversation room; clears the active pointer if it matches.
    pub fn leave_conversation(&self, conversation_id: &str) {
        self.inner.client.leave_conversation(conversation_id);
        let mut st = self.inner.state.lock();
        if st.active.as_deref() == Some(conversation_id) {
            st.active = None;
        }
    }

    /// Sends a message.
    ///
    /// The message appears in the conversation's list when its
    /// `message:new` echo arrives; until then it is pending.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> SyncResult<Message> {
        let correlation_id = CorrelationId::new();
        self.inner.state.lock().pending_sends.push(PendingMessage {
            correlation_id,
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            kind,
            server_id: None,
        });
        let rollback = Rollback::new(|| self.inner.state.lock().drop_send(correlation_id));

        let result = tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(SyncError::Cancelled),
            r = self.inner.api.send_message(conversation_id, content, kind) => r,
        };
        rollback.disarm();

        let message = {
            let mut st = self.inner.state.lock();
            match result {
                Ok(message) => {
                    if st.has_landed(&message.id) {
                        st.drop_send(correlation_id);
                    } else if let Some(pending) = st
                        .pending_sends
                        .iter_mut()
                        .find(|p| p.correlation_id == correlation_id)
                    {
                        pending.server_id = Some(message.id.clone());
                    }
                    message
                }
                Err(e) => {
                    warn!(conversation_id, error = %e, "sending message failed");
                    st.drop_send(correlation_id);
                    st.last_error = Some(e.to_string());
                    return Err(e);
                }
            }
        };

        info!(conversation_id, message_id = %message.id, "message sent");
        if !self.inner.client.send_message(&message) {
            // No echo will come; the next history load shows the message.
            self.inner.state.lock().drop_send(correlation_id);
        }
        Ok(message)
    }

    /// Relays the local user's typing state. Local typing is not reflected
    /// in [`MessageStore::typing_users`].
    pub fn set_typing(&self, conversation_id: &str, is_typing: bool) -> bool {
        self.inner.client.set_typing(conversation_id, is_typing)
    }

    /// Marks a message as read.
    ///
    /// The flip is visible immediately. On success it is confirmed on every
    /// local copy, the owning conversation's badge is decremented (floored
    /// at zero) and the receipt is relayed. On failure it is dropped.
    pub async fn mark_as_read(&self, message_id: &str) -> SyncResult<()> {
        let (correlation_id, owner, from_self) = {
            let mut st = self.inner.state.lock();
            let Some(message) = st.find_message(message_id) else {
                debug!(message_id, "mark_as_read for unknown message");
                return Ok(());
            };
            if message.is_read {
                return Ok(());
            }
            let owner = message.conversation_id.clone();
            let from_self = self.inner.client.config().is_self(&message.sender_id);
            if st.pending_reads.contains_key(message_id) {
                return Err(SyncError::MutationInFlight(format!("message {message_id} read")));
            }
            let correlation_id = CorrelationId::new();
            st.pending_reads.insert(message_id.to_string(), correlation_id);
            (correlation_id, owner, from_self)
        };
        let rollback = Rollback::new(|| {
            self.inner
                .state
                .lock()
                .clear_pending_read(message_id, correlation_id)
        });

        let result = tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(SyncError::Cancelled),
            r = self.inner.api.mark_message_as_read(message_id) => r,
        };
        rollback.disarm();

        {
            let mut st = self.inner.state.lock();
            st.clear_pending_read(message_id, correlation_id);
            match &result {
                Ok(()) => {
                    st.for_each_copy(message_id, |m| m.is_read = true);
                    if !from_self {
                        if let Some(conv) = st.conversation_mut(&owner) {
                            conv.unread_count = conv.unread_count.saturating_sub(1);
                        }
                    }
                }
                Err(e) => {
                    warn!(message_id, error = %e, "marking message as read failed");
                    st.last_error = Some(e.to_string());
                }
            }
        }

        result?;
        self.inner.client.mark_message_as_read(message_id);
        Ok(())
    }

    /// Reacts to a message. The user's previous reaction, if any, is
    /// replaced.
    pub async fn react(&self, message_id: &str, emoji: &str) -> SyncResult<MessageReaction> {
        let result = tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(SyncError::Cancelled),
            r = self.inner.api.react_to_message(message_id, emoji) => r,
        };
        let mut st = self.inner.state.lock();
        match result {
            Ok(reaction) => {
                st.for_each_copy(message_id, |m| m.add_reaction(reaction.clone()));
                Ok(reaction)
            }
            Err(e) => {
                warn!(message_id, error = %e, "reaction failed");
                st.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Returns the conversation summaries.
    pub fn conversations(&self) -> Vec<Conversation> {
        let st = self.inner.state.lock();
        st.conversations.iter().map(|c| st.summary_view(c)).collect()
    }

    /// Returns one conversation summary.
    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        let st = self.inner.state.lock();
        st.conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .map(|c| st.summary_view(c))
    }

    /// Returns a conversation's messages as the UI should render them, or
    /// `None` if its history was never requested.
    pub fn messages(&self, conversation_id: &str) -> Option<Vec<Message>> {
        let st = self.inner.state.lock();
        let thread = st.threads.get(conversation_id)?;
        Some(
            thread
                .messages
                .iter()
                .map(|m| {
                    let mut m = m.clone();
                    if st.pending_reads.contains_key(&m.id) {
                        m.is_read = true;
                    }
                    m
                })
                .collect(),
        )
    }

    /// Returns true once a conversation's history has been fetched.
    pub fn is_fetched(&self, conversation_id: &str) -> bool {
        self.inner
            .state
            .lock()
            .threads
            .get(conversation_id)
            .map(|t| t.fetched)
            .unwrap_or(false)
    }

    /// Returns the users typing in a conversation.
    pub fn typing_users(&self, conversation_id: &str) -> Vec<String> {
        self.inner.typing.typing_users(conversation_id)
    }

    /// Returns the active conversation.
    pub fn active_conversation(&self) -> Option<String> {
        self.inner.state.lock().active.clone()
    }

    /// Returns outgoing messages awaiting their echo.
    pub fn pending_messages(&self) -> Vec<PendingMessage> {
        self.inner.state.lock().pending_sends.clone()
    }

    /// Returns the sum of all unread badges.
    pub fn total_unread(&self) -> u32 {
        self.inner
            .state
            .lock()
            .conversations
            .iter()
            .map(|c| c.unread_count)
            .sum()
    }

    /// Returns true while the conversation list is loading.
    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().loading
    }

    /// Returns true if the transport dropped since the last conversation
    /// load.
    pub fn is_stale(&self) -> bool {
        self.inner.state.lock().stale
    }

    /// Returns the last request error.
    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    /// Cancels in-flight requests, clears typing timers and deregisters from
    /// the client.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Drop for MessageStore {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("MessageStore")
            .field("conversations", &st.conversations.len())
            .field("threads", &st.threads.len())
            .field("active", &st.active)
            .field("pending_sends", &st.pending_sends.len())
            .finish()
    }
}

/// Builds an event handler that forwards to the store while it is alive.
fn with_inner<T, F>(weak: &Weak<MessageInner>, f: F) -> impl Fn(&T) + Send + Sync + 'static
where
    T: ?Sized + 'static,
    F: Fn(&MessageInner, &T) + Send + Sync + 'static,
{
    let weak = Weak::clone(weak);
    move |event| {
        if let Some(inner) = weak.upgrade() {
            f(&inner, event);
        }
    }
}

impl MessageInner {
    fn on_message_new(&self, message: &Message) {
        let is_self = self.client.config().is_self(&message.sender_id);
        let mut st = self.state.lock();

        if st.has_landed(&message.id) {
            debug!(message_id = %message.id, "duplicate message:new ignored");
            return;
        }

        match st.threads.get_mut(&message.conversation_id) {
            Some(thread) => {
                thread.push(message.clone());
            }
            None => debug!(
                conversation_id = %message.conversation_id,
                "message for unfetched conversation, summary only"
            ),
        }

        let active = st.active.as_deref() == Some(message.conversation_id.as_str());
        match st.conversation_mut(&message.conversation_id) {
            Some(conv) => {
                conv.last_message = Some(message.clone());
                conv.updated_at = message.created_at;
                if !active && !is_self {
                    conv.unread_count = conv.unread_count.saturating_add(1);
                }
            }
            None => debug!(
                conversation_id = %message.conversation_id,
                "message for unknown conversation"
            ),
        }

        st.resolve_pending(&message.id);
    }

    fn on_message_read(&self, event: &MessageRead) {
        let touched = self
            .state
            .lock()
            .for_each_copy(&event.message_id, |m| m.is_read = true);
        if touched == 0 {
            debug!(message_id = %event.message_id, "message:read for unknown message");
        }
    }

    fn on_typing(&self, event: &TypingUpdate) {
        if self.client.config().is_self(&event.user_id) {
            return;
        }
        self.typing
            .update(&event.conversation_id, &event.user_id, event.is_typing);
    }

    fn on_disconnected(&self) {
        let mut st = self.state.lock();
        st.stale = true;
        // Echoes missed during the gap are not replayed; sends whose request
        // is still running keep their entry.
        st.pending_sends.retain(|p| p.server_id.is_none());
        drop(st);
        self.typing.clear();
    }

    fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.typing.clear();
        for (kind, id) in self.subscriptions.lock().drain(..) {
            self.client.off(kind, Some(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::mock_api::{ApiOp, MockApi};
    use crate::storage::SessionStorage;
    use crate::transport::MockConnector;
    use solojourn_protocol::OutboundEvent;
    use solojourn_testkit::{fixtures, settle};
    use std::time::Duration;

    struct Harness {
        connector: MockConnector,
        api: Arc<MockApi>,
        client: SocketClient,
        store: MessageStore,
    }

    async fn harness(connector: MockConnector, api: MockApi) -> Harness {
        let storage = SessionStorage::in_memory();
        storage.set_user_token("t").unwrap();
        let client = SocketClient::new(
            ClientConfig::default().with_user_id("me"),
            connector.clone(),
            storage,
        );
        let api = Arc::new(api);
        let store = MessageStore::new(client.clone(), api.clone());
        client.connect().await;
        Harness {
            connector,
            api,
            client,
            store,
        }
    }

    fn two_conversations() -> MockApi {
        MockApi::new("me")
            .with_conversations(vec![
                fixtures::conversation("c1", "u2"),
                fixtures::conversation("c2", "u3"),
            ])
            .with_messages("c1", vec![fixtures::message("m1", "c1", "u2")])
    }

    #[tokio::test]
    async fn join_fetches_history_once() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        h.store.load_conversations().await.unwrap();

        h.store.join_conversation("c1").await.unwrap();
        h.store.leave_conversation("c1");
        h.store.join_conversation("c1").await.unwrap();

        assert_eq!(h.api.calls(ApiOp::GetMessages), 1);
        assert_eq!(h.store.messages("c1").unwrap().len(), 1);
        assert_eq!(h.store.active_conversation().as_deref(), Some("c1"));
        settle().await;
        assert_eq!(
            h.connector.sent(),
            vec![
                OutboundEvent::JoinConversation("c1".into()),
                OutboundEvent::LeaveConversation("c1".into()),
                OutboundEvent::JoinConversation("c1".into()),
            ]
        );
    }

    #[tokio::test]
    async fn sent_message_is_inserted_once_on_echo() {
        let h = harness(MockConnector::new().with_echo(), two_conversations()).await;
        h.store.load_conversations().await.unwrap();
        h.store.join_conversation("c1").await.unwrap();

        let sent = h.store.send_message("c1", "hello", MessageKind::Text).await.unwrap();
        assert_eq!(h.store.messages("c1").unwrap().len(), 1);
        assert_eq!(h.store.pending_messages().len(), 1);

        settle().await;
        let messages = h.store.messages("c1").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].id, sent.id);
        assert!(h.store.pending_messages().is_empty());

        // A re-delivered echo is ignored.
        h.connector.push(InboundEvent::MessageNew(sent.clone()));
        settle().await;
        assert_eq!(h.store.messages("c1").unwrap().len(), 2);
        assert_eq!(h.store.conversation("c1").unwrap().unread_count, 0);
    }

    #[tokio::test]
    async fn failed_send_clears_pending() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        h.api.fail_next(ApiOp::SendMessage, 1);

        assert!(h.store.send_message("c1", "hello", MessageKind::Text).await.is_err());
        assert!(h.store.pending_messages().is_empty());
        settle().await;
        assert!(h.connector.sent().is_empty());
    }

    #[tokio::test]
    async fn inactive_conversation_counts_unread() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        h.store.load_conversations().await.unwrap();
        h.store.join_conversation("c1").await.unwrap();

        h.connector.push(InboundEvent::MessageNew(fixtures::message("m2", "c1", "u2")));
        h.connector.push(InboundEvent::MessageNew(fixtures::message("m3", "c2", "u3")));
        settle().await;

        let c1 = h.store.conversation("c1").unwrap();
        assert_eq!(c1.unread_count, 0);
        assert_eq!(c1.last_message.unwrap().id, "m2");

        let c2 = h.store.conversation("c2").unwrap();
        assert_eq!(c2.unread_count, 1);
        assert_eq!(c2.last_message.unwrap().id, "m3");
        // c2 was never fetched, so no list is created for it.
        assert!(h.store.messages("c2").is_none());
    }

    #[tokio::test]
    async fn mark_as_read_decrements_owning_badge() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        h.store.load_conversations().await.unwrap();
        h.connector.push(InboundEvent::MessageNew(fixtures::message("m3", "c2", "u3")));
        settle().await;
        assert_eq!(h.store.conversation("c2").unwrap().unread_count, 1);

        h.store.mark_as_read("m3").await.unwrap();
        h.store.mark_as_read("m3").await.unwrap();
        let c2 = h.store.conversation("c2").unwrap();
        assert_eq!(c2.unread_count, 0);
        assert!(c2.last_message.unwrap().is_read);
        assert_eq!(h.api.calls(ApiOp::MarkMessageAsRead), 1);

        settle().await;
        assert!(h
            .connector
            .sent()
            .contains(&OutboundEvent::MarkRead("m3".into())));
    }

    #[tokio::test]
    async fn failed_read_reverts_overlay() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        h.store.load_conversations().await.unwrap();
        h.store.join_conversation("c1").await.unwrap();
        h.api.fail_next(ApiOp::MarkMessageAsRead, 1);

        assert!(h.store.mark_as_read("m1").await.is_err());
        assert!(!h.store.messages("c1").unwrap()[0].is_read);
    }

    #[tokio::test]
    async fn history_reload_keeps_read_flags() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        h.store.join_conversation("c1").await.unwrap();
        h.connector.push(InboundEvent::MessageRead(MessageRead {
            message_id: "m1".into(),
            read_by: "u2".into(),
        }));
        settle().await;

        // The server copy is still unread.
        h.store.load_messages("c1").await.unwrap();
        assert!(h.store.messages("c1").unwrap()[0].is_read);
    }

    #[tokio::test]
    async fn conversation_reload_keeps_read_summary() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        h.store.load_conversations().await.unwrap();
        let incoming = fixtures::message("m3", "c2", "u3");
        h.api.insert_message(incoming.clone());
        h.connector.push(InboundEvent::MessageNew(incoming));
        settle().await;
        h.store.mark_as_read("m3").await.unwrap();

        h.store.load_conversations().await.unwrap();
        let c2 = h.store.conversation("c2").unwrap();
        assert!(c2.last_message.unwrap().is_read);
    }

    #[tokio::test]
    async fn summary_shows_in_flight_read() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        h.store.load_conversations().await.unwrap();
        h.connector.push(InboundEvent::MessageNew(fixtures::message("m3", "c2", "u3")));
        settle().await;
        h.api.hold(ApiOp::MarkMessageAsRead);

        let in_flight = h.store.mark_as_read("m3");
        tokio::pin!(in_flight);
        tokio::select! {
            biased;
            _ = &mut in_flight => panic!("request should be held"),
            _ = settle() => {}
        }
        let c2 = h.store.conversation("c2").unwrap();
        assert!(c2.last_message.unwrap().is_read);
        assert!(h.store.conversations()[1].last_message.as_ref().unwrap().is_read);

        h.api.resume(ApiOp::MarkMessageAsRead);
        in_flight.await.unwrap();
        assert_eq!(h.store.conversation("c2").unwrap().unread_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_read_releases_its_overlay() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        h.store.join_conversation("c1").await.unwrap();
        h.api.hold(ApiOp::MarkMessageAsRead);

        let timed_out =
            tokio::time::timeout(Duration::from_millis(10), h.store.mark_as_read("m1")).await;
        assert!(timed_out.is_err());
        assert!(!h.store.messages("c1").unwrap()[0].is_read);

        h.api.resume(ApiOp::MarkMessageAsRead);
        h.store.mark_as_read("m1").await.unwrap();
        assert!(h.store.messages("c1").unwrap()[0].is_read);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_history_fetch_is_retried_on_next_join() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        h.api.hold(ApiOp::GetMessages);

        let timed_out =
            tokio::time::timeout(Duration::from_millis(10), h.store.join_conversation("c1")).await;
        assert!(timed_out.is_err());
        assert!(h.store.messages("c1").is_none());

        h.api.resume(ApiOp::GetMessages);
        h.store.join_conversation("c1").await.unwrap();
        assert!(h.store.is_fetched("c1"));
        assert_eq!(h.store.messages("c1").unwrap().len(), 1);
        assert_eq!(h.api.calls(ApiOp::GetMessages), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_conversation_load_resets_loading() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        h.api.hold(ApiOp::GetConversations);

        let timed_out =
            tokio::time::timeout(Duration::from_millis(10), h.store.load_conversations()).await;
        assert!(timed_out.is_err());
        assert!(!h.store.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_send_leaves_no_pending_message() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        h.api.hold(ApiOp::SendMessage);

        let send = h.store.send_message("c1", "hello", MessageKind::Text);
        let timed_out = tokio::time::timeout(Duration::from_millis(10), send).await;
        assert!(timed_out.is_err());
        assert!(h.store.pending_messages().is_empty());
    }

    #[tokio::test]
    async fn unrelayed_send_does_not_wait_for_an_echo() {
        let h = harness(MockConnector::new().with_echo(), two_conversations()).await;
        h.client.disconnect();

        h.store.send_message("c1", "hello", MessageKind::Text).await.unwrap();
        assert!(h.store.pending_messages().is_empty());
    }

    #[tokio::test]
    async fn disconnect_drops_sends_awaiting_their_echo() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        h.store.join_conversation("c1").await.unwrap();

        h.store.send_message("c1", "hello", MessageKind::Text).await.unwrap();
        assert_eq!(h.store.pending_messages().len(), 1);

        h.client.disconnect();
        assert!(h.store.pending_messages().is_empty());
    }

    #[tokio::test]
    async fn read_broadcast_does_not_touch_badges() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        h.store.load_conversations().await.unwrap();
        h.connector.push(InboundEvent::MessageNew(fixtures::message("m3", "c2", "u3")));
        h.connector.push(InboundEvent::MessageRead(MessageRead {
            message_id: "m3".into(),
            read_by: "me".into(),
        }));
        settle().await;

        let c2 = h.store.conversation("c2").unwrap();
        assert!(c2.last_message.unwrap().is_read);
        assert_eq!(c2.unread_count, 1);
    }

    #[tokio::test]
    async fn reactions_replace_previous_one() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        h.store.join_conversation("c1").await.unwrap();

        h.store.react("m1", "👍").await.unwrap();
        h.store.react("m1", "🎉").await.unwrap();

        let message = &h.store.messages("c1").unwrap()[0];
        assert_eq!(message.reactions.len(), 1);
        assert_eq!(message.reaction_by("me").unwrap().emoji, "🎉");
    }

    #[tokio::test(start_paused = true)]
    async fn typing_ignores_self_and_expires() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        for user in ["u2", "me"] {
            h.connector.push(InboundEvent::Typing(TypingUpdate {
                conversation_id: "c1".into(),
                user_id: user.into(),
                is_typing: true,
            }));
        }
        settle().await;
        assert_eq!(h.store.typing_users("c1"), vec!["u2".to_string()]);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(h.store.typing_users("c1").is_empty());
    }

    #[tokio::test]
    async fn set_typing_is_relay_only() {
        let h = harness(MockConnector::new(), two_conversations()).await;
        assert!(h.store.set_typing("c1", true));
        settle().await;
        assert!(h.store.typing_users("c1").is_empty());
        assert_eq!(h.connector.sent().len(), 1);
    }
}
