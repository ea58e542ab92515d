//! Simulate command implementation.
//!
//! Drives every store through a short scripted session against the
//! in-memory connector and REST collaborator, then prints what a UI would
//! render.

use serde::Serialize;
use solojourn_protocol::{InboundEvent, MessageKind, PostLiked, TypingUpdate};
use solojourn_sync::{
    ClientConfig, MessageStore, MockApi, MockConnector, NotificationStore, PostStore, Presence,
    SessionStorage, SocketClient,
};
use solojourn_testkit::{fixtures, settle, SELF_ID};
use std::sync::Arc;

/// End-of-session snapshot.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Socket id of the live connection.
    pub socket_id: Option<String>,
    /// Connection state.
    pub state: String,
    /// Number of posts loaded.
    pub post_count: usize,
    /// The first few posts.
    pub posts: Vec<PostSummary>,
    /// Conversation summaries.
    pub conversations: Vec<ConversationSummary>,
    /// Number of notifications loaded.
    pub notification_count: usize,
    /// Unread notification counter.
    pub unread_notifications: usize,
    /// Outbound actions the hub received, by wire name.
    pub outbound: Vec<String>,
}

/// Rendered post counters.
#[derive(Debug, Serialize)]
pub struct PostSummary {
    /// Post ID.
    pub id: String,
    /// Like counter.
    pub likes: u32,
    /// Whether the local user liked it.
    pub is_liked: bool,
}

/// Rendered conversation row.
#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    /// Conversation ID.
    pub id: String,
    /// Unread badge.
    pub unread: u32,
    /// Preview text.
    pub last_message: Option<String>,
    /// Loaded message count, if the history was fetched.
    pub messages: Option<usize>,
    /// Users currently typing.
    pub typing: Vec<String>,
}

/// Runs the simulate command.
pub async fn run(post_count: usize, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let connector = MockConnector::new().with_echo();
    let storage = SessionStorage::in_memory();
    storage.set_user_token("simulated-token")?;
    let client = SocketClient::new(
        ClientConfig::default().with_user_id(SELF_ID),
        connector.clone(),
        storage,
    );
    let api = Arc::new(
        MockApi::new(SELF_ID)
            .with_posts(fixtures::feed(post_count))
            .with_conversations(vec![
                fixtures::conversation("c1", "u2"),
                fixtures::conversation("c2", "u3"),
            ])
            .with_messages("c1", vec![fixtures::message("m1", "c1", "u2")])
            .with_notifications(fixtures::notifications(5, 2)),
    );

    let posts = PostStore::new(client.clone(), api.clone());
    let messages = MessageStore::new(client.clone(), api.clone());
    let notifications = NotificationStore::new(client.clone(), api.clone());
    let presence = Presence::new(client.clone());
    let _session = presence.acquire().await;

    // Feed: two pages, a local like and a remote one.
    posts.load(1, false).await?;
    posts.load_more().await?;
    if let Some(first) = posts.posts().first() {
        posts.like(&first.id).await?;
    }
    if api.update_post("p2", |p| p.likes = 3) {
        connector.push(InboundEvent::PostLiked(PostLiked {
            post_id: "p2".into(),
            user_id: "u4".into(),
            likes_count: 3,
        }));
    }

    // Messages: chat in c1, an incoming message in c2.
    messages.load_conversations().await?;
    messages.join_conversation("c1").await?;
    messages
        .send_message("c1", "Landed in Lisbon", MessageKind::Text)
        .await?;
    messages.mark_as_read("m1").await?;
    connector.push(InboundEvent::MessageNew(fixtures::message("m2", "c2", "u3")));
    connector.push(InboundEvent::Typing(TypingUpdate {
        conversation_id: "c1".into(),
        user_id: "u2".into(),
        is_typing: true,
    }));

    // Notifications.
    notifications.load().await?;
    connector.push(InboundEvent::NotificationNew(fixtures::notification("n9", false)));
    notifications.mark_as_read("n1").await?;

    settle().await;

    let rendered = posts.posts();
    let report = SimulationReport {
        socket_id: client.socket_id(),
        state: format!("{:?}", client.state()),
        post_count: rendered.len(),
        posts: rendered
            .iter()
            .take(5)
            .map(|p| PostSummary {
                id: p.id.clone(),
                likes: p.likes,
                is_liked: p.is_liked,
            })
            .collect(),
        conversations: messages
            .conversations()
            .into_iter()
            .map(|c| ConversationSummary {
                messages: messages.messages(&c.id).map(|m| m.len()),
                typing: messages.typing_users(&c.id),
                last_message: c.last_message.map(|m| m.content),
                unread: c.unread_count,
                id: c.id,
            })
            .collect(),
        notification_count: notifications.notifications().len(),
        unread_notifications: notifications.unread_count(),
        outbound: connector
            .sent()
            .iter()
            .map(|e| e.name().to_string())
            .collect(),
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&report);
    }
    Ok(())
}

fn print_text(report: &SimulationReport) {
    println!("SoloJourn simulation");
    println!("====================");
    println!(
        "Socket:        {} ({})",
        report.socket_id.as_deref().unwrap_or("-"),
        report.state
    );
    println!("Posts loaded:  {}", report.post_count);
    for post in &report.posts {
        let marker = if post.is_liked { "*" } else { " " };
        println!("  {marker} {:<6} {:>3} likes", post.id, post.likes);
    }
    println!("Conversations:");
    for conv in &report.conversations {
        println!(
            "    {:<6} unread={} last={:?} typing={:?}",
            conv.id, conv.unread, conv.last_message, conv.typing
        );
    }
    println!(
        "Notifications: {} ({} unread)",
        report.notification_count, report.unread_notifications
    );
    println!("Outbound:      {}", report.outbound.join(", "));
}
