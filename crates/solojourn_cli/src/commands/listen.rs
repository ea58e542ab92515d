//! Listen command implementation.

use super::token::open_storage;
use solojourn_protocol::{encode_inbound, EventKind, InboundEvent};
use solojourn_sync::{ClientConfig, SocketClient, WsConnector};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Runs the listen command.
pub async fn run(
    store: &Path,
    url: Option<String>,
    duration: Option<u64>,
    join: &[String],
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let storage = open_storage(store)?;
    if storage.user_token()?.is_none() {
        return Err(format!(
            "No token stored in {}; run `solojourn token set <token>` first",
            store.display()
        )
        .into());
    }

    let mut config = ClientConfig::from_env();
    if let Some(url) = url {
        config.socket_url = url;
    }
    let connector = WsConnector::new(config.connect_timeout);
    let client = SocketClient::new(config, connector, storage);

    let json = format == "json";
    for kind in EventKind::ALL {
        client.on(kind, move |event| print_event(event, json));
    }

    client.connect().await;
    if client.is_connected() {
        for conversation in join {
            client.join_conversation(conversation);
        }
    }

    match duration {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    info!(state = ?client.state(), "shutting down");
    client.disconnect();
    Ok(())
}

fn print_event(event: &InboundEvent, json: bool) {
    if !json {
        info!(event = %event.kind(), "{:?}", event);
        return;
    }
    // Lifecycle events have no wire form.
    match encode_inbound(event) {
        Ok(frame) => println!("{frame}"),
        Err(_) => println!(
            "{}",
            serde_json::json!({ "event": event.kind().as_str(), "local": true })
        ),
    }
}
