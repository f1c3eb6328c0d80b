//! `tether chats`, `tether history`, `tether send`.

use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use console::style;
use tether_client::grouping::group_by_local_date;
use tether_client::{CacheState, ChannelStatus, ClientConfig};

use super::signed_in_client;
use crate::output;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Time for the socket writer to flush after the channel is closed.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

pub async fn list(config: ClientConfig, json: bool) -> anyhow::Result<()> {
    let client = signed_in_client(config)?;
    let as_of = Utc::now();
    let conversations = client.api.list_conversations().await?;

    let mut state = CacheState::new(client.api.viewer_id()?);
    state.replace_conversations(conversations, as_of);
    let ordered = state.conversations();

    if json {
        println!("{}", serde_json::to_string_pretty(&ordered)?);
        return Ok(());
    }
    if ordered.is_empty() {
        println!("  No conversations yet.");
        return Ok(());
    }
    println!("{}", output::conversations_table(&ordered));
    Ok(())
}

pub async fn history(config: ClientConfig, peer: String, mark_read: bool, json: bool) -> anyhow::Result<()> {
    let client = signed_in_client(config)?;
    let messages = client.api.fetch_history(&peer).await?;
    if mark_read {
        client.api.mark_read(&peer).await?;
    }

    let groups = group_by_local_date(&messages);
    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }
    if groups.is_empty() {
        println!("  No messages with {peer}.");
        return Ok(());
    }
    output::print_history(&groups);
    Ok(())
}

pub async fn send(config: ClientConfig, peer: String, text: String) -> anyhow::Result<()> {
    let client = signed_in_client(config)?;
    let engine = client.start_sync()?;

    let mut status = engine.channel().status();
    tokio::time::timeout(
        CONNECT_TIMEOUT,
        status.wait_for(|s| *s == ChannelStatus::Connected),
    )
    .await
    .context("timed out connecting to the realtime channel")??;

    let message = engine.send_message(&peer, &text).await?;
    engine.shutdown().await;
    tokio::time::sleep(DRAIN_GRACE).await;

    println!("  {} {}", style("sent").green(), output::message_line(&message));
    Ok(())
}
