//! `tether watch`: follow live messages until interrupted.

use std::time::Duration;

use console::style;
use tether_client::{AuthEvent, CacheChange, ClientConfig, ClientError, LiveOutcome};
use tether_protocol::Message;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::signed_in_client;
use crate::output;

pub async fn run(config: ClientConfig, peer: Option<String>, refetch_secs: u64) -> anyhow::Result<()> {
    let client = signed_in_client(config)?;
    let engine = client.start_sync()?;
    let mut changes = engine.cache().subscribe();
    let mut auth_events = engine.api().client().coordinator().subscribe();

    let snapshot = engine.refresh_conversations().await?;
    if !snapshot.conversations.is_empty() {
        println!("{}", output::conversations_table(&snapshot.conversations));
    }
    if let Some(peer) = peer.as_deref() {
        let snapshot = engine.open_conversation(peer).await?;
        output::print_history(&snapshot.local_date_groups(peer));
    }
    println!(
        "  {} (Ctrl-C to stop)",
        style("Watching for new messages").dim()
    );

    let mut refetch = tokio::time::interval(Duration::from_secs(refetch_secs.max(5)));
    refetch.tick().await;

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(CacheChange::Live { peer, outcome, message }) => {
                    if outcome != LiveOutcome::Confirmed {
                        println!("{}", live_line(&peer, &message));
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        component = "cli",
                        event = "watch.lagged",
                        skipped,
                        "Change stream lagged, refetching"
                    );
                    engine.refresh_conversations().await?;
                }
                Err(RecvError::Closed) => break,
            },
            event = auth_events.recv() => {
                if let Ok(AuthEvent::SessionTerminated) = event {
                    engine.shutdown().await;
                    return Err(ClientError::SessionTerminated.into());
                }
            },
            _ = refetch.tick() => {
                if !engine.channel().is_connected() {
                    println!("  {}", style("realtime offline, refetching conversations").yellow());
                    engine.refresh_conversations().await?;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn live_line(peer: &str, message: &Message) -> String {
    format!("  {} {}", style(format!("[{peer}]")).bold(), output::message_line(message))
}
