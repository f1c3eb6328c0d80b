//! Terminal rendering for conversations and message histories.

use chrono::{DateTime, Local, Utc};
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use console::style;
use tether_client::DateGroup;
use tether_protocol::{Conversation, Direction, Message};

const PREVIEW_CHARS: usize = 48;

pub fn conversations_table(conversations: &[Conversation]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Peer", "Last message", "When", "Unread"]);

    for conversation in conversations {
        let (preview, when) = match &conversation.last_message {
            Some(message) => (preview(message), relative_time(message.created_at)),
            None => ("-".to_string(), "-".to_string()),
        };
        let unread = if conversation.unread_count > 0 {
            Cell::new(conversation.unread_count).fg(Color::Yellow)
        } else {
            Cell::new("")
        };
        table.add_row(vec![
            Cell::new(conversation.title()),
            Cell::new(preview),
            Cell::new(when),
            unread,
        ]);
    }
    table
}

pub fn print_history(groups: &[DateGroup]) {
    for group in groups {
        println!();
        println!("  {}", style(&group.label).bold().underlined());
        for message in &group.messages {
            println!("  {}", message_line(message));
        }
    }
    println!();
}

pub fn message_line(message: &Message) -> String {
    let time = message.created_at.with_timezone(&Local).format("%H:%M");
    match message.direction {
        Direction::Outbound => format!("{} {} {}", style(time).dim(), style("→").cyan(), message.text),
        Direction::Inbound => format!("{} {} {}", style(time).dim(), style("←").green(), message.text),
    }
}

fn preview(message: &Message) -> String {
    let prefix = match message.direction {
        Direction::Outbound => "you: ",
        Direction::Inbound => "",
    };
    let mut text: String = message.text.chars().take(PREVIEW_CHARS).collect();
    if message.text.chars().count() > PREVIEW_CHARS {
        text.push('…');
    }
    format!("{prefix}{text}")
}

fn relative_time(at: DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(at);
    if elapsed.num_minutes() < 1 {
        "just now".to_string()
    } else if elapsed.num_hours() < 1 {
        format!("{}m ago", elapsed.num_minutes())
    } else if elapsed.num_days() < 1 {
        format!("{}h ago", elapsed.num_hours())
    } else {
        at.with_timezone(&Local).format("%b %-d").to_string()
    }
}
