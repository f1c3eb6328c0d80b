//! Tether Protocol
//!
//! Shared types for communication between Tether clients and the chat backend.
//! REST bodies and realtime frames are serialized as JSON.

use uuid::Uuid;

pub mod client;
pub mod rest;
pub mod server;
pub mod types;

pub use client::ClientEvent;
pub use server::{NewMessage, ServerEvent, ServerEventKind};
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
