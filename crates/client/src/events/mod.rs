//! Live event channel to the matchmaker.
//!
//! This module provides:
//! - An incremental `text/event-stream` decoder
//! - One persistent stream connection with indefinite auto-reconnect
//! - Connection state reporting (connecting / live / disconnected)
//!
//! # Architecture
//!
//! ```text
//!   GET /events ──► SseDecoder ──► ServerEvent::decode
//!                                        │
//!                       ┌────────────────┴────────────────┐
//!                       ▼                                 ▼
//!           ChannelEvent::Snapshot            ChannelEvent::Changed
//!              (replace table)                (re-pull GET /rooms)
//!                       └────────────────┬────────────────┘
//!                                        ▼
//!                                   SyncClient
//! ```
//!
//! The channel never interprets `update` payloads; the owner re-fetches the
//! whole table on every change notification.

mod connection;
mod sse;

pub use connection::{Backoff, ChannelEvent, ConnectionState, EventChannel, ReconnectConfig};
pub use sse::{SseDecoder, SseFrame};
