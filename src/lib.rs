//! Hashmato terminal core.
//!
//! Offline-tolerant order handling for the POS and kiosk screens: a local
//! SQLite cache of the menu and of every order taken on this terminal, a
//! background engine that pulls menu changes and pushes unsynced orders, and
//! a WebSocket channel that tells the screens when to re-fetch.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod escpos;
pub mod logging;
pub mod menu;
pub mod models;
pub mod orders;
pub mod peripherals;
pub mod realtime;
pub mod submission;
pub mod sync;
pub mod terminal;

#[cfg(test)]
mod testing;

pub use api::{ApiClient, Backend};
pub use config::TerminalConfig;
pub use error::{ApiError, ParseError, PeripheralError, StorageError, TerminalError};
pub use realtime::{Subscription, UpdateChannel};
pub use submission::{OrderSubmitter, Placement, PlacedOrder};
pub use sync::{SyncEngine, SyncHandle};
pub use terminal::Terminal;
