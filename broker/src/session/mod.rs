//! Session management for tracking connected live clients
//!
//! This module handles:
//! - Tracking all connected client sessions
//! - Per-session subscription state
//! - Heartbeat monitoring and dead session detection

mod connection;
mod manager;

pub use connection::{LiveSession, SessionHandle};
pub use manager::SessionManager;
