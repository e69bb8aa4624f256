//! Live message dispatch and timeout tracking for the broker
//!
//! This module handles:
//! - Forwarding commands to subscribed clients
//! - Routing the first response back to the command's origin
//! - Expiring commands nobody answered and reaping silent sessions

mod dispatcher;
mod timeout;

pub use dispatcher::CommandDispatcher;
pub use timeout::TimeoutTracker;
