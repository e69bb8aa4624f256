//! Response correlation for outbound live commands
//!
//! This module handles:
//! - Assigning correlation ids and tracking pending requests
//! - Per-request deadlines and the background sweeper
//! - Settling requests exactly once (response, timeout, failure or cancel)

mod timeout;
mod tracker;

pub use timeout::TimeoutSweeper;
pub use tracker::{CorrelationTracker, RequestState, ResponseHandle};
