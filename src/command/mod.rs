//! Live command handling for a client
//!
//! This module handles:
//! - Decoded command, response and event values
//! - Handler registration and lookup
//! - Routing commands to handlers and emitting their answers

pub mod answer;
mod handler;
mod model;
mod registry;
mod router;

pub use answer::{Answer, AnswerBuilder, EventFactory, ResponseFactory};
pub use handler::{HandlerResult, LiveCommandHandler};
pub use model::{Command, Event, Response};
pub use registry::{CommandRegistry, HandlerKey, RegistrationHandle};
pub use router::{CommandRouter, RouteOutcome, RouterStatsSnapshot};
