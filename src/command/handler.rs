//! Handler capability for live commands

use super::answer::Answer;
use super::model::Command;

/// Result of one handler invocation; an `Err` becomes an error response
pub type HandlerResult = anyhow::Result<Answer>;

/// Answers one class of live commands
///
/// Handlers run on the router's blocking worker pool, so they may block
/// without stalling inbound delivery. Any `Fn(Command) -> HandlerResult`
/// closure is a handler.
pub trait LiveCommandHandler: Send + Sync + 'static {
    fn handle(&self, command: Command) -> HandlerResult;
}

impl<F> LiveCommandHandler for F
where
    F: Fn(Command) -> HandlerResult + Send + Sync + 'static,
{
    fn handle(&self, command: Command) -> HandlerResult {
        self(command)
    }
}
