//! Live-command client core for Things
//!
//! Routes inbound live commands to registered handlers and correlates
//! outbound commands with their responses over a [`LiveTransport`].
//!
//! ```no_run
//! use things_live::{ClientConfig, LiveClient, ResponseFactory, EventFactory, HandlerResult, Command};
//! use things_live::transport::{TcpTransport, TcpTransportConfig};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let (transport, events) = TcpTransport::connect(TcpTransportConfig::default());
//! let client = LiveClient::new(ClientConfig::new("device"), transport, events);
//! client
//!     .for_feature("org.example:lamp", "temp-sensor")
//!     .handle_modify_feature_property_commands(|cmd: Command| -> HandlerResult {
//!         Ok(cmd
//!             .answer()
//!             .with_response(ResponseFactory::modified)
//!             .with_event(EventFactory::modified)
//!             .build())
//!     })
//!     .await;
//! client.start_consumption().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod command;
pub mod config;
pub mod consumption;
pub mod correlation;
pub mod error;
pub mod live;
pub mod transport;

pub use client::LiveClient;
pub use command::{
    Answer, Command, Event, EventFactory, HandlerKey, HandlerResult, LiveCommandHandler,
    RegistrationHandle, Response, ResponseFactory,
};
pub use config::ClientConfig;
pub use consumption::ConsumptionState;
pub use correlation::{RequestState, ResponseHandle};
pub use error::{LiveError, TransportError};
pub use live::{FeatureLive, ThingLive};
pub use transport::LiveTransport;
