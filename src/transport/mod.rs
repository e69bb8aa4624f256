pub mod memory;
pub mod outbox;
pub mod tcp;
pub mod traits;

pub use memory::{MemoryInjector, MemoryPeer, MemoryTransport};
pub use outbox::Outbox;
pub use tcp::{TcpTransport, TcpTransportConfig};
pub use traits::{LiveTransport, TransportEvent, TransportEvents};
