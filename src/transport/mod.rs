//! Command Transport: the HTTP-to-WebSocket bridge, the Proxy's Executor
//! Registry and Document Lock Manager, and the wire protocol between them
//! (§4.1, §4.2, §6).

pub mod bridge;
pub mod idempotency;
pub mod lock;
pub mod protocol;
pub mod proxy;
pub mod registry;

pub use bridge::{Bridge, BridgeState};
pub use protocol::{ClientFrame, CommandPacket, PacketResponse, PacketStatus, ServerFrame};
pub use proxy::{Proxy, ProxyState};
pub use registry::{ExecutorRegistration, ExecutorRegistry, Role};
