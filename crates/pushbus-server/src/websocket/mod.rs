//! WebSocket frame normalization and the per-socket session loop.

pub mod normalizer;
pub mod protocol;
pub mod session;

pub use normalizer::MessageNormalizer;
pub use protocol::{
    InboundFrame, SUBPROTOCOL_ATTRIBUTE, SimpleHttpProtocol, WebSocketHandle, WebSocketProtocol,
};
pub use session::run_ws_session;
