/*
[INPUT]:  WebSocket configuration and task ids
[OUTPUT]: Duplex progress streams and decoded server frames
[POS]:    WebSocket layer - real-time data streams
[UPDATE]: When adding new frame types or changing connection logic
*/

pub mod client;
pub mod message;
pub mod stream;

pub use client::WsConnector;
pub use message::{HEARTBEAT_SENTINEL, ServerFrame, decode_frame};
pub use stream::{DuplexStream, InboundFrame, StreamConnector};
