/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public dashboard adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod http;
pub mod types;
pub mod ws;

// Re-export commonly used types from http
pub use http::{AdapterError, ClientConfig, DashboardClient, Result, TaskApi};

// Re-export all types
pub use types::*;

// Re-export commonly used types from ws
pub use ws::{
    DuplexStream,
    HEARTBEAT_SENTINEL,
    InboundFrame,
    ServerFrame,
    StreamConnector,
    WsConnector,
    decode_frame,
};
