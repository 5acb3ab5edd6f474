use std::net::SocketAddr;

pub const INBOUND_CAP: usize = 256;
pub const OUTBOUND_CAP: usize = 256;

pub enum InboundMsg {
    ClientConnected { socket_addr: SocketAddr },
    ClientDisconnected,
    Request { req: EvalRequest },
}

pub enum OutboundMsg {
    Send { frame: String },
    CloseClient,
}

pub use kdbzph_protocol::{EvalRequest, ResponseEnvelope};
