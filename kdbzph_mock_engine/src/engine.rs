use crate::protocol::{EvalRequest, InboundMsg, OutboundMsg, ResponseEnvelope};
use crate::script::{self, Reply};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::net::SocketAddr;

/// Drains requests from the network thread and answers them per the script.
pub struct Engine {
    inbound_rx: Receiver<InboundMsg>,
    outbound_tx: Sender<OutboundMsg>,
    client: Option<SocketAddr>,
    served: u64,
}

impl Engine {
    pub fn new(inbound_rx: Receiver<InboundMsg>, outbound_tx: Sender<OutboundMsg>) -> Self {
        Self {
            inbound_rx,
            outbound_tx,
            client: None,
            served: 0,
        }
    }

    pub fn served(&self) -> u64 {
        self.served
    }

    pub fn tick(&mut self) {
        loop {
            match self.inbound_rx.try_recv() {
                Ok(InboundMsg::ClientConnected { socket_addr }) => {
                    self.client = Some(socket_addr);
                }
                Ok(InboundMsg::ClientDisconnected) => {
                    self.client = None;
                }
                Ok(InboundMsg::Request { req }) => self.answer(req),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn answer(&mut self, req: EvalRequest) {
        self.served += 1;
        let reply = script::evaluate(&req.expr);
        tracing::debug!(id = %req.id, ?reply, client = ?self.client, "evaluated");

        match reply {
            Reply::Result(v) => self.send(&ResponseEnvelope::success(Some(req.id), v)),
            Reply::Failure(msg) => self.send(&ResponseEnvelope::failure(Some(req.id), msg)),
            Reply::Twice(v) => {
                let env = ResponseEnvelope::success(Some(req.id), v);
                self.send(&env);
                self.send(&env);
            }
            Reply::NoId(v) => self.send(&ResponseEnvelope::success(None, v)),
            Reply::WrongId(v) => {
                self.send(&ResponseEnvelope::success(Some(format!("{}0", req.id)), v))
            }
            Reply::Garbage => self.try_send(OutboundMsg::Send {
                frame: script::GARBAGE_FRAME.to_string(),
            }),
            Reply::Silent => {}
            Reply::Drop => self.try_send(OutboundMsg::CloseClient),
        }
    }

    fn send(&mut self, env: &ResponseEnvelope) {
        match serde_json::to_string(env) {
            Ok(frame) => self.try_send(OutboundMsg::Send { frame }),
            Err(e) => tracing::warn!(error = %e, "failed to encode reply"),
        }
    }

    pub fn try_send(&mut self, msg: OutboundMsg) {
        let _ = self.outbound_tx.try_send(msg);
    }
}
