mod engine;
mod net;
mod protocol;
pub mod script;

pub use crate::engine::Engine;
pub use crate::net::NetworkThread;
pub use crate::protocol::{InboundMsg, OutboundMsg, INBOUND_CAP, OUTBOUND_CAP};

use crossbeam_channel::bounded;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

pub const TICK_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network thread plus a ticking engine thread. Stops on drop.
pub struct MockEngine {
    net: NetworkThread,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MockEngine {
    pub fn spawn(addr: &str) -> Result<Self, EngineError> {
        let (in_tx, in_rx) = bounded(INBOUND_CAP);
        let (out_tx, out_rx) = bounded(OUTBOUND_CAP);
        let net = NetworkThread::spawn_with_addr(addr, in_tx, out_rx)?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let worker = thread::spawn(move || {
            let mut engine = Engine::new(in_rx, out_tx);
            while !stop_for_thread.load(Ordering::Relaxed) {
                engine.tick();
                thread::sleep(TICK_INTERVAL);
            }
        });

        Ok(Self {
            net,
            stop,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.net.listen_addr()
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.listen_addr())
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Ok(mut w) = self.worker.lock() {
            if let Some(w) = w.take() {
                let _ = w.join();
            }
        }
        self.net.shutdown();
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
