use crate::protocol::{EvalRequest, InboundMsg, OutboundMsg, ResponseEnvelope};
use crate::EngineError;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::protocol::Message;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(500);
const POLL_TIMEOUT: Duration = Duration::from_millis(30);

struct ActiveClient {
    ws: tungstenite::WebSocket<TcpStream>,
    socket_addr: SocketAddr,
}

/// Websocket listener on its own thread. One active client at a time; a new
/// client replaces the previous one.
pub struct NetworkThread {
    listen_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkThread {
    pub fn spawn_with_addr(
        addr: &str,
        in_tx: Sender<InboundMsg>,
        out_rx: Receiver<OutboundMsg>,
    ) -> Result<Self, EngineError> {
        let listener = TcpListener::bind(addr).map_err(|source| EngineError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let listen_addr = listener.local_addr()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_for_thread = Arc::clone(&shutdown);
        let join_handle =
            thread::spawn(move || run_server(listener, in_tx, out_rx, shutdown_for_thread));

        tracing::info!(%listen_addr, "mock engine listening");
        Ok(Self {
            listen_addr,
            shutdown,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Ok(mut h) = self.join_handle.lock() {
            if let Some(h) = h.take() {
                let _ = h.join();
            }
        }
    }
}

impl Drop for NetworkThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_server(
    listener: TcpListener,
    in_tx: Sender<InboundMsg>,
    out_rx: Receiver<OutboundMsg>,
    shutdown: Arc<AtomicBool>,
) {
    let mut active: Option<ActiveClient> = None;

    while !shutdown.load(Ordering::Relaxed) {
        loop {
            match listener.accept() {
                Ok((stream, socket_addr)) => {
                    // Some platforms hand out sockets that inherit the listener's nonblocking flag.
                    let _ = stream.set_nonblocking(false);
                    let _ = stream.set_nodelay(true);
                    let _ = stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT));
                    let _ = stream.set_write_timeout(Some(Duration::from_millis(200)));

                    let ws = match tungstenite::accept(stream) {
                        Ok(ws) => ws,
                        Err(e) => {
                            tracing::warn!(error = %e, "ws handshake failed");
                            continue;
                        }
                    };
                    let _ = ws.get_ref().set_read_timeout(Some(POLL_TIMEOUT));

                    if let Some(mut prev) = active.take() {
                        tracing::info!(addr = %prev.socket_addr, "replacing active client");
                        let _ = prev.ws.close(None);
                        let _ = prev.ws.flush();
                        let _ = in_tx.try_send(InboundMsg::ClientDisconnected);
                    }

                    tracing::info!(%socket_addr, "client connected");
                    let _ = in_tx.try_send(InboundMsg::ClientConnected { socket_addr });
                    active = Some(ActiveClient { ws, socket_addr });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "ws accept failed");
                    break;
                }
            }
        }

        if let Some(client) = active.as_mut() {
            loop {
                match out_rx.try_recv() {
                    Ok(OutboundMsg::Send { frame }) => {
                        if client.ws.send(Message::Text(frame.into())).is_err() {
                            drop_client(&mut active, &in_tx);
                            break;
                        }
                    }
                    Ok(OutboundMsg::CloseClient) => {
                        tracing::info!(addr = %client.socket_addr, "closing client on request");
                        let _ = client.ws.close(None);
                        let _ = client.ws.flush();
                        drop_client(&mut active, &in_tx);
                        break;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }
        } else {
            // Replies for a client that already left are stale.
            while out_rx.try_recv().is_ok() {}
        }

        if let Some(client) = active.as_mut() {
            match client.ws.read() {
                Ok(msg) => {
                    if handle_inbound(&in_tx, client, msg).is_err() {
                        drop_client(&mut active, &in_tx);
                    }
                }
                Err(tungstenite::Error::Io(e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    tracing::info!(error = %e, "client read ended");
                    drop_client(&mut active, &in_tx);
                }
            }
        } else {
            thread::sleep(Duration::from_millis(25));
        }
    }

    if let Some(mut client) = active {
        let _ = client.ws.close(None);
        let _ = client.ws.flush();
    }
}

fn drop_client(active: &mut Option<ActiveClient>, in_tx: &Sender<InboundMsg>) {
    if let Some(client) = active.take() {
        tracing::info!(addr = %client.socket_addr, "client disconnected");
    }
    let _ = in_tx.try_send(InboundMsg::ClientDisconnected);
}

fn handle_inbound(
    in_tx: &Sender<InboundMsg>,
    client: &mut ActiveClient,
    msg: Message,
) -> Result<(), ()> {
    let text = match msg {
        Message::Text(s) => s,
        Message::Binary(_) => return Ok(()),
        Message::Ping(payload) => {
            let _ = client.ws.send(Message::Pong(payload));
            return Ok(());
        }
        Message::Pong(_) => return Ok(()),
        Message::Close(_) => return Err(()),
        Message::Frame(_) => return Ok(()),
    };

    let req: EvalRequest = match serde_json::from_str(text.as_str()) {
        Ok(r) => r,
        Err(_) => {
            let _ = send_envelope(
                &mut client.ws,
                &ResponseEnvelope::failure(None, Some("invalid request".to_string())),
            );
            return Ok(());
        }
    };

    if in_tx.try_send(InboundMsg::Request { req: req.clone() }).is_err() {
        let _ = send_envelope(
            &mut client.ws,
            &ResponseEnvelope::failure(Some(req.id), Some("engine busy".to_string())),
        );
    }

    Ok(())
}

fn send_envelope(
    ws: &mut tungstenite::WebSocket<TcpStream>,
    env: &ResponseEnvelope,
) -> Result<(), ()> {
    let payload = serde_json::to_string(env).map_err(|_| ())?;
    ws.send(Message::Text(payload.into())).map_err(|_| ())
}
