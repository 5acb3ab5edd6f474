use crate::connection::Status;
use crate::controller::{Effect, Session, SessionEvent};
use crate::error::SessionError;
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const COMMAND_CAP: usize = 32;
const EVENT_CAP: usize = 256;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub enum UiCommand {
    Connect,
    Submit(String),
    HistoryPrior,
    HistoryNext,
    ListHistory,
    Shutdown,
}

/// What the terminal (or any other front end) should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Status(Status),
    SubmitEnabled(bool),
    /// A request is in flight.
    Pending,
    Result(String),
    OrphanResult(String),
    Draft(String),
    History(Vec<String>),
}

#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<UiCommand>,
}

impl SessionHandle {
    pub async fn submit(&self, expr: impl Into<String>) -> Result<(), SessionError> {
        self.send(UiCommand::Submit(expr.into())).await
    }

    pub async fn history_prior(&self) -> Result<(), SessionError> {
        self.send(UiCommand::HistoryPrior).await
    }

    pub async fn history_next(&self) -> Result<(), SessionError> {
        self.send(UiCommand::HistoryNext).await
    }

    pub async fn list_history(&self) -> Result<(), SessionError> {
        self.send(UiCommand::ListHistory).await
    }

    pub async fn connect(&self) -> Result<(), SessionError> {
        self.send(UiCommand::Connect).await
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(UiCommand::Shutdown).await
    }

    async fn send(&self, cmd: UiCommand) -> Result<(), SessionError> {
        self.tx.send(cmd).await.map_err(|_| SessionError::ActorGone)
    }
}

/// Spawns the session actor on the current tokio runtime. It connects right away.
pub fn spawn(session: Session, ws_url: Url) -> (SessionHandle, mpsc::Receiver<UiEvent>, JoinHandle<()>) {
    spawn_with_connect_timeout(session, ws_url, CONNECT_TIMEOUT)
}

pub fn spawn_with_connect_timeout(
    session: Session,
    ws_url: Url,
    connect_timeout: Duration,
) -> (SessionHandle, mpsc::Receiver<UiEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_CAP);
    let (events_tx, events_rx) = mpsc::channel(EVENT_CAP);
    let join = tokio::spawn(run(session, ws_url, connect_timeout, rx, events_tx));
    (SessionHandle { tx }, events_rx, join)
}

/// Owns the socket, the retry timer and the session; every input is serialized here.
pub async fn run(
    mut session: Session,
    ws_url: Url,
    connect_timeout: Duration,
    mut rx: mpsc::Receiver<UiCommand>,
    events: mpsc::Sender<UiEvent>,
) {
    let mut socket: Option<WsStream> = None;
    let mut retry: Option<Pin<Box<Sleep>>> = None;
    let mut queue: VecDeque<SessionEvent> = VecDeque::from([SessionEvent::Connect]);

    loop {
        while let Some(event) = queue.pop_front() {
            for effect in session.handle(event) {
                match effect {
                    Effect::OpenTransport => {
                        tracing::debug!(url = %ws_url, "opening session socket");
                        let attempt = tokio::time::timeout(
                            connect_timeout,
                            tokio_tungstenite::connect_async(ws_url.as_str()),
                        )
                        .await;
                        let failure = match attempt {
                            Ok(Ok((ws, _))) => {
                                socket = Some(ws);
                                queue.push_back(SessionEvent::Opened);
                                None
                            }
                            Ok(Err(e)) => Some(e.to_string()),
                            Err(_) => Some(format!(
                                "connect timed out after {}ms",
                                connect_timeout.as_millis()
                            )),
                        };
                        if let Some(msg) = failure {
                            queue.push_back(SessionEvent::TransportError(msg));
                            queue.push_back(SessionEvent::Closed);
                        }
                    }
                    Effect::Send(frame) => {
                        let Some(ws) = socket.as_mut() else {
                            queue.push_back(SessionEvent::Closed);
                            continue;
                        };
                        if let Err(e) = ws.send(Message::Text(frame.into())).await {
                            socket = None;
                            queue.push_back(SessionEvent::TransportError(e.to_string()));
                            queue.push_back(SessionEvent::Closed);
                        }
                    }
                    Effect::ScheduleReconnect(delay) => {
                        retry = Some(Box::pin(tokio::time::sleep(delay)));
                    }
                    Effect::Status(s) => emit(&events, UiEvent::Status(s)).await,
                    Effect::SubmitEnabled(on) => emit(&events, UiEvent::SubmitEnabled(on)).await,
                    Effect::Pending => emit(&events, UiEvent::Pending).await,
                    Effect::Display(t) => emit(&events, UiEvent::Result(t)).await,
                    Effect::DisplayOrphan(t) => emit(&events, UiEvent::OrphanResult(t)).await,
                    Effect::SetDraft(t) => emit(&events, UiEvent::Draft(t)).await,
                }
            }
        }

        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    Some(UiCommand::Connect) => queue.push_back(SessionEvent::Connect),
                    Some(UiCommand::Submit(text)) => queue.push_back(SessionEvent::Submit(text)),
                    Some(UiCommand::HistoryPrior) => queue.push_back(SessionEvent::HistoryPrior),
                    Some(UiCommand::HistoryNext) => queue.push_back(SessionEvent::HistoryNext),
                    Some(UiCommand::ListHistory) => {
                        let entries = session.history().entries().to_vec();
                        emit(&events, UiEvent::History(entries)).await;
                    }
                    Some(UiCommand::Shutdown) | None => {
                        if let Some(mut ws) = socket.take() {
                            let _ = ws.close(None).await;
                        }
                        tracing::debug!("session actor stopped");
                        return;
                    }
                }
            }
            incoming = next_frame(&mut socket) => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        queue.push_back(SessionEvent::Frame(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        queue.push_back(SessionEvent::Frame(String::from_utf8_lossy(&bytes).into_owned()));
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        socket = None;
                        queue.push_back(SessionEvent::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        socket = None;
                        queue.push_back(SessionEvent::TransportError(e.to_string()));
                        queue.push_back(SessionEvent::Closed);
                    }
                }
            }
            () = retry_elapsed(&mut retry) => {
                retry = None;
                queue.push_back(SessionEvent::RetryElapsed);
            }
        }
    }
}

async fn next_frame(
    socket: &mut Option<WsStream>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket.as_mut() {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn retry_elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn emit(events: &mpsc::Sender<UiEvent>, event: UiEvent) {
    // Front end may have gone away; the session keeps running.
    let _ = events.send(event).await;
}
