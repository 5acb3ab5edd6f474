//! Submission controller: the session state machine.
//!
//! `Session::handle` is the whole transition table. It never touches a socket
//! or a timer; it returns [`Effect`]s for the driver (see `ws_actor`) to carry
//! out, and the driver feeds transport outcomes back in as [`SessionEvent`]s.
//!
//! ```text
//! Idle --submit--> Awaiting --response--------> Idle
//!                           --connection lost--> Idle (submission re-enabled on reconnect)
//! ```

use crate::config::OrphanPolicy;
use crate::connection::{ConnectionState, ReconnectPolicy, SessionConnection, Status};
use crate::correlator::{Correlation, PendingRequest, RequestCorrelator};
use crate::error::SessionError;
use crate::history::HistoryStore;
use crate::render;
use kdbzph_protocol::{EvalRequest, ResponseEnvelope};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitState {
    Idle,
    Awaiting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Open the connection if it is not already open or opening.
    Connect,
    /// The armed reconnect delay elapsed.
    RetryElapsed,
    Opened,
    Frame(String),
    Closed,
    TransportError(String),
    Submit(String),
    HistoryPrior,
    HistoryNext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Status(Status),
    OpenTransport,
    ScheduleReconnect(Duration),
    Send(String),
    SubmitEnabled(bool),
    /// A request went out; show the waiting placeholder.
    Pending,
    Display(String),
    /// A reply that arrived with nothing pending.
    DisplayOrphan(String),
    SetDraft(String),
}

pub struct Session {
    connection: SessionConnection,
    correlator: RequestCorrelator,
    history: HistoryStore,
    state: SubmitState,
    pending: Option<PendingRequest>,
    orphans: OrphanPolicy,
}

impl Session {
    pub fn new(history: HistoryStore, reconnect: ReconnectPolicy, orphans: OrphanPolicy) -> Self {
        Self {
            connection: SessionConnection::new(reconnect),
            correlator: RequestCorrelator::new(),
            history,
            state: SubmitState::Idle,
            pending: None,
            orphans,
        }
    }

    pub fn state(&self) -> SubmitState {
        self.state
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn can_submit(&self) -> bool {
        self.connection.is_connected() && self.state == SubmitState::Idle
    }

    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        match event {
            SessionEvent::Connect => self.connect(),
            SessionEvent::RetryElapsed => {
                if self.connection.on_retry_elapsed() {
                    vec![Effect::Status(Status::Connecting), Effect::OpenTransport]
                } else {
                    Vec::new()
                }
            }
            SessionEvent::Opened => self.on_open(),
            SessionEvent::Frame(text) => self.on_frame(&text),
            SessionEvent::Closed => self.on_close(),
            SessionEvent::TransportError(msg) => {
                tracing::warn!(error = %msg, "transport error");
                vec![Effect::Status(Status::Error(msg))]
            }
            SessionEvent::Submit(text) => match self.submit(&text) {
                Ok(effects) => effects,
                Err(e) => {
                    tracing::debug!(error = %e, "submission refused");
                    Vec::new()
                }
            },
            SessionEvent::HistoryPrior => vec![Effect::SetDraft(self.history.prior())],
            SessionEvent::HistoryNext => vec![Effect::SetDraft(self.history.next())],
        }
    }

    pub fn connect(&mut self) -> Vec<Effect> {
        if self.connection.connect() {
            vec![Effect::Status(Status::Connecting), Effect::OpenTransport]
        } else {
            Vec::new()
        }
    }

    /// Blank input is answered locally. Otherwise requires Connected and Idle;
    /// a refusal leaves every piece of state untouched.
    pub fn submit(&mut self, text: &str) -> Result<Vec<Effect>, SessionError> {
        let expr = text.trim();
        if expr.is_empty() {
            return Ok(vec![Effect::Display(render::EMPTY_EXPRESSION.to_string())]);
        }
        if !self.connection.is_connected() {
            return Err(SessionError::NotConnected);
        }
        if let Some(p) = &self.pending {
            return Err(SessionError::RequestOutstanding(p.id.clone()));
        }

        let id = self.correlator.next_id();
        let frame = serde_json::to_string(&EvalRequest {
            id: id.clone(),
            expr: expr.to_string(),
        })?;

        if let Err(e) = self.history.record(expr) {
            tracing::warn!(error = %e, "history not persisted");
        }
        tracing::debug!(%id, "submitting");
        self.pending = Some(PendingRequest {
            id,
            expr: expr.to_string(),
        });
        self.state = SubmitState::Awaiting;

        Ok(vec![
            Effect::SubmitEnabled(false),
            Effect::Pending,
            Effect::Send(frame),
        ])
    }

    fn on_open(&mut self) -> Vec<Effect> {
        self.connection.on_open();
        tracing::info!("session connected");
        vec![
            Effect::Status(Status::Connected),
            Effect::SubmitEnabled(self.can_submit()),
        ]
    }

    fn on_close(&mut self) -> Vec<Effect> {
        let retry = self.connection.on_close();
        if let Some(p) = self.pending.take() {
            tracing::warn!(id = %p.id, "connection lost with request outstanding; discarding it");
        }
        self.state = SubmitState::Idle;

        let mut effects = vec![
            Effect::Status(Status::Disconnected { retry_in: retry }),
            Effect::SubmitEnabled(false),
        ];
        if let Some(delay) = retry {
            tracing::info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
            effects.push(Effect::ScheduleReconnect(delay));
        }
        effects
    }

    fn on_frame(&mut self, text: &str) -> Vec<Effect> {
        let envelope: ResponseEnvelope = match serde_json::from_str(text) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, "malformed frame");
                return vec![Effect::Display(render::render_parse_error(e))];
            }
        };

        match self.correlator.correlate(self.pending.as_ref(), &envelope) {
            Correlation::Matched => {
                self.pending = None;
                self.state = SubmitState::Idle;
                // Result first, so a front end waiting on re-enable has already shown it.
                vec![
                    Effect::Display(render::render_envelope(&envelope)),
                    Effect::SubmitEnabled(self.can_submit()),
                ]
            }
            Correlation::Orphaned => match self.orphans {
                OrphanPolicy::Display => {
                    tracing::info!(id = ?envelope.id, "orphaned reply displayed");
                    vec![Effect::DisplayOrphan(render::render_envelope(&envelope))]
                }
                OrphanPolicy::Discard => {
                    tracing::warn!(id = ?envelope.id, "orphaned reply discarded");
                    Vec::new()
                }
            },
            Correlation::Mismatched { expected, got } => {
                tracing::warn!(%expected, ?got, "reply id mismatch");
                vec![Effect::Display(render::render_parse_error(format!(
                    "response id {} does not match pending request {expected}",
                    got.as_deref().unwrap_or("<missing>")
                )))]
            }
        }
    }
}
