use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// What the status line should say.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Connecting,
    Connected,
    Disconnected { retry_in: Option<Duration> },
    Error(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Connecting => write!(f, "connecting…"),
            Status::Connected => write!(f, "connected"),
            Status::Disconnected { retry_in: Some(d) } => {
                write!(f, "disconnected (retry in {:.1}s)", d.as_secs_f64())
            }
            Status::Disconnected { retry_in: None } => write!(f, "disconnected"),
            Status::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    Fixed(Duration),
    /// `base * 2^attempt`, capped; with jitter the delay is drawn from `[d/2, d]`.
    Exponential {
        base: Duration,
        cap: Duration,
        jitter: bool,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed(DEFAULT_RECONNECT_DELAY)
    }
}

#[derive(Debug, Default)]
struct Backoff {
    attempt: u32,
}

impl Backoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_delay(&mut self, policy: &ReconnectPolicy) -> Duration {
        match *policy {
            ReconnectPolicy::Fixed(d) => d,
            ReconnectPolicy::Exponential { base, cap, jitter } => {
                let factor = 1u32.checked_shl(self.attempt.min(16)).unwrap_or(u32::MAX);
                self.attempt = self.attempt.saturating_add(1);
                let d = base.saturating_mul(factor).min(cap);
                if jitter && !d.is_zero() {
                    let half = d / 2;
                    half + rand::thread_rng().gen_range(Duration::ZERO..=d - half)
                } else {
                    d
                }
            }
        }
    }
}

/// Lifecycle of the one logical connection to the engine.
///
/// Only tracks state; opening sockets and arming timers is left to the caller.
#[derive(Debug)]
pub struct SessionConnection {
    state: ConnectionState,
    policy: ReconnectPolicy,
    backoff: Backoff,
    retry_scheduled: bool,
}

impl SessionConnection {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            backoff: Backoff::default(),
            retry_scheduled: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn retry_scheduled(&self) -> bool {
        self.retry_scheduled
    }

    /// Returns true when the caller should open a transport.
    pub fn connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => false,
            ConnectionState::Disconnected => {
                self.state = ConnectionState::Connecting;
                true
            }
        }
    }

    pub fn on_open(&mut self) {
        self.state = ConnectionState::Connected;
        self.backoff.reset();
    }

    /// Returns the delay of the retry to arm, or `None` when one is already pending.
    pub fn on_close(&mut self) -> Option<Duration> {
        self.state = ConnectionState::Disconnected;
        if self.retry_scheduled {
            return None;
        }
        self.retry_scheduled = true;
        Some(self.backoff.next_delay(&self.policy))
    }

    /// The armed retry fired. Returns true when the caller should open a transport.
    pub fn on_retry_elapsed(&mut self) -> bool {
        self.retry_scheduled = false;
        self.connect()
    }
}
