use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,
    #[error("request {0} still outstanding")]
    RequestOutstanding(String),
    #[error("frame encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("session actor unavailable")]
    ActorGone,
}
